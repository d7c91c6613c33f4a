use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;

use slate_array::{read_header, Descriptor, StorePaths};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Describe(args) => cmd_describe(&args.store, &cli.format),
        Command::Entries(args) => cmd_entries(&args.store, &cli.format),
        Command::Verify(args) => cmd_verify(&args.store, &cli.format),
    }
}

#[derive(Serialize)]
struct DescribeReport<'a> {
    dtype: slate_array::DType,
    shape: &'a [u64],
    length: u64,
    row_stride: u64,
    capacity_rows: u64,
    data_bytes: u64,
    entry_count: usize,
}

fn cmd_describe(store: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let descriptor = read_header(store)?;
    let data_bytes = data_file_len(store)?;
    let stride = descriptor.row_stride();
    let capacity_rows = if stride == 0 { 0 } else { data_bytes / stride };

    let report = DescribeReport {
        dtype: descriptor.dtype,
        shape: &descriptor.shape,
        length: descriptor.length(),
        row_stride: stride,
        capacity_rows,
        data_bytes,
        entry_count: descriptor.entries.len(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("dtype:     {}", report.dtype.to_string().cyan());
            println!("shape:     {:?}", report.shape);
            println!("length:    {} rows", report.length.to_string().bold());
            println!(
                "capacity:  {} rows ({} bytes on disk)",
                report.capacity_rows, report.data_bytes
            );
            println!("entries:   {}", report.entry_count);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct EntryReport<'a> {
    name: &'a str,
    start: u64,
    end: u64,
    rows: u64,
}

fn cmd_entries(store: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let descriptor = read_header(store)?;
    let reports: Vec<EntryReport<'_>> = descriptor
        .entries
        .iter()
        .map(|e| EntryReport {
            name: &e.name,
            start: e.start,
            end: e.end,
            rows: e.end - e.start,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("No entries.");
                return Ok(());
            }
            for entry in &reports {
                println!(
                    "{}  [{}, {})  {} rows",
                    entry.name.yellow(),
                    entry.start,
                    entry.end,
                    entry.rows
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

#[derive(Serialize)]
struct VerifyReport {
    valid: bool,
    checks: Vec<Check>,
}

fn cmd_verify(store: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    // Decoding already enforces magic, version, checksum, and field bounds.
    let descriptor = read_header(store)?;
    let data_bytes = data_file_len(store)?;

    let mut checks = vec![Check {
        name: "header",
        ok: true,
        detail: "magic, version, and checksum valid".into(),
    }];
    checks.push(check_disjoint(&descriptor));
    checks.push(check_entry_bounds(&descriptor));
    checks.push(check_data_extent(&descriptor, data_bytes));

    let valid = checks.iter().all(|c| c.ok);
    match format {
        OutputFormat::Json => {
            let report = VerifyReport { valid, checks };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for check in &checks {
                let mark = if check.ok {
                    "✓".green().bold()
                } else {
                    "✗".red().bold()
                };
                println!("{} {}: {}", mark, check.name, check.detail);
            }
        }
    }
    if !valid {
        anyhow::bail!("store at {} failed verification", store.display());
    }
    Ok(())
}

fn check_disjoint(descriptor: &Descriptor) -> Check {
    for (i, a) in descriptor.entries.iter().enumerate() {
        for b in &descriptor.entries[i + 1..] {
            if a.overlaps(b.start, b.end) {
                return Check {
                    name: "disjoint ranges",
                    ok: false,
                    detail: format!("\"{}\" and \"{}\" overlap", a.name, b.name),
                };
            }
        }
    }
    Check {
        name: "disjoint ranges",
        ok: true,
        detail: format!("{} entries pairwise disjoint", descriptor.entries.len()),
    }
}

fn check_entry_bounds(descriptor: &Descriptor) -> Check {
    for entry in &descriptor.entries {
        if entry.end > descriptor.length() {
            return Check {
                name: "entry bounds",
                ok: false,
                detail: format!(
                    "\"{}\" ends at {} beyond committed length {}",
                    entry.name,
                    entry.end,
                    descriptor.length()
                ),
            };
        }
    }
    Check {
        name: "entry bounds",
        ok: true,
        detail: "all entries within the committed length".into(),
    }
}

fn check_data_extent(descriptor: &Descriptor, data_bytes: u64) -> Check {
    let needed = descriptor.length() * descriptor.row_stride();
    if data_bytes < needed {
        return Check {
            name: "data extent",
            ok: false,
            detail: format!("data file holds {data_bytes} bytes, committed region needs {needed}"),
        };
    }
    Check {
        name: "data extent",
        ok: true,
        detail: format!("{data_bytes} bytes cover the committed region"),
    }
}

fn data_file_len(store: &Path) -> anyhow::Result<u64> {
    let paths = StorePaths::from_base(store);
    let metadata = std::fs::metadata(&paths.data)
        .with_context(|| format!("data file missing: {}", paths.data.display()))?;
    Ok(metadata.len())
}
