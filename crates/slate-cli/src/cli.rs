use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "slate",
    about = "Slate — inspect disk-backed memory-mapped array stores",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show a store's dtype, shape, and sizes
    Describe(DescribeArgs),
    /// List the named index entries in persisted order
    Entries(EntriesArgs),
    /// Check the header and index invariants
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct DescribeArgs {
    /// Store base path (extension is ignored)
    pub store: PathBuf,
}

#[derive(Args)]
pub struct EntriesArgs {
    /// Store base path (extension is ignored)
    pub store: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Store base path (extension is ignored)
    pub store: PathBuf,
}
