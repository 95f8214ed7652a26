use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera: content-addressed document database archives",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with database settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Side {
    Left,
    Right,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty database archive
    Init(InitArgs),
    /// Load newline-delimited JSON documents into a collection
    Ingest(IngestArgs),
    /// Create a secondary index
    Index(IndexArgs),
    /// Find documents by field equality
    Query(QueryArgs),
    /// Show one document
    Get(GetArgs),
    /// Print an inclusion proof for a document as JSON
    Proof(ProofArgs),
    /// Check a proof file against a root
    Verify(VerifyArgs),
    /// Merge two archives into a third
    Merge(MergeArgs),
    /// Describe an archive
    Info(InfoArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub archive: PathBuf,
    /// Replace an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct IngestArgs {
    pub archive: PathBuf,
    #[arg(short, long)]
    pub collection: String,
    /// Primary key field; repeat for a composite key
    #[arg(short, long = "key", required = true)]
    pub keys: Vec<String>,
    /// NDJSON input; standard input when omitted
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

#[derive(Args)]
pub struct IndexArgs {
    pub archive: PathBuf,
    #[arg(short, long)]
    pub collection: String,
    #[arg(required = true)]
    pub fields: Vec<String>,
}

#[derive(Args)]
pub struct QueryArgs {
    pub archive: PathBuf,
    #[arg(short, long)]
    pub collection: String,
    /// Constraint as FIELD=VALUE; VALUE is JSON, or a plain string
    #[arg(short = 'w', long = "where")]
    pub filters: Vec<String>,
    /// Maximum number of results, 0 for all
    #[arg(short = 'n', long, default_value = "0")]
    pub limit: usize,
    /// Print the plan instead of running the query
    #[arg(long)]
    pub explain: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub archive: PathBuf,
    #[arg(short, long)]
    pub collection: String,
    /// Primary key value: JSON, or a plain string
    pub id: String,
}

#[derive(Args)]
pub struct ProofArgs {
    pub archive: PathBuf,
    #[arg(short, long)]
    pub collection: String,
    pub id: String,
    /// Write the proof here instead of standard output
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub proof: PathBuf,
    /// Expected root as 64 hex characters
    #[arg(long)]
    pub root: String,
}

#[derive(Args)]
pub struct MergeArgs {
    pub left: PathBuf,
    pub right: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Side that wins conflicting documents
    #[arg(long, default_value = "right")]
    pub prefer: Side,
}

#[derive(Args)]
pub struct InfoArgs {
    pub archive: PathBuf,
}
