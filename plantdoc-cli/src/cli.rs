use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use plantdoc_rag::IngestMode;
use plantdoc_telemetry::LogFormat;

/// Default index directory, relative to the working directory.
pub const DEFAULT_INDEX_DIR: &str = "./plantdoc_index";

/// Answer questions about plant diseases from a local knowledge base.
///
/// Build the index once from a dataset file, then ask questions. Answers are
/// grounded in the indexed records only.
#[derive(Parser, Debug)]
#[command(name = "plantdoc", version, about)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chunk, embed and index a dataset file
    Build(BuildArgs),
    /// Ask a single question
    Ask(AskArgs),
    /// Ask questions interactively, one independent query per line
    Chat(ChatArgs),
    /// Show what the persisted index contains
    Inspect(IndexArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Directory holding the persisted index
    #[arg(long, default_value = DEFAULT_INDEX_DIR)]
    pub index_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// JSON array or JSON Lines file of records
    #[arg(long)]
    pub data: PathBuf,

    #[command(flatten)]
    pub index: IndexArgs,

    /// Maximum chunk size in characters
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = 100)]
    pub chunk_overlap: usize,

    /// How to treat chunks that are already indexed
    #[arg(long, value_enum, default_value_t = ModeArg::Skip)]
    pub mode: ModeArg,

    /// Clear the index before building (needed after changing the embedding model)
    #[arg(long)]
    pub rebuild: bool,

    /// Record field holding the document id (default: row number)
    #[arg(long)]
    pub id_field: Option<String>,

    /// Record field holding ready-made document text
    #[arg(long, default_value = "page_content")]
    pub content_field: String,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[command(flatten)]
    pub index: IndexArgs,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = plantdoc_rag::DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Use the Turkish prompt and refusal sentence
    #[arg(long)]
    pub turkish: bool,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Print the answer and its sources as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub query: QueryArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Keep existing chunks, index only new ones
    Skip,
    /// Re-embed and replace existing chunks
    Overwrite,
    /// Add duplicates under new ids
    Append,
}

impl From<ModeArg> for IngestMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Skip => IngestMode::SkipExisting,
            ModeArg::Overwrite => IngestMode::Overwrite,
            ModeArg::Append => IngestMode::Append,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_with_defaults() {
        let cli = Cli::try_parse_from(["plantdoc", "build", "--data", "diseases.jsonl"]).unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.data, PathBuf::from("diseases.jsonl"));
        assert_eq!(args.index.index_dir, PathBuf::from(DEFAULT_INDEX_DIR));
        assert_eq!(args.chunk_size, 1000);
        assert_eq!(args.chunk_overlap, 100);
        assert_eq!(args.mode, ModeArg::Skip);
        assert!(!args.rebuild);
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parses_ask_options() {
        let cli = Cli::try_parse_from([
            "plantdoc",
            "ask",
            "What causes tomato bacterial spot?",
            "--top-k",
            "5",
            "--json",
            "--turkish",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.question, "What causes tomato bacterial spot?");
        assert_eq!(args.query.top_k, 5);
        assert!(args.json);
        assert!(args.query.turkish);
    }

    #[test]
    fn mode_maps_to_ingest_mode() {
        let cli = Cli::try_parse_from(["plantdoc", "build", "--data", "d.json", "--mode", "append"])
            .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(IngestMode::from(args.mode), IngestMode::Append);
    }

    #[test]
    fn build_requires_data() {
        assert!(Cli::try_parse_from(["plantdoc", "build"]).is_err());
    }
}
