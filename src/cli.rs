use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    config::{
        DEFAULT_REINDEX_MAX_DOCS,
        DEFAULT_STAGE1_LIMIT,
        DEFAULT_STAGE2_LIMIT,
        DEFAULT_STAGE3_LIMIT,
    },
    doc_id::DocumentId,
    embedding_service::DEFAULT_TIMEOUT,
};

#[derive(Debug, Parser)]
#[command(
    name = "colsearch",
    about = "Late-interaction semantic search with match heat maps"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the embedding service
    #[arg(long, global = true)]
    pub embedding_url: Option<String>,

    /// Embedding service request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub embedding_timeout: u64,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a document from a file, or from stdin with `-`
    Add(AddArgs),
    /// Add every .md/.txt file under a directory
    Import(ImportArgs),
    /// Print a stored document
    Get(GetArgs),
    /// Delete a document and its token vectors
    Delete(DeleteArgs),
    /// Embed and index documents that are not yet searchable
    Reindex(ReindexArgs),
    /// Search indexed documents
    Search(SearchArgs),
    /// Show store statistics
    Status(StatusArgs),
    /// Manage the stored embedding service URL
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// File to read, or `-` for stdin
    pub source: PathBuf,

    /// Document title (defaults to the first markdown heading or file name)
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub year: Option<String>,

    /// Popularity counter, e.g. a view count
    #[arg(long, default_value = "0")]
    pub views: u64,
}

impl AddArgs {
    pub fn reads_stdin(&self) -> bool {
        self.source.as_os_str() == "-"
    }
}

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// Directory to import recursively
    pub dir: PathBuf,
}

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Document id (e.g. #00002a)
    pub id: DocumentId,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Document id (e.g. #00002a)
    pub id: DocumentId,
}

// -- Reindex --

#[derive(Debug, Parser)]
pub struct ReindexArgs {
    /// Documents embedded per batch
    #[arg(long, default_value_t = DEFAULT_REINDEX_MAX_DOCS)]
    pub max_docs: usize,

    /// Time budget of one invocation, in seconds
    #[arg(long, default_value = "60")]
    pub timeout: u64,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Candidates kept after the per-token vector search
    #[arg(long, default_value_t = DEFAULT_STAGE1_LIMIT)]
    pub stage1_limit: usize,

    /// Documents shortlisted for exact scoring
    #[arg(long, default_value_t = DEFAULT_STAGE2_LIMIT)]
    pub stage2_limit: usize,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_STAGE3_LIMIT)]
    pub limit: usize,

    /// Deadline for the per-token vector search, in milliseconds
    #[arg(long, value_name = "MS")]
    pub stage1_timeout: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Mark highlights with brackets instead of colors
    #[arg(long)]
    pub plain: bool,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Service --

#[derive(Debug, Subcommand)]
pub enum ServiceAction {
    /// Show the resolved embedding service URL
    Show,
    /// Persist the embedding service URL in the store
    Set {
        /// Base URL, e.g. http://localhost:8000
        url: String,
    },
    /// Remove the stored URL
    Clear,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "colsearch",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["colsearch", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.stage1_limit, 1000);
                assert_eq!(args.stage2_limit, 50);
                assert_eq!(args.limit, 10);
                assert_eq!(args.stage1_timeout, None);
                assert!(!args.json);
                assert!(!args.plain);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_deadline_and_timeout() {
        let cli = Cli::parse_from([
            "colsearch",
            "--embedding-timeout",
            "5",
            "search",
            "hello",
            "--stage1-timeout",
            "250",
        ]);
        assert_eq!(cli.embedding_timeout, 5);
        match cli.command {
            Command::Search(args) => assert_eq!(args.stage1_timeout, Some(250)),
            _ => panic!("expected search command"),
        }

        let cli = Cli::parse_from(["colsearch", "status"]);
        assert_eq!(cli.embedding_timeout, DEFAULT_TIMEOUT.as_secs());
    }

    #[test]
    fn parse_reindex_defaults() {
        let cli = Cli::parse_from(["colsearch", "reindex"]);
        match cli.command {
            Command::Reindex(args) => {
                assert_eq!(args.max_docs, 16);
                assert_eq!(args.timeout, 60);
            }
            _ => panic!("expected reindex command"),
        }
    }

    #[test]
    fn parse_document_ids() {
        let cli = Cli::parse_from(["colsearch", "delete", "#00002a"]);
        match cli.command {
            Command::Delete(args) => assert_eq!(args.id, DocumentId(42)),
            _ => panic!("expected delete command"),
        }
    }

    #[test]
    fn add_from_stdin() {
        let cli = Cli::parse_from(["colsearch", "add", "-", "--year", "1999"]);
        match cli.command {
            Command::Add(args) => {
                assert!(args.reads_stdin());
                assert_eq!(args.year.as_deref(), Some("1999"));
            }
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }
}
