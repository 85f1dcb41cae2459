use std::{
    io::Read,
    path::Path,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use colsearch::{
    DataDir,
    FlatIndex,
    HttpEmbeddingService,
    RecordStore,
    cli::{self, Cli, Command, ServiceAction},
    config::{self, EMBEDDING_URL_SETTING, SearchLimits},
    error::{self, Error},
    indexer::PipelineOptions,
    ingestion,
    records::DocumentMetadata,
    scheduler::{self, IndexingJob, IndexingScheduler},
    search::{self, SearchParams},
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("COLSEARCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let store = RecordStore::open(&data_dir.store_db())?;
    let timeout = Duration::from_secs(cli.embedding_timeout);

    match cli.command {
        Command::Add(args) => cmd_add(&store, &args)?,
        Command::Import(args) => {
            let inserted = ingestion::import_directory(&store, &args.dir)?;
            println!(
                "Imported {} document(s) from {}. Run `colsearch reindex` to make them searchable.",
                inserted.len(),
                args.dir.display()
            );
        }
        Command::Get(args) => {
            let doc = store.get_document(args.id)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "document",
                    name: args.id.to_string(),
                }
            })?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                if !doc.metadata.title.is_empty() {
                    println!("# {}\n", doc.metadata.title);
                }
                println!("{}", doc.text);
            }
        }
        Command::Delete(args) => {
            // The in-memory index is rebuilt per process, so an empty one
            // stands in here.
            let outcome =
                ingestion::delete(&store, &FlatIndex::new(), args.id)?;
            println!(
                "Deleted {} ({} token link(s), {} embedding(s) reclaimed)",
                args.id,
                outcome.links_removed,
                outcome.reclaimed.len()
            );
        }
        Command::Reindex(args) => {
            let url =
                config::resolve_embedding_url(cli.embedding_url.as_deref(), &store)?;
            let job = Arc::new(IndexingJob {
                store: Arc::new(store),
                index: Arc::new(FlatIndex::new()),
                embedder: Arc::new(HttpEmbeddingService::new(&url, timeout)?),
                options: PipelineOptions {
                    max_docs: args.max_docs,
                    time_budget: Duration::from_secs(args.timeout),
                    ..Default::default()
                },
            });
            let stats =
                scheduler::run_blocking(&IndexingScheduler::default(), &job)?;
            println!(
                "Indexed {} document(s): {} token link(s), {} new embedding(s)",
                stats.documents, stats.token_links, stats.embeddings_created
            );
        }
        Command::Search(args) => {
            let url =
                config::resolve_embedding_url(cli.embedding_url.as_deref(), &store)?;
            let embedder = HttpEmbeddingService::new(&url, timeout)?;
            let index = FlatIndex::from_store(&store)?;
            let params = SearchParams {
                query: args.query.clone(),
                limits: SearchLimits {
                    stage1: args.stage1_limit,
                    stage2: args.stage2_limit,
                    stage3: args.limit,
                    stage1_timeout: args.stage1_timeout.map(Duration::from_millis),
                    ..Default::default()
                },
            };

            let results =
                search::execute_search(&params, &store, &index, &embedder)?;

            if args.json {
                search::format_json(&results, &args.query)?;
            } else {
                search::format_human(&results, args.plain);
            }
        }
        Command::Status(args) => {
            cmd_status(&store, &data_dir, cli.embedding_url.as_deref(), args.json)?;
        }
        Command::Service { action } => match action {
            ServiceAction::Show => {
                match config::resolve_embedding_url(
                    cli.embedding_url.as_deref(),
                    &store,
                ) {
                    Ok(url) => println!("{url}"),
                    Err(Error::Config(_)) => {
                        println!("No embedding service configured.")
                    }
                    Err(e) => return Err(e),
                }
            }
            ServiceAction::Set { url } => {
                HttpEmbeddingService::new(&url, timeout)?;
                store.set_setting(EMBEDDING_URL_SETTING, url.trim())?;
                println!("Embedding service set to {}", url.trim());
            }
            ServiceAction::Clear => {
                if store.remove_setting(EMBEDDING_URL_SETTING)? {
                    println!("Embedding service setting cleared.");
                } else {
                    println!("No embedding service was stored.");
                }
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_add(store: &RecordStore, args: &cli::AddArgs) -> error::Result<()> {
    let text = if args.reads_stdin() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.source)?
    };
    if text.trim().is_empty() {
        return Err(Error::InvalidInput("document text is empty".into()));
    }

    let title = match &args.title {
        Some(title) => title.clone(),
        None if args.reads_stdin() => String::new(),
        None => ingestion::extract_title(&text, Path::new(&args.source)),
    };
    let metadata = DocumentMetadata {
        title,
        author: args.author.clone().unwrap_or_default(),
        year: args.year.clone().unwrap_or_default(),
        views: args.views,
    };

    let doc = ingestion::insert(store, &text, metadata)?;
    println!("{}", doc.id);
    Ok(())
}

fn cmd_status(
    store: &RecordStore,
    data_dir: &DataDir,
    explicit_url: Option<&str>,
    json: bool,
) -> error::Result<()> {
    let stats = store.stats()?;
    let service = config::resolve_embedding_url(explicit_url, store).ok();
    let indexed = stats.documents.saturating_sub(stats.unindexed);

    if json {
        let status = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "embedding_service": service,
            "documents": stats.documents,
            "indexed": indexed,
            "unindexed": stats.unindexed,
            "chunks": stats.chunks,
            "embeddings": stats.embeddings,
            "token_links": stats.token_links,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!(
            "Embedding service: {}",
            service.as_deref().unwrap_or("not configured")
        );
        println!("Documents: {} ({indexed} indexed, {} pending)", stats.documents, stats.unindexed);
        println!("Chunks: {}", stats.chunks);
        println!("Embeddings: {}", stats.embeddings);
        println!("Token links: {}", stats.token_links);
    }
    Ok(())
}
