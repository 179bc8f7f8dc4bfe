use std::{io::Write, path::Path, time::Duration};

use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};
use finrag::{
    DataDir,
    DatabaseConfig,
    HashEmbedder,
    LoadOutcome,
    PlainTextExtractor,
    RetryingEmbedder,
    Status,
    VectorDatabase,
    error::{Error, Result},
    search,
    walker,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("FINRAG_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.config_file());
    let config = DatabaseConfig::load(&config_path)?;
    let mut db = open_database(data_dir, config)?;

    match cli.command {
        Command::Status(args) => cmd_status(&db, args.json)?,
        Command::Build(args) => cmd_build(&mut db, &args.docs_dir, args.force)?,
        Command::Clear => {
            db.clear()?;
            println!("Cleared {}", db.data_dir().root().display());
        }
        Command::Search(args) => cmd_search(&db, &args)?,
        Command::Compact => {
            let reclaimed = db.compact()?;
            println!("Reclaimed {reclaimed} vector(s)");
        }
        Command::Completions(_) => {}
    }

    db.close();
    Ok(())
}

fn open_database(
    data_dir: DataDir,
    config: DatabaseConfig,
) -> Result<VectorDatabase> {
    let embedder = RetryingEmbedder::new(
        HashEmbedder::new(config.dimension),
        config.max_retries,
        Duration::from_millis(config.retry_backoff_ms),
    );
    let mut db =
        VectorDatabase::new(data_dir, config, embedder, PlainTextExtractor)?;

    match db.open()? {
        LoadOutcome::Loaded | LoadOutcome::Missing => {}
        LoadOutcome::Incompatible(e) => {
            warn!("{e}; the next build rebuilds the index");
        }
        LoadOutcome::Inconsistent(_) => {
            warn!("index files are out of sync; the next build rebuilds the index");
        }
    }
    Ok(db)
}

#[derive(Serialize)]
struct StatusReport<'a> {
    data_dir: String,
    #[serde(flatten)]
    status: &'a Status,
}

fn cmd_status(db: &VectorDatabase, json: bool) -> Result<()> {
    let status = db.status();

    if json {
        let report = StatusReport {
            data_dir: db.data_dir().root().display().to_string(),
            status: &status,
        };
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    println!("Data directory: {}", db.data_dir().root().display());
    println!("Index: {} (dimension {})", status.index_kind, status.dimension);
    println!("Documents: {}", status.num_documents);
    println!("Chunks: {}", status.num_chunks);
    println!("Generation: {}", status.generation);
    match status.built_at {
        Some(ts) => println!("Built at: {ts} (unix seconds)"),
        None => println!("Built at: never"),
    }
    if status.is_stale {
        println!("Stale: yes (next build is a full rebuild)");
    }
    Ok(())
}

fn cmd_build(db: &mut VectorDatabase, docs_dir: &Path, force: bool) -> Result<()> {
    if !docs_dir.is_dir() {
        return Err(Error::InvalidConfig(format!(
            "documents directory does not exist: {}",
            docs_dir.display()
        )));
    }

    let files = walker::discover_files(docs_dir, &db.config().include)?;
    eprintln!("Found {} document(s) in {}", files.len(), docs_dir.display());

    let summary = db.build_or_update(&files, force)?;
    for (path, error) in &summary.documents_failed {
        eprintln!("  failed: {path}: {error}");
    }
    println!(
        "{}: {} indexed, {} removed, {} failed, {} chunk(s) added, generation {}",
        summary.plan,
        summary.documents_indexed,
        summary.documents_removed,
        summary.documents_failed.len(),
        summary.chunks_added,
        summary.generation
    );
    Ok(())
}

fn cmd_search(db: &VectorDatabase, args: &cli::SearchArgs) -> Result<()> {
    let top_k = args.count.unwrap_or(db.config().top_k);
    let min_score = args.min_score.or(db.config().min_score);
    let hits = db.search_with(&args.query, top_k, min_score)?;

    let mut out = std::io::stdout().lock();
    if args.json {
        search::format_json(&mut out, &hits, &args.query)?;
    } else {
        search::format_human(&mut out, &hits)?;
    }
    out.flush()?;
    Ok(())
}
