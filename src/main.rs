//! ifs CLI - content-aware file system
//!
//! Index files and directories, then search them by meaning.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use intellifs::{
    available_models, default_cache_dir, format_contexts_json, format_results,
    format_results_json, Config, ContextMode, Directory, EmbeddingModel, FileSystem,
    IndexWatcher, Indexable, Scope,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ifs")]
#[command(author, version, about = "Content-aware file system - semantic search over your files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the index and config
    #[arg(long, global = true, env = "IFS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Embedding model to use for this run
    #[arg(long, global = true, env = "IFS_MODEL")]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a file or directory
    Index {
        /// Path to file or directory
        path: PathBuf,
    },

    /// Perform semantic search in a directory
    Search {
        /// Start search directory path
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Search query string
        #[arg(short = 'q', long)]
        query: String,

        /// Maximum result count
        #[arg(short = 'k', long = "max-results", default_value = "5", env = "IFS_MAX_RESULTS")]
        max_results: usize,

        /// Minimum score, between 0 and 1
        #[arg(short = 't', long, value_parser = parse_threshold)]
        threshold: Option<f32>,

        /// Component to return
        #[arg(short = 'r', long = "return", value_enum)]
        output: Option<ReturnKind>,

        /// Only files with these extensions (comma separated)
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,

        /// Skip paths matching this pattern
        #[arg(long)]
        exclude: Option<String>,

        /// Trim context to this many characters
        #[arg(long)]
        excerpt: Option<usize>,

        /// Output as JSON
        #[arg(long, env = "IFS_JSON")]
        json: bool,
    },

    /// Show or change the default embedder
    Embedder {
        /// List available embedders
        #[arg(short = 'l', long)]
        list: bool,

        /// Make this embedder the default
        #[arg(short = 's', long)]
        set: Option<String>,
    },

    /// Show index statistics
    Stats,

    /// Delete the index for the current model
    Rebuild,

    /// Watch a directory and keep its index up to date
    Watch {
        /// Directory to watch
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReturnKind {
    Path,
    Context,
}

fn parse_threshold(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("{} is not a number", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold must be between 0 and 1, got {}", value))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cache_dir = cli.cache_dir.clone().unwrap_or_else(default_cache_dir);
    let mut config = Config::load(&cache_dir)?.with_progress(true);
    if let Some(model) = &cli.model {
        config = config.with_model(model.parse()?);
    }

    match cli.command {
        Commands::Index { path } => cmd_index(config, path),
        Commands::Search {
            dir,
            query,
            max_results,
            threshold,
            output,
            ext,
            exclude,
            excerpt,
            json,
        } => {
            let scope = build_scope(dir, ext, exclude)?;
            let context = excerpt.map_or(ContextMode::Chunk, ContextMode::Excerpt);
            cmd_search(config, &query, &scope, max_results, threshold, output, context, json)
        }
        Commands::Embedder { list, set } => cmd_embedder(config, list, set),
        Commands::Stats => cmd_stats(config),
        Commands::Rebuild => cmd_rebuild(config),
        Commands::Watch { dir } => cmd_watch(config, dir),
    }
}

fn build_scope(dir: PathBuf, ext: Vec<String>, exclude: Option<String>) -> Result<Scope> {
    let mut scope = Scope::new(Directory::open(dir)?).with_extensions(ext);
    if let Some(pattern) = exclude {
        scope = scope.with_exclude(&pattern)?;
    }
    Ok(scope)
}

fn cmd_index(config: Config, path: PathBuf) -> Result<()> {
    let target = Indexable::from_path(&path)?;
    println!("{} {:?}", "Indexing".cyan().bold(), target.path());

    let engine = FileSystem::open(config)?;
    let stats = engine.index(&target)?;
    println!("\n{} {}", "✓".green(), stats);

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    config: Config,
    query: &str,
    scope: &Scope,
    max_results: usize,
    threshold: Option<f32>,
    output: Option<ReturnKind>,
    context: ContextMode,
    json: bool,
) -> Result<()> {
    let engine = FileSystem::open(config)?.with_context(context);
    let results = engine.search(query, scope, max_results, threshold)?;

    if results.is_empty() {
        println!("No results found for: {}", query.yellow());
        return Ok(());
    }

    match output {
        Some(ReturnKind::Path) => {
            for path in results.paths() {
                println!("{}", path.display());
            }
        }
        Some(ReturnKind::Context) => println!("{}", format_contexts_json(&results)?),
        None if json => println!("{}", format_results_json(&results)?),
        None => {
            println!(
                "\n{} results for \"{}\":\n",
                results.len().to_string().green().bold(),
                query.cyan()
            );
            print!("{}", format_results(&results, true, scope.directory().path()));
        }
    }

    Ok(())
}

fn cmd_embedder(config: Config, list: bool, set: Option<String>) -> Result<()> {
    if let Some(name) = set {
        let model: EmbeddingModel = name.parse()?;
        let config = config.with_model(model);
        config.save()?;
        println!("{} Default embedder: {}", "✓".green(), model.model_name().yellow());
        return Ok(());
    }

    if !list {
        println!("{}", config.model.model_name());
        return Ok(());
    }

    println!("{}", "Available Embedding Models".cyan().bold());
    println!();
    for (label, model_id) in available_models() {
        let model: EmbeddingModel = label.parse()?;
        let marker = if model == config.model { " (default)" } else { "" };
        println!("  {}{}", label.green().bold(), marker);
        println!("    {}", model_id);
        println!("    {} ({} dims)", model.description(), model.dimension());
        println!();
    }
    println!("Usage: {} --set nomic", "ifs embedder".yellow());

    Ok(())
}

fn cmd_stats(config: Config) -> Result<()> {
    let engine = FileSystem::with_embedder(config, None)?;
    let stats = engine.stats()?;

    println!("{}", "Index Statistics".cyan().bold());
    println!("  Files:     {}", stats.files.to_string().green());
    println!("  Chunks:    {}", stats.records.to_string().green());
    println!("  Model:     {}", stats.model.yellow());
    println!("  Dimension: {}", stats.dimension);
    if let Some(saved_at) = stats.saved_at {
        println!("  Saved:     {}", saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

fn cmd_rebuild(config: Config) -> Result<()> {
    let store_dir = config.store_dir();
    if !store_dir.exists() {
        bail!("No index at {}", store_dir.display());
    }
    intellifs::VectorIndex::destroy(&store_dir)?;
    println!(
        "{} Cleared {}. Run {} to index again.",
        "✓".green(),
        store_dir.display(),
        "ifs index <path>".yellow()
    );

    Ok(())
}

fn cmd_watch(config: Config, dir: PathBuf) -> Result<()> {
    let directory = Directory::open(dir)?;
    println!("{} {:?}", "Watching".cyan().bold(), directory.path());

    let engine = FileSystem::open(config)?;
    IndexWatcher::new(&engine, directory).watch()?;

    Ok(())
}
