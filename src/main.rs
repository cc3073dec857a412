mod backends;
mod config;
mod db_manager;
mod disambiguation;
mod error;
mod ingestion;
mod protocol;
mod resolution;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};

use backends::claude_vision::{ClaudeVision, ClaudeVisionSettings};
use backends::scryfall::ScryfallCatalog;
use backends::CatalogService;
use config::{sanitize_config, Config, CONFIG_FILE_NAME};
use db_manager::DbManager;
use disambiguation::{Disambiguator, FirstCandidatePolicy, InteractivePrompt};
use error::PipelineError;
use ingestion::Ingestor;
use protocol::{RawRead, ResolutionResult};
use resolution::cross_scope_resolver::{CrossScopeResolver, IngestionSession};
use resolution::rate_limited_client::RateLimitedClient;
use resolution::retrying_caller::RetryingCaller;
use resolution::scope_cache::ScopeCache;

#[derive(Debug, Parser)]
#[command(
    name = "card_collector",
    version,
    about = "Identify trading cards from photographs and record them in a local collection"
)]
struct Cli {
    #[arg(long, global = true, env = "CARD_COLLECTOR_CONFIG", help = "Config file path")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Collection database path")]
    db: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recognize cards in photographs and add them to the collection.
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long, help = "Never prompt; ambiguous cards take the first printing")]
        batch: bool,
    },
    /// Resolve a typed card name against the catalog.
    Resolve {
        name: String,
        #[arg(long = "set", help = "Set code printed on the card")]
        set: Option<String>,
        #[arg(long, help = "Collector number printed on the card")]
        number: Option<String>,
    },
    /// List the sets whose full listing is cached locally.
    CachedSets,
    /// List owned cards.
    Collection,
}

fn load_or_create_config(config_file: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_file, toml::to_string(&Config::default())?)?;
    }

    let config_content = std::fs::read_to_string(config_file)?;
    let parsed = toml::from_str::<Config>(&config_content).unwrap_or_else(|err| {
        warn!(
            "Config file is invalid, using defaults. path={} error={}",
            config_file.display(),
            err
        );
        Config::default()
    });
    Ok(sanitize_config(parsed))
}

fn default_config_path() -> Result<PathBuf, PipelineError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or_else(|| PipelineError::Config("no per-user config directory".to_string()))
}

fn open_database(path: &Path) -> Result<DbManager, PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(DbManager::open(path)?)
}

fn build_resolver(
    config: &Config,
    database_path: &Path,
) -> Result<Arc<CrossScopeResolver>, PipelineError> {
    let throttle = Arc::new(RateLimitedClient::new(config.catalog.min_request_interval()));
    let catalog: Arc<dyn CatalogService> = Arc::new(ScryfallCatalog::new(
        &config.catalog.base_url,
        &config.catalog.user_agent,
        throttle,
    ));
    let cache = Arc::new(ScopeCache::new(
        Arc::clone(&catalog),
        open_database(database_path)?,
    ));
    Ok(Arc::new(CrossScopeResolver::new(cache, catalog)))
}

fn build_recognizer(config: &Config) -> Result<ClaudeVision, PipelineError> {
    let recognition = &config.recognition;
    let api_key = std::env::var(&recognition.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "set {} to use image recognition",
                recognition.api_key_env
            ))
        })?;
    Ok(ClaudeVision::new(
        ClaudeVisionSettings {
            api_url: recognition.api_url.clone(),
            model: recognition.model.clone(),
            api_key,
            max_tokens: recognition.max_tokens,
        },
        RetryingCaller::new(recognition.retry_policy()),
    ))
}

fn run_scan(
    config: &Config,
    database_path: &Path,
    images: &[PathBuf],
    batch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let recognizer = Arc::new(build_recognizer(config)?);
    let resolver = build_resolver(config, database_path)?;
    let ingestor = Ingestor::new(recognizer, resolver, open_database(database_path)?);

    let report = if batch {
        ingestor.ingest_images(images, &mut FirstCandidatePolicy)?
    } else {
        let stdin = std::io::stdin();
        let mut prompt = InteractivePrompt::new(stdin.lock(), std::io::stdout());
        ingestor.ingest_images(images, &mut prompt as &mut dyn Disambiguator)?
    };

    println!(
        "Added {} card(s), skipped {}, unresolved {}, failed {}",
        report.added.len(),
        report.skipped.len(),
        report.unresolved.len(),
        report.failed_reads.len()
    );
    for name in &report.unresolved {
        println!("  not found: {name}");
    }
    for (name, failure) in &report.failed_reads {
        println!("  failed: {name}: {failure}");
    }
    for path in &report.failed_images {
        println!("  unreadable image: {}", path.display());
    }
    Ok(())
}

fn run_resolve(
    config: &Config,
    database_path: &Path,
    read: RawRead,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = build_resolver(config, database_path)?;
    match resolver.resolve(&read, &mut IngestionSession::new())? {
        ResolutionResult::Resolved(entry) => println!("{}  {}", entry.display_line(), entry.name),
        ResolutionResult::Ambiguous(candidates) => {
            println!("'{}' is ambiguous:", read.name);
            for candidate in candidates {
                println!(
                    "  {}  {} ({:.2})",
                    candidate.entry.display_line(),
                    candidate.entry.name,
                    candidate.score
                );
            }
        }
        ResolutionResult::NotFound => println!("'{}' not found", read.name),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = load_or_create_config(&config_file)?;
    log::set_max_level(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        config.logging.level.to_filter()
    });

    let database_path = match cli.db {
        Some(path) => path,
        None => config
            .storage
            .resolved_database_path()
            .ok_or_else(|| PipelineError::Config("no per-user data directory".to_string()))?,
    };

    match cli.command {
        Command::Scan { images, batch } => run_scan(&config, &database_path, &images, batch),
        Command::Resolve { name, set, number } => {
            let mut read = RawRead::named(name);
            if let Some(set) = set {
                read = read.with_scope_hint(set);
            }
            if let Some(number) = number {
                read = read.with_collector_number(number);
            }
            run_resolve(&config, &database_path, read)
        }
        Command::CachedSets => {
            for code in open_database(&database_path)?.cached_scope_codes()? {
                println!("{code}");
            }
            Ok(())
        }
        Command::Collection => {
            for record in open_database(&database_path)?.collection_records()? {
                println!(
                    "{:5} #{:4} {}{} [{}]",
                    record.scope.to_ascii_uppercase(),
                    record.collector_number,
                    record.name,
                    if record.foil { " (foil)" } else { "" },
                    record.condition
                );
            }
            Ok(())
        }
    }
}
