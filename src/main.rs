use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vitrine::{
    api::HttpClient,
    cli,
    config::Config,
    kv::{FileStore, KvStore, MemoryStore},
};

#[derive(Parser)]
#[command(name = "vitrine", about = "Marketplace listings from the terminal")]
pub struct Args {
    #[arg(long, env = "VITRINE_API_URL", help = "Marketplace API base URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "VITRINE_STORE", help = "Local store file")]
    pub store: Option<PathBuf>,

    #[arg(long, help = "Keep everything in memory for this run")]
    pub ephemeral: bool,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Never fall back to the local development account")]
    pub no_local_fallback: bool,

    #[arg(long, help = "Verbose output (debug logs)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (trace logs, HTTP details)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<cli::Command>,
}

fn init_logging(args: &Args) {
    let default_level = if args.debug {
        "trace"
    } else if args.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    // CLI flags override config files
    if let Some(url) = &args.api_url {
        cfg.api.base_url = url.clone();
    }
    if let Some(store) = &args.store {
        cfg.storage.path = Some(store.clone());
    }
    if args.no_local_fallback {
        cfg.auth.local_fallback = false;
    }

    if let Err(errors) = cfg.validate() {
        let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
        return Err(anyhow::anyhow!(
            "Invalid configuration:\n{}",
            lines.join("\n")
        ));
    }

    let kv: Box<dyn KvStore> = if args.ephemeral {
        Box::new(MemoryStore::new())
    } else {
        let path = cfg.store_path();
        tracing::debug!(path = %path.display(), "using file store");
        Box::new(FileStore::open(&path))
    };
    let api = Box::new(HttpClient::new(&cfg.api.base_url, cfg.api.timeout()));

    let ctx = cli::Context::new(cfg, kv, api);

    match args.command {
        Some(command) => cli::run_command(&ctx, command),
        None => cli::run_repl(ctx),
    }
}
