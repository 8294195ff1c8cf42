use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Settings the content store needs. Built once at startup and shared
/// read-only (behind an `Arc`) by every store component.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per item.
    pub root: PathBuf,
    pub max_bytes_per_file: u64,
    /// Quota cap on the whole store.
    pub max_bytes_total: u64,
    /// Retention rate: minutes an item of 1 GB is kept.
    pub minutes_per_gigabyte: f64,
    /// Number of decimal digits in an item id.
    pub id_digits: usize,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub public_url: String,
    pub debug: bool,
    pub sweep_interval: Duration,
    pub store: StoreConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Ephemeral file sharing service")]
pub struct Args {
    /// Host to bind to (overrides WEBSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides WEBSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public URL used to build links (overrides WEBSHARE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Data directory (overrides WEBSHARE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Max bytes per file (overrides WEBSHARE_MAX_FILE)
    #[arg(long)]
    pub max_file: Option<u64>,

    /// Max bytes in the whole store (overrides WEBSHARE_MAX_TOTAL)
    #[arg(long)]
    pub max_total: Option<u64>,

    /// Minutes per gigabyte for auto-deletion (overrides WEBSHARE_MIN_PER_GIG)
    #[arg(long)]
    pub min_per_gig: Option<f64>,

    /// Digits in generated ids (overrides WEBSHARE_ID_DIGITS)
    #[arg(long)]
    pub id_digits: Option<usize>,

    /// Minutes between retention sweeps (overrides WEBSHARE_SWEEP_MINUTES)
    #[arg(long)]
    pub sweep_minutes: Option<u64>,

    /// Debug logging (also enabled by WEBSHARE_DEBUG=true)
    #[arg(long)]
    pub debug: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already-parsed CLI args with the environment; CLI wins.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let host = match args.host {
            Some(host) => host,
            None => env::var("WEBSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        };
        let port = match args.port {
            Some(port) => port,
            None => env_or("WEBSHARE_PORT", 8222)?,
        };
        let public_url = match args.public_url {
            Some(url) => url,
            None => env::var("WEBSHARE_PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
        };
        let root = match args.data_dir {
            Some(dir) => dir,
            None => env::var("WEBSHARE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        };
        let max_bytes_per_file = match args.max_file {
            Some(v) => v,
            None => env_or("WEBSHARE_MAX_FILE", 1_000_000_000)?,
        };
        let max_bytes_total = match args.max_total {
            Some(v) => v,
            None => env_or("WEBSHARE_MAX_TOTAL", 10_000_000_000)?,
        };
        let minutes_per_gigabyte = match args.min_per_gig {
            Some(v) => v,
            None => env_or("WEBSHARE_MIN_PER_GIG", 60.0)?,
        };
        let id_digits = match args.id_digits {
            Some(v) => v,
            None => env_or("WEBSHARE_ID_DIGITS", 3)?,
        };
        let sweep_minutes = match args.sweep_minutes {
            Some(v) => v,
            None => env_or("WEBSHARE_SWEEP_MINUTES", 30)?,
        };
        let debug = args.debug || env_or("WEBSHARE_DEBUG", false)?;

        // --- Validate ---
        if !(minutes_per_gigabyte.is_finite() && minutes_per_gigabyte > 0.0) {
            bail!("min-per-gig must be a positive number, got {}", minutes_per_gigabyte);
        }
        if !(1..=32).contains(&id_digits) {
            bail!("id-digits must be between 1 and 32, got {}", id_digits);
        }
        if sweep_minutes == 0 {
            bail!("sweep-minutes must be at least 1");
        }

        Ok(Self {
            host,
            port,
            public_url: public_url.trim_end_matches('/').to_string(),
            debug,
            sweep_interval: Duration::from_secs(sweep_minutes * 60),
            store: StoreConfig {
                root,
                max_bytes_per_file,
                max_bytes_total,
                minutes_per_gigabyte,
                id_digits,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
