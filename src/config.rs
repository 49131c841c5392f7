use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;

/// Where cached objects live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata + payload files under `data_dir`.
    Disk,
    /// Process memory; lost on restart.
    Memory,
    /// A LocalStack (or any path-style S3) endpoint.
    Localstack,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Backend::Disk),
            "memory" => Ok(Backend::Memory),
            "localstack" => Ok(Backend::Localstack),
            other => bail!("unknown backend `{other}` (expected disk, memory or localstack)"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Disk => "disk",
            Backend::Memory => "memory",
            Backend::Localstack => "localstack",
        })
    }
}

/// Centralized application configuration.
/// Precedence: CLI arguments, then environment, then YAML file, then defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub listen_addr: String,
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub localstack_endpoint: String,
    pub origin_endpoint: String,
    pub aws_region: String,
    pub init_buckets: Vec<String>,
    pub bucket_map: HashMap<String, String>,
    pub origin_timeout: Duration,
}

/// Command-line configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Lazy-loading S3 cache in front of a remote origin")]
pub struct Args {
    /// YAML config file (overrides S3LAZY_CONFIG_FILE)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides S3LAZY_LISTEN_ADDR)
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Cache backend (overrides S3LAZY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Data directory for the disk backend (overrides S3LAZY_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Endpoint of the localstack backend (overrides S3LAZY_LOCALSTACK_ENDPOINT)
    #[arg(long)]
    pub cache_endpoint: Option<String>,

    /// Origin S3 endpoint (overrides S3LAZY_ORIGIN_ENDPOINT)
    #[arg(long)]
    pub origin_endpoint: Option<String>,

    /// Origin region (overrides S3LAZY_AWS_REGION / AWS_REGION)
    #[arg(long)]
    pub origin_region: Option<String>,

    /// Buckets created on startup, comma separated (overrides S3LAZY_INIT_BUCKETS)
    #[arg(long)]
    pub init_buckets: Option<String>,

    /// `local:origin` pairs, comma separated (merged over S3LAZY_BUCKET_MAP)
    #[arg(long)]
    pub bucket_map: Option<String>,

    /// Per-call origin timeout in seconds (overrides S3LAZY_ORIGIN_TIMEOUT_SECS)
    #[arg(long)]
    pub origin_timeout_secs: Option<u64>,
}

/// Shape of the optional YAML file. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    listen_addr: Option<String>,
    backend_type: Option<String>,
    data_dir: Option<PathBuf>,
    localstack_endpoint: Option<String>,
    origin_endpoint: Option<String>,
    aws_region: Option<String>,
    bucket_mappings: HashMap<String, String>,
    init_buckets: Vec<String>,
    origin_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// A file that cannot be read or parsed is reported and skipped.
    fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read config file");
                return Self::default();
            }
        };
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_yaml::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse config file");
                Self::default()
            }
        }
    }
}

impl AppConfig {
    /// Parse the process environment + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::load(args, |name| env::var(name).ok())
    }

    /// Resolve configuration from parsed args and an environment lookup.
    /// Empty environment values count as unset.
    pub fn load(args: Args, env_lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_var = |name: &str| env_lookup(name).filter(|v| !v.trim().is_empty());

        // --- YAML file ---
        let file = args
            .config
            .clone()
            .or_else(|| env_var("S3LAZY_CONFIG_FILE").map(PathBuf::from))
            .map(|path| FileConfig::load(&path))
            .unwrap_or_default();

        // --- Backend ---
        let backend = match (args.backend, env_var("S3LAZY_BACKEND")) {
            (Some(backend), _) => backend,
            (None, Some(value)) => value
                .parse()
                .with_context(|| format!("parsing S3LAZY_BACKEND value `{value}`"))?,
            (None, None) => match file.backend_type.as_deref() {
                Some(value) => value
                    .parse()
                    .with_context(|| format!("parsing backend_type value `{value}`"))?,
                None => Backend::Disk,
            },
        };

        // --- Region: S3LAZY_AWS_REGION wins over AWS_REGION ---
        let aws_region = args
            .origin_region
            .or_else(|| env_var("S3LAZY_AWS_REGION"))
            .or_else(|| env_var("AWS_REGION"))
            .or(file.aws_region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let origin_endpoint = args
            .origin_endpoint
            .or_else(|| env_var("S3LAZY_ORIGIN_ENDPOINT"))
            .or(file.origin_endpoint)
            .unwrap_or_else(|| default_origin_endpoint(&aws_region));

        // --- Timeout ---
        let env_timeout = match env_var("S3LAZY_ORIGIN_TIMEOUT_SECS") {
            Some(value) => Some(value.trim().parse::<u64>().with_context(|| {
                format!("parsing S3LAZY_ORIGIN_TIMEOUT_SECS value `{value}`")
            })?),
            None => None,
        };
        let timeout_secs = args
            .origin_timeout_secs
            .or(env_timeout)
            .or(file.origin_timeout_secs)
            .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
        if timeout_secs == 0 {
            bail!("origin timeout must be at least one second");
        }

        // --- Lists: CLI replaces env, env replaces file ---
        let init_buckets = match args.init_buckets.or_else(|| env_var("S3LAZY_INIT_BUCKETS")) {
            Some(list) => parse_comma_separated(&list),
            None => file.init_buckets,
        };

        // --- Bucket map: later sources add to and override earlier ones ---
        let mut bucket_map = file.bucket_mappings;
        if let Some(raw) = env_var("S3LAZY_BUCKET_MAP") {
            bucket_map.extend(parse_bucket_map(&raw));
        }
        if let Some(raw) = args.bucket_map.as_deref() {
            bucket_map.extend(parse_bucket_map(raw));
        }

        let listen_addr = args
            .listen_addr
            .or_else(|| env_var("S3LAZY_LISTEN_ADDR"))
            .or(file.listen_addr)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

        Ok(Self {
            listen_addr: normalize_listen_addr(&listen_addr),
            backend,
            data_dir: args
                .data_dir
                .or_else(|| env_var("S3LAZY_DATA_DIR").map(PathBuf::from))
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            localstack_endpoint: args
                .cache_endpoint
                .or_else(|| env_var("S3LAZY_LOCALSTACK_ENDPOINT"))
                .or(file.localstack_endpoint)
                .unwrap_or_else(|| DEFAULT_LOCALSTACK_ENDPOINT.to_string()),
            origin_endpoint,
            aws_region,
            init_buckets,
            bucket_map,
            origin_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Regional path-style endpoint.
pub fn default_origin_endpoint(region: &str) -> String {
    format!("https://s3.{region}.amazonaws.com")
}

/// `:9000` binds every interface.
fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

/// Split on commas, trimming each part and dropping empty ones.
pub fn parse_comma_separated(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `local1:origin1,local2:origin2`. Entries without a `:` are skipped.
pub fn parse_bucket_map(raw: &str) -> HashMap<String, String> {
    parse_comma_separated(raw)
        .iter()
        .filter_map(|entry| {
            let (local, origin) = entry.split_once(':')?;
            Some((local.trim().to_string(), origin.trim().to_string()))
        })
        .collect()
}
