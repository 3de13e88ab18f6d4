use anyhow::{bail, Context, Result};
use clap::Parser;
use ipnet::IpNet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Deadline for one storage-backed request.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the whole shutdown sequence.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Command-line flags, all optional so the config file keeps its values
/// unless a flag is actually passed.
#[derive(Parser, Debug, Default)]
#[command(name = "metron-server", version, about = "Receives, stores and serves metron metrics")]
pub struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address, host:port
    #[arg(short, long)]
    pub address: Option<String>,

    /// Seconds between snapshot saves, 0 saves after every write
    #[arg(short = 'i', long)]
    pub store_interval: Option<u64>,

    /// Snapshot file path, empty disables snapshots
    #[arg(short, long)]
    pub file_storage_path: Option<String>,

    /// Load the snapshot on boot
    #[arg(short, long)]
    pub restore: Option<bool>,

    /// Database connection URL, empty keeps metrics in memory
    #[arg(short, long)]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 shared key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Path to the RSA private key (PEM)
    #[arg(long, value_name = "FILE")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR allowed in X-Real-IP
    #[arg(short, long)]
    pub trusted_subnet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_store_interval", alias = "store_interval")]
    pub file_store_interval: u64,
    #[serde(default = "default_storage_path")]
    pub file_storage_path: String,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default)]
    pub database_dsn: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: Option<String>,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            file_store_interval: default_store_interval(),
            file_storage_path: default_storage_path(),
            restore: default_restore(),
            database_dsn: String::new(),
            key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

impl ServerConfig {
    /// Resolves the configuration from defaults, the config file, flags and
    /// the environment, in increasing order of precedence.
    pub fn load<E>(args: &Args, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let path = args
            .config
            .clone()
            .or_else(|| env("CONFIG").map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(address) = &args.address {
            self.address = address.clone();
        }
        if let Some(v) = args.store_interval {
            self.file_store_interval = v;
        }
        if let Some(path) = &args.file_storage_path {
            self.file_storage_path = path.clone();
        }
        if let Some(v) = args.restore {
            self.restore = v;
        }
        if let Some(dsn) = &args.database_dsn {
            self.database_dsn = dsn.clone();
        }
        if let Some(key) = &args.key {
            self.key = Some(key.clone());
        }
        if let Some(path) = &args.crypto_key {
            self.crypto_key = Some(path.clone());
        }
        if let Some(cidr) = &args.trusted_subnet {
            self.trusted_subnet = Some(cidr.clone());
        }
    }

    fn apply_env<E>(&mut self, env: &E) -> Result<()>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(address) = env("ADDRESS") {
            self.address = address;
        }
        if let Some(v) = parse_env(env, "STORE_INTERVAL")? {
            self.file_store_interval = v;
        }
        if let Some(path) = env("FILE_STORAGE_PATH") {
            self.file_storage_path = path;
        }
        if let Some(v) = parse_env(env, "RESTORE")? {
            self.restore = v;
        }
        if let Some(dsn) = env("DATABASE_DSN") {
            self.database_dsn = dsn;
        }
        if let Some(key) = env("KEY") {
            self.key = Some(key);
        }
        if let Some(path) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(path));
        }
        if let Some(cidr) = env("TRUSTED_SUBNET") {
            self.trusted_subnet = Some(cidr);
        }
        // Empty values switch the feature off, whatever the source.
        if self.key.as_deref() == Some("") {
            self.key = None;
        }
        if self.crypto_key.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.crypto_key = None;
        }
        if self.trusted_subnet.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.trusted_subnet = None;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            bail!("address must not be empty");
        }
        self.trusted_net()?;
        Ok(())
    }

    /// The parsed `trusted_subnet`, if one is configured.
    pub fn trusted_net(&self) -> Result<Option<IpNet>> {
        match self.trusted_subnet.as_deref() {
            Some(cidr) => {
                let net = cidr
                    .trim()
                    .parse::<IpNet>()
                    .with_context(|| format!("invalid trusted_subnet {cidr:?}"))?;
                Ok(Some(net))
            }
            None => Ok(None),
        }
    }

    /// `None` when snapshots are disabled by an empty path.
    pub fn snapshot_path(&self) -> Option<&str> {
        Some(self.file_storage_path.as_str()).filter(|p| !p.is_empty())
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.file_store_interval)
    }
}

fn parse_env<T, E>(env: &E, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    E: Fn(&str) -> Option<String>,
{
    match env(name) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {name}={raw:?}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}
