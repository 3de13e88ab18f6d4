use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Command-line flags. Every flag is optional so that an absent flag never
/// shadows a value coming from the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "metron-agent", version, about = "Samples host metrics and ships them to metron-server")]
pub struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server address, host:port
    #[arg(short, long)]
    pub address: Option<String>,

    /// Seconds between reports
    #[arg(short, long)]
    pub report_interval: Option<u64>,

    /// Seconds between samples
    #[arg(short, long)]
    pub poll_interval: Option<u64>,

    /// Maximum concurrent requests per report
    #[arg(short = 'l', long)]
    pub rate_limit: Option<usize>,

    /// Maximum metrics per request, 0 sends everything at once
    #[arg(short, long)]
    pub send_size: Option<usize>,

    /// HMAC-SHA256 shared key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Path to the server's RSA public key (PEM)
    #[arg(long, value_name = "FILE")]
    pub crypto_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default)]
    pub send_size: usize,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_report_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_rate_limit() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            report_interval: default_report_interval(),
            poll_interval: default_poll_interval(),
            rate_limit: default_rate_limit(),
            send_size: 0,
            key: None,
            crypto_key: None,
        }
    }
}

impl AgentConfig {
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
        if let Some(v) = args.report_interval {
            self.report_interval = v;
        }
        if let Some(v) = args.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = args.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = args.send_size {
            self.send_size = v;
        }
        if let Some(key) = &args.key {
            self.key = Some(key.clone());
        }
        if let Some(path) = &args.crypto_key {
            self.crypto_key = Some(path.clone());
        }
    }

    fn apply_env<E>(&mut self, env: &E) -> Result<()>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(address) = env("ADDRESS") {
            self.address = address;
        }
        if let Some(v) = parse_env(env, "REPORT_INTERVAL")? {
            self.report_interval = v;
        }
        if let Some(v) = parse_env(env, "POLL_INTERVAL")? {
            self.poll_interval = v;
        }
        if let Some(v) = parse_env(env, "RATE_LIMIT")? {
            self.rate_limit = v;
        }
        if let Some(v) = parse_env(env, "SEND_SIZE")? {
            self.send_size = v;
        }
        if let Some(key) = env("KEY") {
            self.key = Some(key);
        }
        if let Some(path) = env("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(path));
        }
        // An empty key disables signing, whatever the source.
        if self.key.as_deref() == Some("") {
            self.key = None;
        }
        if self.crypto_key.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.crypto_key = None;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            bail!("address must not be empty");
        }
        if self.report_interval == 0 {
            bail!("report_interval must be positive");
        }
        if self.poll_interval == 0 {
            bail!("poll_interval must be positive");
        }
        if self.rate_limit == 0 {
            bail!("rate_limit must be positive");
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let config = AgentConfig::load(&Args::default(), env_of(&[])).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.report_interval, 10);
        assert_eq!(config.poll_interval, 2);
        assert_eq!(config.rate_limit, 1);
        assert_eq!(config.send_size, 0);
        assert!(config.key.is_none());
    }

    #[test]
    fn env_beats_flags_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "address = \"file:1\"\nreport_interval = 30\npoll_interval = 5\nrate_limit = 4\n",
        )
        .unwrap();

        let args = Args {
            config: Some(path),
            address: Some("flag:2".into()),
            poll_interval: Some(7),
            ..Args::default()
        };
        let config =
            AgentConfig::load(&args, env_of(&[("ADDRESS", "env:3"), ("KEY", "secret")])).unwrap();

        assert_eq!(config.address, "env:3");
        assert_eq!(config.poll_interval, 7);
        assert_eq!(config.report_interval, 30);
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.key.as_deref(), Some("secret"));
    }

    #[test]
    fn json_config_is_picked_up_from_env_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, r#"{"send_size": 25, "key": "k"}"#).unwrap();

        let config = AgentConfig::load(
            &Args::default(),
            env_of(&[("CONFIG", path.to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(config.send_size, 25);
        assert_eq!(config.key.as_deref(), Some("k"));
        assert_eq!(config.report_interval, 10);
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let err = AgentConfig::load(&Args::default(), env_of(&[("RATE_LIMIT", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT"));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        assert!(AgentConfig::load(&Args::default(), env_of(&[("RATE_LIMIT", "0")])).is_err());
    }

    #[test]
    fn empty_key_disables_signing() {
        let args = Args {
            key: Some("flag".into()),
            ..Args::default()
        };
        let config = AgentConfig::load(&args, env_of(&[("KEY", "")])).unwrap();
        assert!(config.key.is_none());
    }
}
