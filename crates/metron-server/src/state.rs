use crate::config::ServerConfig;
use crate::service::MetricsService;
use anyhow::Context;
use ipnet::IpNet;
use metron_common::crypto::Decryptor;
use metron_storage::snapshot::FileSnapshot;
use metron_storage::sql::SqlStorage;
use metron_storage::Storage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Material the ingress middleware checks requests against.
#[derive(Default)]
pub struct Ingress {
    pub key: Option<Vec<u8>>,
    pub decryptor: Option<Decryptor>,
    pub trusted_subnet: Option<IpNet>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetricsService>,
    pub ingress: Arc<Ingress>,
}

impl AppState {
    pub fn new(service: MetricsService, ingress: Ingress) -> Self {
        Self {
            service: Arc::new(service),
            ingress: Arc::new(ingress),
        }
    }

    /// Builds storage and ingress material from the resolved configuration.
    ///
    /// Fails on an unreachable database or an unreadable key file. `shutdown`
    /// aborts connection retries.
    pub async fn from_config(config: &ServerConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let storage = if config.database_dsn.is_empty() {
            tracing::info!("Using in-memory storage");
            Storage::memory()
        } else {
            let sql = SqlStorage::connect(&config.database_dsn, shutdown)
                .await
                .context("failed to connect to database")?;
            tracing::info!("Using SQL storage");
            Storage::Sql(sql)
        };

        let file = config.snapshot_path().map(FileSnapshot::new);
        let service = MetricsService::new(storage, file, config.store_interval());

        let decryptor = match &config.crypto_key {
            Some(path) => Some(
                Decryptor::load(path)
                    .with_context(|| format!("failed to load private key {}", path.display()))?,
            ),
            None => None,
        };
        let ingress = Ingress {
            key: config.key.as_ref().map(|k| k.as_bytes().to_vec()),
            decryptor,
            trusted_subnet: config.trusted_net()?,
        };

        Ok(Self::new(service, ingress))
    }
}
