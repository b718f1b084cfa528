//! Builds the store, transport and queue registry from configuration.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use upload_queue::{DefaultHooks, QueueOptions, QueueRegistry, Transport, UploadQueue};
use upload_queue_config_and_utils::{Config, Paths, SenderSettings};
use upload_queue_database::SqliteRecordStore;
use upload_queue_sender::{HttpTransport, SenderConfig};

/// Wired application: one SQLite store and one HTTP transport shared by
/// every configured queue.
pub struct App {
    pub(crate) config: Config,
    pub(crate) store: Arc<SqliteRecordStore>,
    pub(crate) registry: Arc<QueueRegistry>,
}

fn sender_config(settings: &SenderSettings) -> SenderConfig {
    SenderConfig {
        timeout_secs: settings.timeout_secs,
        initial_retry_delay_ms: settings.initial_retry_delay_ms,
        max_retry_delay_ms: settings.max_retry_delay_ms,
        max_retries: settings.max_retries,
        auth_token: settings.auth_token.clone(),
    }
}

impl App {
    /// Open the database and build queues for `config`.
    pub async fn open(config: Config, paths: Paths) -> anyhow::Result<Self> {
        paths.ensure_dirs()?;
        let db_path = config.database_path(&paths);
        let store = SqliteRecordStore::open(&db_path)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?;

        let transport = HttpTransport::new(sender_config(&config.sender))?;
        Self::with_parts(config, store, Arc::new(transport)).await
    }

    /// Build from an already opened store and any transport.
    pub(crate) async fn with_parts(
        config: Config,
        store: SqliteRecordStore,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(store);
        let registry = Arc::new(QueueRegistry::new());

        for queue_config in &config.queues {
            let mut options = QueueOptions::new(&queue_config.storage_location);
            options.max_length = queue_config.max_length;
            options.static_url = queue_config.static_url.clone();

            let queue = UploadQueue::new(
                &queue_config.id,
                options,
                store.clone(),
                transport.clone(),
                Arc::new(DefaultHooks),
            )?;
            registry.register(&queue_config.id, Arc::new(queue)).await;
        }

        if registry.is_empty().await {
            warn!("No queues configured");
        } else {
            info!(queues = registry.len().await, "Upload queues ready");
        }

        Ok(Self {
            config,
            store,
            registry,
        })
    }

    pub(crate) async fn queue(&self, id: &str) -> anyhow::Result<Arc<UploadQueue>> {
        self.registry
            .find(id)
            .await
            .with_context(|| format!("unknown queue '{id}'"))
    }
}
