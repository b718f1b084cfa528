//! CLI command implementations.

use super::App;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use upload_queue::{ClearFilter, RecordKey, SendOutcome, UploadQueue, UploadScheduler};

fn parse_key(pairs: &[String]) -> anyhow::Result<RecordKey> {
    RecordKey::parse_pairs(pairs.iter().map(String::as_str)).context("invalid --key")
}

impl App {
    /// Flush on a timer until Ctrl-C, then let the running pass finish.
    pub async fn run(&self, interval: Option<Duration>) -> anyhow::Result<()> {
        let interval = interval.unwrap_or_else(|| self.config.flush_interval());
        let scheduler = UploadScheduler::new(self.registry.clone());
        scheduler.start(Some(interval))?;

        info!(
            interval_ms = interval.as_millis() as u64,
            database = %self.store.database().path(),
            "Upload queue daemon running"
        );

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;

        info!("Shutdown requested");
        scheduler.stop_and_wait().await;
        info!("Upload queue daemon stopped");
        Ok(())
    }

    /// One send per targeted queue. Returns a line per queue.
    pub async fn flush(&self, only: Option<&str>) -> anyhow::Result<Vec<String>> {
        let targets: Vec<(String, Arc<UploadQueue>)> = match only {
            Some(id) => vec![(id.to_string(), self.queue(id).await?)],
            None => self.registry.snapshot().await,
        };

        let mut lines = Vec::with_capacity(targets.len());
        for (id, queue) in targets {
            let line = match queue.send().await {
                Ok(SendOutcome::Idle) => format!("{id}: nothing to send"),
                Ok(SendOutcome::Delivered { records, .. }) => {
                    format!("{id}: delivered {records} record(s)")
                }
                Err(e) => format!("{id}: failed: {e}"),
            };
            lines.push(line);
        }
        Ok(lines)
    }

    /// A line per queue with stored and in-flight counts.
    pub async fn status(&self) -> anyhow::Result<Vec<String>> {
        let mut lines = vec![format!("database: {}", self.store.database().path())];
        for (id, status) in self.registry.status().await? {
            let oldest = status
                .oldest
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{id}: {} stored, {} in flight, oldest {oldest}",
                status.stored, status.in_flight
            ));
        }
        Ok(lines)
    }

    /// Append a JSON record; returns the key it was stored under.
    pub async fn enqueue(
        &self,
        queue_id: &str,
        keys: &[String],
        payload: &str,
    ) -> anyhow::Result<RecordKey> {
        let queue = self.queue(queue_id).await?;
        let payload: serde_json::Value =
            serde_json::from_str(payload).context("--payload is not valid JSON")?;

        let key = if keys.is_empty() {
            RecordKey::new("id", uuid::Uuid::new_v4().to_string())
        } else {
            parse_key(keys)?
        };

        queue.enqueue(key.clone(), &payload).await?;
        Ok(key)
    }

    /// Delete matching records; returns how many were removed.
    pub async fn clear(
        &self,
        queue_id: &str,
        until: Option<&str>,
        keys: &[String],
    ) -> anyhow::Result<u64> {
        let queue = self.queue(queue_id).await?;

        let until = until
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .with_context(|| format!("--until '{raw}' is not an RFC 3339 timestamp"))
            })
            .transpose()?;
        let key = if keys.is_empty() {
            None
        } else {
            Some(parse_key(keys)?)
        };

        Ok(queue.clear(&ClearFilter { key, until }).await?)
    }
}
