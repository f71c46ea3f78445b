//! Command handlers for the CLI

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use kvstore::{cursor_to_string, parse_cursor, EmbeddedStore, LogService, StreamEntry};
use stampede::{Batch, Context, StampedeCache};
use tracing::info;

pub struct CommandHandler {
    ctx: Context<EmbeddedStore>,
}

impl CommandHandler {
    pub fn new(ctx: Context<EmbeddedStore>) -> Self {
        Self { ctx }
    }

    pub async fn ping(&self) -> Result<String> {
        let alive = self.ctx.ping().await?;
        Ok(if alive { "PONG" } else { "Failed to ping store" }.to_string())
    }

    pub async fn get_key(&self, key: &str) -> Result<String> {
        Ok(match self.ctx.get(key).await? {
            Some(value) => format!("{} = {}", key, String::from_utf8_lossy(&value)),
            None => format!("Key '{}' not found.", key),
        })
    }

    pub async fn set_key(&self, key: &str, value: &str) -> Result<String> {
        let outcome = self.ctx.set_and_record(key, value.as_bytes()).await?;
        info!(key, id = %outcome.id, retained = outcome.trim.retained, "Recorded invalidation");

        Ok(format!(
            "Key '{}' set successfully and recorded invalidation (trimmed to {}).",
            key, outcome.trim.max_len
        ))
    }

    /// Read from `from` when given, otherwise from (and advancing) the checkpoint
    pub async fn read_stream(&self, from: Option<&str>) -> Result<String> {
        let consumer = self.ctx.consumer();
        let batch = match from {
            Some(from) => {
                let cursor = parse_cursor(from).with_context(|| format!("bad cursor '{from}'"))?;
                consumer.read_from(cursor).await?
            }
            None => consumer.read_from_checkpoint().await?,
        };

        Ok(render_batch(&batch))
    }

    pub async fn range(&self, count: usize) -> Result<String> {
        let stream = &self.ctx.config().stream;
        let entries = self.ctx.store().range(stream, count).await?;
        let total = self.ctx.store().len(stream).await?;

        let mut lines: Vec<String> = entries.iter().map(render_entry).collect();
        lines.push(format!("({} of {} entries in '{}')", entries.len(), total, stream));
        Ok(lines.join("\n"))
    }

    /// Show `callers` concurrent misses collapsing into one load, then an
    /// invalidation round trip, on a throwaway in-memory store
    pub async fn demo(&self, callers: usize, delay: Duration) -> Result<String> {
        let cache = Arc::new(StampedeCache::<u64>::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..callers.max(1))
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                tokio::spawn(async move {
                    cache
                        .get_or_set("demo_key", || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(delay).await;
                            Ok::<_, std::convert::Infallible>(
                                chrono::Utc::now().timestamp_subsec_millis() as u64 % 100 + 1,
                            )
                        })
                        .await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await??);
        }

        let mut lines = vec![
            format!("All results: {:?}", results),
            format!("Loader calls: {}", loads.load(Ordering::SeqCst)),
        ];

        let scratch = Context::new(Arc::new(EmbeddedStore::in_memory()), self.ctx.config().clone());
        let outcome = scratch.set_and_record("demo_key", b"updated").await?;
        let batch = scratch
            .consumer()
            .process_from_checkpoint(|events| {
                for event in &events {
                    cache.invalidate(&event.key);
                }
                async { Ok::<(), std::convert::Infallible>(()) }
            })
            .await?;

        lines.push(format!(
            "Recorded invalidation {} and consumed {} event(s); cached: {}",
            outcome.id,
            batch.len(),
            cache.get("demo_key").is_some()
        ));

        Ok(lines.join("\n"))
    }
}

fn render_entry(entry: &StreamEntry) -> String {
    let fields: Vec<String> = entry
        .fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("{} {}", entry.id, fields.join(" "))
}

fn render_batch(batch: &Batch) -> String {
    let mut lines: Vec<String> = batch
        .events
        .iter()
        .map(|event| format!("{} invalidate {}", event.id, event.key))
        .collect();

    if lines.is_empty() {
        lines.push("No new events.".to_string());
    }
    if batch.skipped > 0 {
        lines.push(format!("Skipped {} malformed entries.", batch.skipped));
    }
    lines.push(format!("cursor: {}", cursor_to_string(batch.cursor)));

    lines.join("\n")
}
