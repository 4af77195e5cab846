use crate::ai::Classifier;
use crate::config::MonitorConfig;
use crate::gmail::{MailError, Mailbox, window_cutoff};
use crate::models::Email;
use crate::pipeline::Pipeline;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Message ids already fed through the pipeline, with insertion times so
/// entries older than the listing window can be evicted instead of growing
/// for the life of the process.
pub struct ProcessedSet {
    seen: HashMap<String, Instant>,
    ttl: Duration,
}

impl ProcessedSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.seen.contains_key(message_id)
    }

    pub fn insert(&mut self, message_id: String) {
        self.seen.insert(message_id, Instant::now());
    }

    /// Drops entries that have aged out of the listing window; the provider
    /// can no longer return them, so remembering them buys nothing.
    pub fn evict_expired(&mut self) {
        let now = Instant::now();
        self.seen
            .retain(|_, &mut inserted| now.duration_since(inserted) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Post-fetch filter: the listing query is only a coarse pre-filter, so
/// sent mail and non-primary categories that slip through are discarded
/// here.
fn is_inbox_candidate(email: &Email) -> bool {
    let ids = &email.provider_label_ids;
    if ids.iter().any(|id| id == "SENT") {
        return false;
    }
    let has_category = ids.iter().any(|id| id.starts_with("CATEGORY_"));
    !has_category || ids.iter().any(|id| id == "CATEGORY_PERSONAL")
}

/// The polling loop: one pass immediately, then one per interval, for the
/// lifetime of the process. Passes run strictly sequentially; the next
/// tick is not actionable until the current pass finishes.
pub struct Monitor<M: Mailbox, C: Classifier> {
    mailbox: M,
    pipeline: Pipeline<C>,
    processed: ProcessedSet,
    poll_interval: Duration,
    lookback_secs: u64,
    max_results: u32,
}

impl<M: Mailbox, C: Classifier> Monitor<M, C> {
    pub fn new(mailbox: M, pipeline: Pipeline<C>, config: &MonitorConfig) -> Self {
        // Keep ids long enough to cover anything the listing window can
        // still return.
        let ttl = Duration::from_secs(config.lookback_secs * 2);
        Self {
            mailbox,
            pipeline,
            processed: ProcessedSet::new(ttl),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            lookback_secs: config.lookback_secs,
            max_results: config.max_results,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            lookback_secs = self.lookback_secs,
            "monitor started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.pass().await {
                Ok(0) => {}
                Ok(n) => info!(processed = n, "pass complete"),
                Err(MailError::Auth(msg)) => {
                    // Not retryable without the user's involvement.
                    anyhow::bail!("gmail authentication failed, reconnect the account: {msg}");
                }
                Err(err) => {
                    warn!(error = %err, "pass failed, retrying on the next tick");
                }
            }
        }
    }

    async fn pass(&mut self) -> Result<usize, MailError> {
        self.processed.evict_expired();

        let cutoff = window_cutoff(self.lookback_secs);
        let ids = self
            .mailbox
            .list_recent_inbox(cutoff, self.max_results)
            .await?;
        debug!(listed = ids.len(), known = self.processed.len(), "pass listing");

        // Labels can change underneath us (other clients, our own creates),
        // so the registry is re-resolved once per pass.
        self.pipeline.registry.refresh(&self.mailbox).await?;

        let mut handled = 0;
        for id in ids {
            if self.processed.contains(&id) {
                continue;
            }
            match self.mailbox.get_message(&id).await {
                Ok(mut email) => {
                    if is_inbox_candidate(&email) {
                        email.labels = self
                            .pipeline
                            .registry
                            .map_provider_ids(&email.provider_label_ids);
                        self.pipeline.process(&self.mailbox, &mut email).await;
                        handled += 1;
                    }
                    self.processed.insert(id);
                }
                Err(MailError::Auth(msg)) => return Err(MailError::Auth(msg)),
                Err(err) => {
                    // Transient: leave the id unrecorded so the next pass
                    // retries it.
                    warn!(message_id = %id, error = %err, "fetch failed, skipping message");
                }
            }
        }

        Ok(handled)
    }
}
