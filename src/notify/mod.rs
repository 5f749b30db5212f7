// src/notify/mod.rs
//! High-impact alert fan-out. Jobs go through a channel to a background
//! worker so delivery never holds up ingestion.

pub mod email;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::NewsItem;
use crate::store::KeywordSession;

pub use email::EmailNotifier;

/// One alert for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    pub recipient: String,
    pub subject: String,
    pub industry: String,
    pub title: String,
    pub impact_score: f64,
    pub summary: String,
}

impl NotificationJob {
    pub fn for_item(recipient: &str, item: &NewsItem) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: format!("High impact ({}): {}", item.industry_tag, item.title),
            industry: item.industry_tag.clone(),
            title: item.title.clone(),
            impact_score: item.impact_score,
            summary: item.summary.clone(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, job: &NotificationJob) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Used when SMTP is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, job: &NotificationJob) -> Result<()> {
        info!(
            target: "notify",
            recipient = %job.recipient,
            industry = %job.industry,
            subject = %job.subject,
            "alert (log only)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Cloneable handle shared by all keyword units.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<NotificationJob>,
    threshold: f64,
}

impl NotificationDispatcher {
    /// Start the delivery worker. It exits once every dispatcher clone is dropped
    /// and the queue is drained.
    pub fn spawn(notifier: Arc<dyn Notifier>, threshold: f64) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver_loop(notifier, rx));
        (Self { tx, threshold }, worker)
    }

    /// Queue one job per opted-in subscriber of the item's industry, if the
    /// item's impact is strictly above the threshold. Returns jobs queued.
    pub async fn enqueue_for_item(
        &self,
        session: &mut KeywordSession,
        item: &NewsItem,
    ) -> Result<usize, sqlx::Error> {
        if item.impact_score <= self.threshold {
            return Ok(0);
        }
        let subscribers = session.alert_subscribers(&item.industry_tag).await?;
        let mut queued = 0;
        for sub in &subscribers {
            if self.tx.send(NotificationJob::for_item(&sub.email, item)).is_err() {
                warn!(target: "notify", "delivery worker gone; alert dropped");
                break;
            }
            queued += 1;
        }
        counter!("pipeline_notifications_enqueued_total").increment(queued as u64);
        debug!(target: "notify", news_id = item.id, impact = item.impact_score, queued, "alerts queued");
        Ok(queued)
    }
}

async fn deliver_loop(notifier: Arc<dyn Notifier>, mut rx: mpsc::UnboundedReceiver<NotificationJob>) {
    while let Some(job) = rx.recv().await {
        if let Err(e) = notifier.deliver(&job).await {
            warn!(
                target: "notify",
                notifier = notifier.name(),
                recipient = %job.recipient,
                error = %format!("{e:#}"),
                "alert delivery failed"
            );
        }
    }
    debug!(target: "notify", "delivery worker stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every job; optionally fails delivery for one recipient.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub delivered: Mutex<Vec<NotificationJob>>,
        pub fail_for: Option<String>,
    }

    impl RecordingNotifier {
        pub fn jobs(&self) -> Vec<NotificationJob> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, job: &NotificationJob) -> Result<()> {
            if self.fail_for.as_deref() == Some(job.recipient.as_str()) {
                anyhow::bail!("smtp rejected recipient");
            }
            self.delivered.lock().unwrap().push(job.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }
}
