use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::extract::PipelineExtractor;
use crate::page::PageSource;

/// Nodes added somewhere below the watched container, as outer HTML.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutationRecord {
    pub added_nodes: Vec<String>,
}

pub type MutationBatch = Vec<MutationRecord>;

/// Live change subscription. Dropping it cancels the producer.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<MutationBatch>,
    token: CancellationToken,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<MutationBatch>, token: CancellationToken) -> Self {
        Self { rx, token }
    }

    /// Next batch; `None` once the producer is gone.
    pub async fn next_batch(&mut self) -> Option<MutationBatch> {
        self.rx.recv().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Source of change notifications for the pipeline listing container.
pub trait ChangeFeed: Send + Sync {
    /// Starts watching the listing of `url`. The producer stops when `token`
    /// is cancelled or the returned subscription is dropped.
    fn subscribe(&self, url: &str, token: CancellationToken) -> Subscription;
}

/// Change feed that reloads the page on its own cadence and reports listing
/// children that were not there on the previous load.
pub struct PollingChangeFeed {
    source: Arc<dyn PageSource>,
    extractor: Arc<PipelineExtractor>,
    period: Duration,
}

impl PollingChangeFeed {
    pub fn new(
        source: Arc<dyn PageSource>,
        extractor: Arc<PipelineExtractor>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            extractor,
            period,
        }
    }
}

impl ChangeFeed for PollingChangeFeed {
    fn subscribe(&self, url: &str, token: CancellationToken) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = self.source.clone();
        let extractor = self.extractor.clone();
        let period = self.period;
        let url = url.to_string();
        let producer_token = token.clone();

        tokio::spawn(async move {
            let mut known: Option<HashSet<String>> = None;
            loop {
                tokio::select! {
                    _ = producer_token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                let page = match source.load(&url).await {
                    Ok(page) => page,
                    Err(err) => {
                        engine_warn!("Change feed could not load {}: {}", url, err);
                        continue;
                    }
                };
                if producer_token.is_cancelled() {
                    break;
                }
                let Some(children) = extractor.listing_children(&page.html) else {
                    engine_debug!("Change feed found no listing container at {}", url);
                    continue;
                };
                let current: HashSet<String> = children.iter().cloned().collect();
                if let Some(previous) = &known {
                    let added: Vec<String> = children
                        .into_iter()
                        .filter(|child| !previous.contains(child))
                        .collect();
                    if !added.is_empty()
                        && tx
                            .send(vec![MutationRecord { added_nodes: added }])
                            .is_err()
                    {
                        break;
                    }
                }
                known = Some(current);
            }
        });

        Subscription::new(rx, token)
    }
}
