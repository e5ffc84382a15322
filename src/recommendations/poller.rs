// Periodic recommendation polling
//
// One fetch per cycle; the next cycle is armed only after the previous
// response has been handled, so polls never overlap. Successful cycles
// re-arm after the success delay, failed ones after the longer failure
// delay. Polling continues until cancelled.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::RecommendationSource;
use super::types::RecommendationSnapshot;

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Non-empty results replaced the snapshot
    Updated(usize),
    /// Empty results; snapshot untouched
    Unchanged,
    Failed,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, PollOutcome::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Waiting { last: PollOutcome },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub success_delay: Duration,
    pub failure_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_secs(5),
            failure_delay: Duration::from_secs(10),
        }
    }
}

/// Polls a [`RecommendationSource`] for one session
#[derive(Clone)]
pub struct RecommendationPoller {
    source: Arc<dyn RecommendationSource>,
    session_id: String,
    config: PollerConfig,
    state: Arc<watch::Sender<PollerState>>,
    snapshot: Arc<watch::Sender<Option<RecommendationSnapshot>>>,
    last_error: Arc<watch::Sender<Option<String>>>,
    polls: Arc<AtomicU64>,
}

impl RecommendationPoller {
    pub fn new(
        source: Arc<dyn RecommendationSource>,
        session_id: impl Into<String>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            session_id: session_id.into(),
            config,
            state: Arc::new(watch::channel(PollerState::Idle).0),
            snapshot: Arc::new(watch::channel(None).0),
            last_error: Arc::new(watch::channel(None).0),
            polls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn snapshot(&self) -> Option<RecommendationSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<RecommendationSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Error notice from the most recent failed poll, until dismissed
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.last_error.subscribe()
    }

    pub fn dismiss_error(&self) {
        self.last_error.send_replace(None);
    }

    /// Number of completed poll cycles
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Delay before the next cycle after `outcome`
    pub fn next_delay(&self, outcome: PollOutcome) -> Duration {
        if outcome.is_success() {
            self.config.success_delay
        } else {
            self.config.failure_delay
        }
    }

    /// Perform a single fetch and apply its result
    pub async fn poll_once(&self) -> PollOutcome {
        self.state.send_replace(PollerState::Polling);

        let outcome = match self.source.fetch(&self.session_id).await {
            Ok(response) => {
                let properties = response.properties.unwrap_or_default();
                if properties.is_empty() {
                    debug!("No recommendations yet for {}", self.session_id);
                    PollOutcome::Unchanged
                } else {
                    let count = properties.len();
                    info!("Received {} recommendations", count);
                    self.snapshot.send_replace(Some(RecommendationSnapshot {
                        requirements: response.requirements,
                        properties,
                        fetched_at: Utc::now(),
                    }));
                    PollOutcome::Updated(count)
                }
            }
            Err(e) => {
                warn!("Error polling for recommendations: {}", e);
                self.last_error.send_replace(Some(e.to_string()));
                PollOutcome::Failed
            }
        };

        self.polls.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// Poll until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Recommendation polling started for {}", self.session_id);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            let delay = self.next_delay(outcome);
            self.state.send_replace(PollerState::Waiting { last: outcome });
            debug!("Next recommendation poll in {:?}", delay);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(PollerState::Stopped);
        info!("Recommendation polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MeetError, Result};
    use crate::recommendations::types::{Property, RecommendationResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct Scripted(Mutex<VecDeque<Result<RecommendationResponse>>>);

    #[async_trait]
    impl RecommendationSource for Scripted {
        async fn fetch(&self, _session_id: &str) -> Result<RecommendationResponse> {
            self.0
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(RecommendationResponse::default()))
        }
    }

    fn poller(responses: Vec<Result<RecommendationResponse>>) -> RecommendationPoller {
        RecommendationPoller::new(
            Arc::new(Scripted(Mutex::new(responses.into()))),
            "session-1",
            PollerConfig::default(),
        )
    }

    fn named(name: &str) -> Property {
        Property {
            building_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failure_sets_dismissable_error() {
        let poller = poller(vec![Err(MeetError::Poll("HTTP error! Status: 502".into()))]);

        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(
            poller.last_error().unwrap(),
            "Failed to load recommendations: HTTP error! Status: 502"
        );

        poller.dismiss_error();
        assert!(poller.last_error().is_none());
    }

    #[tokio::test]
    async fn test_missing_properties_key_is_unchanged() {
        let poller = poller(vec![Ok(RecommendationResponse {
            requirements: serde_json::json!({"city": "Pune"}),
            properties: None,
        })]);

        assert_eq!(poller.poll_once().await, PollOutcome::Unchanged);
        assert!(poller.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_updated_outcome_counts_properties() {
        let poller = poller(vec![Ok(RecommendationResponse {
            requirements: serde_json::Value::Null,
            properties: Some(vec![named("A"), named("B")]),
        })]);

        assert_eq!(poller.poll_once().await, PollOutcome::Updated(2));
        assert_eq!(poller.polls(), 1);
    }

    #[test]
    fn test_delays() {
        let poller = poller(vec![]);
        assert_eq!(poller.next_delay(PollOutcome::Updated(1)), Duration::from_secs(5));
        assert_eq!(poller.next_delay(PollOutcome::Unchanged), Duration::from_secs(5));
        assert_eq!(poller.next_delay(PollOutcome::Failed), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let poller = poller(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        poller.run(cancel).await;
        assert_eq!(poller.state(), PollerState::Stopped);
    }
}
