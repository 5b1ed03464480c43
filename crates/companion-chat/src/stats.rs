//! Usage statistics forwarded to an external platform.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

pub const CONVERSATION_COUNT: &str = "conversation_count";
pub const TOTAL_MESSAGES: &str = "total_messages";

pub type StatsError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of usage counters, e.g. a storefront achievements API.
#[async_trait]
pub trait StatsReporter: Send + Sync {
    async fn update_stat(&self, name: &str, value: u64) -> Result<(), StatsError>;
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

#[async_trait]
impl StatsReporter for NoopStats {
    async fn update_stat(&self, _name: &str, _value: u64) -> Result<(), StatsError> {
        Ok(())
    }
}

/// Counters as of the last completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnStats {
    pub conversation_count: u64,
    pub total_messages: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TurnCounters {
    conversation_count: AtomicU64,
    total_messages: AtomicU64,
}

impl TurnCounters {
    /// Count one finished turn: a user message and its reply.
    pub(crate) fn record_turn(&self) -> TurnStats {
        TurnStats {
            conversation_count: self.conversation_count.fetch_add(1, Ordering::Relaxed) + 1,
            total_messages: self.total_messages.fetch_add(2, Ordering::Relaxed) + 2,
        }
    }

    pub(crate) fn snapshot(&self) -> TurnStats {
        TurnStats {
            conversation_count: self.conversation_count.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
        }
    }
}

/// Forward counters without waiting. Failures are logged and dropped.
pub(crate) fn report(reporter: Arc<dyn StatsReporter>, stats: TurnStats) {
    tokio::spawn(async move {
        for (name, value) in [
            (CONVERSATION_COUNT, stats.conversation_count),
            (TOTAL_MESSAGES, stats.total_messages),
        ] {
            match reporter.update_stat(name, value).await {
                Ok(()) => debug!("Reported {} = {}", name, value),
                Err(e) => warn!("Failed to report {}: {}", name, e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl StatsReporter for Recorder {
        async fn update_stat(&self, name: &str, value: u64) -> Result<(), StatsError> {
            self.seen.lock().push((name.to_string(), value));
            if name == CONVERSATION_COUNT {
                return Err("platform offline".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_counters() {
        let counters = TurnCounters::default();
        counters.record_turn();
        let stats = counters.record_turn();
        assert_eq!(stats.conversation_count, 2);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(counters.snapshot(), stats);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let recorder = Arc::new(Recorder::default());
        report(
            recorder.clone(),
            TurnStats {
                conversation_count: 1,
                total_messages: 2,
            },
        );

        for _ in 0..50 {
            if recorder.seen.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![(CONVERSATION_COUNT.to_string(), 1), (TOTAL_MESSAGES.to_string(), 2)]
        );
    }
}
