//! Event bus for challenge activity
//!
//! Services emit after their transaction commits, so listeners only ever
//! see durable state changes. Emitting never blocks and never fails.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Events emitted by the challenge services
#[derive(Debug, Clone)]
pub enum ChallengeEvent {
    AttemptRecorded {
        user_id: String,
        date: NaiveDate,
        attempt_number: u32,
        score: u8,
    },
    AttemptRejected {
        user_id: String,
        date: NaiveDate,
        attempts_used: u32,
        max_attempts: u32,
    },
    NewBest {
        user_id: String,
        date: NaiveDate,
        best_score: u8,
        attempts_used: u32,
    },
    Settled {
        user_id: String,
        date: NaiveDate,
        points_awarded: i64,
        credits_awarded: i64,
        levels_gained: i64,
    },
    ExtraAttemptsGranted {
        user_id: String,
        date: NaiveDate,
        granted: u32,
        total_extra_attempts: u32,
    },
    TargetPublished {
        date: NaiveDate,
    },
    UserDayReset {
        user_id: String,
        date: NaiveDate,
        attempts_deleted: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ChallengeEvent);
}

/// Event bus for broadcasting challenge events
pub struct EventBus {
    sender: broadcast::Sender<ChallengeEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ChallengeEvent) {
        trace!(event = ?event, "Emitting challenge event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChallengeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Feed every event to `listener` on a background task until the bus is dropped
    pub fn spawn_listener(&self, listener: Arc<dyn EventListener>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => listener.on_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ChallengeEvent) {
        match event {
            ChallengeEvent::AttemptRecorded {
                user_id,
                date,
                attempt_number,
                score,
            } => {
                debug!(user_id = %user_id, date = %date, attempt_number, score, "Attempt recorded");
            }
            ChallengeEvent::Settled {
                user_id,
                date,
                points_awarded,
                credits_awarded,
                levels_gained,
            } => {
                info!(
                    user_id = %user_id,
                    date = %date,
                    points_awarded,
                    credits_awarded,
                    levels_gained,
                    "Day settled"
                );
            }
            ChallengeEvent::UserDayReset {
                user_id,
                date,
                attempts_deleted,
            } => {
                info!(user_id = %user_id, date = %date, attempts_deleted, "User day reset");
            }
            _ => {
                trace!(event = ?event, "Challenge event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Duration};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ChallengeEvent::TargetPublished { date: day() });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            ChallengeEvent::TargetPublished { date } => assert_eq!(date, day()),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(ChallengeEvent::TargetPublished { date: day() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    struct Counter(AtomicUsize);

    impl EventListener for Counter {
        fn on_event(&self, _event: &ChallengeEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_spawned_listener_sees_events() {
        let bus = EventBus::with_capacity(8);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = bus.spawn_listener(counter.clone());

        for n in 1..=3 {
            bus.emit(ChallengeEvent::AttemptRecorded {
                user_id: "u".into(),
                date: day(),
                attempt_number: n,
                score: 50,
            });
        }
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("timeout")
            .expect("listener panicked");
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }
}
