//! FIFO of accepted inputs between ingestion and the executor.
//!
//! Any number of producers enqueue; a single consumer dequeues with a timeout.

use super::rate_limiter::InputEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued input to make room
    #[default]
    DropOldest,
    /// Refuse the incoming input
    RejectNew,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSettings {
    /// `None` means unbounded
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    DisplacedOldest(InputEvent),
    Rejected(InputEvent),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    Event(InputEvent),
    TimedOut,
}

#[derive(Debug)]
pub struct InputQueue {
    settings: QueueSettings,
    events: Mutex<VecDeque<InputEvent>>,
    available: Notify,
}

impl InputQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            events: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(QueueSettings::default())
    }

    pub fn enqueue(&self, event: InputEvent) -> Enqueued {
        let outcome = {
            let mut events = self.events.lock();
            match self.settings.capacity {
                Some(capacity) if events.len() >= capacity => match self.settings.overflow {
                    OverflowPolicy::RejectNew => return Enqueued::Rejected(event),
                    OverflowPolicy::DropOldest => {
                        let displaced = events.pop_front();
                        events.push_back(event);
                        displaced.map_or(Enqueued::Queued, Enqueued::DisplacedOldest)
                    }
                },
                _ => {
                    events.push_back(event);
                    Enqueued::Queued
                }
            }
        };
        self.available.notify_one();
        outcome
    }

    /// Waits up to `timeout` for the next input.
    ///
    /// Dropping the returned future loses nothing: an event is only removed once it
    /// is returned.
    pub async fn dequeue(&self, timeout: Duration) -> Dequeued {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.events.lock().pop_front() {
                return Dequeued::Event(event);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.events.lock().pop_front() {
                    Some(event) => Dequeued::Event(event),
                    None => Dequeued::TimedOut,
                };
            }
        }
    }

    pub fn size(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drops all pending inputs and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let dropped = events.len();
        events.clear();
        dropped
    }
}
