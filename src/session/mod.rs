//! Input arbitration and session loop
//!
//! Turns a stream of untrusted reactions into a strict sequence of button presses
//! against one shared emulator, and keeps the published frame up to date.
//!
//! 1. [`rate_limiter`] - Per-actor cooldown and glyph resolution
//! 2. [`input_queue`] - FIFO between ingestion and execution
//! 3. [`input_executor`] - Press/hold/release loop, sole owner of the emulator
//! 4. [`session_controller`] - Lifecycle state machine and public API
//!
//! # Architecture
//!
//! ```text
//! Reaction ──► RateLimiter ──► InputQueue ──► InputExecutor ──► FrameSink ──► FramePublisher
//!                                                 ▲
//!                            Ticker / admin ──────┘
//!                            (SessionCommand)
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──► Starting ──► Running ──► Stopping ──► Idle
//!   ▲         │            │ ▲
//!   └─────────┘            └─┘
//!  (start failed)   (reset, speed, save, load)
//! ```

pub mod error;
pub mod input_executor;
pub mod input_queue;
pub mod rate_limiter;
pub mod session_controller;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8};

pub use error::{RejectedInput, SessionError};
pub use input_executor::{ExecutorSettings, InputExecutor, SessionCommand};
pub use input_queue::{Dequeued, Enqueued, InputQueue, OverflowPolicy, QueueSettings};
pub use rate_limiter::{ActorId, InputEvent, RateLimiter, RateLimiterSettings};
pub use session_controller::{
    Reaction, SessionController, SessionSettings, SessionStats, StopOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// When frames are published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// After every executed input, plus one initial frame
    #[default]
    InputDriven,
    /// On a fixed interval, independent of input
    TimerDriven,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::InputDriven => f.write_str("input-driven"),
            RenderMode::TimerDriven => f.write_str("timer-driven"),
        }
    }
}

/// Counters shared between ingestion, the executor and `stats()`
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub executed: AtomicU64,
    pub speed: AtomicU8,
}
