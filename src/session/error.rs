use super::rate_limiter::ActorId;
use super::SessionState;
use crate::emulator::EmulatorError;
use crate::library::LibraryError;
use chrono::TimeDelta;
use thiserror::Error;

/// Errors returned by [`SessionController`](super::SessionController) operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation is not allowed in the current lifecycle state
    #[error("Cannot {operation} while session is {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// Emulator failed to open, run or persist state
    #[error("Emulator failure: {0}")]
    ResourceFailure(#[from] EmulatorError),

    /// ROM or save state name could not be resolved
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// Executor task went away before answering a command
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),
}

impl SessionError {
    pub fn is_resource_failure(&self) -> bool {
        matches!(
            self,
            SessionError::ResourceFailure(_) | SessionError::Library(_)
        )
    }
}

/// Why an incoming reaction did not become a queued input.
///
/// Rejections are expected traffic and never surface as errors to participants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectedInput {
    #[error("Unknown control glyph: {0:?}")]
    UnknownGlyph(String),

    #[error("Actor {actor} is rate limited for another {}ms", .retry_in.num_milliseconds())]
    RateLimited { actor: ActorId, retry_in: TimeDelta },

    #[error("Reactions from bots are ignored")]
    BotActor,

    #[error("No session is running")]
    SessionNotRunning,

    #[error("Reaction is for another channel")]
    WrongChannel,

    #[error("Reaction is not on the current frame")]
    StaleFrame,

    #[error("Input queue is full")]
    QueueFull,
}
