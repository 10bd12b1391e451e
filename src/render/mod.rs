//! Frame composition and publishing boundary
//!
//! The session core hands captured frames to a [`RenderPublisher`] and keeps track of
//! the [`RenderHandle`] of whatever is currently visible to participants.
//!
//! # Publish protocol
//!
//! ```text
//! RasterFrame ──► compose_frame ──► retract(old) ──► publish(new) ──► decorate(new)
//!                                   (errors ignored)                  (background)
//! ```
//!
//! - [`compose`] - PPM encoding with scaling and a status overlay
//! - [`frame_publisher`] - per-session task that applies the protocol in order
//! - [`directory`] - reference publisher writing frames into a directory

pub mod compose;
pub mod directory;
pub mod frame_publisher;

use crate::emulator::RasterFrame;
use std::future::Future;
use thiserror::Error;

pub use directory::DirectoryPublisher;
pub use frame_publisher::{FramePublisher, FrameSink, PublishedFrame};

pub type MessageId = u64;
pub type ChannelId = u64;

/// Identity of a published frame. Replaced on every publish, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderHandle {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
}

/// Encoded image ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub file_name: String,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to compose frame: {0}")]
    Compose(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Publisher I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns frames into messages visible to participants.
///
/// `compose_frame` is synchronous and cheap enough to run on the publisher task. The
/// async methods may be slow; the session core never awaits them on the input path.
pub trait RenderPublisher: Send + Sync + 'static {
    fn compose_frame(
        &self,
        frame: &RasterFrame,
        overlay: &str,
    ) -> Result<EncodedImage, PublishError>;

    fn publish(
        &self,
        image: EncodedImage,
    ) -> impl Future<Output = Result<RenderHandle, PublishError>> + Send;

    fn retract(&self, handle: RenderHandle) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Attaches the control glyphs to a published frame.
    fn decorate(
        &self,
        handle: RenderHandle,
        glyphs: Vec<String>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send {
        let _ = (handle, glyphs);
        async { Ok(()) }
    }
}
