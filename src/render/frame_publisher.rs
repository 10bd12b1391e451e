//! Per-session publisher task
//!
//! The executor submits captured frames through a [`FrameSink`]. Submissions never
//! block: the sink keeps only the newest frame, tagged with a sequence number. The
//! [`FramePublisher`] task picks frames up one at a time, skips anything that is not
//! newer than what it already published, and applies retract-then-publish.

use super::{RenderHandle, RenderPublisher};
use crate::emulator::RasterFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A captured frame waiting to be published
#[derive(Debug)]
pub struct PublishedFrame {
    pub seq: u64,
    pub frame: RasterFrame,
    pub overlay: String,
}

/// Producer side of the frame channel
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: Arc<watch::Sender<Option<Arc<PublishedFrame>>>>,
    seq: Arc<AtomicU64>,
}

impl FrameSink {
    /// Replaces any frame not yet picked up and returns the sequence number assigned.
    pub fn submit(&self, frame: RasterFrame, overlay: String) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_replace(Some(Arc::new(PublishedFrame {
            seq,
            frame,
            overlay,
        })));
        seq
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PublishedFrame>>> {
        self.tx.subscribe()
    }
}

pub struct FramePublisher<P: RenderPublisher> {
    publisher: Arc<P>,
    glyphs: Vec<String>,
    frames: watch::Receiver<Option<Arc<PublishedFrame>>>,
    current: watch::Sender<Option<RenderHandle>>,
    last_seq: u64,
    decoration: Option<JoinHandle<()>>,
}

impl<P: RenderPublisher> FramePublisher<P> {
    /// Creates the publisher, its frame sink and a receiver for the current handle.
    pub fn new(
        publisher: Arc<P>,
        glyphs: Vec<String>,
    ) -> (Self, FrameSink, watch::Receiver<Option<RenderHandle>>) {
        let (frames_tx, frames_rx) = watch::channel(None);
        let (current_tx, current_rx) = watch::channel(None);
        let sink = FrameSink {
            tx: Arc::new(frames_tx),
            seq: Arc::new(AtomicU64::new(0)),
        };
        let task = Self {
            publisher,
            glyphs,
            frames: frames_rx,
            current: current_tx,
            last_seq: 0,
            decoration: None,
        };
        (task, sink, current_rx)
    }

    /// Publishes frames until cancelled or every sink is dropped.
    ///
    /// Returns the handle that is still visible, so the caller can retract it.
    pub async fn run(mut self, token: CancellationToken) -> Option<RenderHandle> {
        info!("Frame publisher started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        debug!("All frame sinks dropped");
                        break;
                    }
                }
            }

            let Some(next) = self.frames.borrow_and_update().clone() else {
                continue;
            };
            if next.seq <= self.last_seq {
                debug!(
                    "Skipping frame {} (last published {})",
                    next.seq, self.last_seq
                );
                continue;
            }
            self.last_seq = next.seq;

            // A publish in flight may already be visible, so it runs to completion
            // and its handle is returned for the caller to retract.
            self.publish_frame(&next).await;
        }

        if let Some(decoration) = self.decoration.take() {
            decoration.abort();
        }
        let handle = *self.current.borrow();
        info!("Frame publisher stopped");
        handle
    }

    async fn publish_frame(&mut self, next: &PublishedFrame) {
        let image = match self.publisher.compose_frame(&next.frame, &next.overlay) {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to compose frame {}: {}", next.seq, e);
                return;
            }
        };

        if let Some(decoration) = self.decoration.take() {
            decoration.abort();
        }

        let previous = self.current.send_replace(None);
        if let Some(previous) = previous {
            if let Err(e) = self.publisher.retract(previous).await {
                debug!("Ignoring retract failure for {}: {}", previous.message_id, e);
            }
        }

        match self.publisher.publish(image).await {
            Ok(handle) => {
                debug!("Published frame {} as message {}", next.seq, handle.message_id);
                self.current.send_replace(Some(handle));

                let publisher = self.publisher.clone();
                let glyphs = self.glyphs.clone();
                self.decoration = Some(tokio::spawn(async move {
                    if let Err(e) = publisher.decorate(handle, glyphs).await {
                        warn!("Failed to attach controls to {}: {}", handle.message_id, e);
                    }
                }));
            }
            Err(e) => warn!("Failed to publish frame {}: {}", next.seq, e),
        }
    }
}
