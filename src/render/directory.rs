use super::compose::compose_ppm;
use super::{ChannelId, EncodedImage, PublishError, RenderHandle, RenderPublisher};
use crate::emulator::RasterFrame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Publishes frames as files in a directory.
///
/// Every frame becomes `frame-<id>.ppm`; retracting deletes the file. The control
/// glyphs of the visible frame are written next to it as `frame-<id>.controls`.
#[derive(Debug)]
pub struct DirectoryPublisher {
    dir: PathBuf,
    channel_id: ChannelId,
    scale: u32,
    next_id: AtomicU64,
}

impl DirectoryPublisher {
    pub fn new(dir: impl Into<PathBuf>, channel_id: ChannelId, scale: u32) -> Self {
        Self {
            dir: dir.into(),
            channel_id,
            scale,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, message_id: u64) -> PathBuf {
        self.dir.join(format!("frame-{}.ppm", message_id))
    }

    fn controls_path(&self, message_id: u64) -> PathBuf {
        self.dir.join(format!("frame-{}.controls", message_id))
    }
}

impl RenderPublisher for DirectoryPublisher {
    fn compose_frame(
        &self,
        frame: &RasterFrame,
        overlay: &str,
    ) -> Result<EncodedImage, PublishError> {
        compose_ppm(frame, self.scale, overlay)
    }

    async fn publish(&self, image: EncodedImage) -> Result<RenderHandle, PublishError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let path = self.frame_path(message_id);
        tokio::fs::write(&path, &image.bytes).await?;
        info!("Published frame: {}", path.display());

        Ok(RenderHandle {
            message_id,
            channel_id: self.channel_id,
        })
    }

    async fn retract(&self, handle: RenderHandle) -> Result<(), PublishError> {
        let controls = self.controls_path(handle.message_id);
        if let Err(e) = tokio::fs::remove_file(&controls).await {
            debug!("No controls to remove for {}: {}", handle.message_id, e);
        }
        tokio::fs::remove_file(self.frame_path(handle.message_id)).await?;
        debug!("Retracted frame {}", handle.message_id);
        Ok(())
    }

    async fn decorate(&self, handle: RenderHandle, glyphs: Vec<String>) -> Result<(), PublishError> {
        tokio::fs::write(self.controls_path(handle.message_id), glyphs.join(" ")).await?;
        Ok(())
    }
}
