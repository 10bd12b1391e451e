//! Scripted collaborators shared by the unit tests.

use crate::controls::ButtonSymbol;
use crate::emulator::{EmulatorBackend, EmulatorError, EmulatorSession, RasterFrame};
use crate::render::{EncodedImage, MessageId, PublishError, RenderHandle, RenderPublisher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmuCall {
    Open(PathBuf, u8),
    Advance(u32),
    Press(ButtonSymbol),
    Release(ButtonSymbol),
    Capture,
    Save(PathBuf),
    Load(PathBuf),
    SetSpeed(u8),
    Close,
}

#[derive(Debug, Default)]
pub struct MockSwitches {
    pub fail_open: AtomicBool,
    pub fail_press: AtomicBool,
    pub fail_advance: AtomicBool,
    pub fail_capture: AtomicBool,
}

/// Records every call as `(session id, call)`.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub calls: Arc<Mutex<Vec<(u64, EmuCall)>>>,
    pub switches: Arc<MockSwitches>,
    sessions: Arc<AtomicU64>,
}

impl MockBackend {
    pub fn calls(&self) -> Vec<(u64, EmuCall)> {
        self.calls.lock().clone()
    }

    /// Calls without session ids, in order
    pub fn plain_calls(&self) -> Vec<EmuCall> {
        self.calls.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn presses(&self) -> Vec<ButtonSymbol> {
        self.plain_calls()
            .into_iter()
            .filter_map(|c| match c {
                EmuCall::Press(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}

impl EmulatorBackend for MockBackend {
    fn open(&self, rom: &Path, speed: u8) -> Result<Box<dyn EmulatorSession>, EmulatorError> {
        if self.switches.fail_open.load(Ordering::SeqCst) {
            return Err(EmulatorError::FileNotFound(rom.to_path_buf()));
        }
        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls
            .lock()
            .push((id, EmuCall::Open(rom.to_path_buf(), speed)));
        Ok(Box::new(MockEmulator {
            id,
            frame: 0,
            calls: self.calls.clone(),
            switches: self.switches.clone(),
        }))
    }
}

pub struct MockEmulator {
    id: u64,
    frame: u64,
    calls: Arc<Mutex<Vec<(u64, EmuCall)>>>,
    switches: Arc<MockSwitches>,
}

impl MockEmulator {
    fn record(&self, call: EmuCall) {
        self.calls.lock().push((self.id, call));
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), EmulatorError> {
        if flag.load(Ordering::SeqCst) {
            Err(EmulatorError::Backend(format!("{} failed", what)))
        } else {
            Ok(())
        }
    }
}

impl EmulatorSession for MockEmulator {
    fn advance(&mut self, frames: u32) -> Result<(), EmulatorError> {
        Self::check(&self.switches.fail_advance, "advance")?;
        self.record(EmuCall::Advance(frames));
        self.frame += frames as u64;
        Ok(())
    }

    fn press(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError> {
        Self::check(&self.switches.fail_press, "press")?;
        self.record(EmuCall::Press(button));
        Ok(())
    }

    fn release(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError> {
        self.record(EmuCall::Release(button));
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RasterFrame, EmulatorError> {
        Self::check(&self.switches.fail_capture, "capture")?;
        self.record(EmuCall::Capture);
        Ok(RasterFrame::new(1, 1, vec![(self.frame % 256) as u8, 0, 0]))
    }

    fn save_state(&mut self, path: &Path) -> Result<(), EmulatorError> {
        self.record(EmuCall::Save(path.to_path_buf()));
        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> Result<(), EmulatorError> {
        if !path.exists() {
            return Err(EmulatorError::FileNotFound(path.to_path_buf()));
        }
        self.record(EmuCall::Load(path.to_path_buf()));
        Ok(())
    }

    fn set_speed(&mut self, speed: u8) -> Result<(), EmulatorError> {
        self.record(EmuCall::SetSpeed(speed));
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), EmulatorError> {
        self.record(EmuCall::Close);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherCall {
    Publish(MessageId, String),
    Retract(MessageId),
    Decorate(MessageId, usize),
}

#[derive(Debug, Clone, Default)]
pub struct MockPublisher {
    pub calls: Arc<Mutex<Vec<PublisherCall>>>,
    pub publish_delay: Option<Duration>,
    pub fail_retract: Arc<AtomicBool>,
    /// Messages visible in the channel. An id becomes visible as soon as publish starts.
    pub live: Arc<Mutex<BTreeSet<MessageId>>>,
    next_id: Arc<AtomicU64>,
}

impl MockPublisher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            publish_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<PublisherCall> {
        self.calls.lock().clone()
    }

    pub fn published(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PublisherCall::Publish(id, _) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn live(&self) -> BTreeSet<MessageId> {
        self.live.lock().clone()
    }

    pub fn retracted(&self) -> Vec<MessageId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PublisherCall::Retract(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl RenderPublisher for MockPublisher {
    fn compose_frame(
        &self,
        frame: &RasterFrame,
        overlay: &str,
    ) -> Result<EncodedImage, PublishError> {
        Ok(EncodedImage {
            bytes: frame.pixels.clone(),
            media_type: "application/octet-stream",
            file_name: overlay.to_string(),
        })
    }

    async fn publish(&self, image: EncodedImage) -> Result<RenderHandle, PublishError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().insert(id);
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .push(PublisherCall::Publish(id, image.file_name));
        Ok(RenderHandle {
            message_id: id,
            channel_id: 1,
        })
    }

    async fn retract(&self, handle: RenderHandle) -> Result<(), PublishError> {
        self.calls
            .lock()
            .push(PublisherCall::Retract(handle.message_id));
        self.live.lock().remove(&handle.message_id);
        if self.fail_retract.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("message already gone".to_string()));
        }
        Ok(())
    }

    async fn decorate(&self, handle: RenderHandle, glyphs: Vec<String>) -> Result<(), PublishError> {
        self.calls
            .lock()
            .push(PublisherCall::Decorate(handle.message_id, glyphs.len()));
        Ok(())
    }
}
