//! Emulation engine boundary.
//!
//! The session loop only talks to the emulator through [`EmulatorBackend`] and
//! [`EmulatorSession`]. All calls are synchronous and scoped to one open session.
//! A session is closed by consuming it, so nothing can call into it afterwards.
//!
//! [`headless`] provides a deterministic software backend used by the binary and
//! the tests.

pub mod headless;

use crate::controls::ButtonSymbol;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use headless::{HeadlessBackend, HeadlessEmulator};

/// Slowest supported emulation speed multiplier
pub const MIN_SPEED: u8 = 1;
/// Fastest supported emulation speed multiplier
pub const MAX_SPEED: u8 = 10;

/// Clamps a requested speed into `MIN_SPEED..=MAX_SPEED`.
pub fn clamp_speed(requested: i64) -> u8 {
    requested.clamp(MIN_SPEED as i64, MAX_SPEED as i64) as u8
}

/// One captured frame, tightly packed RGB8.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y * self.width + x) * 3) as usize;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ]
    }
}

impl std::fmt::Debug for RasterFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid emulator state: {0}")]
    InvalidState(String),

    #[error("Emulator I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Emulator backend error: {0}")]
    Backend(String),
}

/// Opens emulation sessions from ROM files.
pub trait EmulatorBackend: Send + Sync + 'static {
    /// Opens `rom` at the given speed multiplier.
    ///
    /// Returns [`EmulatorError::FileNotFound`] if the ROM does not exist.
    fn open(&self, rom: &Path, speed: u8) -> Result<Box<dyn EmulatorSession>, EmulatorError>;
}

/// A single running emulation instance.
pub trait EmulatorSession: Send + 'static {
    fn advance(&mut self, frames: u32) -> Result<(), EmulatorError>;

    fn press(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError>;

    fn release(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError>;

    fn capture_frame(&mut self) -> Result<RasterFrame, EmulatorError>;

    fn save_state(&mut self, path: &Path) -> Result<(), EmulatorError>;

    /// Restores a snapshot written by `save_state`.
    ///
    /// Returns [`EmulatorError::FileNotFound`] if `path` does not exist.
    fn load_state(&mut self, path: &Path) -> Result<(), EmulatorError>;

    /// `speed` is already clamped to `MIN_SPEED..=MAX_SPEED`.
    fn set_speed(&mut self, speed: u8) -> Result<(), EmulatorError>;

    fn close(self: Box<Self>) -> Result<(), EmulatorError>;
}
