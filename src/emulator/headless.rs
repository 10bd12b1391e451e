//! Deterministic software backend.
//!
//! Stands in for a real Game Boy core: it validates and fingerprints the ROM, keeps a
//! frame counter and the held buttons, and renders a 160x144 test pattern derived
//! from that state. Save states are real files, so the whole session pipeline can be
//! exercised without a native emulator.

use super::{EmulatorBackend, EmulatorError, EmulatorSession, RasterFrame, MAX_SPEED, MIN_SPEED};
use crate::controls::ButtonSymbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCREEN_WIDTH: u32 = 160;
pub const SCREEN_HEIGHT: u32 = 144;

/// DMG-style four shade palette, lightest first
const PALETTE: [[u8; 3]; 4] = [[224, 248, 208], [136, 192, 112], [52, 104, 86], [8, 24, 32]];

#[derive(Debug, Default, Clone)]
pub struct HeadlessBackend;

impl EmulatorBackend for HeadlessBackend {
    fn open(&self, rom: &Path, speed: u8) -> Result<Box<dyn EmulatorSession>, EmulatorError> {
        Ok(Box::new(HeadlessEmulator::open(rom, speed)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Snapshot {
    rom_checksum: u32,
    frame: u64,
    presses: u64,
    held: Vec<ButtonSymbol>,
}

#[derive(Debug)]
pub struct HeadlessEmulator {
    rom_path: PathBuf,
    rom_checksum: u32,
    speed: u8,
    frame: u64,
    presses: u64,
    held: BTreeSet<ButtonSymbol>,
}

impl HeadlessEmulator {
    pub fn open(rom: &Path, speed: u8) -> Result<Self, EmulatorError> {
        if !rom.exists() {
            return Err(EmulatorError::FileNotFound(rom.to_path_buf()));
        }
        let bytes = std::fs::read(rom)?;
        if bytes.is_empty() {
            return Err(EmulatorError::InvalidState(format!(
                "ROM is empty: {}",
                rom.display()
            )));
        }

        let rom_checksum = bytes
            .iter()
            .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32));
        info!(
            "Opened headless emulator for {} (checksum {:08x})",
            rom.display(),
            rom_checksum
        );

        Ok(Self {
            rom_path: rom.to_path_buf(),
            rom_checksum,
            speed: speed.clamp(MIN_SPEED, MAX_SPEED),
            frame: 0,
            presses: 0,
            held: BTreeSet::new(),
        })
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn held(&self) -> impl Iterator<Item = ButtonSymbol> + '_ {
        self.held.iter().copied()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            rom_checksum: self.rom_checksum,
            frame: self.frame,
            presses: self.presses,
            held: self.held.iter().copied().collect(),
        }
    }

    fn render(&self) -> RasterFrame {
        let mut pixels = Vec::with_capacity((SCREEN_WIDTH * SCREEN_HEIGHT * 3) as usize);
        let scroll = (self.frame % 256) as u32;
        let seed = self.rom_checksum % 4;

        for y in 0..SCREEN_HEIGHT {
            for x in 0..SCREEN_WIDTH {
                let shade = if y < 8 {
                    // Button indicator strip, one 16px block per button
                    let slot = (x / 20) as usize;
                    let inside = x % 20 < 16;
                    match ButtonSymbol::ALL.get(slot) {
                        Some(button) if inside && self.held.contains(button) => 0,
                        Some(_) if inside => 3,
                        _ => 2,
                    }
                } else if y >= SCREEN_HEIGHT - 4 {
                    // Press counter bar
                    if (x as u64) < self.presses % SCREEN_WIDTH as u64 {
                        3
                    } else {
                        0
                    }
                } else {
                    (((x + scroll) / 8 + y / 8 + seed) % 4) as usize
                };
                pixels.extend_from_slice(&PALETTE[shade]);
            }
        }

        RasterFrame::new(SCREEN_WIDTH, SCREEN_HEIGHT, pixels)
    }
}

impl EmulatorSession for HeadlessEmulator {
    fn advance(&mut self, frames: u32) -> Result<(), EmulatorError> {
        self.frame += frames as u64;
        Ok(())
    }

    fn press(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError> {
        if self.held.insert(button) {
            self.presses += 1;
        }
        debug!("Pressed button: {}", button);
        Ok(())
    }

    fn release(&mut self, button: ButtonSymbol) -> Result<(), EmulatorError> {
        self.held.remove(&button);
        debug!("Released button: {}", button);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RasterFrame, EmulatorError> {
        Ok(self.render())
    }

    fn save_state(&mut self, path: &Path) -> Result<(), EmulatorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(&self.snapshot())
            .map_err(|e| EmulatorError::Backend(format!("Failed to encode state: {}", e)))?;
        std::fs::write(path, content)?;
        info!("Saved state to: {}", path.display());
        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> Result<(), EmulatorError> {
        if !path.exists() {
            return Err(EmulatorError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = toml::from_str(&content)
            .map_err(|e| EmulatorError::InvalidState(format!("Corrupt state file: {}", e)))?;
        if snapshot.rom_checksum != self.rom_checksum {
            return Err(EmulatorError::InvalidState(format!(
                "State {} was saved from a different ROM than {}",
                path.display(),
                self.rom_path.display()
            )));
        }

        self.frame = snapshot.frame;
        self.presses = snapshot.presses;
        self.held = snapshot.held.into_iter().collect();
        info!("Loaded state from: {}", path.display());
        Ok(())
    }

    fn set_speed(&mut self, speed: u8) -> Result<(), EmulatorError> {
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        info!("Set emulation speed to: {}x", self.speed);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), EmulatorError> {
        info!("Emulator stopped: {}", self.rom_path.display());
        Ok(())
    }
}
