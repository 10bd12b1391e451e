//! ROM and save-state library on disk, plus the display helpers built on it.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const ROM_EXTENSIONS: [&str; 2] = ["gb", "gbc"];
pub const STATE_EXTENSION: &str = "state";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Unsupported ROM extension: {0}")]
    UnsupportedExtension(String),

    #[error("ROM not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("ROM file is empty: {}", .0.display())]
    EmptyRom(PathBuf),

    #[error("Library I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejects names that could escape the library directory.
pub fn validate_name(name: &str) -> Result<(), LibraryError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed.contains('\0')
    {
        return Err(LibraryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn has_rom_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ROM_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Resolves and validates a ROM name inside `games_dir`.
pub async fn resolve_rom(games_dir: &Path, name: &str) -> Result<PathBuf, LibraryError> {
    validate_name(name)?;
    let path = games_dir.join(name.trim());

    if !has_rom_extension(&path) {
        warn!("Invalid ROM file extension: {}", name);
        return Err(LibraryError::UnsupportedExtension(name.to_string()));
    }

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("ROM file not found: {}", name);
            return Err(LibraryError::NotFound(path));
        }
        Err(e) => return Err(e.into()),
    };
    if metadata.len() == 0 {
        warn!("ROM file is empty: {}", name);
        return Err(LibraryError::EmptyRom(path));
    }

    Ok(path)
}

/// Sorted ROM file names in `games_dir`. A missing directory yields an empty list.
pub async fn list_roms(games_dir: &Path) -> Result<Vec<String>, LibraryError> {
    let mut roms = list_files(games_dir, has_rom_extension)
        .await?
        .into_iter()
        .filter_map(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
        .collect::<Vec<_>>();
    roms.sort();
    info!("Found {} ROM(s)", roms.len());
    Ok(roms)
}

/// Sorted save-state names (without extension) in `saves_dir`.
pub async fn list_saves(saves_dir: &Path) -> Result<Vec<String>, LibraryError> {
    let is_state = |path: &Path| path.extension().and_then(|e| e.to_str()) == Some(STATE_EXTENSION);
    let mut saves = list_files(saves_dir, is_state)
        .await?
        .into_iter()
        .filter_map(|path| {
            path.file_stem()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
        .collect::<Vec<_>>();
    saves.sort();
    Ok(saves)
}

async fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, LibraryError> {
    if !tokio::fs::try_exists(dir).await? {
        warn!("Directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && keep(&path) {
            files.push(path);
        } else {
            debug!("Skipping {}", path.display());
        }
    }
    Ok(files)
}

/// Path of the save state `name` in `saves_dir`, appending `.state` if missing.
pub fn save_path(saves_dir: &Path, name: &str) -> Result<PathBuf, LibraryError> {
    validate_name(name)?;
    let name = name.trim();
    let file = if name.ends_with(&format!(".{}", STATE_EXTENSION)) {
        name.to_string()
    } else {
        format!("{}.{}", name, STATE_EXTENSION)
    };
    Ok(saves_dir.join(file))
}

/// `<rom>_<unix seconds>`, used when a save is requested without a name.
pub fn default_save_name(rom: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", rom, now.timestamp())
}

/// Human readable game title: `pokemon_red-v1.gb` → `Pokemon Red V1`.
pub fn format_game_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `2h 34m 12s`; zero components are omitted, seconds are always shown when alone.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}
