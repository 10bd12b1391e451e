use crate::controls::{ButtonSymbol, ControlMapError, GlyphMap};
use crate::emulator::{MAX_SPEED, MIN_SPEED};
use crate::render::compose::{MAX_SCALE, MIN_SCALE};
use crate::render::ChannelId;
use crate::session::{
    ExecutorSettings, OverflowPolicy, QueueSettings, RateLimiterSettings, RenderMode,
    SessionSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/crowdpad";
const CONFIG_FILE: &str = "config.toml";
const MAX_COOLDOWN_MS: u64 = 3_600_000;
const MAX_TICKS_PER_UPDATE: u32 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid control mapping: {0}")]
    Controls(#[from] ControlMapError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderSettings {
    pub mode: RenderMode,
    /// Period of the timer-driven render loop
    pub update_interval_ms: u64,
    /// Frames per periodic update at speed 1
    pub ticks_per_update: u32,
    /// Frames advanced before each input-driven render
    pub input_render_frames: u32,
    pub screen_scale: u32,
    pub output_dir: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            mode: RenderMode::InputDriven,
            update_interval_ms: 2000,
            ticks_per_update: 120,
            input_render_frames: 30,
            screen_scale: 3,
            output_dir: PathBuf::from("frames"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputSettings {
    pub cooldown_ms: u64,
    pub hold_ms: u64,
    pub hold_frames: u32,
    pub inter_input_delay_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    pub max_tracked_actors: Option<usize>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 500,
            hold_ms: 100,
            hold_frames: 6,
            inter_input_delay_ms: 50,
            dequeue_timeout_ms: 1000,
            queue_capacity: None,
            overflow: OverflowPolicy::DropOldest,
            max_tracked_actors: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmulatorSettings {
    pub speed: u8,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self { speed: MIN_SPEED }
    }
}

/// Contents of `config.toml`. Every field has a default, so partial files load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub games_dir: PathBuf,
    pub saves_dir: PathBuf,
    /// Started automatically on launch when it validates
    pub default_rom: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub render: RenderSettings,
    pub input: InputSettings,
    pub emulator: EmulatorSettings,
    /// Button name → reaction glyph
    pub controls: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            games_dir: PathBuf::from("games"),
            saves_dir: PathBuf::from("saves"),
            default_rom: None,
            channel_id: None,
            render: RenderSettings::default(),
            input: InputSettings::default(),
            emulator: EmulatorSettings::default(),
            controls: GlyphMap::default_table()
                .into_iter()
                .map(|(button, glyph)| (button.name().to_string(), glyph))
                .collect(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.emulator.speed) {
            return Err(invalid(
                "emulator.speed",
                format!("must be between {} and {}", MIN_SPEED, MAX_SPEED),
            ));
        }
        if !(MIN_SCALE..=MAX_SCALE).contains(&self.render.screen_scale) {
            return Err(invalid(
                "render.screen_scale",
                format!("must be between {} and {}", MIN_SCALE, MAX_SCALE),
            ));
        }
        if self.render.update_interval_ms == 0 {
            return Err(invalid("render.update_interval_ms", "must be positive"));
        }
        if self.render.ticks_per_update > MAX_TICKS_PER_UPDATE {
            return Err(invalid(
                "render.ticks_per_update",
                format!("must be at most {}", MAX_TICKS_PER_UPDATE),
            ));
        }
        if self.input.cooldown_ms > MAX_COOLDOWN_MS {
            return Err(invalid(
                "input.cooldown_ms",
                format!("must be at most {}", MAX_COOLDOWN_MS),
            ));
        }
        if self.input.dequeue_timeout_ms == 0 {
            return Err(invalid("input.dequeue_timeout_ms", "must be positive"));
        }
        if self.input.queue_capacity == Some(0) {
            return Err(invalid("input.queue_capacity", "must be at least 1"));
        }
        if self.input.max_tracked_actors == Some(0) {
            return Err(invalid("input.max_tracked_actors", "must be at least 1"));
        }
        self.glyph_map()?;
        Ok(())
    }

    /// Configured controls layered over the default glyphs.
    pub fn glyph_map(&self) -> Result<GlyphMap, ConfigError> {
        let mut table = GlyphMap::default_table();
        for (name, glyph) in &self.controls {
            let button: ButtonSymbol = name.parse()?;
            table.insert(button, glyph.clone());
        }
        Ok(GlyphMap::new(&table)?)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            games_dir: self.games_dir.clone(),
            saves_dir: self.saves_dir.clone(),
            channel_id: self.channel_id,
            speed: self.emulator.speed,
            update_interval: Duration::from_millis(self.render.update_interval_ms),
            limiter: RateLimiterSettings {
                cooldown_ms: self.input.cooldown_ms,
                max_tracked_actors: self.input.max_tracked_actors,
            },
            queue: QueueSettings {
                capacity: self.input.queue_capacity,
                overflow: self.input.overflow,
            },
            executor: ExecutorSettings {
                hold: Duration::from_millis(self.input.hold_ms),
                hold_frames: self.input.hold_frames,
                inter_input_delay: Duration::from_millis(self.input.inter_input_delay_ms),
                dequeue_timeout: Duration::from_millis(self.input.dequeue_timeout_ms),
                render_mode: self.render.mode,
                input_render_frames: self.render.input_render_frames,
                ticks_per_update: self.render.ticks_per_update,
            },
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// `~/.config/crowdpad/config.toml`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Loads settings from `path`, writing the defaults there first if it does not exist.
pub async fn load_or_create(path: &Path) -> Result<Settings, ConfigError> {
    if !tokio::fs::try_exists(path).await? {
        info!("No config found, writing defaults to {}", path.display());
        let settings = Settings::default();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, settings.to_toml()?).await?;
        return Ok(settings);
    }

    let content = tokio::fs::read_to_string(path).await?;
    let settings = Settings::from_toml(&content)?;
    debug!("Loaded config from {}", path.display());
    Ok(settings)
}
