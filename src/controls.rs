//! Button symbols and the glyph mapping used by chat participants.
//!
//! Every reaction glyph resolves to exactly one [`ButtonSymbol`] and every button has
//! exactly one glyph. The mapping is built once from configuration and never changes
//! while a session runs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Emoji variation selector, stripped so `"⬆️"` and `"⬆"` resolve identically.
const VARIATION_SELECTOR: char = '\u{fe0f}';

/// Game Boy buttons a participant can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonSymbol {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

impl ButtonSymbol {
    pub const ALL: [ButtonSymbol; 8] = [
        ButtonSymbol::Up,
        ButtonSymbol::Down,
        ButtonSymbol::Left,
        ButtonSymbol::Right,
        ButtonSymbol::A,
        ButtonSymbol::B,
        ButtonSymbol::Start,
        ButtonSymbol::Select,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ButtonSymbol::Up => "up",
            ButtonSymbol::Down => "down",
            ButtonSymbol::Left => "left",
            ButtonSymbol::Right => "right",
            ButtonSymbol::A => "a",
            ButtonSymbol::B => "b",
            ButtonSymbol::Start => "start",
            ButtonSymbol::Select => "select",
        }
    }
}

impl fmt::Display for ButtonSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ButtonSymbol {
    type Err = ControlMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ButtonSymbol::ALL
            .into_iter()
            .find(|button| button.name() == wanted)
            .ok_or_else(|| ControlMapError::UnknownButton(s.to_string()))
    }
}

/// Errors raised while building a [`GlyphMap`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlMapError {
    #[error("Unknown button name: {0}")]
    UnknownButton(String),

    #[error("No glyph configured for button: {0}")]
    MissingButton(ButtonSymbol),

    #[error("Glyph {glyph:?} is mapped to both {first} and {second}")]
    DuplicateGlyph {
        glyph: String,
        first: ButtonSymbol,
        second: ButtonSymbol,
    },

    #[error("Empty glyph configured for button: {0}")]
    EmptyGlyph(ButtonSymbol),
}

/// Total, bidirectional mapping between control glyphs and buttons.
#[derive(Debug, Clone)]
pub struct GlyphMap {
    by_glyph: HashMap<String, ButtonSymbol>,
    by_button: BTreeMap<ButtonSymbol, String>,
}

impl GlyphMap {
    /// Builds the mapping from a button → glyph table.
    ///
    /// Fails unless every button has a non-empty glyph and no glyph is shared
    /// between two buttons.
    pub fn new(table: &BTreeMap<ButtonSymbol, String>) -> Result<Self, ControlMapError> {
        let mut by_glyph = HashMap::with_capacity(ButtonSymbol::ALL.len());
        let mut by_button = BTreeMap::new();

        for button in ButtonSymbol::ALL {
            let glyph = table
                .get(&button)
                .ok_or(ControlMapError::MissingButton(button))?;
            let key = normalize(glyph);
            if key.is_empty() {
                return Err(ControlMapError::EmptyGlyph(button));
            }
            if let Some(first) = by_glyph.insert(key, button) {
                return Err(ControlMapError::DuplicateGlyph {
                    glyph: glyph.clone(),
                    first,
                    second: button,
                });
            }
            by_button.insert(button, glyph.trim().to_string());
        }

        Ok(Self {
            by_glyph,
            by_button,
        })
    }

    /// Default emoji controls.
    pub fn default_table() -> BTreeMap<ButtonSymbol, String> {
        [
            (ButtonSymbol::Up, "⬆️"),
            (ButtonSymbol::Down, "⬇️"),
            (ButtonSymbol::Left, "⬅️"),
            (ButtonSymbol::Right, "➡️"),
            (ButtonSymbol::A, "🅰️"),
            (ButtonSymbol::B, "🅱️"),
            (ButtonSymbol::Start, "▶️"),
            (ButtonSymbol::Select, "⏸️"),
        ]
        .into_iter()
        .map(|(button, glyph)| (button, glyph.to_string()))
        .collect()
    }

    pub fn resolve(&self, glyph: &str) -> Option<ButtonSymbol> {
        self.by_glyph.get(&normalize(glyph)).copied()
    }

    pub fn glyph(&self, button: ButtonSymbol) -> &str {
        // Construction guarantees totality.
        self.by_button
            .get(&button)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Glyphs in button order, as attached to a published frame.
    pub fn glyphs(&self) -> Vec<String> {
        self.by_button.values().cloned().collect()
    }
}

impl Default for GlyphMap {
    fn default() -> Self {
        let table = Self::default_table();
        let mut by_glyph = HashMap::new();
        for (button, glyph) in &table {
            by_glyph.insert(normalize(glyph), *button);
        }
        Self {
            by_glyph,
            by_button: table,
        }
    }
}

fn normalize(glyph: &str) -> String {
    glyph
        .trim()
        .chars()
        .filter(|c| *c != VARIATION_SELECTOR)
        .collect()
}
