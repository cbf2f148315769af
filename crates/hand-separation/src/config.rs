//! Tunables for hand separation, with TOML file and environment loading.
//!
//! Environment variables (applied after the file):
//! - `HANDSEP_SPLIT_NOTE`: fixed split note, or `auto` to estimate per piece
//! - `HANDSEP_HYSTERESIS`, `HANDSEP_MAX_HAND_SPAN`: semitones
//! - `HANDSEP_CHORD_WINDOW_MS`: chord simultaneity window
//! - `HANDSEP_VELOCITY_WEIGHT`, `HANDSEP_CONTINUITY_WEIGHT`: scoring weights
//! - `HANDSEP_MAX_STREAM_LENGTH`, `HANDSEP_DECAY_FACTOR`, `HANDSEP_RECENT_WINDOW`:
//!   voice history shape

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::{Error, Result};

/// Parameters controlling hand assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandConfig {
    /// Fixed split note. `None` estimates it from the piece's median pitch.
    pub split_note: Option<u8>,
    /// Semitones either side of the split where pitch alone doesn't decide.
    pub hysteresis: u8,
    /// Widest interval one hand can cover, in semitones.
    pub max_hand_span: u8,
    /// Max onset distance from a chord's anchor note, in milliseconds.
    pub chord_window_ms: f64,
    pub velocity_weight: f64,
    pub continuity_weight: f64,
    /// Oldest entries drop off a hand's history past this length.
    pub max_stream_length: usize,
    /// Multiplier applied to every history weight after each chord group.
    pub decay_factor: f64,
    /// How many recent history entries the scorer looks at.
    pub recent_window: usize,
    /// Flat penalty when a note would stretch a hand beyond `max_hand_span`.
    pub span_penalty: f64,
    /// Flat penalty for a note on the far side of the split.
    pub cross_penalty: f64,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            split_note: None,
            hysteresis: 5,
            max_hand_span: 12,
            chord_window_ms: 50.0,
            velocity_weight: 0.3,
            continuity_weight: 0.7,
            max_stream_length: 20,
            decay_factor: 0.9,
            recent_window: 5,
            span_penalty: 50.0,
            cross_penalty: 5.0,
        }
    }
}

impl HandConfig {
    /// Weight left over for the pitch-preference term.
    pub fn pitch_weight(&self) -> f64 {
        1.0 - self.continuity_weight - self.velocity_weight
    }

    /// Reject settings that would make the scores meaningless.
    pub fn validate(&self) -> Result<()> {
        if let Some(split) = self.split_note {
            if split > 127 {
                return Err(invalid(format!("split_note {} outside 0-127", split)));
            }
        }

        for (name, value) in [
            ("chord_window_ms", self.chord_window_ms),
            ("velocity_weight", self.velocity_weight),
            ("continuity_weight", self.continuity_weight),
            ("span_penalty", self.span_penalty),
            ("cross_penalty", self.cross_penalty),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        // Small slack so 0.7 + 0.3 doesn't trip on float rounding.
        if self.continuity_weight + self.velocity_weight > 1.0 + 1e-9 {
            return Err(invalid(format!(
                "continuity_weight + velocity_weight must not exceed 1.0, got {}",
                self.continuity_weight + self.velocity_weight
            )));
        }

        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(invalid(format!(
                "decay_factor must be in (0, 1], got {}",
                self.decay_factor
            )));
        }

        if self.max_stream_length == 0 {
            return Err(invalid("max_stream_length must be at least 1".to_string()));
        }
        if self.recent_window == 0 {
            return Err(invalid("recent_window must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Parse from a TOML document. Reads the `[hands]` table when present,
    /// otherwise treats the whole document as the config.
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self> {
        let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let section = match table.get("hands") {
            Some(hands) => hands.clone(),
            None => toml::Value::Table(table),
        };

        section.try_into().map_err(|e: toml::de::Error| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file without environment overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents, path)
    }

    /// Defaults, then the optional file, then `HANDSEP_*` environment
    /// variables, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment-style lookup.
    ///
    /// Returns the names of the variables that were applied.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(v) = lookup("HANDSEP_SPLIT_NOTE") {
            self.split_note = if v.trim().eq_ignore_ascii_case("auto") {
                None
            } else {
                Some(parse_env("HANDSEP_SPLIT_NOTE", &v)?)
            };
            applied.push("HANDSEP_SPLIT_NOTE".to_string());
        }

        override_field(&lookup, "HANDSEP_HYSTERESIS", &mut self.hysteresis, &mut applied)?;
        override_field(&lookup, "HANDSEP_MAX_HAND_SPAN", &mut self.max_hand_span, &mut applied)?;
        override_field(&lookup, "HANDSEP_CHORD_WINDOW_MS", &mut self.chord_window_ms, &mut applied)?;
        override_field(&lookup, "HANDSEP_VELOCITY_WEIGHT", &mut self.velocity_weight, &mut applied)?;
        override_field(
            &lookup,
            "HANDSEP_CONTINUITY_WEIGHT",
            &mut self.continuity_weight,
            &mut applied,
        )?;
        override_field(
            &lookup,
            "HANDSEP_MAX_STREAM_LENGTH",
            &mut self.max_stream_length,
            &mut applied,
        )?;
        override_field(&lookup, "HANDSEP_DECAY_FACTOR", &mut self.decay_factor, &mut applied)?;
        override_field(&lookup, "HANDSEP_RECENT_WINDOW", &mut self.recent_window, &mut applied)?;

        Ok(applied)
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig(message)
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{} has unparseable value {:?}", key, value)))
}

fn override_field<F, T>(lookup: &F, key: &str, field: &mut T, applied: &mut Vec<String>) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(v) = lookup(key) {
        *field = parse_env(key, &v)?;
        applied.push(key.to_string());
    }
    Ok(())
}
