//! Configuration and constants for the profiler and renderer.
//!
//! Constants live here as plain `const`s; user-tunable values can also be
//! loaded from a TOML settings file and then overridden from the CLI.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Maximum number of frames kept per captured stack
pub const MAX_STACK_DEPTH: usize = 64;

/// Sample slots pre-allocated for a self-sampling session
pub const DEFAULT_SELF_MAX_SAMPLES: usize = 100_000;

/// Decode cap for an external-process session
pub const DEFAULT_EXTERNAL_MAX_SAMPLES: usize = 500_000;

/// Self-sampling frequency; prime so the timer does not alias with loops
pub const DEFAULT_SELF_FREQUENCY_HZ: u32 = 997;

/// External sampling frequency (perf default style)
pub const DEFAULT_EXTERNAL_FREQUENCY_HZ: u32 = 99;

/// Upper bound accepted for any sampling frequency
pub const MAX_FREQUENCY_HZ: u32 = 10_000;

/// Data pages mapped for the perf ring buffer (must be a power of two)
pub const DEFAULT_MMAP_PAGES: usize = 128;

/// How long `profile` samples when no duration is given
pub const DEFAULT_DURATION_SECS: u64 = 5;

/// Poll timeout between ring-buffer drains
pub const POLL_INTERVAL_MS: i32 = 100;

// Layout constants (pixels)
pub const DEFAULT_WIDTH: usize = 1200;
pub const MIN_CANVAS_WIDTH: usize = 100;
pub const FRAME_HEIGHT: f64 = 16.0;
pub const FONT_SIZE: usize = 11;
pub const MIN_VISIBLE_WIDTH: f64 = 0.1;
pub const CHAR_WIDTH: f64 = 6.5;
pub const LABEL_PADDING: f64 = 6.0;
pub const MIN_TRUNCATED_LABEL_WIDTH: f64 = 20.0;
pub const SIDE_MARGIN: f64 = 10.0;
pub const TOP_MARGIN: f64 = 60.0;
pub const BOTTOM_MARGIN: f64 = 30.0;

/// Frame delimiter of the folded-stack text format
pub const FRAME_DELIMITER: char = ';';

/// Name given to the synthetic root frame
pub const ROOT_FRAME_NAME: &str = "all";

/// Frames that belong to the sampler itself, never to the profiled program.
/// Entries ending in `::` match a whole module path.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "__restore_rt",
    "flamefold::source::self_sampler::",
    "backtrace::",
    "__sigaction",
    "_sigtramp",
];

/// Settings file contents
///
/// Every field is optional; absent values fall back to the constants above.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub render: RenderSettings,
    pub sampling: SamplingSettings,
    pub filter: FilterSettings,
}

/// `[render]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSettings {
    pub title: Option<String>,
    pub width: Option<usize>,
    pub min_width: Option<f64>,
}

/// `[sampling]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub frequency_hz: Option<u32>,
    pub max_samples: Option<usize>,
    pub mmap_pages: Option<usize>,
}

/// `[filter]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Extra frame names dropped during folding
    pub deny: Vec<String>,

    /// Keep `[unknown]` frames instead of dropping them
    pub keep_unknown: bool,
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    /// * `ConfigError::ReadFailed` - If file cannot be read
    /// * `ConfigError::ParseFailed` - If TOML is invalid
    /// * `ConfigError::Invalid` - If a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Range-check the values that were provided
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(width) = self.render.width {
            if width < MIN_CANVAS_WIDTH {
                return Err(ConfigError::Invalid(format!(
                    "render.width must be at least {MIN_CANVAS_WIDTH}, got {width}"
                )));
            }
        }
        if let Some(min_width) = self.render.min_width {
            if !(min_width >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "render.min_width must be non-negative, got {min_width}"
                )));
            }
        }
        if let Some(freq) = self.sampling.frequency_hz {
            if freq == 0 || freq > MAX_FREQUENCY_HZ {
                return Err(ConfigError::Invalid(format!(
                    "sampling.frequency_hz must be in 1..={MAX_FREQUENCY_HZ}, got {freq}"
                )));
            }
        }
        if self.sampling.max_samples == Some(0) {
            return Err(ConfigError::Invalid(
                "sampling.max_samples must be greater than 0".to_string(),
            ));
        }
        if let Some(pages) = self.sampling.mmap_pages {
            if !pages.is_power_of_two() {
                return Err(ConfigError::Invalid(format!(
                    "sampling.mmap_pages must be a power of two, got {pages}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_settings() {
        let settings: Settings = toml::from_str(
            r#"
            [render]
            title = "Nightly"
            width = 1600

            [filter]
            deny = ["my_sampler_hook"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.render.title.as_deref(), Some("Nightly"));
        assert_eq!(settings.render.width, Some(1600));
        assert_eq!(settings.sampling.frequency_hz, None);
        assert_eq!(settings.filter.deny, vec!["my_sampler_hook".to_string()]);
        assert!(!settings.filter.keep_unknown);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.sampling.mmap_pages = Some(100);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sampling.frequency_hz = Some(0);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.render.width = Some(10);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flamefold.toml");
        std::fs::write(&path, "[sampling]\nfrequency_hz = 499\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.sampling.frequency_hz, Some(499));
    }
}
