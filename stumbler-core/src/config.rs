//! Configuration file management for stumbler.
//!
//! Reads/writes `~/.stumbler/config.yaml` with report assembly settings,
//! position admission thresholds and the list of beacon layouts.

use std::path::{Path, PathBuf};

use crate::aggregator::{AggregatorConfig, DEFAULT_WINDOW_MS};
use crate::layout::{default_layouts, parse_layouts, BeaconLayout};
use crate::position::{
    DEFAULT_DUPLICATE_DISTANCE_M, DEFAULT_DUPLICATE_INTERVAL_MS, DEFAULT_MAX_ACCURACY_M,
    DEFAULT_PRESSURE_MAX_AGE_MS,
};
use crate::report::{AssemblyConfig, DEFAULT_FRESHNESS_MS, DEFAULT_MIN_WIFI_ACCESS_POINTS};
use crate::types::{Result, StumblerError};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub assembler: AssemblerSection,
    pub position: PositionSection,
    /// Layout strings; `None` means the built-in layouts.
    pub beacons: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerSection {
    pub window_ms: i64,
    pub freshness_ms: i64,
    pub min_wifi_access_points: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionSection {
    pub max_accuracy_m: f64,
    pub duplicate_interval_ms: i64,
    pub duplicate_distance_m: f64,
    pub pressure_max_age_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            assembler: AssemblerSection {
                window_ms: DEFAULT_WINDOW_MS,
                freshness_ms: DEFAULT_FRESHNESS_MS,
                min_wifi_access_points: DEFAULT_MIN_WIFI_ACCESS_POINTS,
            },
            position: PositionSection {
                max_accuracy_m: DEFAULT_MAX_ACCURACY_M,
                duplicate_interval_ms: DEFAULT_DUPLICATE_INTERVAL_MS,
                duplicate_distance_m: DEFAULT_DUPLICATE_DISTANCE_M,
                pressure_max_age_ms: DEFAULT_PRESSURE_MAX_AGE_MS,
            },
            beacons: None,
        }
    }
}

impl Config {
    /// Parse the configured layouts, or return the built-in ones.
    /// Any invalid layout fails the whole list.
    pub fn beacon_layouts(&self) -> Result<Vec<BeaconLayout>> {
        match &self.beacons {
            Some(texts) => parse_layouts(texts),
            None => Ok(default_layouts()),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window_ms: self.assembler.window_ms,
            assembly: AssemblyConfig {
                freshness_ms: self.assembler.freshness_ms,
                min_wifi_access_points: self.assembler.min_wifi_access_points,
            },
            max_accuracy_m: self.position.max_accuracy_m,
            duplicate_interval_ms: self.position.duplicate_interval_ms,
            duplicate_distance_m: self.position.duplicate_distance_m,
            pressure_max_age_ms: self.position.pressure_max_age_ms,
        }
    }
}

/// Get the config directory path (`~/.stumbler/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".stumbler")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.stumbler/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.stumbler/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config))?;
    Ok(())
}

/// Parse simple YAML-like config text.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        // List items only appear under `beacons:`.
        if let Some(item) = stripped.strip_prefix("- ") {
            if is_indented && current_section.as_deref() == Some("beacons") {
                if let Some(layout) = parse_string_value(item.trim()) {
                    config.beacons.get_or_insert_with(Vec::new).push(layout);
                }
            }
            continue;
        }

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = if val.is_empty() {
                Some(key.to_string())
            } else {
                None
            };
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        let bad = |what: &str| {
            StumblerError::Config(format!("line {}: invalid {what}: {val:?}", lineno + 1))
        };
        match (section, key) {
            ("assembler", "window_ms") => {
                config.assembler.window_ms = val.parse().map_err(|_| bad(key))?
            }
            ("assembler", "freshness_ms") => {
                config.assembler.freshness_ms = val.parse().map_err(|_| bad(key))?
            }
            ("assembler", "min_wifi_access_points") => {
                config.assembler.min_wifi_access_points = val.parse().map_err(|_| bad(key))?
            }
            ("position", "max_accuracy_m") => {
                config.position.max_accuracy_m = val.parse().map_err(|_| bad(key))?
            }
            ("position", "duplicate_interval_ms") => {
                config.position.duplicate_interval_ms = val.parse().map_err(|_| bad(key))?
            }
            ("position", "duplicate_distance_m") => {
                config.position.duplicate_distance_m = val.parse().map_err(|_| bad(key))?
            }
            ("position", "pressure_max_age_ms") => {
                config.position.pressure_max_age_ms = val.parse().map_err(|_| bad(key))?
            }
            _ => {}
        }
    }

    Ok(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# stumbler configuration".to_string(), String::new()];

    lines.push("assembler:".into());
    lines.push(format!("  window_ms: {}", config.assembler.window_ms));
    lines.push(format!("  freshness_ms: {}", config.assembler.freshness_ms));
    lines.push(format!(
        "  min_wifi_access_points: {}",
        config.assembler.min_wifi_access_points
    ));
    lines.push(String::new());

    lines.push("position:".into());
    lines.push(format!("  max_accuracy_m: {}", config.position.max_accuracy_m));
    lines.push(format!(
        "  duplicate_interval_ms: {}",
        config.position.duplicate_interval_ms
    ));
    lines.push(format!(
        "  duplicate_distance_m: {}",
        config.position.duplicate_distance_m
    ));
    lines.push(format!(
        "  pressure_max_age_ms: {}",
        config.position.pressure_max_age_ms
    ));

    if let Some(beacons) = &config.beacons {
        lines.push(String::new());
        lines.push("beacons:".into());
        for layout in beacons {
            lines.push(format!("  - \"{layout}\""));
        }
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ALTBEACON_LAYOUT, DEFAULT_LAYOUTS};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.assembler.window_ms, 10_000);
        assert_eq!(config.assembler.freshness_ms, 30_000);
        assert_eq!(config.assembler.min_wifi_access_points, 2);
        assert_eq!(config.position.max_accuracy_m, 200.0);
        assert!(config.beacons.is_none());
        assert_eq!(config.beacon_layouts().unwrap().len(), DEFAULT_LAYOUTS.len());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
assembler:
  window_ms: 5000
  freshness_ms: 20000
  min_wifi_access_points: 3

position:
  max_accuracy_m: 50.5
  duplicate_interval_ms: 2000
  duplicate_distance_m: 15
  pressure_max_age_ms: 1000

beacons:
  - "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25"
  - 'm:2-3=0215,i:4-19,i:20-21,i:22-23,p:24-24'
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.assembler.window_ms, 5_000);
        assert_eq!(config.assembler.freshness_ms, 20_000);
        assert_eq!(config.assembler.min_wifi_access_points, 3);
        assert_eq!(config.position.max_accuracy_m, 50.5);
        assert_eq!(config.position.duplicate_interval_ms, 2_000);
        assert_eq!(config.position.duplicate_distance_m, 15.0);
        assert_eq!(config.position.pressure_max_age_ms, 1_000);
        let beacons = config.beacons.as_ref().unwrap();
        assert_eq!(beacons.len(), 2);
        assert_eq!(beacons[0], ALTBEACON_LAYOUT);
        assert_eq!(config.beacon_layouts().unwrap().len(), 2);

        let agg = config.aggregator_config();
        assert_eq!(agg.window_ms, 5_000);
        assert_eq!(agg.assembly.min_wifi_access_points, 3);
    }

    #[test]
    fn test_parse_config_bad_number() {
        let text = "assembler:\n  window_ms: soon\n";
        assert!(matches!(parse_config(text), Err(StumblerError::Config(_))));
    }

    #[test]
    fn test_invalid_layout_fails() {
        let text = "beacons:\n  - \"i:4-19,i:20-21\"\n";
        let config = parse_config(text).unwrap();
        assert!(matches!(
            config.beacon_layouts(),
            Err(StumblerError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_list_items_outside_beacons_ignored() {
        let text = "position:\n  - \"m:2-3=beac,i:4-5\"\n";
        assert!(parse_config(text).unwrap().beacons.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.assembler.window_ms = 15_000;
        config.position.duplicate_distance_m = 42.5;
        config.beacons = Some(vec![ALTBEACON_LAYOUT.to_string()]);
        let text = serialize_config(&config);
        let parsed = parse_config(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.yaml");
        let mut config = Config::default();
        config.assembler.min_wifi_access_points = 4;
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }
}
