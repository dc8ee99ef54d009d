use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artnet::network_config::MAX_UNIVERSE;
use crate::merge::channel_merger::MergeMode;
use crate::messages::Settings;

const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Loads and saves [`Settings`] as a versioned JSON document.
///
/// The schema returned by [`ConfigManager::schema`] is the single source for
/// defaults, ranges and help text; validation reads its ranges from there.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
    created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub universe: UniverseSection,
    pub resolution: ResolutionSection,
    pub output: OutputSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSection {
    pub universe: ConfigOption<u16>,
    pub broadcast_ip: ConfigOption<String>,
    pub artnet_port: ConfigOption<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSection {
    pub merge_mode: ConfigOption<MergeMode>,
    pub fade_tick_ms: ConfigOption<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    pub keepalive_ms: ConfigOption<u64>,
    pub enable_logging: ConfigOption<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    pub data_dir: ConfigOption<String>,
    pub persist_dmx_values: ConfigOption<bool>,
}

/// One setting as presented to an editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

impl<T> ConfigOption<T> {
    fn plain(default: T, description: &str) -> Self {
        Self {
            default,
            valid_range: None,
            valid_choices: None,
            description: description.to_string(),
            requires_restart: true,
        }
    }

    fn ranged(default: T, min: T, max: T, description: &str) -> Self {
        Self {
            valid_range: Some((min, max)),
            ..Self::plain(default, description)
        }
    }

    fn choice(default: T, choices: Vec<T>, description: &str) -> Self {
        Self {
            valid_choices: Some(choices),
            ..Self::plain(default, description)
        }
    }

    /// Applied without restarting the output.
    fn live(mut self) -> Self {
        self.requires_restart = false;
        self
    }
}

impl<T: PartialOrd + fmt::Display> ConfigOption<T> {
    fn check(&self, name: &str, value: &T, errors: &mut Vec<String>) {
        if let Some((min, max)) = &self.valid_range {
            if value < min || value > max {
                errors.push(format!("{} must be between {} and {}", name, min, max));
            }
        }
    }
}

/// On-disk envelope around the settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// `config.json` in the working directory unless a path is given.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            settings: Settings::default(),
            created_at: None,
        }
    }

    /// Read the file, writing a default one first when it does not exist.
    /// Keys missing from an older file take their default values.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            log::info!(
                "No config at {}, writing defaults",
                self.config_path.display()
            );
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;
        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let version = env!("CARGO_PKG_VERSION");
        if file.version != version {
            log::warn!(
                "{} was written by version {} (running {}), missing settings use defaults",
                self.config_path.display(),
                file.version,
                version
            );
        }

        self.created_at = Some(file.created_at);
        self.settings = file.settings;
        Ok(self.settings.clone())
    }

    /// Write the current settings. The creation stamp of a loaded file is kept.
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = Utc::now().to_rfc3339();
        let file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: self.created_at.clone().unwrap_or_else(|| now.clone()),
            modified_at: now,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        fs::write(&self.config_path, json).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    /// Validate, then replace and save. Invalid settings leave the file alone.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn schema() -> ConfigSchema {
        let defaults = Settings::default();

        ConfigSchema {
            universe: UniverseSection {
                universe: ConfigOption::ranged(
                    defaults.universe,
                    0,
                    MAX_UNIVERSE,
                    "Art-Net universe the console outputs",
                )
                .live(),
                broadcast_ip: ConfigOption::plain(
                    defaults.broadcast_ip,
                    "Destination IPv4 address; addresses ending in .255 are broadcast",
                )
                .live(),
                artnet_port: ConfigOption::ranged(
                    defaults.artnet_port,
                    1,
                    u16::MAX,
                    "UDP port for Art-Net output",
                ),
            },
            resolution: ResolutionSection {
                merge_mode: ConfigOption::choice(
                    defaults.merge_mode,
                    vec![MergeMode::Htp, MergeMode::Ltp],
                    "How overlapping control elements combine",
                )
                .live(),
                fade_tick_ms: ConfigOption::ranged(
                    defaults.fade_tick_ms,
                    5,
                    1000,
                    "Interval between fade steps in milliseconds",
                ),
            },
            output: OutputSection {
                keepalive_ms: ConfigOption::ranged(
                    defaults.keepalive_ms,
                    0,
                    60_000,
                    "Re-send the last frame at this interval (0 disables)",
                ),
                enable_logging: ConfigOption::plain(
                    defaults.enable_logging,
                    "Log every transmitted frame at debug level",
                ),
            },
            storage: StorageSection {
                data_dir: ConfigOption::plain(
                    defaults.data_dir.display().to_string(),
                    "Directory holding templates, patches, groups and presets",
                ),
                persist_dmx_values: ConfigOption::plain(
                    defaults.persist_dmx_values,
                    "Save the universe to dmx_values.json after changes",
                ),
            },
        }
    }

    /// Every violation at once, not just the first.
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let schema = Self::schema();
        let mut errors = settings.universe_config().validate().err().unwrap_or_default();

        schema
            .universe
            .artnet_port
            .check("artnet_port", &settings.artnet_port, &mut errors);
        schema
            .resolution
            .fade_tick_ms
            .check("fade_tick_ms", &settings.fade_tick_ms, &mut errors);
        schema
            .output
            .keepalive_ms
            .check("keepalive_ms", &settings.keepalive_ms, &mut errors);

        if settings.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    ValidationError(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadError(msg) => write!(f, "cannot read config: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "cannot write config: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "malformed config: {}", msg),
            ConfigError::SerializeError(msg) => write!(f, "cannot encode config: {}", msg),
            ConfigError::ValidationError(errors) => {
                write!(f, "invalid settings: {}", errors.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}
