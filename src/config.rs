use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kirinuki_core::curves::ShapeSettings;
use kirinuki_core::grid::{Difficulty, GridParseError, DEFAULT_DIFFICULTY};
use kirinuki_image::{BackdropSettings, CutSettings, PipelineConfig, IMAGE_MAX_DIMENSION_DEFAULT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "kirinuki.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io failed: {0}")]
    Io(#[from] io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config encode failed: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the saved game and the ledgers live.
    pub data_dir: PathBuf,
    /// Directory bundled pictures are read from.
    pub assets_dir: PathBuf,
    /// Selector label or `WxH`.
    pub difficulty: String,
    /// Fixed puzzle seed; a fresh one is drawn per game when unset.
    pub seed: Option<u32>,
    /// Board size pictures are fitted to.
    pub viewport: Option<(u32, u32)>,
    pub max_image_dim: Option<u32>,
    pub tray_height: f32,
    pub shape: ShapeSettings,
    pub cut: CutSettings,
    pub backdrop: BackdropSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("kirinuki-data"),
            assets_dir: PathBuf::from("assets"),
            difficulty: DEFAULT_DIFFICULTY.label(),
            seed: None,
            viewport: None,
            max_image_dim: Some(IMAGE_MAX_DIMENSION_DEFAULT),
            tray_height: 400.0,
            shape: ShapeSettings::default(),
            cut: CutSettings::default(),
            backdrop: BackdropSettings::default(),
        }
    }
}

impl AppConfig {
    /// Reads a TOML config; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let config = toml::from_str(&raw)?;
                log::info!("config: loaded {}", path.display());
                Ok(config)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("config: {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn difficulty(&self) -> Result<Difficulty, GridParseError> {
        self.difficulty.parse()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_dim: self.max_image_dim,
            viewport: self.viewport,
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
difficulty = "4x6"
seed = 7

[shape]
tab_depth_cap = 0.2

[cut]
anti_alias = false
"#,
        )
        .expect("parse");
        assert_eq!(config.difficulty().expect("difficulty"), Difficulty { cols: 4, rows: 6 });
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.shape.tab_depth_cap, 0.2);
        assert_eq!(config.shape.tab_width, ShapeSettings::default().tab_width);
        assert!(!config.cut.anti_alias);
        assert!(config.backdrop.show_grid);
        assert_eq!(config.data_dir, PathBuf::from("kirinuki-data"));
    }

    #[test]
    fn default_difficulty_parses() {
        assert_eq!(AppConfig::default().difficulty().expect("parse"), DEFAULT_DIFFICULTY);
    }

    #[test]
    fn missing_file_is_default_and_save_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert_eq!(AppConfig::load(&path).expect("load"), AppConfig::default());
        let config = AppConfig {
            seed: Some(99),
            viewport: Some((800, 600)),
            ..AppConfig::default()
        };
        config.save(&path).expect("save");
        assert_eq!(AppConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "difficulty = [").expect("write");
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
