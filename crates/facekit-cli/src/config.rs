use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Settings read from an optional TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub threshold: Option<f64>,
    pub font: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// CLI configuration.
///
/// Precedence: `FACEKIT_*` environment variables, then the config file,
/// then built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database holding the registry and the history.
    pub db_path: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Default match threshold (normalized distance cutoff).
    pub threshold: f64,
    /// TrueType font for annotation labels.
    pub font: Option<PathBuf>,
}

impl Config {
    /// Load from the environment, layered over `file` (or `FACEKIT_CONFIG`
    /// when `file` is `None`).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file_path = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FACEKIT_CONFIG").map(PathBuf::from));
        let file_config = match file_path {
            Some(path) => FileConfig::load(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file_config, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facekit");

        let db_path = env("FACEKIT_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let model_dir = env("FACEKIT_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        Self {
            db_path,
            model_dir,
            threshold: env_f64(&env, "FACEKIT_THRESHOLD")
                .or(file.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            font: env("FACEKIT_FONT").map(PathBuf::from).or(file.font),
        }
    }
}

fn env_f64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f64> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_under_xdg_data_home() {
        let config = Config::resolve(FileConfig::default(), env(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(config.db_path, PathBuf::from("/data/facekit/faces.db"));
        assert_eq!(config.model_dir, PathBuf::from("/data/facekit/models"));
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert!(config.font.is_none());
    }

    #[test]
    fn test_home_fallback() {
        let config = Config::resolve(FileConfig::default(), env(&[("HOME", "/home/ada")]));
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.local/share/facekit/faces.db"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            db_path: Some("/file/faces.db".into()),
            threshold: Some(0.4),
            font: Some("/file/font.ttf".into()),
            ..FileConfig::default()
        };
        let config = Config::resolve(
            file,
            env(&[("HOME", "/h"), ("FACEKIT_DB_PATH", "/env/faces.db"), ("FACEKIT_THRESHOLD", "0.5")]),
        );
        assert_eq!(config.db_path, PathBuf::from("/env/faces.db"));
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.font, Some(PathBuf::from("/file/font.ttf")));
    }

    #[test]
    fn test_unparsable_threshold_falls_through() {
        let file = FileConfig {
            threshold: Some(0.3),
            ..FileConfig::default()
        };
        let config = Config::resolve(file, env(&[("FACEKIT_THRESHOLD", "high")]));
        assert_eq!(config.threshold, 0.3);
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facekit.toml");
        std::fs::write(&path, "model_dir = \"/opt/models\"\nthreshold = 0.45\n").unwrap();

        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.model_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(file.threshold, Some(0.45));
        assert!(file.db_path.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facekit.toml");
        std::fs::write(&path, "camera = \"/dev/video0\"\n").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }
}
