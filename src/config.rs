//! Configuration management for skinwatch using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::browser::SessionOptions;
use crate::repository::ARTIFACT_DIR;
use crate::scrapers::{BrowserConfig, DelayRange, ListingConfig, RetryPolicy, ScrollConfig};

/// Default minutes between runs in watch mode.
pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Directory for run artifacts.
    pub artifacts_dir: PathBuf,
    /// Units (pages or item-type jobs) in flight at once.
    pub concurrency: usize,
    /// Attempts per unit.
    pub max_retries: u32,
    /// Jitter before each attempt, `[min, max)` milliseconds.
    pub jitter_ms: [u64; 2],
    /// Backoff after a failed attempt, `[min, max)` milliseconds.
    pub backoff_ms: [u64; 2],
    /// Upper bound on listing pages per run.
    pub max_pages: Option<u32>,
    /// Minutes between runs in watch mode.
    pub interval_minutes: u64,
    pub listing: ListingConfig,
    pub scroll: ScrollConfig,
    pub browser: BrowserConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/skinwatch/ for user data
        // Falls back gracefully: Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skinwatch");

        Self {
            artifacts_dir: data_dir.join(ARTIFACT_DIR),
            data_dir,
            concurrency: 2,
            max_retries: 3,
            jitter_ms: [0, 3_000],
            backoff_ms: [1_000, 5_000],
            max_pages: None,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            listing: ListingConfig::default(),
            scroll: ScrollConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            artifacts_dir: data_dir.join(ARTIFACT_DIR),
            data_dir,
            ..Default::default()
        }
    }

    fn set_data_dir(&mut self, data_dir: PathBuf) {
        self.artifacts_dir = data_dir.join(ARTIFACT_DIR);
        self.data_dir = data_dir;
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.artifacts_dir)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            DelayRange::from_millis(self.jitter_ms[0], self.jitter_ms[1]),
            DelayRange::from_millis(self.backoff_ms[0], self.backoff_ms[1]),
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        self.browser.to_session_options()
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// `[min, max)` jitter in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<[u64; 2]>,
    /// `[min, max)` backoff in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<ListingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll: Option<ScrollConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfig>,

    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers skinwatch config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("skinwatch").await {
            Ok(pref_config) => {
                // Nested sections need the full file; parse it directly
                if let Some(path) = pref_config.source_path().cloned() {
                    match Self::load_from_path(&path).await {
                        Ok(config) => return config,
                        Err(e) => tracing::warn!("{}", e),
                    }
                }

                // Fall back to the top-level scalar keys
                let target: Option<String> = pref_config.get("target").ok();
                let concurrency: Option<u64> = pref_config.get("concurrency").ok();
                let max_retries: Option<u64> = pref_config.get("max_retries").ok();
                let max_pages: Option<u64> = pref_config.get("max_pages").ok();
                let interval_minutes: Option<u64> =
                    pref_config.get("interval_minutes").ok();

                Config {
                    target,
                    concurrency: concurrency.map(|n| n as usize),
                    max_retries: max_retries.and_then(|n| u32::try_from(n).ok()),
                    max_pages: max_pages.and_then(|n| u32::try_from(n).ok()),
                    interval_minutes,
                    source_path: pref_config.source_path().cloned(),
                    ..Default::default()
                }
            }
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// `.toml` files are parsed as TOML, anything else as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let mut config: Config = if is_toml {
            toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?
        } else {
            serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise None.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir` (config file location or CWD)
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref target) = self.target {
            settings.set_data_dir(self.resolve_path(target, base_dir));
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency.max(1);
        }
        if let Some(max_retries) = self.max_retries {
            settings.max_retries = max_retries.max(1);
        }
        if let Some(jitter) = self.jitter_ms {
            settings.jitter_ms = jitter;
        }
        if let Some(backoff) = self.backoff_ms {
            settings.backoff_ms = backoff;
        }
        if let Some(max_pages) = self.max_pages {
            settings.max_pages = Some(max_pages);
        }
        if let Some(interval) = self.interval_minutes {
            settings.interval_minutes = interval;
        }
        if let Some(ref listing) = self.listing {
            settings.listing = listing.clone();
        }
        if let Some(ref scroll) = self.scroll {
            settings.scroll = scroll.clone();
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Override data directory (--target flag).
    pub data_dir: Option<PathBuf>,
}

/// Load settings with explicit options.
///
/// An explicitly named config file that cannot be read is an error;
/// a missing auto-discovered one just means defaults.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings, String> {
    // Load config from explicit path or auto-discover
    let config = match &options.config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    // Determine base directory for resolving relative paths
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        // --cwd flag: use current working directory
        cwd()
    } else {
        // Default: use config file's directory, fall back to CWD
        config.base_dir().unwrap_or_else(cwd)
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --target override takes precedence
    if let Some(data_dir) = options.data_dir {
        settings.set_data_dir(data_dir);
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.interval_minutes, 30);
        assert!(settings.artifacts_dir.ends_with("skinwatch/cs_data"));

        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.jitter, DelayRange::from_millis(0, 3000));
        assert_eq!(policy.backoff, DelayRange::from_millis(1000, 5000));
    }

    #[tokio::test]
    async fn test_toml_file_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skinwatch.toml");
        fs::write(
            &path,
            r#"
            target = "data"
            concurrency = 4
            jitter_ms = [0, 0]
            max_pages = 12

            [scroll]
            max_passes = 20

            [browser]
            headless = false
            "#,
        )
        .unwrap();

        let settings = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("data"));
        assert_eq!(settings.artifacts_dir, dir.path().join("data").join("cs_data"));
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.max_pages, Some(12));
        assert_eq!(settings.retry_policy().jitter.sample(), Duration::ZERO);
        assert_eq!(settings.scroll.max_passes, 20);
        assert_eq!(settings.scroll.base_url, "https://csqaq.com/detail");
        assert!(!settings.browser.headless);
        assert_eq!(settings.browser.window_width, 1366);
    }

    #[tokio::test]
    async fn test_json_file_and_target_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skinwatch.json");
        fs::write(&path, r#"{"target": "/srv/skins", "max_retries": 0}"#).unwrap();

        let settings = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            data_dir: Some(dir.path().join("override")),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("override"));
        assert_eq!(settings.max_retries, 1);
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = load_settings_with_options(LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            ..Default::default()
        })
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::default();
        let base = Path::new("/etc/skinwatch");
        assert_eq!(
            config.resolve_path("/abs/dir", base),
            PathBuf::from("/abs/dir")
        );
        assert_eq!(
            config.resolve_path("rel", base),
            PathBuf::from("/etc/skinwatch/rel")
        );
    }
}
