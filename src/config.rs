// Configuration module for mediarr
// Handles XDG-compliant directory paths and the TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;

use crate::parser::TagDictionaries;

const APP_NAME: &str = "mediarr";
const CONFIG_FILENAME: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,

    /// Directory paths (overrides XDG defaults)
    pub paths: PathsConfig,

    /// Metadata source configuration
    pub metadata: MetadataConfig,

    /// Scheduler tick configuration
    pub scheduler: SchedulerConfig,

    /// Filename parser tag dictionaries
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 7878)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7878,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override data directory (database location)
    pub data_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// TMDB API key (optional, enables the TMDB scanner)
    pub tmdb_api_key: Option<String>,
}

impl MetadataConfig {
    /// Config file value, overridden by the TMDB_API_KEY environment variable.
    pub fn tmdb_key(&self) -> Option<String> {
        std::env::var("TMDB_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.tmdb_api_key.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Enable the periodic scheduler loops (default: true)
    pub enabled: bool,

    /// File-intake loop tick interval in seconds (default: 60)
    pub intake_tick_seconds: u64,

    /// Metadata-scan loop tick interval in seconds (default: 300)
    pub scan_tick_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intake_tick_seconds: 60,
            scan_tick_seconds: 300,
        }
    }
}

/// Tag dictionary overrides; an empty list keeps the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub resolution_tags: Vec<String>,
    pub source_tags: Vec<String>,
    pub codec_tags: Vec<String>,
}

impl ParserConfig {
    pub fn dictionaries(&self) -> TagDictionaries {
        let mut dict = TagDictionaries::default();
        if !self.resolution_tags.is_empty() {
            dict.resolutions = self.resolution_tags.clone();
        }
        if !self.source_tags.is_empty() {
            dict.sources = self.source_tags.clone();
        }
        if !self.codec_tags.is_empty() {
            dict.codecs = self.codec_tags.clone();
        }
        dict
    }
}

/// Application paths following the XDG Base Directory Specification on Unix,
/// with platform fallbacks elsewhere.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    pub config_dir: PathBuf,

    /// Directory for persistent data (database)
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Priority order: environment variables (MEDIARR_CONFIG_DIR,
    /// MEDIARR_DATA_DIR), config file overrides, XDG/platform directories,
    /// current directory fallback.
    pub fn new(overrides: &PathsConfig) -> Self {
        Self {
            config_dir: Self::resolve("MEDIARR_CONFIG_DIR", &overrides.config_dir, dirs::config_dir),
            data_dir: Self::resolve("MEDIARR_DATA_DIR", &overrides.data_dir, dirs::data_dir),
        }
    }

    fn resolve(
        env_var: &str,
        config_override: &Option<PathBuf>,
        platform_dir: fn() -> Option<PathBuf>,
    ) -> PathBuf {
        if let Ok(path) = std::env::var(env_var) {
            return PathBuf::from(path);
        }
        if let Some(path) = config_override {
            return path.clone();
        }
        if let Some(dir) = platform_dir() {
            return dir.join(APP_NAME);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mediarr.db")
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub paths: AppPaths,
    pub metadata: MetadataConfig,
    pub scheduler: SchedulerConfig,
    pub parser: ParserConfig,
}

impl AppConfig {
    /// Load config.toml from the resolved config directory; missing or
    /// unreadable files fall back to defaults with a warning.
    pub fn load() -> Self {
        // Paths may be overridden by the file itself, so resolve twice: once
        // to find the file, once with the file's overrides applied.
        let bootstrap_paths = AppPaths::new(&PathsConfig::default());
        let config_path = bootstrap_paths.config_dir.join(CONFIG_FILENAME);

        let file: ConfigFile = match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
                    ConfigFile::default()
                }
            },
            Err(_) => {
                tracing::debug!("No config file at {}, using defaults", config_path.display());
                ConfigFile::default()
            }
        };

        let paths = AppPaths::new(&file.paths);

        Self {
            port: file.server.port,
            bind_address: file.server.bind_address,
            paths,
            metadata: file.metadata,
            scheduler: file.scheduler,
            parser: file.parser,
        }
    }

    pub fn database_url(&self) -> String {
        self.paths.database_url()
    }

    pub fn log_config(&self) {
        tracing::info!("Config dir: {}", self.paths.config_dir.display());
        tracing::info!("Data dir:   {}", self.paths.data_dir.display());
        tracing::info!(
            "Scheduler:  enabled={} intake_tick={}s scan_tick={}s",
            self.scheduler.enabled,
            self.scheduler.intake_tick_seconds,
            self.scheduler.scan_tick_seconds
        );
        if self.metadata.tmdb_key().is_some() {
            tracing::info!("Metadata sources: TMDB + AniList");
        } else {
            tracing::info!("Metadata sources: AniList only (set TMDB_API_KEY for more coverage)");
        }
    }
}
