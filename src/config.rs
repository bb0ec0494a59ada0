use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::oauth::DEFAULT_SCOPE;
use crate::oauth::client::{DEVICE_CODE_URL, TOKEN_URL};
use crate::oauth::storage::write_private;
use crate::upload::client::{CHUNK_ALIGNMENT, DEFAULT_UPLOAD_ENDPOINT};
use crate::upload::engine::DEFAULT_CHUNK_SIZE;
use crate::upload::retry::{DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_RETRIES};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "gdrive-upload.toml";

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "GDRIVE_UPLOAD_CONFIG";

/// Credential file name, relative to the working directory.
pub const DEFAULT_CREDENTIALS_FILE: &str = "gdriveupload.credentials";

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Records which settings were replaced by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "upload.chunk_size") is overridden.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Overridden setting keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.overrides.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings replaced by environment variables (not serialized).
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// OAuth client ID of the Google Cloud project. Collected by the
    /// interactive setup when absent.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_device_code_url")]
    pub device_code_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scope: default_scope(),
            device_code_url: default_device_code_url(),
            token_url: default_token_url(),
        }
    }
}

impl OAuthConfig {
    /// Both client id and secret are present and non-empty.
    pub fn has_client(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.client_id) && filled(&self.client_secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_endpoint")]
    pub endpoint: String,
    /// Bytes per chunk; a multiple of 256 KiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Consecutive failed chunk attempts before the upload is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_upload_endpoint(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_device_code_url() -> String {
    DEVICE_CODE_URL.to_string()
}

fn default_token_url() -> String {
    TOKEN_URL.to_string()
}

fn default_upload_endpoint() -> String {
    DEFAULT_UPLOAD_ENDPOINT.to_string()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_FILE)
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading, saving, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Config file location: `explicit`, else `GDRIVE_UPLOAD_CONFIG`, else
    /// `gdrive-upload.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Read `path` (defaults when missing) and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read `path` without environment overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::local_io(path, format!("Failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {e}", path.display())))
    }

    /// Write the configuration to `path` as TOML.
    ///
    /// The file holds the OAuth client secret, so it gets the same owner-only
    /// permissions as the credential file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        write_private(path, &content)
    }

    /// Check values the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        let chunk = self.upload.chunk_size;
        if chunk == 0 || chunk % CHUNK_ALIGNMENT != 0 {
            return Err(Error::Config(format!(
                "upload.chunk_size must be a non-zero multiple of {CHUNK_ALIGNMENT} bytes, got {chunk}"
            )));
        }
        if self.upload.max_retries == 0 {
            return Err(Error::Config("upload.max_retries must be at least 1".into()));
        }
        if self.upload.initial_backoff_ms > self.upload.max_backoff_ms {
            return Err(Error::Config(
                "upload.initial_backoff_ms must not exceed upload.max_backoff_ms".into(),
            ));
        }
        for (key, value) in [
            ("oauth.device_code_url", &self.oauth.device_code_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("upload.endpoint", &self.upload.endpoint),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{key} is not a valid URL ({value}): {e}")))?;
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every setting has a corresponding `GDRIVE_UPLOAD_*` env var. When set,
    /// its value replaces the file/default value.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    match val.trim().parse() {
                        Ok(parsed) => {
                            $field = parsed;
                            ov.record($key, $env);
                        }
                        Err(_) => tracing::warn!(env = $env, value = %val, "Ignoring unparseable override"),
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }

        // -- OAuth --
        env_opt_str!("oauth.client_id", "GDRIVE_UPLOAD_CLIENT_ID", self.oauth.client_id);
        env_opt_str!(
            "oauth.client_secret",
            "GDRIVE_UPLOAD_CLIENT_SECRET",
            self.oauth.client_secret
        );
        env_str!("oauth.scope", "GDRIVE_UPLOAD_SCOPE", self.oauth.scope);
        env_str!(
            "oauth.device_code_url",
            "GDRIVE_UPLOAD_DEVICE_CODE_URL",
            self.oauth.device_code_url
        );
        env_str!("oauth.token_url", "GDRIVE_UPLOAD_TOKEN_URL", self.oauth.token_url);

        // -- Upload --
        env_str!("upload.endpoint", "GDRIVE_UPLOAD_ENDPOINT", self.upload.endpoint);
        env_parse!("upload.chunk_size", "GDRIVE_UPLOAD_CHUNK_SIZE", self.upload.chunk_size);
        env_parse!("upload.max_retries", "GDRIVE_UPLOAD_MAX_RETRIES", self.upload.max_retries);
        env_parse!(
            "upload.initial_backoff_ms",
            "GDRIVE_UPLOAD_INITIAL_BACKOFF_MS",
            self.upload.initial_backoff_ms
        );
        env_parse!(
            "upload.max_backoff_ms",
            "GDRIVE_UPLOAD_MAX_BACKOFF_MS",
            self.upload.max_backoff_ms
        );

        // -- Storage --
        env_path!(
            "storage.credentials_file",
            "GDRIVE_UPLOAD_CREDENTIALS_FILE",
            self.storage.credentials_file
        );

        // -- Logging --
        env_str!("logging.level", "GDRIVE_UPLOAD_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "GDRIVE_UPLOAD_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}
