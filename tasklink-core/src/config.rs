//! YAML configuration at `~/.tasklink/config.yaml`.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tasklink/
//!   config.yaml        (mode 0600, created by `tasklink init`)
//!   state/
//!     cursors.json     (file cursor store, see tasklink-sync)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tokens and database ids may be left empty in the file and supplied via
//! the environment instead (see [`Config::with_env_overrides`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_NOTION_TOKEN: &str = "NOTION_TOKEN";
pub const ENV_TODOIST_TOKEN: &str = "TODOIST_API_TOKEN";
pub const ENV_NOTION_TASKS_DB: &str = "NOTION_TASKS_DB_ID";
pub const ENV_NOTION_PROJECTS_DB: &str = "NOTION_PROJECTS_DB_ID";
pub const ENV_NOTION_VARIABLES_DB: &str = "NOTION_VARIABLES_DB_ID";

const DEFAULT_TODOIST_API_BASE: &str = "https://api.todoist.com/sync/v9";

// ---------------------------------------------------------------------------
// Config document
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub todoist: TodoistConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cursor_store: CursorStoreKind,
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// When set, each pass writes the fetched mirror snapshot and the commit
    /// receipt here as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotionConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub tasks_database: String,
    #[serde(default)]
    pub projects_database: String,
    /// Required only when `cursor_store: notion`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoistConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for TodoistConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// Remote call budget shared by both adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Where the three cursor variables live between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CursorStoreKind {
    /// `~/.tasklink/state/cursors.json`
    #[default]
    File,
    /// Rows of the planner's variables database.
    Notion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_TODOIST_API_BASE.to_owned()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    4
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_interval_secs() -> u64 {
    15 * 60
}

impl Config {
    /// Fill values from the environment. A non-empty variable wins over the
    /// file. `lookup` is injectable for tests; callers pass `env::var`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_NOTION_TOKEN) {
            self.notion.token = v;
        }
        if let Some(v) = get(ENV_TODOIST_TOKEN) {
            self.todoist.token = v;
        }
        if let Some(v) = get(ENV_NOTION_TASKS_DB) {
            self.notion.tasks_database = v;
        }
        if let Some(v) = get(ENV_NOTION_PROJECTS_DB) {
            self.notion.projects_database = v;
        }
        if let Some(v) = get(ENV_NOTION_VARIABLES_DB) {
            self.notion.variables_database = Some(v);
        }
        self
    }

    /// Check that everything a pass needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 4] = [
            ("notion.token", &self.notion.token),
            ("notion.tasks_database", &self.notion.tasks_database),
            ("notion.projects_database", &self.notion.projects_database),
            ("todoist.token", &self.todoist.token),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { key });
            }
        }
        if self.cursor_store == CursorStoreKind::Notion
            && self
                .notion
                .variables_database
                .as_deref()
                .map_or(true, |v| v.trim().is_empty())
        {
            return Err(ConfigError::Missing {
                key: "notion.variables_database",
            });
        }
        if self.http.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "http.max_attempts",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.daemon.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "daemon.interval_secs",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.tasklink/` (pure, no I/O).
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".tasklink")
}

/// `<home>/.tasklink/config.yaml` (pure, no I/O).
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

/// `<home>/.tasklink/state/` (pure, no I/O).
pub fn state_dir_at(home: &Path) -> PathBuf {
    root_at(home).join("state")
}

/// `<home>/.tasklink/`, created (mode `0700`) if it does not yet exist.
pub fn ensure_root_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.tasklink/config.yaml` as written, without environment overrides.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load, apply process environment overrides, and validate.
pub fn load_effective_at(home: &Path) -> Result<Config, ConfigError> {
    let config = load_at(home)?.with_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.tasklink/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    ensure_root_at(home)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write a default config scaffold if none exists.
///
/// Idempotent: an existing file is loaded and returned unchanged, with
/// `false` as the second element.
pub fn init_at(home: &Path) -> Result<(Config, bool), ConfigError> {
    if config_path_at(home).exists() {
        return Ok((load_at(home)?, false));
    }
    let config = Config::default();
    save_at(home, &config)?;
    Ok((config, true))
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<(Config, bool), ConfigError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Home directory from the platform, as an error when unavailable.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn complete() -> Config {
        let mut config = Config::default();
        config.notion.token = "secret_n".into();
        config.notion.tasks_database = "tasks-db".into();
        config.notion.projects_database = "projects-db".into();
        config.todoist.token = "secret_t".into();
        config
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(config_path_at(home.path()).ends_with(".tasklink/config.yaml"));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = serde_yaml::from_str("notion:\n  token: abc\n").expect("parse");
        assert_eq!(config.notion.token, "abc");
        assert_eq!(config.todoist.api_base, DEFAULT_TODOIST_API_BASE);
        assert_eq!(config.http.max_attempts, 4);
        assert_eq!(config.cursor_store, CursorStoreKind::File);
        assert_eq!(config.daemon.interval_secs, 900);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_NOTION_TOKEN, "from-env"),
            (ENV_TODOIST_TOKEN, "   "),
            (ENV_NOTION_VARIABLES_DB, "vars"),
        ]
        .into_iter()
        .collect();
        let config = complete().with_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.notion.token, "from-env");
        assert_eq!(config.todoist.token, "secret_t", "blank env value is ignored");
        assert_eq!(config.notion.variables_database.as_deref(), Some("vars"));
    }

    #[test]
    fn validate_reports_first_missing_key() {
        let mut config = complete();
        config.todoist.token.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "todoist.token" }));
    }

    #[test]
    fn notion_cursor_store_requires_variables_database() {
        let mut config = complete();
        config.cursor_store = CursorStoreKind::Notion;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Missing { key: "notion.variables_database" }
        ));
        config.notion.variables_database = Some("vars".into());
        config.validate().expect("valid");
    }

    #[test]
    fn save_and_load_roundtrip_with_perms() {
        let home = TempDir::new().expect("tempdir");
        let config = complete();
        save_at(home.path(), &config).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(config_path_at(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().expect("tempdir");
        let (_, created) = init_at(home.path()).expect("init");
        assert!(created);
        let mut edited = load_at(home.path()).expect("load");
        edited.notion.token = "kept".into();
        save_at(home.path(), &edited).expect("save");

        let (again, created) = init_at(home.path()).expect("init again");
        assert!(!created);
        assert_eq!(again.notion.token, "kept");
    }

    #[test]
    fn load_missing_config_returns_not_found() {
        let home = TempDir::new().expect("tempdir");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }
}
