//! Nixling configuration.
//!
//! Configuration lives in `$XDG_CONFIG_HOME/nixling/config.toml` (or
//! `/etc/nixling/config.toml`). The pipeline does not own these values; it only
//! insists they are positive and finite, so every number is read through an
//! `effective_*` accessor that clamps to a safe range.

use crate::command::InstallMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/nixling";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "NIXLING_CONFIG";

const DEFAULT_SYSTEM_PROFILE: &str = "/nix/var/nix/profiles/system";

/// Privilege prefix used for commands that require elevation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    Sudo,
    Doas,
    /// Already running with the needed privileges
    None,
}

impl Elevation {
    pub fn program(&self) -> Option<&'static str> {
        match self {
            Elevation::Sudo => Some("sudo"),
            Elevation::Doas => Some("doas"),
            Elevation::None => None,
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Memory tier capacity in entries (valid: 1-100000)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Whether the SQLite disk tier is used at all
    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    /// Disk tier location; defaults to `$XDG_CACHE_HOME/nixling/cache.db`
    #[serde(default)]
    pub disk_path: Option<PathBuf>,

    /// TTL for package/search resolutions (seconds)
    #[serde(default = "default_package_ttl")]
    pub package_ttl_secs: u64,

    /// TTL for installed-package listings (seconds)
    #[serde(default = "default_installed_ttl")]
    pub installed_ttl_secs: u64,

    /// TTL for generation/rollback metadata (seconds)
    #[serde(default = "default_generations_ttl")]
    pub generations_ttl_secs: u64,

    /// How long a write may wait on the disk tier before it is queued (ms)
    #[serde(default = "default_disk_write_budget")]
    pub disk_write_budget_ms: u64,
}

fn default_capacity() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_package_ttl() -> u64 {
    30 * 60
}

fn default_installed_ttl() -> u64 {
    60
}

fn default_generations_ttl() -> u64 {
    5 * 60
}

fn default_disk_write_budget() -> u64 {
    20
}

const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            disk_enabled: true,
            disk_path: None,
            package_ttl_secs: default_package_ttl(),
            installed_ttl_secs: default_installed_ttl(),
            generations_ttl_secs: default_generations_ttl(),
            disk_write_budget_ms: default_disk_write_budget(),
        }
    }
}

impl CacheSettings {
    /// Memory capacity clamped to 1-100000 (0 falls back to the default)
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            return default_capacity();
        }
        self.capacity.min(100_000)
    }

    pub fn effective_package_ttl(&self) -> Duration {
        clamp_ttl(self.package_ttl_secs, default_package_ttl())
    }

    pub fn effective_installed_ttl(&self) -> Duration {
        clamp_ttl(self.installed_ttl_secs, default_installed_ttl())
    }

    pub fn effective_generations_ttl(&self) -> Duration {
        clamp_ttl(self.generations_ttl_secs, default_generations_ttl())
    }

    /// Disk write budget clamped to 1-500 ms
    pub fn effective_disk_write_budget(&self) -> Duration {
        let ms = if self.disk_write_budget_ms == 0 {
            default_disk_write_budget()
        } else {
            self.disk_write_budget_ms.min(500)
        };
        Duration::from_millis(ms)
    }

    /// Resolved disk tier path, if the disk tier is enabled
    pub fn effective_disk_path(&self) -> Option<PathBuf> {
        if !self.disk_enabled {
            return None;
        }
        if let Some(path) = &self.disk_path {
            return Some(path.clone());
        }
        dirs::cache_dir().map(|dir| dir.join("nixling").join("cache.db"))
    }
}

fn clamp_ttl(secs: u64, fallback: u64) -> Duration {
    let secs = if secs == 0 { fallback } else { secs.min(MAX_TTL_SECS) };
    Duration::from_secs(secs)
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Timeout for read-only queries (seconds, valid: 1-3600)
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Timeout for mutating operations (seconds, valid: 1-3600)
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout_secs: u64,

    /// Method used when the request does not name one
    #[serde(default)]
    pub default_method: InstallMethod,

    /// Privilege prefix for elevated commands
    #[serde(default)]
    pub elevation: Elevation,

    /// NixOS system profile
    #[serde(default = "default_system_profile")]
    pub system_profile: PathBuf,

    /// home-manager profile; defaults under the user's state directory
    #[serde(default)]
    pub home_profile: Option<PathBuf>,

    /// Per-user `nix profile`; defaults under the user's state directory
    #[serde(default)]
    pub user_profile: Option<PathBuf>,
}

fn default_query_timeout() -> u64 {
    30
}

fn default_mutation_timeout() -> u64 {
    600
}

fn default_system_profile() -> PathBuf {
    PathBuf::from(DEFAULT_SYSTEM_PROFILE)
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout(),
            mutation_timeout_secs: default_mutation_timeout(),
            default_method: InstallMethod::default(),
            elevation: Elevation::default(),
            system_profile: default_system_profile(),
            home_profile: None,
            user_profile: None,
        }
    }
}

impl ExecutionSettings {
    pub fn effective_query_timeout(&self) -> Duration {
        clamp_timeout(self.query_timeout_secs, default_query_timeout())
    }

    pub fn effective_mutation_timeout(&self) -> Duration {
        clamp_timeout(self.mutation_timeout_secs, default_mutation_timeout())
    }

    pub fn effective_system_profile(&self) -> PathBuf {
        checked_profile(Some(&self.system_profile), default_system_profile)
    }

    pub fn effective_home_profile(&self) -> PathBuf {
        checked_profile(self.home_profile.as_deref(), || {
            state_dir().join("nix/profiles/home-manager")
        })
    }

    pub fn effective_user_profile(&self) -> PathBuf {
        checked_profile(self.user_profile.as_deref(), || {
            state_dir().join("nix/profiles/profile")
        })
    }
}

fn clamp_timeout(secs: u64, fallback: u64) -> Duration {
    let secs = if secs == 0 { fallback } else { secs.min(3600) };
    Duration::from_secs(secs)
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("/tmp/nixling"))
}

/// Profile paths land in argv, so they must be absolute and free of anything
/// a shell or path resolver would treat specially.
pub fn is_safe_profile_path(path: &Path) -> bool {
    let Some(text) = path.to_str() else {
        return false;
    };
    path.is_absolute()
        && !text.contains("..")
        && text.len() <= 200
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
}

fn checked_profile(configured: Option<&Path>, fallback: impl FnOnce() -> PathBuf) -> PathBuf {
    match configured {
        Some(path) if is_safe_profile_path(path) => path.to_path_buf(),
        Some(path) => {
            warn!(path = %path.display(), "Unsafe profile path in config, using default");
            fallback()
        }
        None => fallback(),
    }
}

/// Intent extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSettings {
    /// Below this confidence the pipeline asks instead of acting (valid: 0.0-1.0)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 {
    0.5
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

impl IntentSettings {
    pub fn effective_min_confidence(&self) -> f32 {
        if self.min_confidence.is_finite() {
            self.min_confidence.clamp(0.0, 1.0)
        } else {
            default_min_confidence()
        }
    }
}

/// Knowledge base settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    /// Optional JSON package index extending the built-in catalog
    #[serde(default)]
    pub package_index: Option<PathBuf>,

    /// Resolve common queries in the background at startup
    #[serde(default = "default_true")]
    pub prewarm: bool,

    /// Targets resolved during pre-warming
    #[serde(default = "default_prewarm_queries")]
    pub prewarm_queries: Vec<String>,
}

fn default_prewarm_queries() -> Vec<String> {
    ["firefox", "git", "vim", "neovim", "vscode", "python", "htop", "vlc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            package_index: None,
            prewarm: true,
            prewarm_queries: default_prewarm_queries(),
        }
    }
}

/// Complete nixling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NixlingConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub intent: IntentSettings,

    #[serde(default)]
    pub knowledge: KnowledgeSettings,
}

impl NixlingConfig {
    /// Candidate config paths in search order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(path));
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("nixling").join(CONFIG_FILE));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE));
        paths
    }

    /// Load from the first existing search path, falling back to defaults
    pub fn load() -> Self {
        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        debug!("No config file found, using defaults");
        Self::default()
    }

    /// Load from an explicit path; unreadable or invalid files yield defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read config, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
