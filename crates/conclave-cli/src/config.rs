//! Configuration file management for conclave.
//!
//! Provides a TOML-based config file at `~/.config/conclave/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conclave_core::safety::SafetyConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub git: GitSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceSection {
    pub root: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LimitsSection {
    pub max_depth_orchestrator: Option<u8>,
    pub max_depth_agent: Option<u8>,
    pub max_sub_tasks_per_worker: Option<usize>,
    pub max_parallel_sub_tasks: Option<usize>,
    pub spawns_per_minute: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GitSection {
    pub default_base_branch: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the conclave config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/conclave` or
/// `~/.config/conclave`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support`
/// on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("conclave");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("conclave")
}

/// Return the path to the conclave config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns `Ok(None)` if it does not exist.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ConclaveConfig {
    pub workspace_root: PathBuf,
    pub safety: SafetyConfig,
    pub default_base_branch: Option<String>,
}

impl ConclaveConfig {
    /// Resolve configuration using the chain: CLI flag > env var >
    /// config file > default.
    ///
    /// - Workspace root: `cli_workspace` > `CONCLAVE_WORKSPACE` env >
    ///   `config_file.workspace.root` > current directory.
    /// - Safety limits: `CONCLAVE_MAX_PARALLEL_SUB_TASKS` env >
    ///   `config_file.limits.*` > [`SafetyConfig::default`].
    /// - Default base branch: `CONCLAVE_DEFAULT_BASE_BRANCH` env >
    ///   `config_file.git.default_base_branch` > detected at runtime.
    pub fn resolve(cli_workspace: Option<&str>) -> Result<Self> {
        let file_config = load_config()?;

        let workspace_root = if let Some(root) = cli_workspace {
            PathBuf::from(root)
        } else if let Ok(root) = std::env::var("CONCLAVE_WORKSPACE") {
            PathBuf::from(root)
        } else if let Some(root) = file_config.as_ref().and_then(|c| c.workspace.root.clone()) {
            PathBuf::from(root)
        } else {
            std::env::current_dir().context("failed to get current directory")?
        };

        let mut safety = SafetyConfig::default();
        if let Some(limits) = file_config.as_ref().map(|c| &c.limits) {
            if let Some(v) = limits.max_depth_orchestrator {
                safety.max_depth_orchestrator = v;
            }
            if let Some(v) = limits.max_depth_agent {
                safety.max_depth_agent = v;
            }
            if let Some(v) = limits.max_sub_tasks_per_worker {
                safety.max_sub_tasks_per_worker = v;
            }
            if let Some(v) = limits.max_parallel_sub_tasks {
                safety.max_parallel_sub_tasks = v;
            }
            if let Some(v) = limits.spawns_per_minute {
                safety.spawns_per_minute = v;
            }
        }
        if let Ok(v) = std::env::var("CONCLAVE_MAX_PARALLEL_SUB_TASKS") {
            safety.max_parallel_sub_tasks = v
                .parse()
                .context("CONCLAVE_MAX_PARALLEL_SUB_TASKS must be a positive integer")?;
        }

        let default_base_branch = std::env::var("CONCLAVE_DEFAULT_BASE_BRANCH")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.git.default_base_branch.clone()));

        Ok(Self {
            workspace_root,
            safety,
            default_base_branch,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        conclave_test_utils::lock_env()
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("conclave/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let original = ConfigFile {
            workspace: WorkspaceSection {
                root: Some("/tmp/my-workspace".to_string()),
            },
            limits: LimitsSection {
                max_parallel_sub_tasks: Some(8),
                ..Default::default()
            },
            git: GitSection {
                default_base_branch: Some("develop".to_string()),
            },
        };
        save_config(&original).unwrap();

        let loaded = load_config().unwrap().expect("config file should exist");
        assert_eq!(loaded.workspace.root, original.workspace.root);
        assert_eq!(loaded.limits.max_parallel_sub_tasks, Some(8));
        assert_eq!(loaded.git.default_base_branch, Some("develop".to_string()));

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        save_config(&ConfigFile::default()).unwrap();
        let meta = std::fs::metadata(config_path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env_and_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var("CONCLAVE_WORKSPACE", "/env/workspace") };

        let resolved = ConclaveConfig::resolve(Some("/cli/workspace")).unwrap();
        assert_eq!(resolved.workspace_root, PathBuf::from("/cli/workspace"));

        unsafe { std::env::remove_var("CONCLAVE_WORKSPACE") };
    }

    #[test]
    fn resolve_defaults_to_current_dir_when_nothing_set() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        unsafe { std::env::remove_var("CONCLAVE_WORKSPACE") };

        let resolved = ConclaveConfig::resolve(None).unwrap();
        assert_eq!(resolved.workspace_root, std::env::current_dir().unwrap());

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn resolve_applies_limits_override_from_env() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        unsafe { std::env::set_var("CONCLAVE_MAX_PARALLEL_SUB_TASKS", "2") };

        let resolved = ConclaveConfig::resolve(None).unwrap();
        assert_eq!(resolved.safety.max_parallel_sub_tasks, 2);

        unsafe { std::env::remove_var("CONCLAVE_MAX_PARALLEL_SUB_TASKS") };
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }
}
