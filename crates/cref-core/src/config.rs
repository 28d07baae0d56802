use crate::constants::{dirs, files};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";
const XDG_PREFIX: &str = "cref";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
    /// Named dataset registries usable with `datasets fetch-data`.
    pub registries: BTreeMap<String, RegistryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Root for mutable state; the catalog database lives here.
    pub data_dir: PathBuf,
    /// Installed diagnostic providers, one directory per provider.
    pub providers_dir: PathBuf,
    /// Execution result bundles.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Worker-pool size for solve sessions. Defaults to the CPU count.
    pub concurrency: Option<usize>,
    /// Seconds a cancelled diagnostic gets between SIGTERM and SIGKILL.
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub max_files: usize,
    pub max_age_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Directory holding the bundle contents.
    pub source: PathBuf,
    /// Manifest file listing bundle files and their sha256 checksums,
    /// relative to `source` unless absolute.
    pub manifest: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_home = xdg_data_home();
        Self {
            data_dir: data_home.join(dirs::DATA),
            providers_dir: data_home.join(dirs::PROVIDERS),
            output_dir: data_home.join(dirs::EXECUTIONS),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            grace_period_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_files: 10,
            max_age_days: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
            registries: BTreeMap::new(),
        }
    }
}

fn xdg_data_home() -> PathBuf {
    xdg::BaseDirectories::with_prefix(XDG_PREFIX)
        .get_data_home()
        .unwrap_or_else(|| PathBuf::from(".").join(XDG_PREFIX))
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

impl Config {
    /// Load from `dir/config.toml` when a directory is given, otherwise from
    /// the XDG config home. A missing default config is not an error; the
    /// defaults apply. An explicitly requested config that is missing is.
    pub fn load(dir: Option<&Path>) -> Result<Self, ConfigError> {
        match dir {
            Some(dir) => {
                let path = dir.join(CONFIG_FILE);
                if !path.exists() {
                    return Err(ConfigError::ConfigNotFound(path));
                }
                Self::from_file(&path)
            }
            None => {
                let base = xdg::BaseDirectories::with_prefix(XDG_PREFIX);
                match base.get_config_home() {
                    Some(home) if home.join(CONFIG_FILE).exists() => {
                        Self::from_file(&home.join(CONFIG_FILE))
                    }
                    _ => Ok(Self::default()),
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::PathIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.paths.data_dir = expand(&config.paths.data_dir);
        config.paths.providers_dir = expand(&config.paths.providers_dir);
        config.paths.output_dir = expand(&config.paths.output_dir);
        for registry in config.registries.values_mut() {
            registry.source = expand(&registry.source);
        }
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir)?;
        let content = toml::to_string_pretty(self)?;
        fs::write(dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.paths.data_dir.join(files::DATABASE)
    }

    pub fn registry(&self, name: &str) -> Result<&RegistryConfig, ConfigError> {
        self.registries
            .get(name)
            .ok_or_else(|| ConfigError::UnknownRegistry {
                name: name.to_string(),
                available: self.registries.keys().cloned().collect(),
            })
    }
}
