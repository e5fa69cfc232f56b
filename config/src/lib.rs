//! Process configuration for the judging core.
//!
//! The configuration is a single JSON file resolved in this order:
//! `$SOLVE_CONFIG_FILE`, `./config.json`, `/etc/solve/config.json`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Path to the system-wide configuration directory.
const ETC_DIR: &str = "/etc/solve";

/// A string value that can be stored inline or resolved from
/// the environment or a file at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Secret {
    Data { data: String },
    Env { name: String },
    File { path: PathBuf },
}

impl Secret {
    pub fn resolve(&self) -> anyhow::Result<String> {
        match self {
            Secret::Data { data } => Ok(data.clone()),
            Secret::Env { name } => std::env::var(name)
                .with_context(|| format!("cannot read secret from ${}", name)),
            Secret::File { path } => {
                let data = std::fs::read_to_string(path).with_context(|| {
                    format!("cannot read secret from {}", path.display())
                })?;
                Ok(data.trim_end_matches('\n').to_owned())
            }
        }
    }
}

impl Default for Secret {
    fn default() -> Self {
        Secret::Data {
            data: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DatabaseConfig {
    #[serde(rename = "sqlite")]
    SQLite { path: PathBuf },
    Postgres {
        hosts: Vec<String>,
        user: String,
        #[serde(default)]
        password: Secret,
        name: String,
    },
}

fn default_threads() -> usize {
    1
}

fn default_safeexec() -> SafeexecConfig {
    SafeexecConfig::default()
}

/// Settings of the sandbox runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafeexecConfig {
    /// Directory for per-sandbox state (overlay dirs, report files).
    pub path: PathBuf,
    /// Cgroup v2 directory the runner may create children in.
    pub cgroup_path: PathBuf,
}

impl Default for SafeexecConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/solve-safeexec"),
            cgroup_path: PathBuf::from("/sys/fs/cgroup/solve"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokerConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Directory for per-task scratch dirs.
    pub temp_dir: PathBuf,
    #[serde(default = "default_safeexec")]
    pub safeexec: SafeexecConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that holds file blobs addressed by `File.path`.
    pub files_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub db: DatabaseConfig,
    pub invoker: Option<InvokerConfig>,
    pub storage: StorageConfig,
}

pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open config file {}", path.display()))?;
    let config = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    Ok(config)
}

/// Finds and loads the configuration file.
pub fn load() -> anyhow::Result<Config> {
    if let Some(path) = std::env::var_os("SOLVE_CONFIG_FILE") {
        return load_from_file(PathBuf::from(path));
    }
    let path = Path::new("config.json");
    if path.exists() {
        return load_from_file(path);
    }
    let path = Path::new(ETC_DIR).join("config.json");
    if path.exists() {
        return load_from_file(path);
    }
    anyhow::bail!("unable to find config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let data = r#"{
            "db": {"driver": "sqlite", "path": "/tmp/db.sqlite"},
            "invoker": {
                "threads": 4,
                "temp_dir": "/tmp/solve-invoker"
            },
            "storage": {
                "files_dir": "/var/lib/solve/files"
            }
        }"#;
        let config: Config = serde_json::from_str(data).unwrap();
        match config.db {
            DatabaseConfig::SQLite { ref path } => {
                assert_eq!(path, Path::new("/tmp/db.sqlite"));
            }
            _ => panic!("expected sqlite config"),
        }
        let invoker = config.invoker.unwrap();
        assert_eq!(invoker.threads, 4);
        assert_eq!(
            invoker.safeexec.cgroup_path,
            Path::new("/sys/fs/cgroup/solve")
        );
    }

    #[test]
    fn test_secret() {
        std::env::set_var("SOLVE_TEST_SECRET", "qwerty123");
        let secret = Secret::Env {
            name: "SOLVE_TEST_SECRET".into(),
        };
        assert_eq!(secret.resolve().unwrap(), "qwerty123");
        let secret = Secret::Data {
            data: "plain".into(),
        };
        assert_eq!(secret.resolve().unwrap(), "plain");
    }

    #[test]
    fn test_config_file_lookup() {
        let dir = std::env::temp_dir().join("solve-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{
                "db": {"driver": "sqlite", "path": ":memory:"},
                "invoker": null,
                "storage": {
                    "files_dir": "/tmp/files"
                }
            }"#,
        )
        .unwrap();
        std::env::set_var("SOLVE_CONFIG_FILE", &path);
        let config = load().unwrap();
        std::env::remove_var("SOLVE_CONFIG_FILE");
        assert!(config.invoker.is_none());
    }
}
