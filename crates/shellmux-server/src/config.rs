//! Server configuration: TOML file + CLI overrides.

use crate::session::RegistrySettings;
use serde::Deserialize;
use shellmux_core::MuxResult;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub terminal: TerminalSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            idle_timeout: default_idle_timeout(),
            reap_interval: default_reap_interval(),
        }
    }
}

/// `[terminal]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_per_session")]
    pub max_per_session: usize,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            working_directory: default_working_directory(),
            buffer_size: default_buffer_size(),
            max_per_session: default_max_per_session(),
            env: HashMap::new(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    3000
}
fn default_max_sessions() -> usize {
    100
}
fn default_idle_timeout() -> u64 {
    3600
}
fn default_reap_interval() -> u64 {
    60
}
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}
fn default_working_directory() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/home".to_string())
}
fn default_buffer_size() -> usize {
    256 * 1024
}
fn default_max_per_session() -> usize {
    16
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub idle_timeout: Option<u64>,
    pub reap_interval: Option<u64>,
    pub buffer_size: Option<usize>,
    pub max_sessions: Option<usize>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub shell: String,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
    pub buffer_size: usize,
    pub max_sessions: usize,
    pub max_terminals_per_session: usize,
    pub idle_timeout: u64,
    pub reap_interval: u64,
}

impl ServerConfig {
    /// Load config from a TOML file (missing file = defaults), then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> MuxResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Ok(Self::merge(file_config, cli))
    }

    fn parse(content: &str) -> MuxResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| shellmux_core::MuxError::Other(format!("config parse error: {e}")))
    }

    fn merge(file: ConfigFile, cli: CliOverrides) -> Self {
        let working_directory = cli
            .working_directory
            .unwrap_or(file.terminal.working_directory);

        Self {
            bind: cli.bind.unwrap_or(file.server.bind),
            port: cli.port.unwrap_or(file.server.port),
            shell: cli.shell.unwrap_or(file.terminal.shell),
            working_directory: expand_tilde_str(&working_directory),
            env: file.terminal.env,
            buffer_size: cli.buffer_size.unwrap_or(file.terminal.buffer_size),
            max_sessions: cli.max_sessions.unwrap_or(file.server.max_sessions),
            max_terminals_per_session: file.terminal.max_per_session,
            idle_timeout: cli.idle_timeout.unwrap_or(file.server.idle_timeout),
            reap_interval: cli.reap_interval.unwrap_or(file.server.reap_interval),
        }
    }

    /// Settings handed to the session registry.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            shell: self.shell.clone(),
            working_directory: self.working_directory.clone(),
            env: self.env.clone(),
            buffer_size: self.buffer_size,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            max_sessions: self.max_sessions,
            max_terminals_per_session: self.max_terminals_per_session,
        }
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let file = ServerConfig::parse("").unwrap();
        let config = ServerConfig::merge(file, CliOverrides::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.idle_timeout, 3600);
        assert_eq!(config.reap_interval, 60);
        assert_eq!(config.buffer_size, 256 * 1024);
        assert_eq!(config.max_terminals_per_session, 16);
        assert!(config.bind.is_unspecified());
    }

    #[test]
    fn file_values_are_read() {
        let file = ServerConfig::parse(
            r#"
            [server]
            port = 4000
            idle_timeout = 30

            [terminal]
            shell = "/bin/zsh"
            working_directory = "/srv"
            buffer_size = 1024
            env = { EDITOR = "vi" }
            "#,
        )
        .unwrap();
        let config = ServerConfig::merge(file, CliOverrides::default());
        assert_eq!(config.port, 4000);
        assert_eq!(config.idle_timeout, 30);
        assert_eq!(config.shell, "/bin/zsh");
        assert_eq!(config.working_directory, PathBuf::from("/srv"));
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.env.get("EDITOR").map(String::as_str), Some("vi"));
    }

    #[test]
    fn cli_overrides_win() {
        let file = ServerConfig::parse("[server]\nport = 4000\n").unwrap();
        let config = ServerConfig::merge(
            file,
            CliOverrides {
                port: Some(5000),
                shell: Some("/bin/fish".into()),
                idle_timeout: Some(5),
                ..CliOverrides::default()
            },
        );
        assert_eq!(config.port, 5000);
        assert_eq!(config.shell, "/bin/fish");
        assert_eq!(config.registry_settings().idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(ServerConfig::parse("[server]\nport = \"nope\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load(
            Some(Path::new("/definitely/not/here/config.toml")),
            CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.port, 3000);
    }
}
