//! Receiver configuration
//!
//! A two-key YAML document (`broker`, `topic`) read once at startup. Both keys
//! are required; everything else in the file is ignored.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{mqtt, paths};

/// Immutable configuration (loaded once at startup)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Broker endpoint URI, e.g. `tcp://host:1883`
    pub broker: String,
    /// Topic to subscribe to
    pub topic: String,
}

/// Host and port extracted from the broker URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Read and validate the config file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), broker = %config.broker, topic = %config.topic, "Loaded config");
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.broker = config.broker.trim().to_string();
        config.topic = config.topic.trim().to_string();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.broker.is_empty() {
            bail!("`broker` must not be empty");
        }
        self.broker_address()?;
        validate_topic_filter(&self.topic)
    }

    /// Resolve the broker URI into a connectable address
    pub fn broker_address(&self) -> Result<BrokerAddress> {
        BrokerAddress::parse(&self.broker)
    }

    /// Locate the config file
    ///
    /// Priority: explicit path > next to the executable > user config dir.
    /// When nothing exists the executable-adjacent path is returned so the
    /// load error names the expected location.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let adjacent = executable_dir()?.join(paths::CONFIG_FILENAME);
        if adjacent.exists() {
            return Ok(adjacent);
        }

        if let Some(mut user_path) = dirs::config_dir() {
            user_path.push(paths::APP_DIR);
            user_path.push(paths::CONFIG_FILENAME);
            if user_path.exists() {
                debug!(path = %user_path.display(), "Using config from user config directory");
                return Ok(user_path);
            }
        }

        Ok(adjacent)
    }
}

impl BrokerAddress {
    /// Parse `tcp://host:port`, `mqtt://host:port`, `host:port` or `host`
    ///
    /// IPv6 hosts must be bracketed (`tcp://[::1]:1883`); brackets are stripped.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = match uri.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = scheme.to_ascii_lowercase();
                if mqtt::UNSUPPORTED_SCHEMES.contains(&scheme.as_str()) {
                    bail!("Broker scheme '{scheme}' is not supported (plain TCP only)");
                }
                if !mqtt::TCP_SCHEMES.contains(&scheme.as_str()) {
                    bail!("Unknown broker scheme '{scheme}'");
                }
                rest
            }
            None => uri,
        };

        // Anything after the authority (path, query) is irrelevant to MQTT
        let authority = rest.split(['/', '?']).next().unwrap_or_default();

        let (host, port) = match authority.strip_prefix('[') {
            // IPv6 literal: `[::1]` or `[::1]:1883`
            Some(bracketed) => {
                let (host, after) = bracketed
                    .split_once(']')
                    .ok_or_else(|| anyhow!("Unclosed '[' in broker URI '{uri}'"))?;
                let port = match after {
                    "" => mqtt::DEFAULT_PORT,
                    after => parse_port(
                        after
                            .strip_prefix(':')
                            .ok_or_else(|| anyhow!("Unexpected '{after}' after IPv6 host"))?,
                    )?,
                };
                (host, port)
            }
            None => match authority.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    bail!("IPv6 broker host must be bracketed, e.g. tcp://[::1]:1883");
                }
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, mqtt::DEFAULT_PORT),
            },
        };

        if host.is_empty() {
            bail!("Broker URI '{uri}' has no host");
        }
        if port == 0 {
            bail!("Broker port must be greater than zero");
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.parse()
        .map_err(|_| anyhow!("Invalid broker port '{raw}'"))
}

/// `#` may only be the final level, `+` must occupy a whole level
fn validate_topic_filter(topic: &str) -> Result<()> {
    if topic.is_empty() {
        bail!("`topic` must not be empty");
    }
    let levels: Vec<&str> = topic.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            bail!("Invalid topic '{topic}': '#' must be the last level on its own");
        }
        if level.contains('+') && *level != "+" {
            bail!("Invalid topic '{topic}': '+' must occupy a whole level");
        }
    }
    Ok(())
}

/// Directory holding the running executable
pub fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to resolve executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("Executable path {} has no parent", exe.display()))
}
