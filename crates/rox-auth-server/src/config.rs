use std::collections::HashMap;
use std::net::SocketAddr;

use rox_auth::authproviders::AuthProviderConfig;
use rox_auth::config::AuthConfig;
use rox_auth::m2m::M2mConfig;
use rox_auth::roles::{ProviderRoleRules, ResolvedRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Roles known to the role store at startup.
    #[serde(default)]
    pub roles: Vec<ResolvedRole>,
    /// Providers loaded into the provider store before the registry starts.
    #[serde(default)]
    pub providers: Vec<AuthProviderConfig>,
    /// Role rules keyed by provider ID.
    #[serde(default)]
    pub role_rules: HashMap<String, ProviderRoleRules>,
    /// Machine-to-machine exchange configurations.
    #[serde(default)]
    pub m2m: Vec<M2mConfig>,
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        let ip = self
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(format!(
                "server.host must be an IP address, got '{}'",
                self.server.host
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Auth validation
        self.auth.validate().map_err(|e| format!("auth: {e}"))?;
        // Bootstrap validations
        for provider in &self.providers {
            if provider.id.is_empty() || provider.provider_type.is_empty() {
                return Err("providers entries need an id and a type".into());
            }
        }
        for id in self.role_rules.keys() {
            if !self.providers.iter().any(|p| &p.id == id) {
                return Err(format!("role_rules.{id} refers to an unknown provider"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("roxauth.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., ROXAUTH__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("ROXAUTH")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
