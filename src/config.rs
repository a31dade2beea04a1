use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

fn default_refresh_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub login_url: String,
    /// Account-specific prefix of the data resource; token, page id and watch pair are appended.
    #[serde(default = "default_data_url_base")]
    pub data_url_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Name of the cookie carrying the session token; the first portal cookie when unset.
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default)]
    pub login_form: FormLocator,
}

fn default_data_url_base() -> String {
    "https://solaros.datareadings.com/comet_request/15725446441".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// How the credential inputs are found on the login page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FormLocator {
    /// The `form_index`-th form; its first two inputs are username and password.
    Positional {
        #[serde(default = "default_form_index")]
        form_index: usize,
    },
    /// The first form containing a password input.
    PasswordField,
}

fn default_form_index() -> usize {
    1
}

impl Default for FormLocator {
    fn default() -> Self {
        FormLocator::Positional {
            form_index: default_form_index(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    pub port: u16,
    pub path: String,
    #[serde(default)]
    pub open_browser: bool,
}

fn default_server_host() -> String {
    "0.0.0.0".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_initial_secs")]
    pub reconnect_initial_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    #[serde(default)]
    pub qos: u8,
    /// Home Assistant discovery prefix, e.g. "homeassistant". Empty or absent disables discovery.
    #[serde(default)]
    pub discovery_prefix: Option<String>,
    /// Installation address; slugged into the sensors' unique ids.
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_publish_pause_ms")]
    pub publish_pause_ms: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "solaros-bridge".into()
}
fn default_keep_alive_secs() -> u64 {
    10
}
fn default_reconnect_initial_secs() -> u64 {
    1
}
fn default_reconnect_max_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_state_topic() -> String {
    "power/powerStats".into()
}
fn default_publish_pause_ms() -> u64 {
    1000
}

impl MqttConfig {
    pub fn discovery_prefix(&self) -> Option<&str> {
        self.discovery_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards SOLAROS_USERNAME / SOLAROS_PASSWORD override the portal credentials.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(username) = std::env::var("SOLAROS_USERNAME") {
            cfg.portal.username = username;
        }
        if let Ok(password) = std::env::var("SOLAROS_PASSWORD") {
            cfg.portal.password = password;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.portal.username.is_empty() || self.portal.password.is_empty() {
            return Err(AppError::Config(
                "portal username or password is missing".to_string(),
            ));
        }

        if self.refresh_secs == 0 {
            return Err(AppError::Config("refresh_secs cannot be 0".to_string()));
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                return Err(AppError::Config("Server port cannot be 0".to_string()));
            }
            if !server.path.starts_with('/') || server.path == "/health" {
                return Err(AppError::Config(format!(
                    "server path must start with '/' and not be /health, got {:?}",
                    server.path
                )));
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.is_empty() {
                return Err(AppError::Config("MQTT host cannot be empty".to_string()));
            }
            if mqtt.reconnect_max_secs < mqtt.reconnect_initial_secs {
                return Err(AppError::Config(
                    "reconnect_max_secs must not be below reconnect_initial_secs".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{close}'"))
        })?;
        let val = std::env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {var}")))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, returning the collected string.
/// Consumes the closing delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
