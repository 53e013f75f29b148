//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. wa-bridge.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。
//!
//! This is process wiring only. The operator-editable record (webhook URL,
//! blacklist, system messages) lives in [`crate::settings`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Default config file looked up by [`Config::load`]
pub const CONFIG_FILE: &str = "wa-bridge.toml";

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Path of the persisted settings record
    #[serde(default = "default_settings_path")]
    pub settings_path: String,

    /// WhatsApp Web session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// WhatsApp Web sidecar configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// WhatsApp Cloud API configuration
    #[serde(default)]
    pub cloud: CloudConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            settings_path: default_settings_path(),
            session: SessionConfig::default(),
            bridge: BridgeConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory with the QR / settings pages
    pub static_dir: Option<String>,

    /// Allowed CORS origins. `None` allows any origin.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: Some(default_static_dir()),
            allowed_origins: None,
        }
    }
}

impl ServerConfig {
    /// Get the socket address
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory holding the provider session data and the auth flag
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// QR codes shown before the grace timer starts
    #[serde(default = "default_max_qr_attempts")]
    pub max_qr_attempts: u32,

    /// Seconds to wait for a scan once the attempt limit is reached
    #[serde(default = "default_auth_grace_secs")]
    pub auth_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_qr_attempts: default_max_qr_attempts(),
            auth_grace_secs: default_auth_grace_secs(),
        }
    }
}

impl SessionConfig {
    pub fn auth_grace(&self) -> Duration {
        Duration::from_secs(self.auth_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the WhatsApp Web sidecar
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Shared key for sidecar calls and pushed events
    pub api_key: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Graph API base URL
    #[serde(default = "default_cloud_api_url")]
    pub api_url: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: default_cloud_api_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_settings_path() -> String {
    "settings.json".to_string()
}

fn default_data_dir() -> String {
    ".wwebjs_auth".to_string()
}

fn default_max_qr_attempts() -> u32 {
    3
}

fn default_auth_grace_secs() -> u64 {
    30
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:3010".to_string()
}

fn default_cloud_api_url() -> String {
    "https://graph.facebook.com/v17.0".to_string()
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&Self::expand_env_vars(&toml_content))?;

        // 既存の環境変数で上書き（環境変数が優先）
        cfg.apply_overrides(|key| std::env::var(key).ok());

        Ok(cfg)
    }

    fn from_toml_str(content: &str) -> crate::Result<Self> {
        let toml: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        let server = toml.server.unwrap_or_default();
        let session = toml.session.unwrap_or_default();
        let bridge = toml.bridge.unwrap_or_default();
        let cloud = toml.cloud.unwrap_or_default();

        Ok(Config {
            server: ServerConfig {
                host: server.host.unwrap_or_else(default_host),
                port: server.port.unwrap_or_else(default_port),
                static_dir: server.static_dir.or_else(|| Some(default_static_dir())),
                allowed_origins: server.allowed_origins,
            },
            settings_path: toml
                .settings
                .and_then(|s| s.path)
                .unwrap_or_else(default_settings_path),
            session: SessionConfig {
                data_dir: session.data_dir.unwrap_or_else(default_data_dir),
                max_qr_attempts: session.max_qr_attempts.unwrap_or_else(default_max_qr_attempts),
                auth_grace_secs: session.auth_grace_secs.unwrap_or_else(default_auth_grace_secs),
            },
            bridge: BridgeConfig {
                url: bridge.url.unwrap_or_else(default_bridge_url),
                api_key: bridge.api_key.filter(|k| !k.is_empty()),
            },
            cloud: CloudConfig {
                api_url: cloud.api_url.unwrap_or_else(default_cloud_api_url),
            },
        })
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./wa-bridge.toml` があればそれを使い、なければ環境変数のみ。
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// 環境変数で設定を上書きする
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = non_empty("HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = non_empty("STATIC_DIR") {
            self.server.static_dir = Some(dir);
        }
        if let Some(origins) = non_empty("CORS_ALLOWED_ORIGINS") {
            self.server.allowed_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }

        if let Some(path) = non_empty("SETTINGS_PATH") {
            self.settings_path = path;
        }

        if let Some(dir) = non_empty("SESSION_DATA_DIR") {
            self.session.data_dir = dir;
        }
        if let Some(n) = non_empty("MAX_QR_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.session.max_qr_attempts = n;
        }
        if let Some(secs) = non_empty("AUTH_GRACE_SECS").and_then(|v| v.parse().ok()) {
            self.session.auth_grace_secs = secs;
        }

        if let Some(url) = non_empty("BRIDGE_URL") {
            self.bridge.url = url;
        }
        if let Some(key) = non_empty("BRIDGE_API_KEY") {
            self.bridge.api_key = Some(key);
        }

        if let Some(url) = non_empty("CLOUD_API_URL") {
            self.cloud.api_url = url;
        }
    }
}

// ============================================================================
// TOML 構造体定義（ファイル解析用）
// ============================================================================

#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    settings: Option<TomlSettingsConfig>,
    session: Option<TomlSessionConfig>,
    bridge: Option<TomlBridgeConfig>,
    cloud: Option<TomlCloudConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    static_dir: Option<String>,
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSettingsConfig {
    /// settings.json のパス
    path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSessionConfig {
    data_dir: Option<String>,
    max_qr_attempts: Option<u32>,
    auth_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlBridgeConfig {
    url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlCloudConfig {
    api_url: Option<String>,
}
