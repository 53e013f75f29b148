//! Operator-editable settings record
//!
//! A single JSON object on disk, mirrored in memory. Saves replace the
//! whole record: the file is written atomically first and the in-memory
//! copy is swapped only after the write succeeded.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

const DEFAULT_WELCOME_MESSAGE: &str = "Thank you for your message. We will get back to you soon.";
const DEFAULT_UNAVAILABLE_MESSAGE: &str = "Sorry, the service is currently unavailable.";

/// The settings record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(rename = "n8nWebhookUrl", alias = "webhookUrl", default)]
    pub webhook_url: String,

    #[serde(default)]
    pub verify_token: String,

    #[serde(rename = "whatsappApiToken", alias = "apiToken", default)]
    pub api_token: String,

    #[serde(rename = "whatsappPhoneNumberId", alias = "phoneNumberId", default)]
    pub phone_number_id: String,

    #[serde(default = "default_true")]
    pub service_enabled: bool,

    #[serde(default = "default_true")]
    pub blacklist_enabled: bool,

    #[serde(default)]
    pub blacklist: BTreeSet<String>,

    #[serde(default)]
    pub welcome_message: String,

    #[serde(default)]
    pub unavailable_message: String,

    #[serde(default)]
    pub blacklist_message: String,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Defaults derived from the process environment
    pub fn from_env() -> Self {
        Self::defaults_from(|key| std::env::var(key).ok())
    }

    /// Defaults derived from an arbitrary key lookup
    pub fn defaults_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();
        let get_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let flag = |key: &str| lookup(key).map(|v| v != "false").unwrap_or(true);

        Self {
            webhook_url: get("N8N_WEBHOOK_URL"),
            verify_token: get("VERIFY_TOKEN"),
            api_token: get("WHATSAPP_API_TOKEN"),
            phone_number_id: get("WHATSAPP_PHONE_NUMBER_ID"),
            service_enabled: flag("SERVICE_ENABLED"),
            blacklist_enabled: flag("BLACKLIST_ENABLED"),
            blacklist: get("BLACKLIST")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            welcome_message: get_or("WELCOME_MESSAGE", DEFAULT_WELCOME_MESSAGE),
            unavailable_message: get_or("UNAVAILABLE_MESSAGE", DEFAULT_UNAVAILABLE_MESSAGE),
            blacklist_message: get("BLACKLIST_MESSAGE"),
        }
    }

    /// Configured webhook URL, if any
    pub fn webhook_url(&self) -> Option<&str> {
        let url = self.webhook_url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// Configured blacklist reply, if any
    pub fn blacklist_reply(&self) -> Option<&str> {
        (!self.blacklist_message.is_empty()).then_some(self.blacklist_message.as_str())
    }
}

/// Settings store: durable record plus in-memory mirror
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Open the store at `path`, falling back to environment defaults
    /// when the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_defaults(path, Settings::from_env)
    }

    /// Open the store with a custom defaults factory
    pub fn open_with_defaults<F>(path: impl Into<PathBuf>, defaults: F) -> Self
    where
        F: FnOnce() -> Settings,
    {
        let path = path.into();
        let settings = match Self::load(&path) {
            Ok(Some(settings)) => {
                info!("Loaded settings from {}", path.display());
                settings
            }
            Ok(None) => {
                info!("Settings file {} does not exist, using defaults", path.display());
                defaults()
            }
            Err(e) => {
                error!("Error loading settings from {}: {}", path.display(), e);
                defaults()
            }
        };

        Self {
            path,
            settings: RwLock::new(settings),
        }
    }

    fn load(path: &Path) -> Result<Option<Settings>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Path of the persisted record
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the whole record
    ///
    /// The file is replaced atomically; the in-memory copy is only updated
    /// once the write succeeded.
    pub fn save(&self, settings: Settings) -> Result<()> {
        debug!(
            "Saving settings to {} (webhook configured: {})",
            self.path.display(),
            settings.webhook_url().is_some()
        );

        self.persist(&settings)?;

        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }

        info!("Settings saved");
        Ok(())
    }

    fn persist(&self, settings: &Settings) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(settings)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Settings(format!("Failed to replace settings file: {}", e)))?;

        Ok(())
    }

    /// Flip the blacklist flag, persist, and return the new state
    pub fn toggle_blacklist(&self) -> Result<bool> {
        let mut settings = self.get();
        settings.blacklist_enabled = !settings.blacklist_enabled;
        let enabled = settings.blacklist_enabled;
        self.save(settings)?;
        Ok(enabled)
    }

    pub fn is_service_enabled(&self) -> bool {
        self.get().service_enabled
    }

    pub fn is_blacklist_enabled(&self) -> bool {
        self.get().blacklist_enabled
    }

    /// True when the blacklist is enabled and `sender` is on it
    pub fn is_blacklisted(&self, sender: &str) -> bool {
        let settings = self.get();
        if !settings.blacklist_enabled {
            return false;
        }
        settings.blacklist.contains(sender)
    }

    /// Webhook URL read at call time
    pub fn webhook_url(&self) -> Option<String> {
        let settings = self.get();
        let url = settings.webhook_url().map(str::to_string);
        if url.is_none() {
            warn!("No n8n webhook URL configured");
        }
        url
    }
}
