//! User-facing connection settings and the resolvers the manager reads them through.
//!
//! The manager never caches settings: it asks its [`SettingsSource`] for the
//! target on every attempt and for the reconnect flag and delay every time a
//! connection closes. Editing a [`SettingsStore`] between attempts therefore
//! takes effect on the next attempt.
//!
//! Field names follow the persisted format (`serverUrl`, `autoReconnect`,
//! `reconnectDelay`), so settings saved by other front ends load unchanged.
//!
//! ```
//! use std::time::Duration;
//! use tether_client::settings::Settings;
//!
//! let settings = Settings::from_json(r#"{"serverUrl":"wss://host/ws","reconnectDelay":50}"#)?;
//! assert_eq!(settings.server_url, "wss://host/ws");
//! assert!(settings.auto_reconnect);
//! assert_eq!(settings.reconnect_delay(), Duration::from_millis(250));
//! # Ok::<(), tether_client::LinkError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default base reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1500;

/// Smallest accepted base reconnect delay in milliseconds.
pub const MIN_RECONNECT_DELAY_MS: u64 = 250;

/// Largest accepted base reconnect delay in milliseconds.
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Persisted connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Connection target. Empty means "not configured".
    pub server_url: String,
    /// Whether unintended closes trigger an automatic reconnect.
    pub auto_reconnect: bool,
    /// Base reconnect delay in milliseconds, as stored. Read it through
    /// [`reconnect_delay`](Settings::reconnect_delay) to get the clamped value.
    #[serde(rename = "reconnectDelay")]
    pub reconnect_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            auto_reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl Settings {
    /// Settings pointing at `server_url` with default reconnect behaviour.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Parse settings from their persisted JSON form. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`](crate::LinkError::Serialization)
    /// for malformed JSON or mistyped values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to the persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Serialization`](crate::LinkError::Serialization)
    /// if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Enable or disable automatic reconnects.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the base reconnect delay, clamped to the accepted range.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.reconnect_delay_ms = clamp_delay_ms(millis);
        self
    }

    /// The base reconnect delay, clamped to
    /// [`MIN_RECONNECT_DELAY_MS`]..=[`MAX_RECONNECT_DELAY_MS`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(clamp_delay_ms(self.reconnect_delay_ms))
    }
}

fn clamp_delay_ms(millis: u64) -> u64 {
    millis.clamp(MIN_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS)
}

/// The resolvers the manager consults on every connection attempt.
///
/// The manager never holds its internal lock while calling these, so a
/// source may query the manager it configures.
pub trait SettingsSource: Send + Sync + 'static {
    /// The connection target. An empty string means none is configured.
    fn server_url(&self) -> String;

    /// Whether unintended closes should be retried.
    fn auto_reconnect(&self) -> bool {
        true
    }

    /// Base delay before an automatic reconnect.
    fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)
    }
}

impl SettingsSource for Settings {
    fn server_url(&self) -> String {
        self.server_url.clone()
    }

    fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    fn reconnect_delay(&self) -> Duration {
        Settings::reconnect_delay(self)
    }
}

impl<T: SettingsSource + ?Sized> SettingsSource for Arc<T> {
    fn server_url(&self) -> String {
        (**self).server_url()
    }

    fn auto_reconnect(&self) -> bool {
        (**self).auto_reconnect()
    }

    fn reconnect_delay(&self) -> Duration {
        (**self).reconnect_delay()
    }
}

/// Live, shareable settings that can be edited while a manager is running.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Wrap initial settings in a store.
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// A copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Replace all settings.
    pub fn replace(&self, settings: Settings) {
        *self.inner.write() = settings;
    }

    /// Edit settings in place.
    pub fn update(&self, edit: impl FnOnce(&mut Settings)) {
        edit(&mut *self.inner.write());
    }

    /// Change the connection target.
    pub fn set_server_url(&self, server_url: impl Into<String>) {
        self.inner.write().server_url = server_url.into();
    }
}

impl SettingsSource for SettingsStore {
    fn server_url(&self) -> String {
        self.inner.read().server_url.clone()
    }

    fn auto_reconnect(&self) -> bool {
        self.inner.read().auto_reconnect
    }

    fn reconnect_delay(&self) -> Duration {
        self.inner.read().reconnect_delay()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.server_url.is_empty());
        assert!(settings.auto_reconnect);
        assert_eq!(settings.reconnect_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn delay_is_clamped_on_read() {
        let mut settings = Settings::new("ws://host");
        settings.reconnect_delay_ms = 10;
        assert_eq!(settings.reconnect_delay(), Duration::from_millis(250));
        settings.reconnect_delay_ms = 120_000;
        assert_eq!(settings.reconnect_delay(), Duration::from_millis(60_000));
    }

    #[test]
    fn delay_is_clamped_on_write() {
        let settings = Settings::new("ws://host").with_reconnect_delay(Duration::from_secs(600));
        assert_eq!(settings.reconnect_delay_ms, MAX_RECONNECT_DELAY_MS);
    }

    #[test]
    fn json_uses_persisted_key_names() {
        let json = Settings::new("wss://host/ws")
            .with_auto_reconnect(false)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["serverUrl"], "wss://host/ws");
        assert_eq!(value["autoReconnect"], false);
        assert_eq!(value["reconnectDelay"], 1500);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Settings::from_json(r#"{"autoReconnect":"yes"}"#).is_err());
    }

    #[test]
    fn store_edits_are_visible_through_source() {
        let store = Arc::new(SettingsStore::new(Settings::new("ws://a")));
        let source: Arc<dyn SettingsSource> = store.clone();
        assert_eq!(source.server_url(), "ws://a");

        store.set_server_url("ws://b");
        store.update(|s| s.auto_reconnect = false);
        assert_eq!(source.server_url(), "ws://b");
        assert!(!source.auto_reconnect());
        assert_eq!(store.snapshot().server_url, "ws://b");
    }
}
