//! Process-wide switch state.
//!
//! [`SwitchContext`] is built once in `main` and shared by `Arc` with every
//! connection task. It owns the endpoint registry, the runtime settings that
//! `SETUP` and `RELOAD` may change, and the read-only command table.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::config::{Mode, SwitchConfig};
use crate::connection::Connection;
use crate::endpoint::{EndpointRef, EndpointRegistry};
use crate::error::{Result, SwitchError};
use crate::handler::CommandRegistry;
use crate::protocol::LengthConvention;
use crate::routing::Router;

/// Settings that can change while the switch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub admin_code: String,
    pub access_code: String,
    pub mode: Mode,
}

impl From<&SwitchConfig> for Settings {
    fn from(config: &SwitchConfig) -> Self {
        Self {
            admin_code: config.admin_code.clone(),
            access_code: config.access_code.clone(),
            mode: config.mode,
        }
    }
}

/// Shared switch state.
pub struct SwitchContext {
    registry: Mutex<EndpointRegistry>,
    settings: RwLock<Settings>,
    commands: CommandRegistry,
    convention: LengthConvention,
    started_at: Instant,
    config_path: Option<PathBuf>,
}

impl SwitchContext {
    /// Build the context from a configuration and, optionally, the file it
    /// came from (needed for `RELOAD`).
    pub fn new(config: &SwitchConfig, config_path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(EndpointRegistry::new()),
            settings: RwLock::new(Settings::from(config)),
            commands: CommandRegistry::standard(),
            convention: config.convention(),
            started_at: Instant::now(),
            config_path,
        })
    }

    /// Lock the endpoint registry.
    ///
    /// The guard is not `Send`, so it cannot be held across an `.await`.
    pub fn registry(&self) -> MutexGuard<'_, EndpointRegistry> {
        self.registry.lock()
    }

    /// Router over this switch's endpoints.
    pub fn router(&self) -> Router<'_> {
        Router::new(&self.registry)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Change settings under the write lock.
    pub fn update_settings<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> R {
        f(&mut *self.settings.write())
    }

    #[inline]
    pub fn convention(&self) -> LengthConvention {
        self.convention
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Re-read the startup configuration file and apply its secrets and mode.
    pub fn reload(&self) -> Result<Settings> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| SwitchError::Config("no configuration file to reload".to_string()))?;
        let config = SwitchConfig::load(path)?;
        let settings = Settings::from(&config);
        *self.settings.write() = settings.clone();
        Ok(settings)
    }

    /// Transport hook: `connection` is gone. Removes its endpoint and makes
    /// sure the close signal fired. Safe to call more than once.
    pub fn on_close(&self, connection: &Connection) -> Option<EndpointRef> {
        connection.close();
        self.registry().connection_closed(connection.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CommandRegister;
    use crate::writer::{WriterConfig, WriterHandle};
    use std::io::Write;

    #[test]
    fn test_settings_from_config() {
        let config = SwitchConfig::default().admin_code("a").access_code("b").mode(Mode::Proxy);
        let switch = SwitchContext::new(&config, None);

        let settings = switch.settings();
        assert_eq!(settings.admin_code, "a");
        assert_eq!(settings.access_code, "b");
        assert_eq!(settings.mode, Mode::Proxy);

        switch.update_settings(|s| s.mode = Mode::Switch);
        assert_eq!(switch.settings().mode, Mode::Switch);
    }

    #[test]
    fn test_reload_without_file() {
        let switch = SwitchContext::new(&SwitchConfig::default(), None);
        assert!(matches!(switch.reload(), Err(SwitchError::Config(_))));
    }

    #[test]
    fn test_reload_applies_secrets_and_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"admin_code": "old"}}"#).unwrap();
        let config = SwitchConfig::load(file.path()).unwrap();
        let switch = SwitchContext::new(&config, Some(file.path().to_path_buf()));

        std::fs::write(
            file.path(),
            r#"{"admin_code": "new", "access_code": "x", "mode": "proxy"}"#,
        )
        .unwrap();
        let settings = switch.reload().unwrap();

        assert_eq!(settings.admin_code, "new");
        assert_eq!(switch.settings().access_code, "x");
        assert_eq!(switch.settings().mode, Mode::Proxy);
    }

    #[test]
    fn test_on_close_unregisters() {
        let switch = SwitchContext::new(&SwitchConfig::default(), None);
        let (writer, _rx) = WriterHandle::detached(&WriterConfig::default());
        let conn = Connection::new(1, "peer", writer);
        switch.registry().connection_opened(conn.id());

        let request = CommandRegister {
            role: "endpoint".to_string(),
            ..Default::default()
        };
        let settings = switch.settings();
        switch.registry().register(&conn, &request, &settings).unwrap();

        assert!(switch.on_close(&conn).is_some());
        assert!(conn.is_closed());
        assert!(switch.on_close(&conn).is_none());
        assert_eq!(switch.registry().counters().left, 1);
    }
}
