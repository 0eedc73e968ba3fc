//! Switch configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! none at all) works. Command-line flags override what the file says.
//!
//! ```json
//! {
//!   "listen": "0.0.0.0:6380",
//!   "admin_code": "change-me",
//!   "access_code": "",
//!   "mode": "switch",
//!   "length_includes_self": false,
//!   "register_timeout_secs": 10,
//!   "heartbeat_timeout_secs": 60
//! }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchError};
use crate::protocol::{LengthConvention, MAX_PAYLOAD_SIZE};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:6380";

/// Serving mode reported by `INFO` and changed by `SETUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Switch,
    Proxy,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Proxy => "proxy",
        }
    }
}

impl FromStr for Mode {
    type Err = SwitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "switch" => Ok(Self::Switch),
            "proxy" => Ok(Self::Proxy),
            other => Err(SwitchError::Config(format!("unknown mode: {other}"))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the switch reads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Socket address to listen on.
    pub listen: String,

    /// Secret for the admin role.
    pub admin_code: String,

    /// Secret for every other role.
    pub access_code: String,

    pub mode: Mode,

    /// Whether the wire length field counts its own width.
    /// Fixed for the process lifetime; every peer must agree.
    pub length_includes_self: bool,

    /// Seconds a new connection has to send a successful `REG`.
    pub register_timeout_secs: u64,

    /// Seconds a registered connection may stay silent.
    pub heartbeat_timeout_secs: u64,

    /// Largest inbound payload accepted, in bytes.
    pub max_payload_size: usize,

    /// Per-connection writer queue limit.
    pub max_pending_frames: usize,

    pub channel_capacity: usize,

    /// How long the RESULT to a requester may wait on a full queue.
    pub backpressure_timeout_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            admin_code: String::new(),
            access_code: String::new(),
            mode: Mode::Switch,
            length_includes_self: false,
            register_timeout_secs: 10,
            heartbeat_timeout_secs: 60,
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SwitchConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the switch cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 || self.max_payload_size > MAX_PAYLOAD_SIZE {
            return Err(SwitchError::Config(format!(
                "max_payload_size must be in 1..={MAX_PAYLOAD_SIZE}"
            )));
        }
        if self.channel_capacity == 0 || self.max_pending_frames == 0 {
            return Err(SwitchError::Config(
                "writer queue sizes must be nonzero".to_string(),
            ));
        }
        if self.register_timeout_secs == 0 || self.heartbeat_timeout_secs == 0 {
            return Err(SwitchError::Config("timeouts must be nonzero".to_string()));
        }
        Ok(())
    }

    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn admin_code(mut self, code: impl Into<String>) -> Self {
        self.admin_code = code.into();
        self
    }

    pub fn access_code(mut self, code: impl Into<String>) -> Self {
        self.access_code = code.into();
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn length_includes_self(mut self, including_self: bool) -> Self {
        self.length_includes_self = including_self;
        self
    }

    pub fn register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Wire length convention for this switch.
    pub fn convention(&self) -> LengthConvention {
        LengthConvention::from_including_self(self.length_includes_self)
    }

    pub fn register_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn heartbeat_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Writer settings for every connection.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }
}
