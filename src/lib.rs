//! # msgswitch
//!
//! A TCP message switch: endpoints connect, register an id and a role, and
//! exchange opaque data frames that the switch fans out by id, by
//! subscription or by service type.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`]): `[command u8][flags u8][length BE]` header and
//!   payload, with an optional self-inclusive length convention
//! - **Commands** ([`handler`]): command table with access levels; every
//!   request gets one RESULT (or a heartbeat response)
//! - **State** ([`SwitchContext`]): endpoint registry, settings and counters
//!   shared by all connection tasks
//! - **Transport** ([`SwitchServer`]): one read task and one writer task per
//!   TCP connection
//!
//! ## Example
//!
//! ```ignore
//! use msgswitch::{SwitchConfig, SwitchContext, SwitchServer};
//!
//! #[tokio::main]
//! async fn main() -> msgswitch::Result<()> {
//!     let config = SwitchConfig::default().admin_code("secret");
//!     let switch = SwitchContext::new(&config, None);
//!     SwitchServer::bind(&config, switch).await?.run().await
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod switch;
pub mod writer;

pub use client::{SwitchClient, SwitchClientBuilder};
pub use config::{Mode, SwitchConfig};
pub use error::{Result, SwitchError};
pub use server::SwitchServer;
pub use switch::{Settings, SwitchContext};
