//! Handler module - command table and per-frame dispatch.
//!
//! Provides:
//! - [`CommandRegistry`] - maps command values to access levels and handlers
//! - [`CommandContext`] - what a handler can see and act on
//! - [`dispatch`] - runs one inbound frame and sends its answer
//!
//! # Example
//!
//! ```ignore
//! use msgswitch::handler::{dispatch, CommandRegistry};
//!
//! let registry = CommandRegistry::standard();
//! assert!(registry.lookup(1).is_some()); // ECHO
//!
//! // In a connection task:
//! dispatch(&switch, &connection, frame).await?;
//! ```

mod commands;
mod context;
mod dispatcher;
mod registry;

pub use context::{CommandContext, CommandError, Reply};
pub use dispatcher::{authorize, dispatch};
pub use registry::{
    Access, CommandRegistry, CommandSpec, Handler, HandlerResult, RawHandler, TypedHandler,
};
