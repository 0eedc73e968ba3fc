//! Command registry: command value to access level, payload schema and
//! handler.
//!
//! Built once at startup and read-only afterwards. Typed handlers get their
//! payload decoded with the codec named by the request frame; raw handlers
//! see the payload bytes untouched.
//!
//! # Example
//!
//! ```ignore
//! use msgswitch::codec::CommandForward;
//! use msgswitch::handler::{Access, CommandRegistry, Reply};
//! use msgswitch::protocol::Command;
//!
//! let mut registry = CommandRegistry::new();
//!
//! registry.register(Command::Fwd, Access::Registered, |ctx, cmd: CommandForward| {
//!     // ...
//!     Ok(Reply::empty())
//! });
//! registry.register_raw(Command::Echo, Access::Any, |_ctx, payload| {
//!     Ok(Reply::Data(payload.clone()))
//! });
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use bytes::Bytes;

use super::context::{CommandContext, CommandError, Reply};
use crate::codec::{CommandPayload, PayloadCodec};
use crate::protocol::Command;

/// Result type for handler functions.
pub type HandlerResult = Result<Reply, CommandError>;

/// Who may run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone, registered or not.
    Any,
    /// Any registered endpoint.
    Registered,
    /// Registered endpoints with the admin role.
    Admin,
}

/// Static description of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Command,
    pub access: Access,
    /// Payload schema name; `None` for raw payloads.
    pub schema: Option<&'static str>,
}

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with raw payload bytes.
    fn call(&self, ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult;
}

/// Wrapper that decodes the payload before calling the handler.
pub struct TypedHandler<F, T>
where
    F: Fn(&CommandContext<'_>, T) -> HandlerResult + Send + Sync + 'static,
    T: CommandPayload,
{
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(&CommandContext<'_>, T) -> HandlerResult + Send + Sync + 'static,
    T: CommandPayload,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(&CommandContext<'_>, T) -> HandlerResult + Send + Sync + 'static,
    T: CommandPayload + 'static,
{
    fn call(&self, ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult {
        let parsed: T = PayloadCodec::decode(ctx.codec(), payload)?;
        (self.handler)(ctx, parsed)
    }
}

/// Handler over the raw payload.
pub struct RawHandler<F>(F);

impl<F> Handler for RawHandler<F>
where
    F: Fn(&CommandContext<'_>, &Bytes) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult {
        (self.0)(ctx, payload)
    }
}

/// Entry for a registered command.
struct CommandEntry {
    spec: CommandSpec,
    handler: Box<dyn Handler>,
}

/// Registry mapping command values to handlers.
pub struct CommandRegistry {
    commands: HashMap<u8, CommandEntry>,
}

/// Last path segment of a type name.
fn schema_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

impl CommandRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a handler whose payload decodes into `T`.
    pub fn register<F, T>(&mut self, command: Command, access: Access, handler: F)
    where
        F: Fn(&CommandContext<'_>, T) -> HandlerResult + Send + Sync + 'static,
        T: CommandPayload + 'static,
    {
        self.insert(
            CommandSpec {
                command,
                access,
                schema: Some(schema_name::<T>()),
            },
            Box::new(TypedHandler::new(handler)),
        );
    }

    /// Register a handler that reads the payload itself.
    pub fn register_raw<F>(&mut self, command: Command, access: Access, handler: F)
    where
        F: Fn(&CommandContext<'_>, &Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(
            CommandSpec {
                command,
                access,
                schema: None,
            },
            Box::new(RawHandler(handler)),
        );
    }

    fn insert(&mut self, spec: CommandSpec, handler: Box<dyn Handler>) {
        self.commands
            .insert(spec.command.as_u8(), CommandEntry { spec, handler });
    }

    /// Spec of a command value, `None` if unsupported.
    pub fn lookup(&self, command: u8) -> Option<&CommandSpec> {
        self.commands.get(&command).map(|e| &e.spec)
    }

    /// Get a handler by command value.
    pub fn get_handler(&self, command: u8) -> Option<&dyn Handler> {
        self.commands.get(&command).map(|e| e.handler.as_ref())
    }

    /// Every registered spec, in command order.
    pub fn specs(&self) -> Vec<CommandSpec> {
        let mut specs: Vec<_> = self.commands.values().map(|e| e.spec).collect();
        specs.sort_by_key(|spec| spec.command);
        specs
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
