//! The switch's command table.
//!
//! Registration, routing setup and data commands are open to any
//! registered endpoint; introspection and control commands need the admin
//! role. `EXIT`, `UNDEFINED` and `RESULT` are deliberately absent and get
//! answered as unsupported.

use std::time::Instant;

use bytes::Bytes;

use super::context::{CommandContext, CommandError, Reply};
use super::registry::{Access, CommandRegistry, HandlerResult};
use crate::codec::{
    CommandEndpointInfoReq, CommandForward, CommandInfo, CommandInfoReq, CommandKickout,
    CommandKickoutResult, CommandRegister, CommandRegisterResult, CommandReject, CommandSetup,
    CommandSubscribe,
};
use crate::config::Mode;
use crate::endpoint::{secrets_match, EndpointId, Role};
use crate::error::ProtocolError;
use crate::protocol::{Command, Frame, PublishingMessage, ServiceMessage};
use crate::routing::Targets;

impl CommandRegistry {
    /// Registry with every command the switch serves.
    pub fn standard() -> Self {
        let mut registry = Self::new();

        registry.register_raw(Command::Echo, Access::Any, echo);
        registry.register(Command::Reg, Access::Any, register);
        registry.register_raw(Command::Heartbeat, Access::Any, heartbeat);

        registry.register(Command::Fwd, Access::Registered, forward);
        registry.register(Command::Unfwd, Access::Registered, unforward);
        registry.register(Command::Sub, Access::Registered, subscribe);
        registry.register(Command::Unsub, Access::Registered, unsubscribe);
        registry.register(Command::Reject, Access::Registered, reject);
        registry.register(Command::Unreject, Access::Registered, unreject);
        registry.register_raw(Command::Publish, Access::Registered, publish);
        registry.register_raw(Command::Publish2, Access::Registered, publish_typed);
        registry.register_raw(Command::Svc, Access::Registered, service);

        registry.register(Command::Info, Access::Admin, info);
        registry.register(Command::EpInfo, Access::Admin, endpoint_info);
        registry.register(Command::Setup, Access::Admin, setup);
        registry.register_raw(Command::Proxy, Access::Admin, proxy);
        registry.register(Command::Kickout, Access::Admin, kickout);
        registry.register_raw(Command::Reload, Access::Admin, reload);

        registry
    }
}

fn endpoint_ids(ids: &[u32]) -> Result<Vec<EndpointId>, CommandError> {
    ids.iter()
        .map(|&id| {
            EndpointId::try_from(id).map_err(|_| {
                CommandError::from(ProtocolError::MalformedPayload(format!(
                    "endpoint id {id} out of range"
                )))
            })
        })
        .collect()
}

fn msg_types(types: &[u32]) -> Result<Vec<u8>, CommandError> {
    types
        .iter()
        .map(|&t| {
            u8::try_from(t).map_err(|_| {
                CommandError::from(ProtocolError::MalformedPayload(format!(
                    "message type {t} out of range"
                )))
            })
        })
        .collect()
}

fn echo(_ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult {
    Ok(Reply::Data(payload.clone()))
}

fn heartbeat(_ctx: &CommandContext<'_>, _payload: &Bytes) -> HandlerResult {
    Ok(Reply::Heartbeat)
}

fn register(ctx: &CommandContext<'_>, cmd: CommandRegister) -> HandlerResult {
    let settings = ctx.switch().settings();
    let id = ctx
        .switch()
        .registry()
        .register(ctx.connection(), &cmd, &settings)?;

    tracing::info!(
        conn = ctx.connection().id(),
        peer = ctx.connection().peer(),
        endpoint = id,
        role = %cmd.role,
        "endpoint registered"
    );
    ctx.reply(&CommandRegisterResult { id: u32::from(id) })
}

fn forward(ctx: &CommandContext<'_>, cmd: CommandForward) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let targets = endpoint_ids(&cmd.targets)?;
    ctx.switch().registry().set_forward_targets(sender.id, targets);
    Ok(Reply::empty())
}

fn unforward(ctx: &CommandContext<'_>, cmd: CommandForward) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let targets = endpoint_ids(&cmd.targets)?;
    ctx.switch()
        .registry()
        .remove_forward_targets(sender.id, &targets);
    Ok(Reply::empty())
}

fn subscribe(ctx: &CommandContext<'_>, cmd: CommandSubscribe) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let types = msg_types(&cmd.msg_types)?;
    ctx.switch().registry().subscribe(sender.id, &types);
    Ok(Reply::empty())
}

fn unsubscribe(ctx: &CommandContext<'_>, cmd: CommandSubscribe) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let types = msg_types(&cmd.msg_types)?;
    ctx.switch().registry().unsubscribe(sender.id, &types);
    Ok(Reply::empty())
}

fn reject(ctx: &CommandContext<'_>, cmd: CommandReject) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let sources = endpoint_ids(&cmd.sources)?;
    ctx.switch().registry().reject(sender.id, &sources);
    Ok(Reply::empty())
}

fn unreject(ctx: &CommandContext<'_>, cmd: CommandReject) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let sources = endpoint_ids(&cmd.sources)?;
    ctx.switch().registry().unreject(sender.id, &sources);
    Ok(Reply::empty())
}

/// Relay the frame as-is to the sender's forward targets.
fn publish(ctx: &CommandContext<'_>, _payload: &Bytes) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let targets = ctx
        .switch()
        .registry()
        .get(sender.id)
        .map(|endpoint| endpoint.forward_targets().to_vec())
        .unwrap_or_default();

    let frame = ctx.outbound(ctx.frame())?;
    let delivered = ctx.switch().router().forward(sender.id, &targets, &frame);
    tracing::trace!(from = sender.id, delivered, "publish");
    Ok(Reply::empty())
}

/// `PUBLISH_2`: stamp the source, then multicast to the embedded targets or,
/// without any, to the subscribers of the message type.
fn publish_typed(ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let msg = PublishingMessage::parse(payload)?;
    let targets: Vec<EndpointId> = msg.targets().collect();

    let stamped = Frame::new(
        ctx.frame().command_value(),
        ctx.frame().flags(),
        PublishingMessage::stamp_source(payload, sender.id),
    );
    let frame = ctx.outbound(&stamped)?;

    let router = ctx.switch().router();
    let delivered = if targets.is_empty() {
        router.route(sender.id, Targets::Subscribers(msg.msg_type), &frame)
    } else {
        router.forward(sender.id, &targets, &frame)
    };
    tracing::trace!(from = sender.id, msg_type = msg.msg_type, delivered, "publish_2");
    Ok(Reply::empty())
}

/// `SVC`: requests go to matching services with the requester stamped as
/// source; frames from a service are replies and go back to that source.
fn service(ctx: &CommandContext<'_>, payload: &Bytes) -> HandlerResult {
    let sender = ctx.require_sender()?;
    let (msg, _body) = ServiceMessage::parse(payload)?;
    let router = ctx.switch().router();

    if sender.role == Role::Service {
        if msg.source == 0 {
            return Err(CommandError::failed("service reply without source"));
        }
        let frame = ctx.outbound(ctx.frame())?;
        if router.forward(sender.id, &[msg.source], &frame) == 0 {
            return Err(CommandError::failed(format!(
                "endpoint {} unreachable",
                msg.source
            )));
        }
        return Ok(Reply::empty());
    }

    let stamped = Frame::new(
        ctx.frame().command_value(),
        ctx.frame().flags(),
        ServiceMessage::stamp_source(payload, sender.id),
    );
    let frame = ctx.outbound(&stamped)?;
    if router.route(sender.id, Targets::Services(msg.svc_type), &frame) == 0 {
        return Err(CommandError::failed(format!(
            "no service for type {}",
            msg.svc_type
        )));
    }
    Ok(Reply::empty())
}

fn info(ctx: &CommandContext<'_>, req: CommandInfoReq) -> HandlerResult {
    let switch = ctx.switch();
    let mode = switch.settings().mode;

    let info = {
        let registry = switch.registry();
        let counters = registry.counters();
        CommandInfo {
            current: registry.len() as u64,
            connected: counters.connected,
            left: counters.left,
            admin_clients: counters.admin_clients,
            pending_connections: counters.pending_connections,
            rejected_connections: counters.rejected_connections,
            rx_bytes: counters.rx_bytes,
            tx_bytes: counters.tx_bytes,
            uptime_secs: switch.uptime().as_secs(),
            mode: mode.to_string(),
            commands: counters
                .commands
                .iter()
                .map(|(command, n)| (command.tag().to_string(), *n))
                .collect(),
            endpoints: if req.is_details {
                registry.endpoint_infos(Instant::now())
            } else {
                Vec::new()
            },
        }
    };
    ctx.reply(&info)
}

fn endpoint_info(ctx: &CommandContext<'_>, req: CommandEndpointInfoReq) -> HandlerResult {
    let id = endpoint_ids(&[req.id])?[0];
    let info = ctx
        .switch()
        .registry()
        .get(id)
        .map(|endpoint| endpoint.info(Instant::now()))
        .ok_or_else(|| CommandError::failed(format!("endpoint {id} not found")))?;
    ctx.reply(&info)
}

fn setup(ctx: &CommandContext<'_>, cmd: CommandSetup) -> HandlerResult {
    let mode = cmd
        .mode
        .as_deref()
        .map(str::parse::<Mode>)
        .transpose()?;

    ctx.switch().update_settings(|settings| {
        if cmd.new_admin_code.is_some() && !secrets_match(&cmd.admin_code, &settings.admin_code) {
            return Err(CommandError::failed("admin code mismatch"));
        }
        if let Some(code) = cmd.new_admin_code {
            settings.admin_code = code;
        }
        if let Some(code) = cmd.new_access_code {
            settings.access_code = code;
        }
        if let Some(mode) = mode {
            settings.mode = mode;
        }
        Ok(())
    })?;

    tracing::info!(conn = ctx.connection().id(), "settings updated");
    Ok(Reply::empty())
}

fn proxy(ctx: &CommandContext<'_>, _payload: &Bytes) -> HandlerResult {
    tracing::debug!(conn = ctx.connection().id(), "proxy control acknowledged");
    Ok(Reply::empty())
}

fn kickout(ctx: &CommandContext<'_>, cmd: CommandKickout) -> HandlerResult {
    let ids = endpoint_ids(&cmd.ids)?;
    let removed = ctx.switch().registry().kickout(&ids);
    tracing::info!(?removed, "endpoints kicked out");
    ctx.reply(&CommandKickoutResult {
        ids: removed.into_iter().map(u32::from).collect(),
    })
}

fn reload(ctx: &CommandContext<'_>, _payload: &Bytes) -> HandlerResult {
    let settings = ctx.switch().reload()?;
    tracing::info!(mode = %settings.mode, "configuration reloaded");
    Ok(Reply::empty())
}
