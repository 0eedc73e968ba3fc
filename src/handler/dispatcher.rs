//! Per-frame dispatch: authorize, decode, run, answer.
//!
//! Every request gets exactly one answer: a RESULT frame, or for
//! `HEARTBEAT` a response-flagged heartbeat. Response-flagged frames coming
//! into the switch are counted and dropped.

use std::sync::Arc;

use super::context::{CommandContext, CommandError, Reply};
use super::registry::Access;
use crate::connection::Connection;
use crate::endpoint::{EndpointRef, Role};
use crate::error::{ProtocolError, Result};
use crate::protocol::{
    build_heartbeat_response, build_result, Command, Frame, ERRCODE_FAILED, ERRCODE_OK,
};
use crate::switch::SwitchContext;
use crate::writer::OutboundFrame;

/// Check `endpoint` against an access level.
///
/// Returns the endpoint (or `None` for [`Access::Any`] on an unregistered
/// connection) when allowed.
pub fn authorize(
    access: Access,
    endpoint: Option<EndpointRef>,
) -> std::result::Result<Option<EndpointRef>, ProtocolError> {
    match (access, endpoint) {
        (Access::Any, endpoint) => Ok(endpoint),
        (_, None) => Err(ProtocolError::UnregisteredSender),
        (Access::Registered, Some(endpoint)) => Ok(Some(endpoint)),
        (Access::Admin, Some(endpoint)) if endpoint.role == Role::Admin => Ok(Some(endpoint)),
        (Access::Admin, Some(endpoint)) => Err(ProtocolError::RoleNotPermitted(endpoint.role.tag())),
    }
}

/// Run one inbound frame and send its answer on `connection`.
///
/// Fails only when the answer cannot be queued; the caller should then
/// drop the connection.
pub async fn dispatch(
    switch: &SwitchContext,
    connection: &Arc<Connection>,
    frame: Frame,
) -> Result<()> {
    switch
        .registry()
        .record_rx(connection.id(), frame.wire_size());

    if frame.is_response() {
        tracing::debug!(
            conn = connection.id(),
            command = frame.command_value(),
            "dropping response-flagged frame"
        );
        return Ok(());
    }

    let reply = run(switch, connection, &frame);

    let response = match reply {
        Ok(Reply::Heartbeat) => build_heartbeat_response(),
        Ok(Reply::Data(data)) => {
            build_result(frame.command_value(), frame.codec(), ERRCODE_OK, &data)
        }
        Err(e) => {
            tracing::warn!(
                conn = connection.id(),
                command = frame.command_value(),
                error = %e,
                "command failed"
            );
            let message = failure_message(&frame, &e);
            build_result(
                frame.command_value(),
                frame.codec(),
                ERRCODE_FAILED,
                message.as_bytes(),
            )
        }
    };

    let outbound = match OutboundFrame::encode(&response, switch.convention()) {
        Ok(outbound) => outbound,
        Err(e) => {
            tracing::warn!(conn = connection.id(), error = %e, "reply does not fit a frame");
            let failure = build_result(
                frame.command_value(),
                frame.codec(),
                ERRCODE_FAILED,
                e.to_string().as_bytes(),
            );
            OutboundFrame::encode(&failure, switch.convention())?
        }
    };
    let size = outbound.size();
    connection.send(outbound).await?;
    switch.registry().record_tx(connection.id(), size);
    Ok(())
}

/// Text carried by a failed RESULT. `REG` failures carry only the errcode.
fn failure_message(frame: &Frame, error: &CommandError) -> String {
    match frame.command() {
        Some(Command::Reg) => String::new(),
        _ => error.to_string(),
    }
}

/// Look up, authorize and invoke the handler for `frame`.
fn run(
    switch: &SwitchContext,
    connection: &Arc<Connection>,
    frame: &Frame,
) -> std::result::Result<Reply, CommandError> {
    let value = frame.command_value();
    let sender = switch.registry().resolve(connection.id());

    let (spec, handler) = match (
        switch.commands().lookup(value),
        switch.commands().get_handler(value),
    ) {
        (Some(spec), Some(handler)) => (spec, handler),
        _ => return Err(ProtocolError::UnsupportedCommand(value).into()),
    };

    let sender = authorize(spec.access, sender)?;
    switch.registry().record_command(spec.command);

    tracing::debug!(
        conn = connection.id(),
        endpoint = sender.map(|s| s.id),
        command = %spec.command,
        "dispatching"
    );

    let ctx = CommandContext::new(switch, connection, sender, frame);
    handler.call(&ctx, &frame.payload)
}
