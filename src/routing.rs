//! Fan-out of data frames to other endpoints.
//!
//! Selection happens under the registry lock; delivery does not. Each
//! delivery is a non-blocking enqueue onto the target's writer, so a slow or
//! dead target only loses its own copy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::endpoint::{Endpoint, EndpointId, EndpointRegistry, Role};
use crate::writer::OutboundFrame;

/// Who a frame should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets<'a> {
    /// Explicit ids; empty or `[0]` means every endpoint.
    List(&'a [EndpointId]),
    /// Endpoints subscribed to a `PUBLISH_2` message type.
    Subscribers(u8),
    /// Service endpoints of a service type; 0 on either side matches all.
    Services(u8),
}

/// Whether a target list means "everyone".
#[inline]
pub fn is_broadcast(targets: &[EndpointId]) -> bool {
    targets.is_empty() || targets == [0]
}

/// Router over an endpoint registry.
pub struct Router<'a> {
    registry: &'a Mutex<EndpointRegistry>,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Mutex<EndpointRegistry>) -> Self {
        Self { registry }
    }

    /// Send `frame` from `sender` to a target list.
    ///
    /// Returns the number of targets the frame was queued for.
    pub fn forward(&self, sender: EndpointId, targets: &[EndpointId], frame: &OutboundFrame) -> usize {
        self.route(sender, Targets::List(targets), frame)
    }

    /// Send `frame` from `sender` to the selected targets.
    ///
    /// The sender never receives its own frame, missing ids are skipped, and
    /// so is any target that rejects the sender.
    pub fn route(&self, sender: EndpointId, targets: Targets<'_>, frame: &OutboundFrame) -> usize {
        let selected = self.select(sender, targets);

        let mut delivered = Vec::with_capacity(selected.len());
        for (id, connection) in &selected {
            match connection.try_send(frame.clone()) {
                Ok(()) => delivered.push(connection.id()),
                Err(e) => {
                    tracing::debug!(from = sender, to = *id, error = %e, "dropped forwarded frame");
                }
            }
        }

        if !delivered.is_empty() {
            let mut registry = self.registry.lock();
            for connection in &delivered {
                registry.record_tx(*connection, frame.size());
            }
        }
        delivered.len()
    }

    fn select(&self, sender: EndpointId, targets: Targets<'_>) -> Vec<(EndpointId, Arc<Connection>)> {
        let registry = self.registry.lock();
        let accepts = |endpoint: &&Endpoint| endpoint.id() != sender && !endpoint.rejects(sender);

        // Multicast keeps the caller's order and repeats.
        if let Targets::List(ids) = targets {
            if !is_broadcast(ids) {
                return ids
                    .iter()
                    .filter_map(|&id| registry.get(id))
                    .filter(accepts)
                    .map(|endpoint| (endpoint.id(), Arc::clone(endpoint.connection())))
                    .collect();
            }
        }

        let chosen: Vec<&Endpoint> = match targets {
            Targets::List(_) => registry.iter().filter(accepts).collect(),
            Targets::Subscribers(msg_type) => registry
                .iter()
                .filter(|endpoint| endpoint.is_subscribed(msg_type))
                .filter(accepts)
                .collect(),
            Targets::Services(svc_type) => registry
                .iter()
                .filter(|endpoint| endpoint.role() == Role::Service)
                .filter(|endpoint| {
                    svc_type == 0 || endpoint.svc_type() == 0 || endpoint.svc_type() == svc_type
                })
                .filter(accepts)
                .collect(),
        };

        let mut selected: Vec<_> = chosen
            .into_iter()
            .map(|endpoint| (endpoint.id(), Arc::clone(endpoint.connection())))
            .collect();
        selected.sort_unstable_by_key(|(id, _)| *id);
        selected
    }
}
