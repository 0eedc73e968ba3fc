//! Endpoint registry: the single owner of endpoint state.
//!
//! Maps endpoint ids to [`Endpoint`]s and connections to endpoint ids, and
//! keeps the switch-wide counters reported by `INFO`. The switch keeps one
//! registry behind a `parking_lot::Mutex`; every method here is a short,
//! non-blocking mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use super::{EndpointId, EndpointRef, Role};
use crate::codec::{CommandRegister, EndpointInfo};
use crate::connection::{Connection, ConnectionId};
use crate::protocol::Command;
use crate::switch::Settings;

/// Why a `REG` request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("connection already registered as endpoint {0}")]
    AlreadyRegistered(EndpointId),

    #[error("endpoint id {0} already in use")]
    IdInUse(EndpointId),

    #[error("endpoint id {0} out of range")]
    InvalidId(u32),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("invalid credentials for role: {0}")]
    BadCredentials(Role),

    #[error("no free endpoint id")]
    IdsExhausted,
}

/// Per-endpoint traffic.
#[derive(Debug, Clone, Copy)]
pub struct EndpointStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub connected_at: Instant,
}

/// A registered endpoint.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    role: Role,
    connection: Arc<Connection>,
    forward_targets: Vec<EndpointId>,
    subscriptions: BTreeSet<u8>,
    rejected: BTreeSet<EndpointId>,
    svc_type: u8,
    stats: EndpointStats,
}

impl Endpoint {
    #[inline]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Empty or `[0]` means broadcast.
    #[inline]
    pub fn forward_targets(&self) -> &[EndpointId] {
        &self.forward_targets
    }

    #[inline]
    pub fn is_subscribed(&self, msg_type: u8) -> bool {
        self.subscriptions.contains(&msg_type)
    }

    /// Whether this endpoint refuses data from `source`.
    #[inline]
    pub fn rejects(&self, source: EndpointId) -> bool {
        self.rejected.contains(&source)
    }

    #[inline]
    pub fn svc_type(&self) -> u8 {
        self.svc_type
    }

    #[inline]
    pub fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    pub fn endpoint_ref(&self) -> EndpointRef {
        EndpointRef {
            id: self.id,
            role: self.role,
        }
    }

    /// Detail record for `INFO` / `EP_INFO`.
    pub fn info(&self, now: Instant) -> EndpointInfo {
        EndpointInfo {
            id: u32::from(self.id),
            role: self.role.tag().to_string(),
            peer: self.connection.peer().to_string(),
            rx_bytes: self.stats.rx_bytes,
            tx_bytes: self.stats.tx_bytes,
            connected_secs: now.duration_since(self.stats.connected_at).as_secs(),
            forward_targets: self.forward_targets.iter().map(|&id| u32::from(id)).collect(),
            subscriptions: self.subscriptions.iter().map(|&t| u32::from(t)).collect(),
            rejected: self.rejected.iter().map(|&id| u32::from(id)).collect(),
            svc_type: u32::from(self.svc_type),
        }
    }
}

/// Switch-wide counters.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    /// Successful registrations since start.
    pub connected: u64,
    /// Registered endpoints that went away.
    pub left: u64,
    /// Admin endpoints registered right now.
    pub admin_clients: u64,
    /// Accepted connections not registered yet.
    pub pending_connections: u64,
    /// Connections dropped for not registering in time.
    pub rejected_connections: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Requests handled per command.
    pub commands: BTreeMap<Command, u64>,
}

/// Registry of live endpoints.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointId, Endpoint>,
    by_connection: HashMap<ConnectionId, EndpointId>,
    /// Accepted connections that have not registered.
    pending: HashSet<ConnectionId>,
    /// Last id handed out; fresh ids are searched after it.
    cursor: EndpointId,
    counters: Counters,
}

/// Compare secrets without an early exit on the first mismatch.
pub(crate) fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for (i, &byte) in b.iter().enumerate() {
        diff |= usize::from(byte ^ a.get(i).copied().unwrap_or(0));
    }
    diff == 0
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the endpoint behind `connection`.
    ///
    /// The admin role is checked against the admin secret, every other role
    /// against the access secret. On failure nothing changes.
    pub fn register(
        &mut self,
        connection: &Arc<Connection>,
        request: &CommandRegister,
        settings: &Settings,
    ) -> Result<EndpointId, RegisterError> {
        if let Some(&id) = self.by_connection.get(&connection.id()) {
            return Err(RegisterError::AlreadyRegistered(id));
        }

        let role = Role::from_tag(&request.role)
            .ok_or_else(|| RegisterError::UnknownRole(request.role.clone()))?;

        let authorized = match role {
            Role::Admin => secrets_match(&request.admin_code, &settings.admin_code),
            _ => secrets_match(&request.access_code, &settings.access_code),
        };
        if !authorized {
            return Err(RegisterError::BadCredentials(role));
        }

        let id = match request.id {
            0 => self.fresh_id()?,
            requested => {
                let id = EndpointId::try_from(requested)
                    .map_err(|_| RegisterError::InvalidId(requested))?;
                if self.endpoints.contains_key(&id) {
                    return Err(RegisterError::IdInUse(id));
                }
                id
            }
        };

        let svc_type = u8::try_from(request.svc_type).unwrap_or(u8::MAX);
        self.endpoints.insert(
            id,
            Endpoint {
                id,
                role,
                connection: Arc::clone(connection),
                forward_targets: Vec::new(),
                subscriptions: BTreeSet::new(),
                rejected: BTreeSet::new(),
                svc_type: if role == Role::Service { svc_type } else { 0 },
                stats: EndpointStats {
                    rx_bytes: 0,
                    tx_bytes: 0,
                    connected_at: Instant::now(),
                },
            },
        );
        self.by_connection.insert(connection.id(), id);

        self.counters.connected += 1;
        self.pending.remove(&connection.id());
        self.counters.pending_connections = self.pending.len() as u64;
        if role == Role::Admin {
            self.counters.admin_clients += 1;
        }
        Ok(id)
    }

    /// Lowest unused id after the cursor, wrapping and skipping 0.
    fn fresh_id(&mut self) -> Result<EndpointId, RegisterError> {
        let mut candidate = self.cursor;
        for _ in 0..EndpointId::MAX {
            candidate = candidate.checked_add(1).unwrap_or(1);
            if !self.endpoints.contains_key(&candidate) {
                self.cursor = candidate;
                return Ok(candidate);
            }
        }
        Err(RegisterError::IdsExhausted)
    }

    /// Endpoint registered on `connection`, if any.
    pub fn resolve(&self, connection: ConnectionId) -> Option<EndpointRef> {
        self.by_connection
            .get(&connection)
            .and_then(|id| self.endpoints.get(id))
            .map(Endpoint::endpoint_ref)
    }

    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    /// Registered endpoints in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Close and remove the listed endpoints. Unknown ids are skipped.
    ///
    /// Returns the ids actually removed.
    pub fn kickout(&mut self, ids: &[EndpointId]) -> Vec<EndpointId> {
        let mut removed = Vec::new();
        for &id in ids {
            if let Some(endpoint) = self.remove(id) {
                endpoint.connection.close();
                removed.push(id);
            }
        }
        removed
    }

    /// Forget whatever is registered on `connection`. Idempotent.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<EndpointRef> {
        let id = self.by_connection.get(&connection).copied()?;
        self.remove(id).map(|endpoint| endpoint.endpoint_ref())
    }

    fn remove(&mut self, id: EndpointId) -> Option<Endpoint> {
        let endpoint = self.endpoints.remove(&id)?;
        self.by_connection.remove(&endpoint.connection.id());
        self.counters.left += 1;
        if endpoint.role == Role::Admin {
            self.counters.admin_clients = self.counters.admin_clients.saturating_sub(1);
        }
        Some(endpoint)
    }

    /// A connection was accepted.
    pub fn connection_opened(&mut self, connection: ConnectionId) {
        self.pending.insert(connection);
        self.counters.pending_connections = self.pending.len() as u64;
    }

    /// A connection closed. Removes its endpoint, or drops it from the
    /// pending set if it never registered.
    pub fn connection_closed(&mut self, connection: ConnectionId) -> Option<EndpointRef> {
        if self.pending.remove(&connection) {
            self.counters.pending_connections = self.pending.len() as u64;
        }
        self.unregister(connection)
    }

    /// A connection is being dropped for not registering in time.
    pub fn connection_rejected(&mut self) {
        self.counters.rejected_connections += 1;
    }

    pub fn record_command(&mut self, command: Command) {
        *self.counters.commands.entry(command).or_insert(0) += 1;
    }

    /// Count inbound bytes from `connection`.
    pub fn record_rx(&mut self, connection: ConnectionId, bytes: usize) {
        let bytes = bytes as u64;
        self.counters.rx_bytes += bytes;
        if let Some(endpoint) = self
            .by_connection
            .get(&connection)
            .and_then(|id| self.endpoints.get_mut(id))
        {
            endpoint.stats.rx_bytes += bytes;
        }
    }

    /// Count outbound bytes to `connection`.
    pub fn record_tx(&mut self, connection: ConnectionId, bytes: usize) {
        let bytes = bytes as u64;
        self.counters.tx_bytes += bytes;
        if let Some(endpoint) = self
            .by_connection
            .get(&connection)
            .and_then(|id| self.endpoints.get_mut(id))
        {
            endpoint.stats.tx_bytes += bytes;
        }
    }

    /// Replace the forward targets of `id`.
    pub fn set_forward_targets(&mut self, id: EndpointId, targets: Vec<EndpointId>) -> bool {
        self.with_endpoint(id, |endpoint| endpoint.forward_targets = targets)
    }

    /// Drop the listed targets; an empty list clears all of them.
    pub fn remove_forward_targets(&mut self, id: EndpointId, targets: &[EndpointId]) -> bool {
        self.with_endpoint(id, |endpoint| {
            if targets.is_empty() {
                endpoint.forward_targets.clear();
            } else {
                endpoint.forward_targets.retain(|t| !targets.contains(t));
            }
        })
    }

    pub fn subscribe(&mut self, id: EndpointId, msg_types: &[u8]) -> bool {
        self.with_endpoint(id, |endpoint| endpoint.subscriptions.extend(msg_types))
    }

    pub fn unsubscribe(&mut self, id: EndpointId, msg_types: &[u8]) -> bool {
        self.with_endpoint(id, |endpoint| {
            for msg_type in msg_types {
                endpoint.subscriptions.remove(msg_type);
            }
        })
    }

    pub fn reject(&mut self, id: EndpointId, sources: &[EndpointId]) -> bool {
        self.with_endpoint(id, |endpoint| endpoint.rejected.extend(sources))
    }

    pub fn unreject(&mut self, id: EndpointId, sources: &[EndpointId]) -> bool {
        self.with_endpoint(id, |endpoint| {
            for source in sources {
                endpoint.rejected.remove(source);
            }
        })
    }

    fn with_endpoint(&mut self, id: EndpointId, f: impl FnOnce(&mut Endpoint)) -> bool {
        match self.endpoints.get_mut(&id) {
            Some(endpoint) => {
                f(endpoint);
                true
            }
            None => false,
        }
    }

    /// Detail records of every endpoint, ordered by id.
    pub fn endpoint_infos(&self, now: Instant) -> Vec<EndpointInfo> {
        let mut infos: Vec<_> = self.endpoints.values().map(|e| e.info(now)).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::writer::{WriterConfig, WriterHandle};

    fn settings() -> Settings {
        Settings {
            admin_code: "root".to_string(),
            access_code: "guest".to_string(),
            mode: Mode::Switch,
        }
    }

    fn connection(id: ConnectionId) -> Arc<Connection> {
        let (writer, _rx) = WriterHandle::detached(&WriterConfig::default());
        Connection::new(id, format!("10.0.0.{id}:4000"), writer)
    }

    fn request(role: &str, id: u32) -> CommandRegister {
        CommandRegister {
            role: role.to_string(),
            id,
            admin_code: "root".to_string(),
            access_code: "guest".to_string(),
            svc_type: 0,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = EndpointRegistry::new();
        let conn = connection(1);
        registry.connection_opened(1);

        let id = registry.register(&conn, &request("endpoint", 5), &settings()).unwrap();

        assert_eq!(id, 5);
        assert_eq!(
            registry.resolve(1),
            Some(EndpointRef {
                id: 5,
                role: Role::Endpoint
            })
        );
        assert_eq!(registry.counters().connected, 1);
        assert_eq!(registry.counters().pending_connections, 0);
    }

    #[test]
    fn test_duplicate_id_fails_without_mutation() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("endpoint", 9), &settings()).unwrap();

        let err = registry
            .register(&connection(2), &request("endpoint", 9), &settings())
            .unwrap_err();

        assert_eq!(err, RegisterError::IdInUse(9));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(2), None);
        assert_eq!(registry.counters().connected, 1);
    }

    #[test]
    fn test_connection_registers_once() {
        let mut registry = EndpointRegistry::new();
        let conn = connection(1);
        registry.register(&conn, &request("endpoint", 0), &settings()).unwrap();

        let err = registry.register(&conn, &request("endpoint", 0), &settings()).unwrap_err();
        assert!(matches!(err, RegisterError::AlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_fresh_ids_skip_used_and_zero() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("endpoint", 2), &settings()).unwrap();

        let a = registry.register(&connection(2), &request("endpoint", 0), &settings()).unwrap();
        let b = registry.register(&connection(3), &request("endpoint", 0), &settings()).unwrap();

        assert_eq!(a, 1);
        assert_eq!(b, 3);
    }

    #[test]
    fn test_credentials_by_role() {
        let mut registry = EndpointRegistry::new();

        let mut admin = request("admin", 0);
        admin.admin_code = "wrong".to_string();
        assert_eq!(
            registry.register(&connection(1), &admin, &settings()),
            Err(RegisterError::BadCredentials(Role::Admin))
        );

        let mut service = request("service", 0);
        service.admin_code = String::new();
        service.svc_type = 4;
        let id = registry.register(&connection(2), &service, &settings()).unwrap();
        assert_eq!(registry.get(id).unwrap().svc_type(), 4);

        let mut endpoint = request("endpoint", 0);
        endpoint.access_code = "guesT".to_string();
        assert!(registry.register(&connection(3), &endpoint, &settings()).is_err());

        assert_eq!(
            registry.register(&connection(4), &request("wizard", 0), &settings()),
            Err(RegisterError::UnknownRole("wizard".to_string()))
        );
    }

    #[test]
    fn test_out_of_range_id() {
        let mut registry = EndpointRegistry::new();
        assert_eq!(
            registry.register(&connection(1), &request("endpoint", 70_000), &settings()),
            Err(RegisterError::InvalidId(70_000))
        );
    }

    #[test]
    fn test_admin_counter() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("admin", 0), &settings()).unwrap();
        assert_eq!(registry.counters().admin_clients, 1);

        registry.unregister(1);
        assert_eq!(registry.counters().admin_clients, 0);
        assert_eq!(registry.counters().left, 1);
    }

    #[test]
    fn test_kickout_closes_and_removes() {
        let mut registry = EndpointRegistry::new();
        let conn = connection(1);
        registry.register(&conn, &request("endpoint", 3), &settings()).unwrap();

        let removed = registry.kickout(&[3, 42]);

        assert_eq!(removed, vec![3]);
        assert!(conn.is_closed());
        assert!(registry.get(3).is_none());
        assert_eq!(registry.resolve(1), None);
        assert!(registry.kickout(&[3]).is_empty());

        registry.connection_closed(1);
        assert_eq!(registry.counters().left, 1);
    }

    #[test]
    fn test_unregister_idempotent() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("endpoint", 0), &settings()).unwrap();

        assert!(registry.unregister(1).is_some());
        assert!(registry.unregister(1).is_none());
        assert_eq!(registry.counters().left, 1);
    }

    #[test]
    fn test_pending_and_rejected_connections() {
        let mut registry = EndpointRegistry::new();
        registry.connection_opened(1);
        registry.connection_opened(2);

        registry.connection_rejected();
        registry.connection_closed(1);
        registry.connection_closed(1);

        assert_eq!(registry.counters().pending_connections, 1);
        assert_eq!(registry.counters().rejected_connections, 1);
        assert_eq!(registry.counters().left, 0);
    }

    #[test]
    fn test_forward_targets_and_filters() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("endpoint", 1), &settings()).unwrap();

        assert!(registry.set_forward_targets(1, vec![2, 3, 4]));
        assert!(registry.remove_forward_targets(1, &[3]));
        assert_eq!(registry.get(1).unwrap().forward_targets(), &[2, 4]);
        assert!(registry.remove_forward_targets(1, &[]));
        assert!(registry.get(1).unwrap().forward_targets().is_empty());

        registry.subscribe(1, &[7, 8]);
        registry.unsubscribe(1, &[8]);
        assert!(registry.get(1).unwrap().is_subscribed(7));
        assert!(!registry.get(1).unwrap().is_subscribed(8));

        registry.reject(1, &[5]);
        assert!(registry.get(1).unwrap().rejects(5));
        registry.unreject(1, &[5]);
        assert!(!registry.get(1).unwrap().rejects(5));

        assert!(!registry.set_forward_targets(99, vec![]));
    }

    #[test]
    fn test_traffic_accounting() {
        let mut registry = EndpointRegistry::new();
        registry.register(&connection(1), &request("endpoint", 1), &settings()).unwrap();

        registry.record_rx(1, 10);
        registry.record_tx(1, 4);
        registry.record_rx(2, 5);
        registry.record_command(Command::Echo);
        registry.record_command(Command::Echo);

        let stats = registry.get(1).unwrap().stats();
        assert_eq!((stats.rx_bytes, stats.tx_bytes), (10, 4));
        assert_eq!(registry.counters().rx_bytes, 15);
        assert_eq!(registry.counters().commands[&Command::Echo], 2);

        let infos = registry.endpoint_infos(Instant::now());
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].peer, "10.0.0.1:4000");
        assert_eq!(infos[0].role, "endpoint");
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(secrets_match("", ""));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("ab", "abc"));
        assert!(!secrets_match("abcd", "abc"));
    }
}
