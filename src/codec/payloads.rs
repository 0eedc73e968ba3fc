//! Command payload schemas.
//!
//! Each schema is both a prost message and a serde type. JSON field names
//! are the Rust field names; every field is optional on input.
//! Endpoint ids travel as `u32` and are narrowed by the handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `REG` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRegister {
    /// Role tag: `endpoint`, `admin`, `service`, `proxy`, `rproxy`, `cluster`.
    #[prost(string, tag = "1")]
    pub role: String,
    /// Requested id, 0 for a switch-assigned one.
    #[prost(uint32, tag = "2")]
    pub id: u32,
    /// Checked for the admin role.
    #[prost(string, tag = "3")]
    pub admin_code: String,
    /// Checked for every other role.
    #[prost(string, tag = "4")]
    pub access_code: String,
    /// Service routing key, only meaningful for the service role.
    #[prost(uint32, tag = "5")]
    pub svc_type: u32,
}

/// `REG` success reply.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRegisterResult {
    #[prost(uint32, tag = "1")]
    pub id: u32,
}

/// `FWD` / `UNFWD` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandForward {
    #[prost(uint32, repeated, tag = "1")]
    pub targets: Vec<u32>,
}

/// `SUB` / `UNSUB` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSubscribe {
    #[prost(uint32, repeated, tag = "1")]
    pub msg_types: Vec<u32>,
}

/// `REJECT` / `UNREJECT` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandReject {
    #[prost(uint32, repeated, tag = "1")]
    pub sources: Vec<u32>,
}

/// `INFO` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInfoReq {
    /// Include the per-endpoint list.
    #[prost(bool, tag = "1")]
    pub is_details: bool,
}

/// `INFO` reply.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandInfo {
    /// Registered endpoints right now.
    #[prost(uint64, tag = "1")]
    pub current: u64,
    /// Successful registrations since start.
    #[prost(uint64, tag = "2")]
    pub connected: u64,
    /// Endpoints gone since start.
    #[prost(uint64, tag = "3")]
    pub left: u64,
    #[prost(uint64, tag = "4")]
    pub admin_clients: u64,
    /// Connections accepted but not yet registered.
    #[prost(uint64, tag = "5")]
    pub pending_connections: u64,
    /// Connections closed before registering.
    #[prost(uint64, tag = "6")]
    pub rejected_connections: u64,
    #[prost(uint64, tag = "7")]
    pub rx_bytes: u64,
    #[prost(uint64, tag = "8")]
    pub tx_bytes: u64,
    #[prost(uint64, tag = "9")]
    pub uptime_secs: u64,
    #[prost(string, tag = "10")]
    pub mode: String,
    /// Requests handled, keyed by command tag.
    #[prost(btree_map = "string, uint64", tag = "11")]
    pub commands: BTreeMap<String, u64>,
    /// Filled only when `is_details` was set.
    #[prost(message, repeated, tag = "12")]
    pub endpoints: Vec<EndpointInfo>,
}

/// `EP_INFO` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandEndpointInfoReq {
    #[prost(uint32, tag = "1")]
    pub id: u32,
}

/// One endpoint, as reported by `INFO` and `EP_INFO`.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub role: String,
    /// Remote socket address.
    #[prost(string, tag = "3")]
    pub peer: String,
    #[prost(uint64, tag = "4")]
    pub rx_bytes: u64,
    #[prost(uint64, tag = "5")]
    pub tx_bytes: u64,
    /// Seconds since registration.
    #[prost(uint64, tag = "6")]
    pub connected_secs: u64,
    #[prost(uint32, repeated, tag = "7")]
    pub forward_targets: Vec<u32>,
    #[prost(uint32, repeated, tag = "8")]
    pub subscriptions: Vec<u32>,
    #[prost(uint32, repeated, tag = "9")]
    pub rejected: Vec<u32>,
    #[prost(uint32, tag = "10")]
    pub svc_type: u32,
}

/// `SETUP` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSetup {
    /// Current admin secret; required to change it.
    #[prost(string, tag = "1")]
    pub admin_code: String,
    #[prost(string, optional, tag = "2")]
    pub new_admin_code: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub new_access_code: Option<String>,
    /// `switch` or `proxy`.
    #[prost(string, optional, tag = "4")]
    pub mode: Option<String>,
}

/// `KICKOUT` request.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandKickout {
    #[prost(uint32, repeated, tag = "1")]
    pub ids: Vec<u32>,
}

/// `KICKOUT` reply: the ids actually removed.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandKickoutResult {
    #[prost(uint32, repeated, tag = "1")]
    pub ids: Vec<u32>,
}
