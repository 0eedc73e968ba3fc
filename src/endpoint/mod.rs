//! Endpoint identity, roles and the endpoint registry.

mod registry;

pub(crate) use registry::secrets_match;
pub use registry::{Counters, Endpoint, EndpointRegistry, EndpointStats, RegisterError};

/// Endpoint id. Nonzero for registered endpoints; 0 means "all" in target
/// lists.
pub type EndpointId = u16;

/// Role an endpoint registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Unregistered,
    Endpoint,
    Admin,
    Service,
    Proxy,
    ReverseProxy,
    ClusterNode,
}

impl Role {
    /// Parse a wire tag. `Unregistered` has no tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "endpoint" => Some(Self::Endpoint),
            "admin" => Some(Self::Admin),
            "service" => Some(Self::Service),
            "proxy" => Some(Self::Proxy),
            "rproxy" => Some(Self::ReverseProxy),
            "cluster" => Some(Self::ClusterNode),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Endpoint => "endpoint",
            Self::Admin => "admin",
            Self::Service => "service",
            Self::Proxy => "proxy",
            Self::ReverseProxy => "rproxy",
            Self::ClusterNode => "cluster",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Copy of an endpoint's identity, handed to handlers instead of a
/// reference into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRef {
    pub id: EndpointId,
    pub role: Role,
}
