//! Connection request types and the requester seam.

use crate::{ClientError, ClientIdentity};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Interface label attached to the primary connection
pub const PRIMARY_INTERFACE_LABEL: &str = "Primary interface";

/// Interface label attached to every connection after the first
pub const SECONDARY_INTERFACE_LABEL: &str = "Secondary interface";

/// How a connection is realized on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MechanismType {
    /// Kernel network interface moved into the pod namespace
    #[default]
    Kernel,
    /// Shared-memory packet interface
    Memif,
}

impl MechanismType {
    /// Control-plane name of the mechanism
    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismType::Kernel => "KERNEL_INTERFACE",
            MechanismType::Memif => "MEM_INTERFACE",
        }
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MechanismType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kernel" | "kernel_interface" => Ok(MechanismType::Kernel),
            "memif" | "mem_interface" => Ok(MechanismType::Memif),
            _ => Err(ClientError::Mechanism(s.to_string())),
        }
    }
}

/// Everything needed to request one network service connection
///
/// Built once per selector and reused unchanged by every retry attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequestSpec {
    /// Network service to connect to
    pub service_name: String,
    /// Requested mechanism
    pub mechanism_type: MechanismType,
    /// Interface name inside the pod, e.g. `nsm0`
    pub interface_name: String,
    /// Human readable interface description
    pub interface_label: String,
    /// Selector labels forwarded to the control plane
    pub labels: BTreeMap<String, String>,
    /// Identity of the requesting client
    pub identity: ClientIdentity,
}

/// Opaque token for an established connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// Connection id assigned by the control plane
    pub id: String,
    /// Network service the connection belongs to
    pub network_service: String,
    /// Interface name the connection was realized as
    pub interface_name: String,
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.network_service, self.interface_name, self.id)
    }
}

/// Issues single connection requests to the control plane
///
/// Implementations must tolerate being called again after a failed request.
#[async_trait]
pub trait ConnectionRequester: Send + Sync {
    /// Request one connection
    async fn request(&self, spec: &ConnectionRequestSpec) -> Result<ConnectionHandle, ClientError>;

    /// Release a previously established connection
    async fn close(&self, handle: &ConnectionHandle) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanism_parsing() {
        assert_eq!("kernel".parse::<MechanismType>().unwrap(), MechanismType::Kernel);
        assert_eq!(
            "KERNEL_INTERFACE".parse::<MechanismType>().unwrap(),
            MechanismType::Kernel
        );
        assert_eq!(" memif ".parse::<MechanismType>().unwrap(), MechanismType::Memif);
        assert!(matches!(
            "vxlan".parse::<MechanismType>(),
            Err(ClientError::Mechanism(name)) if name == "vxlan"
        ));
    }

    #[test]
    fn test_handle_display() {
        let handle = ConnectionHandle {
            id: "42".to_string(),
            network_service: "icmp-responder".to_string(),
            interface_name: "nsm0".to_string(),
        };
        assert_eq!(handle.to_string(), "icmp-responder@nsm0 (42)");
    }
}
