//! Client identity resolution.
//!
//! The identity is best-effort metadata attached to every connection request.
//! Explicitly configured values always win; the host identifier and the
//! deployment namespace only fill fields that were left empty.

use crate::ClientError;
use tracing::{debug, info};

/// Namespace used when the deployment context does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Logical identity of this client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Pod name (empty when unknown)
    pub pod_name: String,
    /// Namespace the pod runs in
    pub namespace: String,
}

impl ClientIdentity {
    /// Create an identity from explicit values
    pub fn new(pod_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            pod_name: pod_name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Where fallback identity values come from
pub trait IdentitySource: Send + Sync {
    /// Look up the local host identifier (pod name in a cluster)
    fn host_identifier(&self) -> Result<String, ClientError>;

    /// Namespace from the ambient deployment context
    fn namespace(&self) -> String;
}

/// Identity source backed by the running host
#[derive(Debug, Clone, Default)]
pub struct SystemIdentitySource;

impl IdentitySource for SystemIdentitySource {
    fn host_identifier(&self) -> Result<String, ClientError> {
        let name = match std::fs::read_to_string(HOSTNAME_PATH) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) => {
                debug!(component = "identity", "Failed to read {}: {}, falling back to HOSTNAME", HOSTNAME_PATH, e);
                std::env::var("HOSTNAME")
                    .map_err(|e| ClientError::HostIdentifier(format!("HOSTNAME: {}", e)))?
            }
        };

        if name.is_empty() {
            return Err(ClientError::HostIdentifier("hostname is empty".to_string()));
        }
        Ok(name)
    }

    fn namespace(&self) -> String {
        std::env::var("NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

/// Fills empty identity fields from an [`IdentitySource`]
#[derive(Debug, Clone)]
pub struct IdentityResolver<S> {
    source: S,
}

impl<S: IdentitySource> IdentityResolver<S> {
    /// Create a resolver over the given source
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Resolve the identity, keeping every explicitly configured field
    pub fn resolve(&self, explicit: ClientIdentity) -> ClientIdentity {
        let mut identity = explicit;

        if identity.pod_name.is_empty() {
            match self.source.host_identifier() {
                Ok(pod_name) => identity.pod_name = pod_name,
                Err(e) => info!(component = "identity", "Failed to get current pod name from hostname: {}", e),
            }
        }

        if identity.namespace.is_empty() {
            identity.namespace = self.source.namespace();
        }

        debug!(
            component = "identity",
            "Resolved client identity: pod_name={:?}, namespace={:?}",
            identity.pod_name, identity.namespace
        );
        identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FixedSource {
        host: Option<&'static str>,
        namespace: &'static str,
        lookups: Arc<AtomicU32>,
    }

    impl IdentitySource for FixedSource {
        fn host_identifier(&self) -> Result<String, ClientError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.host
                .map(str::to_string)
                .ok_or_else(|| ClientError::HostIdentifier("no hostname".to_string()))
        }

        fn namespace(&self) -> String {
            self.namespace.to_string()
        }
    }

    fn resolver(host: Option<&'static str>) -> (IdentityResolver<FixedSource>, Arc<AtomicU32>) {
        let lookups = Arc::new(AtomicU32::new(0));
        let source = FixedSource {
            host,
            namespace: "mesh-system",
            lookups: lookups.clone(),
        };
        (IdentityResolver::new(source), lookups)
    }

    #[test]
    fn test_explicit_identity_is_kept() {
        for host in [Some("web-7d9f"), None] {
            let (resolver, lookups) = resolver(host);
            let identity = resolver.resolve(ClientIdentity::new("explicit-pod", "explicit-ns"));

            assert_eq!(identity, ClientIdentity::new("explicit-pod", "explicit-ns"));
            assert_eq!(lookups.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_empty_fields_are_filled() {
        let (resolver, lookups) = resolver(Some("web-7d9f"));
        let identity = resolver.resolve(ClientIdentity::default());

        assert_eq!(identity.pod_name, "web-7d9f");
        assert_eq!(identity.namespace, "mesh-system");
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_host_lookup_failure_is_not_fatal() {
        let (resolver, _) = resolver(None);
        let identity = resolver.resolve(ClientIdentity::new("", "explicit-ns"));

        assert!(identity.pod_name.is_empty());
        assert_eq!(identity.namespace, "explicit-ns");
    }
}
