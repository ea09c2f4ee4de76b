//! Network service client: identity, bounded-retry connection requests and
//! lifecycle control.
//!
//! This crate holds everything a sidecar needs to acquire network service
//! connections from the mesh control plane and keep them until it is told to
//! stop. Transport, signals and observability are reached through traits so
//! the binary decides how they are realized.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nsc_client::{
//!     ClientIdentity, GrpcConnectionRequester, IdentityResolver, LifecycleController,
//!     LifecyclePlan, MechanismType, NetworkServiceSelector, ObservabilitySink, RetryPolicy,
//!     SystemIdentitySource,
//! };
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! struct NoopSink;
//!
//! impl ObservabilitySink for NoopSink {
//!     fn close(&mut self) {}
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (_stop_tx, stop_rx) = mpsc::channel::<()>(1);
//! let mut controller = LifecycleController::new(
//!     IdentityResolver::new(SystemIdentitySource),
//!     stop_rx,
//!     NoopSink,
//! );
//!
//! let plan = LifecyclePlan {
//!     identity: ClientIdentity::default(),
//!     selectors: vec![NetworkServiceSelector::new("secure-intranet")],
//!     mechanism: MechanismType::Kernel,
//!     interface_prefix: "nsm".to_string(),
//!     policy: RetryPolicy::new(10, Duration::from_secs(5))?,
//! };
//!
//! controller
//!     .run(plan, |_| GrpcConnectionRequester::connect("http://127.0.0.1:5001", Duration::from_secs(15)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod grpc;
pub mod identity;
pub mod lifecycle;
pub mod request;
pub mod retry;
pub mod selector;

pub use error::ClientError;
pub use grpc::GrpcConnectionRequester;
pub use identity::{ClientIdentity, IdentityResolver, IdentitySource, SystemIdentitySource};
pub use lifecycle::{
    LifecycleController, LifecycleError, LifecyclePlan, LifecycleState, ObservabilitySink,
    TerminationSignal,
};
pub use request::{ConnectionHandle, ConnectionRequestSpec, ConnectionRequester, MechanismType};
pub use retry::{ConnectionOutcome, RetryPolicy, RetryingConnector};
pub use selector::{build_request_specs, NetworkServiceSelector};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    pub fn spec(service: &str) -> ConnectionRequestSpec {
        ConnectionRequestSpec {
            service_name: service.to_string(),
            mechanism_type: MechanismType::Kernel,
            interface_name: "nsm0".to_string(),
            interface_label: request::PRIMARY_INTERFACE_LABEL.to_string(),
            labels: BTreeMap::new(),
            identity: ClientIdentity::default(),
        }
    }

    /// Fails a fixed number of times, then succeeds
    pub struct ScriptedRequester {
        succeed_on: Option<u32>,
        failing_service: Option<String>,
        pub calls: Arc<AtomicU32>,
        pub attempt_times: Arc<Mutex<Vec<Instant>>>,
        pub released: Arc<Mutex<Vec<String>>>,
        pub identities: Arc<Mutex<Vec<ClientIdentity>>>,
    }

    impl ScriptedRequester {
        fn with(succeed_on: Option<u32>, failing_service: Option<String>) -> Self {
            Self {
                succeed_on,
                failing_service,
                calls: Arc::new(AtomicU32::new(0)),
                attempt_times: Arc::new(Mutex::new(Vec::new())),
                released: Arc::new(Mutex::new(Vec::new())),
                identities: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn always_failing() -> Self {
            Self::with(None, None)
        }

        pub fn succeeding_on(attempt: u32) -> Self {
            Self::with(Some(attempt), None)
        }

        pub fn failing_service(service: &str) -> Self {
            Self::with(Some(1), Some(service.to_string()))
        }
    }

    #[async_trait]
    impl ConnectionRequester for ScriptedRequester {
        async fn request(&self, spec: &ConnectionRequestSpec) -> Result<ConnectionHandle, ClientError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempt_times.lock().unwrap().push(Instant::now());
            self.identities.lock().unwrap().push(spec.identity.clone());

            let rejected = self.failing_service.as_deref() == Some(spec.service_name.as_str());
            match self.succeed_on {
                Some(n) if attempt >= n && !rejected => Ok(ConnectionHandle {
                    id: format!("conn-{}", attempt),
                    network_service: spec.service_name.clone(),
                    interface_name: spec.interface_name.clone(),
                }),
                _ => Err(ClientError::Unavailable(format!("scripted failure on attempt {}", attempt))),
            }
        }

        async fn close(&self, handle: &ConnectionHandle) -> Result<(), ClientError> {
            self.released.lock().unwrap().push(handle.network_service.clone());
            Ok(())
        }
    }

    /// Identity source with fixed values
    pub struct FixedIdentity;

    impl IdentitySource for FixedIdentity {
        fn host_identifier(&self) -> Result<String, ClientError> {
            Ok("fixed-pod".to_string())
        }

        fn namespace(&self) -> String {
            "fixed-ns".to_string()
        }
    }

    /// Counts close calls
    pub struct CountingSink {
        pub closes: Arc<AtomicU32>,
    }

    impl ObservabilitySink for CountingSink {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
