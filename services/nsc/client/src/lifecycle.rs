//! Connection lifecycle control.
//!
//! The controller resolves the client identity, acquires every requested
//! connection through a [`RetryingConnector`], holds them until a termination
//! notification arrives and then releases observability resources. A
//! notification that arrives while still connecting stops the retries.
//! States only ever move forward and a controller runs once:
//!
//! ```text
//! Starting -> Connecting -> Connected -> ShuttingDown -> Terminated
//!                  \__________________________/
//!               retries exhausted or signalled
//! ```

use crate::{
    build_request_specs, ClientError, ClientIdentity, ConnectionHandle, ConnectionOutcome,
    ConnectionRequestSpec, ConnectionRequester, IdentityResolver, IdentitySource, MechanismType,
    NetworkServiceSelector, RetryPolicy, RetryingConnector,
};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Log line marking successful initialization
pub const INITIALIZED_MESSAGE: &str = "nsm client: initialization is completed successfully";

/// Lifecycle states, in the only order they can be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Process started, identity not resolved yet
    Starting,
    /// Requesting connections
    Connecting,
    /// All connections held, waiting for termination
    Connected,
    /// Releasing resources
    ShuttingDown,
    /// Done
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Connected => "connected",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Fatal lifecycle failures
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The requesting client could not be built
    #[error("unable to create the network service client: {0}")]
    Construction(#[source] ClientError),

    /// The retry budget for a network service ran out
    #[error("unable to establish connection with network service {service} after {attempts} attempts: {cause}")]
    ExhaustedRetry {
        /// Network service that could not be reached
        service: String,
        /// Attempts made
        attempts: u32,
        /// Cause of the last attempt
        #[source]
        cause: ClientError,
    },

    /// A termination notification arrived before every connection was held
    #[error("termination requested while connecting to network service {service}")]
    Interrupted {
        /// Network service being requested when the notification arrived
        service: String,
    },

    /// `run` was called on a controller that already left `Starting`
    #[error("lifecycle already {0}; a controller runs once")]
    AlreadyRun(LifecycleState),
}

impl LifecycleError {
    /// Short failure class name for logs
    pub fn class(&self) -> &'static str {
        match self {
            LifecycleError::Construction(_) => "construction",
            LifecycleError::ExhaustedRetry { .. } => "exhausted-retry",
            LifecycleError::Interrupted { .. } => "interrupted",
            LifecycleError::AlreadyRun(_) => "already-run",
        }
    }
}

/// Source of the termination notification
#[async_trait]
pub trait TerminationSignal: Send {
    /// Wait for the next notification
    async fn recv(&mut self);
}

#[async_trait]
impl TerminationSignal for mpsc::Receiver<()> {
    async fn recv(&mut self) {
        if mpsc::Receiver::recv(self).await.is_none() {
            // Every sender is gone without notifying; nothing can wake us anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// Handle on tracing/observability resources
pub trait ObservabilitySink: Send {
    /// Span the lifecycle runs in; the controller drops its reference
    /// before calling [`close`](Self::close)
    fn span(&self) -> Span {
        Span::none()
    }

    /// Flush and close; called exactly once
    fn close(&mut self);
}

/// Closes the sink exactly once, on demand or on drop
struct CleanupGuard<O: ObservabilitySink> {
    sink: O,
    closed: bool,
}

impl<O: ObservabilitySink> CleanupGuard<O> {
    fn new(sink: O) -> Self {
        Self { sink, closed: false }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sink.close();
        }
    }
}

impl<O: ObservabilitySink> Drop for CleanupGuard<O> {
    fn drop(&mut self) {
        self.close();
    }
}

/// What the controller should acquire
#[derive(Debug, Clone)]
pub struct LifecyclePlan {
    /// Explicitly configured identity; empty fields are resolved
    pub identity: ClientIdentity,
    /// Network services to connect, in order
    pub selectors: Vec<NetworkServiceSelector>,
    /// Requested mechanism
    pub mechanism: MechanismType,
    /// Prefix for generated interface names
    pub interface_prefix: String,
    /// Retry policy applied to each network service
    pub policy: RetryPolicy,
}

/// Orchestrates identity resolution, connection acquisition and shutdown
pub struct LifecycleController<S, T, O: ObservabilitySink> {
    resolver: IdentityResolver<S>,
    signal: T,
    observability: CleanupGuard<O>,
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl<S, T, O> LifecycleController<S, T, O>
where
    S: IdentitySource,
    T: TerminationSignal,
    O: ObservabilitySink,
{
    /// Create a controller in the `Starting` state
    pub fn new(resolver: IdentityResolver<S>, signal: T, observability: O) -> Self {
        Self {
            resolver,
            signal,
            observability: CleanupGuard::new(observability),
            state: LifecycleState::Starting,
            history: vec![LifecycleState::Starting],
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Run the lifecycle to completion
    ///
    /// `build` constructs the requester once the identity is known. Returns
    /// `Ok` after a graceful shutdown; fatal failures are returned after
    /// cleanup has already run. A controller runs once: any later call
    /// returns [`LifecycleError::AlreadyRun`] without side effects.
    pub async fn run<R, F>(&mut self, plan: LifecyclePlan, build: F) -> Result<(), LifecycleError>
    where
        R: ConnectionRequester,
        F: FnOnce(&ClientIdentity) -> Result<R, ClientError>,
    {
        if self.state != LifecycleState::Starting {
            return Err(LifecycleError::AlreadyRun(self.state));
        }

        let span = self.observability.sink.span();
        let result = self.acquire_and_hold(plan, build).instrument(span).await;

        if let Err(e) = &result {
            error!(component = "lifecycle", "nsm client: {} failure: {}", e.class(), e);
        }

        self.enter_shutdown();
        self.observability.close();
        self.advance(LifecycleState::Terminated);
        result
    }

    async fn acquire_and_hold<R, F>(&mut self, plan: LifecyclePlan, build: F) -> Result<(), LifecycleError>
    where
        R: ConnectionRequester,
        F: FnOnce(&ClientIdentity) -> Result<R, ClientError>,
    {
        let identity = self.resolver.resolve(plan.identity);
        self.advance(LifecycleState::Connecting);

        let requester = build(&identity).map_err(LifecycleError::Construction)?;
        let specs = build_request_specs(&plan.selectors, plan.mechanism, &plan.interface_prefix, &identity)
            .map_err(LifecycleError::Construction)?;
        let connector = RetryingConnector::new(requester);

        let mut held = Vec::with_capacity(specs.len());
        let acquired = tokio::select! {
            acquired = connect_all(&connector, &specs, &plan.policy, &mut held) => Some(acquired),
            _ = self.signal.recv() => None,
        };

        let failure = match acquired {
            Some(Ok(())) => None,
            Some(Err((service, cause))) => Some(LifecycleError::ExhaustedRetry {
                service,
                attempts: plan.policy.max_attempts(),
                cause,
            }),
            None => {
                info!(component = "lifecycle", "Termination signal received while connecting");
                let service = specs
                    .get(held.len())
                    .map(|spec| spec.service_name.clone())
                    .unwrap_or_default();
                Some(LifecycleError::Interrupted { service })
            }
        };
        if let Some(failure) = failure {
            self.enter_shutdown();
            release(connector.requester(), &held).await;
            return Err(failure);
        }

        self.advance(LifecycleState::Connected);
        info!(component = "lifecycle", "{}", INITIALIZED_MESSAGE);
        info!(component = "lifecycle", "nsm client: all clients connected. Sleeping...");

        self.signal.recv().await;
        info!(component = "lifecycle", "Termination signal received, shutting down");

        self.enter_shutdown();
        release(connector.requester(), &held).await;
        Ok(())
    }

    fn enter_shutdown(&mut self) {
        if self.state < LifecycleState::ShuttingDown {
            self.advance(LifecycleState::ShuttingDown);
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        if next <= self.state {
            warn!(component = "lifecycle", "Ignoring backward lifecycle transition {} -> {}", self.state, next);
            return;
        }
        debug!(component = "lifecycle", "Lifecycle transition {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

/// Connect every spec in order; stops at the first exhausted one
async fn connect_all<R: ConnectionRequester>(
    connector: &RetryingConnector<R>,
    specs: &[ConnectionRequestSpec],
    policy: &RetryPolicy,
    held: &mut Vec<ConnectionHandle>,
) -> Result<(), (String, ClientError)> {
    for spec in specs {
        match connector.connect_retry(spec, policy).await {
            ConnectionOutcome::Established(handle) => held.push(handle),
            ConnectionOutcome::Failed(cause) => return Err((spec.service_name.clone(), cause)),
        }
    }
    Ok(())
}

async fn release<R: ConnectionRequester>(requester: &R, held: &[ConnectionHandle]) {
    for handle in held {
        match requester.close(handle).await {
            Ok(()) => debug!(component = "lifecycle", "Released connection {}", handle),
            Err(e) => warn!(component = "lifecycle", "Failed to release connection {}: {}", handle, e),
        }
    }
}
