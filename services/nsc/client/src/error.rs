//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or driving network service requests
#[derive(Error, Debug)]
pub enum ClientError {
    /// Control-plane endpoint could not be parsed
    #[error("invalid control-plane endpoint {endpoint}: {reason}")]
    Endpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Parser message
        reason: String,
    },

    /// Malformed network service selector
    #[error("invalid network service selector {selector:?}: {reason}")]
    Selector {
        /// Offending selector text
        selector: String,
        /// What was wrong with it
        reason: String,
    },

    /// Neither a selector list nor a client network service was configured
    #[error("no network service configured")]
    NoNetworkService,

    /// Unknown mechanism type name
    #[error("unknown mechanism type {0:?}")]
    Mechanism(String),

    /// Retry policy violates its bounds
    #[error("invalid retry policy: {0}")]
    Policy(String),

    /// Control plane could not be reached
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Control plane answered with an error status
    #[error("request rejected: {0}")]
    Rejected(#[from] tonic::Status),

    /// Attempt exceeded the request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Host identifier lookup failed
    #[error("host identifier unavailable: {0}")]
    HostIdentifier(String),
}
