//! Network service selectors.
//!
//! A selector names one network service the client wants, with an optional
//! interface name and labels: `service[/interface][?key=value&key=value]`.
//! Lists are comma separated.

use crate::request::{PRIMARY_INTERFACE_LABEL, SECONDARY_INTERFACE_LABEL};
use crate::{ClientError, ClientIdentity, ConnectionRequestSpec, MechanismType};
use std::collections::BTreeMap;

/// Prefix for generated interface names (`nsm0`, `nsm1`, ...)
pub const DEFAULT_INTERFACE_PREFIX: &str = "nsm";

/// One requested network service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServiceSelector {
    /// Network service name
    pub service: String,
    /// Explicit interface name, generated when absent
    pub interface: Option<String>,
    /// Selector labels
    pub labels: BTreeMap<String, String>,
}

impl NetworkServiceSelector {
    /// Selector for a bare service name
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            interface: None,
            labels: BTreeMap::new(),
        }
    }

    /// Parse a single selector
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let text = text.trim();
        let (head, query) = match text.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (text, None),
        };
        let (service, interface) = match head.split_once('/') {
            Some((service, interface)) => (service.trim(), Some(interface.trim())),
            None => (head.trim(), None),
        };

        if service.is_empty() {
            return Err(selector_error(text, "empty service name"));
        }
        if interface.is_some_and(str::is_empty) {
            return Err(selector_error(text, "empty interface name"));
        }

        let labels = match query {
            Some(query) => parse_labels(query, '&').map_err(|reason| selector_error(text, &reason))?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            service: service.to_string(),
            interface: interface.map(str::to_string),
            labels,
        })
    }

    /// Parse a comma separated selector list; blank entries are skipped
    pub fn parse_list(text: &str) -> Result<Vec<Self>, ClientError> {
        text.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Parse `key=value` pairs separated by `separator`
pub fn parse_labels(text: &str, separator: char) -> Result<BTreeMap<String, String>, String> {
    let mut labels = BTreeMap::new();
    for pair in text.split(separator).filter(|pair| !pair.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("label {:?} is not key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("label {:?} has an empty key", pair));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

fn selector_error(selector: &str, reason: &str) -> ClientError {
    ClientError::Selector {
        selector: selector.to_string(),
        reason: reason.to_string(),
    }
}

/// Build one request spec per selector, in order
///
/// The first selector is the primary interface; the rest are secondary.
pub fn build_request_specs(
    selectors: &[NetworkServiceSelector],
    mechanism_type: MechanismType,
    interface_prefix: &str,
    identity: &ClientIdentity,
) -> Result<Vec<ConnectionRequestSpec>, ClientError> {
    if selectors.is_empty() {
        return Err(ClientError::NoNetworkService);
    }

    Ok(selectors
        .iter()
        .enumerate()
        .map(|(index, selector)| ConnectionRequestSpec {
            service_name: selector.service.clone(),
            mechanism_type,
            interface_name: selector
                .interface
                .clone()
                .unwrap_or_else(|| format!("{}{}", interface_prefix, index)),
            interface_label: if index == 0 {
                PRIMARY_INTERFACE_LABEL.to_string()
            } else {
                SECONDARY_INTERFACE_LABEL.to_string()
            },
            labels: selector.labels.clone(),
            identity: identity.clone(),
        })
        .collect())
}
