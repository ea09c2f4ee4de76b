//! gRPC requester talking to the local mesh manager.
//!
//! Messages are declared with prost derives instead of generated from
//! `.proto` files; only the fields the client sends or reads are modeled.

use crate::{ClientError, ConnectionHandle, ConnectionRequestSpec, ConnectionRequester};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;
use uuid::Uuid;

const REQUEST_PATH: &str = "/networkservice.NetworkService/Request";
const CLOSE_PATH: &str = "/networkservice.NetworkService/Close";

/// Mechanism class for interfaces local to the pod
pub const LOCAL_MECHANISM_CLASS: &str = "LOCAL";

/// Mechanism parameter carrying the interface name
pub const INTERFACE_NAME_KEY: &str = "name";

/// Mechanism parameter carrying the interface description
pub const INTERFACE_DESCRIPTION_KEY: &str = "description";

/// Connection label carrying the pod name
pub const POD_NAME_LABEL: &str = "podName";

/// Connection label carrying the namespace
pub const NAMESPACE_LABEL: &str = "namespace";

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection mechanism
#[derive(Clone, PartialEq, prost::Message)]
pub struct Mechanism {
    /// Mechanism class
    #[prost(string, tag = "1")]
    pub cls: String,
    /// Mechanism type, e.g. `KERNEL_INTERFACE`
    #[prost(string, tag = "2")]
    pub r#type: String,
    /// Mechanism parameters
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
}

/// Network service connection
#[derive(Clone, PartialEq, prost::Message)]
pub struct Connection {
    /// Connection id
    #[prost(string, tag = "1")]
    pub id: String,
    /// Network service name
    #[prost(string, tag = "2")]
    pub network_service: String,
    /// Selected mechanism
    #[prost(message, optional, tag = "3")]
    pub mechanism: Option<Mechanism>,
    /// Connection labels
    #[prost(map = "string, string", tag = "4")]
    pub labels: HashMap<String, String>,
}

/// Request for a network service connection
#[derive(Clone, PartialEq, prost::Message)]
pub struct NetworkServiceRequest {
    /// Requested connection
    #[prost(message, optional, tag = "1")]
    pub connection: Option<Connection>,
    /// Acceptable mechanisms, most preferred first
    #[prost(message, repeated, tag = "2")]
    pub mechanism_preferences: Vec<Mechanism>,
}

/// Build the wire request for a spec with the given connection id
pub fn build_request(spec: &ConnectionRequestSpec, connection_id: String) -> NetworkServiceRequest {
    let mut labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !spec.identity.pod_name.is_empty() {
        labels.insert(POD_NAME_LABEL.to_string(), spec.identity.pod_name.clone());
    }
    if !spec.identity.namespace.is_empty() {
        labels.insert(NAMESPACE_LABEL.to_string(), spec.identity.namespace.clone());
    }

    let mechanism = Mechanism {
        cls: LOCAL_MECHANISM_CLASS.to_string(),
        r#type: spec.mechanism_type.as_str().to_string(),
        parameters: HashMap::from([
            (INTERFACE_NAME_KEY.to_string(), spec.interface_name.clone()),
            (INTERFACE_DESCRIPTION_KEY.to_string(), spec.interface_label.clone()),
        ]),
    };

    NetworkServiceRequest {
        connection: Some(Connection {
            id: connection_id,
            network_service: spec.service_name.clone(),
            mechanism: None,
            labels,
        }),
        mechanism_preferences: vec![mechanism],
    }
}

/// Requester backed by a tonic channel to the mesh manager
#[derive(Debug, Clone)]
pub struct GrpcConnectionRequester {
    channel: Channel,
    request_timeout: Duration,
}

impl GrpcConnectionRequester {
    /// Create a requester for `endpoint`
    ///
    /// The channel connects lazily, so an unreachable manager shows up as a
    /// failed attempt rather than a construction error. Must be called from
    /// within a tokio runtime.
    pub fn connect(endpoint: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| ClientError::Endpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .connect_lazy();

        debug!("Created control-plane channel to {}", endpoint);
        Ok(Self {
            channel,
            request_timeout,
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp, ClientError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let call = async {
            let mut grpc = tonic::client::Grpc::new(self.channel.clone());
            grpc.ready()
                .await
                .map_err(|e| ClientError::Unavailable(e.to_string()))?;

            let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
            let response = grpc
                .unary(tonic::Request::new(message), PathAndQuery::from_static(path), codec)
                .await?;
            Ok::<Resp, ClientError>(response.into_inner())
        };

        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))?
    }
}

#[async_trait]
impl ConnectionRequester for GrpcConnectionRequester {
    async fn request(&self, spec: &ConnectionRequestSpec) -> Result<ConnectionHandle, ClientError> {
        let connection_id = Uuid::new_v4().to_string();
        let request = build_request(spec, connection_id.clone());

        let connection: Connection = self.unary(REQUEST_PATH, request).await?;

        let interface_name = connection
            .mechanism
            .as_ref()
            .and_then(|m| m.parameters.get(INTERFACE_NAME_KEY))
            .cloned()
            .unwrap_or_else(|| spec.interface_name.clone());
        let id = if connection.id.is_empty() {
            connection_id
        } else {
            connection.id
        };

        Ok(ConnectionHandle {
            id,
            network_service: spec.service_name.clone(),
            interface_name,
        })
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), ClientError> {
        let connection = Connection {
            id: handle.id.clone(),
            network_service: handle.network_service.clone(),
            mechanism: None,
            labels: HashMap::new(),
        };
        self.unary::<Connection, ()>(CLOSE_PATH, connection).await
    }
}
