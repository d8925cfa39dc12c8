//! gRPC client for the Talos machine API

use super::{AgentConnector, NodeAgent};
use crate::config::talosconfig::TalosContext;
use crate::machine::{ServiceReport, ServiceState};
use crate::{Result, TalosmonError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talosmon_proto::common::Empty;
use talosmon_proto::{
    MachineServiceClient, ServiceListResponse, VersionResponse, DEFAULT_API_PORT,
    NODES_METADATA_KEY,
};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, lazily-connected channel to the API endpoints of one cluster.
pub struct TalosConnector {
    channel: Channel,
}

impl TalosConnector {
    /// Builds a balanced mTLS channel over every endpoint of `context`.
    /// Nothing is dialed until the first RPC.
    pub fn dial(context: &TalosContext) -> Result<Self> {
        if context.endpoints.is_empty() {
            return Err(TalosmonError::RpcDialFailed(
                "client context has no endpoints".to_string(),
            ));
        }

        let ca = decode_pem("ca", &context.ca)?;
        let crt = decode_pem("crt", &context.crt)?;
        let key = decode_pem("key", &context.key)?;

        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(crt, key));

        let endpoints = context
            .endpoints
            .iter()
            .map(|ep| {
                let uri = endpoint_uri(ep);
                Endpoint::from_shared(uri.clone())
                    .and_then(|e| e.tls_config(tls.clone()))
                    .map(|e| e.connect_timeout(CONNECT_TIMEOUT))
                    .map_err(|e| {
                        TalosmonError::RpcDialFailed(format!("invalid endpoint {}: {}", uri, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(endpoints = ?context.endpoints, "Configured node-agent channel");

        Ok(Self {
            channel: Channel::balance_list(endpoints.into_iter()),
        })
    }
}

impl AgentConnector for TalosConnector {
    fn connect(&self) -> Result<Arc<dyn NodeAgent>> {
        Ok(Arc::new(TalosNodeClient::new(self.channel.clone())))
    }
}

/// Per-machine handle onto the shared channel.
pub struct TalosNodeClient {
    client: MachineServiceClient<Channel>,
    closed: AtomicBool,
}

impl TalosNodeClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: MachineServiceClient::new(channel),
            closed: AtomicBool::new(false),
        }
    }

    fn client(&self) -> Result<MachineServiceClient<Channel>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TalosmonError::TransientRpc("client closed".to_string()));
        }
        Ok(self.client.clone())
    }
}

#[async_trait]
impl NodeAgent for TalosNodeClient {
    async fn service_list(&self, node: &str) -> Result<Vec<ServiceReport>> {
        let response = self
            .client()?
            .service_list(node_request(node)?)
            .await
            .map_err(rpc_error)?
            .into_inner();

        services_from_response(response)
    }

    async fn version(&self, node: &str) -> Result<String> {
        let response = self
            .client()?
            .version(node_request(node)?)
            .await
            .map_err(rpc_error)?
            .into_inner();

        version_from_response(response)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed node-agent client handle");
        }
    }
}

/// Flattens every message's services. A message whose metadata carries an
/// error fails the whole call.
fn services_from_response(response: ServiceListResponse) -> Result<Vec<ServiceReport>> {
    let mut reports = Vec::new();
    for msg in response.messages {
        if let Some(meta) = msg.metadata.as_ref().filter(|m| m.failed()) {
            return Err(TalosmonError::TransientRpc(meta.error.clone()));
        }
        reports.extend(
            msg.services
                .into_iter()
                .map(|s| ServiceReport::new(s.id, ServiceState::from_reported(&s.state))),
        );
    }
    Ok(reports)
}

/// First non-empty version tag. No tag at all is a failure, so the last
/// known version is kept.
fn version_from_response(response: VersionResponse) -> Result<String> {
    for msg in response.messages {
        if let Some(meta) = msg.metadata.as_ref().filter(|m| m.failed()) {
            return Err(TalosmonError::TransientRpc(meta.error.clone()));
        }
        if let Some(info) = msg.version.filter(|v| !v.tag.is_empty()) {
            return Ok(info.tag);
        }
    }

    Err(TalosmonError::TransientRpc(
        "response carried no version".to_string(),
    ))
}

fn node_request(node: &str) -> Result<tonic::Request<Empty>> {
    let value = MetadataValue::<Ascii>::try_from(node).map_err(|e| {
        TalosmonError::InvalidArgument(format!("node name {:?} is not valid metadata: {}", node, e))
    })?;

    let mut request = tonic::Request::new(Empty {});
    request.metadata_mut().insert(NODES_METADATA_KEY, value);
    Ok(request)
}

fn rpc_error(status: tonic::Status) -> TalosmonError {
    TalosmonError::TransientRpc(format!("{:?}: {}", status.code(), status.message()))
}

fn decode_pem(field: &str, encoded: &str) -> Result<Vec<u8>> {
    if encoded.trim().is_empty() {
        return Err(TalosmonError::RpcDialFailed(format!(
            "client context is missing {}",
            field
        )));
    }
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| TalosmonError::RpcDialFailed(format!("failed to decode {}: {}", field, e)))
}

/// Turns a configured endpoint into an `https://host:port` URI, adding the
/// default API port when none is given.
pub fn endpoint_uri(endpoint: &str) -> String {
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    if endpoint.parse::<SocketAddr>().is_ok() {
        return format!("https://{}", endpoint);
    }
    match endpoint.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("https://[{}]:{}", ip, DEFAULT_API_PORT),
        Ok(IpAddr::V4(ip)) => format!("https://{}:{}", ip, DEFAULT_API_PORT),
        Err(_) if endpoint.contains(':') => format!("https://{}", endpoint),
        Err(_) => format!("https://{}:{}", endpoint, DEFAULT_API_PORT),
    }
}
