use crate::machine::AddressKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalosmonError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Failed to create node-agent client: {0}")]
    RpcDialFailed(String),

    #[error("Address {address} cannot be used for {kind} probing: {reason}")]
    AddressInvalid {
        kind: AddressKind,
        address: String,
        reason: String,
    },

    #[error("Insufficient privilege to send ICMP echo requests: {0}")]
    PermissionDenied(String),

    #[error("Failed to start {kind} prober: {source}")]
    ProbeInit {
        kind: AddressKind,
        #[source]
        source: Box<TalosmonError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Node-agent RPC failed: {0}")]
    TransientRpc(String),

    #[error("ICMP echo failed: {0}")]
    TransientIcmp(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TalosmonError {
    pub fn probe_init(kind: AddressKind, source: TalosmonError) -> Self {
        TalosmonError::ProbeInit {
            kind,
            source: Box::new(source),
        }
    }

    /// The address kind of a `ProbeInit` failure, if this is one.
    pub fn probe_kind(&self) -> Option<AddressKind> {
        match self {
            TalosmonError::ProbeInit { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TalosmonError>;
