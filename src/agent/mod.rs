//! Node-agent access
//!
//! `NodeAgent` is the seam between the fact poller and the node-management
//! API. `talos` implements it over gRPC; tests substitute fakes.

pub mod poller;
pub mod talos;

pub use poller::{FactPoller, DEFAULT_POLL_INTERVAL, DEFAULT_RPC_TIMEOUT};
pub use talos::{TalosConnector, TalosNodeClient};

use crate::machine::ServiceReport;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Remote operations the poller needs from the node agent. Every call is
/// scoped to the single node named by `node`.
#[async_trait]
pub trait NodeAgent: Send + Sync {
    async fn service_list(&self, node: &str) -> Result<Vec<ServiceReport>>;

    /// Installed agent version tag, e.g. `v1.2.3`.
    async fn version(&self, node: &str) -> Result<String>;

    /// Releases the handle. Later calls fail with `TransientRpc`.
    fn close(&self);
}

/// Hands out one client handle per machine.
pub trait AgentConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn NodeAgent>>;
}
