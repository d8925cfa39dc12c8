//! gRPC protocol definitions for talosmon
//!
//! Covers the two `machine.MachineService` calls the fact poller issues:
//! - `ServiceList` - state of every system service on a node
//! - `Version` - installed node-agent version
//!
//! Message tags follow `machine/machine.proto` and `common/common.proto`
//! from the Talos API. Fields talosmon never reads are left out; prost
//! skips them on decode.

pub mod common;
pub mod machine;

pub use machine::machine_service_client::MachineServiceClient;
pub use machine::*;

/// gRPC metadata key the Talos API proxy uses to target specific nodes
pub const NODES_METADATA_KEY: &str = "nodes";

/// Default port of the Talos API
pub const DEFAULT_API_PORT: u16 = 50000;
