//! Per-machine identity and live status

pub mod aggregator;
pub mod spec;
pub mod status;

pub use aggregator::{MachineAggregator, Timing};
pub use spec::{AddressKind, MachineSpec};
pub use status::{FactSnapshot, ServiceReport, ServiceState};
