//! Fleet registry
//!
//! Owns one `MachineAggregator` per configured machine, in configuration
//! order. Which machine the operator is looking at is a UI concern and
//! is not tracked here.

use crate::agent::AgentConnector;
use crate::machine::{MachineAggregator, MachineSpec, Timing};
use crate::probe::EchoFactory;
use crate::Result;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Registry {
    machines: Vec<MachineAggregator>,
    token: CancellationToken,
}

impl Registry {
    /// Starts an aggregator per spec, in order. On the first failure every
    /// aggregator already started is stopped and that failure is returned.
    pub async fn build(
        specs: Vec<MachineSpec>,
        connector: &dyn AgentConnector,
        echo: &dyn EchoFactory,
        timing: Timing,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        timing.validate()?;

        let token = shutdown.child_token();
        let mut machines = Vec::with_capacity(specs.len());

        for spec in specs {
            let name = spec.name.clone();
            let started = match connector.connect() {
                Ok(agent) => MachineAggregator::start(spec, agent, echo, timing, &token).await,
                Err(e) => Err(e),
            };

            match started {
                Ok(machine) => machines.push(machine),
                Err(e) => {
                    warn!(machine = %name, "Failed to start machine, rolling back fleet: {}", e);
                    join_all(machines.iter().map(|m| m.stop())).await;
                    token.cancel();
                    return Err(e);
                }
            }
        }

        info!(machines = machines.len(), "Fleet started");

        Ok(Self { machines, token })
    }

    pub fn get(&self, index: usize) -> Option<&MachineAggregator> {
        self.machines.get(index)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MachineAggregator> {
        self.machines.iter()
    }

    /// Stops every aggregator concurrently. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        join_all(self.machines.iter().map(|m| m.stop())).await;
        info!(machines = self.machines.len(), "Fleet stopped");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
