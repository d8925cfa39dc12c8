//! Periodic refresh of service states and agent version for one machine

use super::NodeAgent;
use crate::machine::FactSnapshot;
use crate::{Result, TalosmonError};
use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Must stay below the poll interval so RPCs never pile up.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(1500);

pub struct FactPoller {
    node: String,
    agent: Arc<dyn NodeAgent>,
    facts: Arc<ArcSwap<FactSnapshot>>,
    rpc_timeout: Duration,
    services_failing: AtomicBool,
    version_failing: AtomicBool,
}

impl FactPoller {
    /// `facts` is the snapshot this poller publishes into; it is the only writer.
    pub fn new(
        node: impl Into<String>,
        agent: Arc<dyn NodeAgent>,
        facts: Arc<ArcSwap<FactSnapshot>>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            node: node.into(),
            agent,
            facts,
            rpc_timeout,
            services_failing: AtomicBool::new(false),
            version_failing: AtomicBool::new(false),
        }
    }

    /// Runs one tick: `ServiceList` and `Version` concurrently, each
    /// applied independently of the other's outcome.
    pub async fn poll_once(&self) {
        let (services, version) = tokio::join!(
            self.call(self.agent.service_list(&self.node)),
            self.call(self.agent.version(&self.node)),
        );

        match services {
            Ok(reports) => {
                self.publish(self.facts.load().with_services(reports));
                self.note_success(&self.services_failing, "ServiceList");
            }
            Err(e) => {
                // Known services go unknown rather than freezing on stale states.
                self.publish(self.facts.load().degraded());
                self.note_failure(&self.services_failing, "ServiceList", &e);
            }
        }

        match version {
            Ok(tag) => {
                if self.facts.load().version != tag {
                    debug!(machine = %self.node, version = %tag, "Agent version changed");
                    self.publish(self.facts.load().with_version(tag));
                }
                self.note_success(&self.version_failing, "Version");
            }
            Err(e) => self.note_failure(&self.version_failing, "Version", &e),
        }
    }

    /// The polling loop. The first poll happens immediately, then once per
    /// `interval` until `token` is cancelled. Cancellation drops any
    /// in-flight RPC. `interval` must be non-zero.
    pub async fn run(self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }

        debug!(machine = %self.node, "Fact poller stopped");
    }

    async fn call<T>(&self, rpc: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.rpc_timeout, rpc).await {
            Ok(result) => result,
            Err(_) => Err(TalosmonError::TransientRpc(format!(
                "timed out after {:?}",
                self.rpc_timeout
            ))),
        }
    }

    fn publish(&self, snapshot: FactSnapshot) {
        self.facts.store(Arc::new(snapshot));
    }

    fn note_success(&self, failing: &AtomicBool, rpc: &str) {
        if failing.swap(false, Ordering::Relaxed) {
            info!(machine = %self.node, rpc, "Node-agent RPC recovered");
        }
    }

    fn note_failure(&self, failing: &AtomicBool, rpc: &str, err: &TalosmonError) {
        if failing.swap(true, Ordering::Relaxed) {
            trace!(machine = %self.node, rpc, "Node-agent RPC still failing: {}", err);
        } else {
            warn!(machine = %self.node, rpc, "Node-agent RPC failed: {}", err);
        }
    }
}
