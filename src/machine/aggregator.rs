//! Machine aggregator
//!
//! Folds one liveness prober per configured address kind and one fact
//! poller into a single status object. Writers are the background tasks;
//! readers are any number of callers of the accessors, which only ever
//! take a short read lock or an atomic snapshot load and never block on
//! I/O. Clones share the same state.

use super::{AddressKind, FactSnapshot, MachineSpec, ServiceState};
use crate::agent::{FactPoller, NodeAgent, DEFAULT_POLL_INTERVAL, DEFAULT_RPC_TIMEOUT};
use crate::probe::{
    EchoFactory, LivenessCell, LivenessProber, DEFAULT_ECHO_INTERVAL, DEFAULT_STALENESS,
};
use crate::{Result, TalosmonError};
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Cadences and thresholds for one machine's probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Replies older than this mark an address down
    pub staleness: Duration,
    pub poll_interval: Duration,
    pub echo_interval: Duration,
    /// Per-RPC bound, kept below `poll_interval`
    pub rpc_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            staleness: DEFAULT_STALENESS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            echo_interval: DEFAULT_ECHO_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

impl Timing {
    /// Every duration must be non-zero and `rpc_timeout` must stay below
    /// `poll_interval`.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("staleness", self.staleness),
            ("poll_interval", self.poll_interval),
            ("echo_interval", self.echo_interval),
            ("rpc_timeout", self.rpc_timeout),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.is_zero()) {
            return Err(TalosmonError::InvalidArgument(format!(
                "{} must be greater than zero",
                name
            )));
        }

        if self.rpc_timeout >= self.poll_interval {
            return Err(TalosmonError::InvalidArgument(format!(
                "rpc_timeout ({:?}) must be less than poll_interval ({:?})",
                self.rpc_timeout, self.poll_interval
            )));
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct MachineAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    spec: MachineSpec,
    liveness: BTreeMap<AddressKind, Arc<LivenessCell>>,
    facts: Arc<ArcSwap<FactSnapshot>>,
    agent: Arc<dyn NodeAgent>,
    probers: Vec<LivenessProber>,
    /// Holds the poller task
    tasks: TaskTracker,
    token: CancellationToken,
    staleness: Duration,
    stopped: AtomicBool,
    /// Bit per address kind already reported as unconfigured
    unconfigured_logged: AtomicU8,
}

impl MachineAggregator {
    /// Starts a prober for every address in `spec`, then the fact poller.
    ///
    /// `timing` is validated first; an invalid one yields `InvalidArgument`.
    /// If any prober fails to start, the ones already running are stopped
    /// and `agent` is closed before `ProbeInit` is returned.
    pub async fn start(
        spec: MachineSpec,
        agent: Arc<dyn NodeAgent>,
        echo: &dyn EchoFactory,
        timing: Timing,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        if spec.name.trim().is_empty() {
            agent.close();
            return Err(TalosmonError::InvalidArgument(
                "machine spec has an empty name".to_string(),
            ));
        }
        if let Err(e) = timing.validate() {
            agent.close();
            return Err(e);
        }

        let token = shutdown.child_token();
        let mut liveness = BTreeMap::new();
        let mut probers = Vec::with_capacity(spec.addresses.len());

        for (&kind, &addr) in &spec.addresses {
            let cell = Arc::new(LivenessCell::new());
            let recorder = cell.clone();

            let started = LivenessProber::start(
                kind,
                addr,
                echo,
                timing.echo_interval,
                &token,
                move |at| recorder.record(at),
            )
            .await;

            match started {
                Ok(prober) => {
                    liveness.insert(kind, cell);
                    probers.push(prober);
                }
                Err(e) => {
                    warn!(machine = %spec.name, kind = %kind, addr = %addr, "Failed to start prober: {}", e);
                    for prober in &probers {
                        prober.stop().await;
                    }
                    token.cancel();
                    agent.close();
                    return Err(TalosmonError::probe_init(kind, e));
                }
            }
        }

        let facts = Arc::new(ArcSwap::from_pointee(FactSnapshot::default()));
        let poller = FactPoller::new(
            spec.name.clone(),
            agent.clone(),
            facts.clone(),
            timing.rpc_timeout,
        );
        let tasks = TaskTracker::new();
        tasks.spawn(poller.run(timing.poll_interval, token.clone()));
        tasks.close();

        info!(
            machine = %spec.name,
            kinds = ?liveness.keys().collect::<Vec<_>>(),
            "Started machine aggregator"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                spec,
                liveness,
                facts,
                agent,
                probers,
                tasks,
                token,
                staleness: timing.staleness,
                stopped: AtomicBool::new(false),
                unconfigured_logged: AtomicU8::new(0),
            }),
        })
    }

    pub fn spec(&self) -> &MachineSpec {
        &self.inner.spec
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    /// Whether `kind` answered an echo within the staleness threshold.
    /// Unconfigured kinds are always down.
    pub fn ping_up(&self, kind: AddressKind) -> bool {
        self.ping_up_at(kind, Instant::now())
    }

    pub fn ping_up_at(&self, kind: AddressKind, now: Instant) -> bool {
        match self.inner.liveness.get(&kind) {
            Some(cell) => cell.is_up_at(now, self.inner.staleness),
            None => {
                self.note_unconfigured(kind);
                false
            }
        }
    }

    pub fn last_reply_at(&self, kind: AddressKind) -> Option<Instant> {
        self.inner
            .liveness
            .get(&kind)
            .and_then(|cell| cell.last_reply_at())
    }

    pub fn service_state(&self, id: &str) -> ServiceState {
        self.inner.facts.load().service_state(id)
    }

    /// Last successfully polled agent version, empty if none yet.
    pub fn version(&self) -> String {
        self.inner.facts.load().version.clone()
    }

    /// The whole fact snapshot, consistent within itself.
    pub fn facts(&self) -> Arc<FactSnapshot> {
        self.inner.facts.load_full()
    }

    /// Stops every prober and the poller, waits for their tasks, and closes
    /// the node-agent handle. Idempotent; accessors keep returning the last
    /// observed values afterwards.
    pub async fn stop(&self) {
        let first = !self.inner.stopped.swap(true, Ordering::AcqRel);
        self.inner.token.cancel();

        for prober in &self.inner.probers {
            prober.stop().await;
        }

        self.inner.tasks.wait().await;
        self.inner.agent.close();

        if first {
            info!(machine = %self.name(), "Stopped machine aggregator");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// True while any background task of this machine is still alive.
    pub fn has_running_tasks(&self) -> bool {
        self.inner.probers.iter().any(LivenessProber::is_running) || !self.inner.tasks.is_empty()
    }

    fn note_unconfigured(&self, kind: AddressKind) {
        let bit = 1u8 << (kind as u8);
        if self.inner.unconfigured_logged.fetch_or(bit, Ordering::Relaxed) & bit == 0 {
            debug!(machine = %self.name(), kind = %kind, "No address configured for kind; reporting down");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
