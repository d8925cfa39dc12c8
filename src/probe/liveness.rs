use super::{validate_address, Echo, EchoFactory};
use crate::machine::AddressKind;
use crate::{Result, TalosmonError};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

/// An address is down once its last reply is this old.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(2);

pub const DEFAULT_ECHO_INTERVAL: Duration = Duration::from_secs(1);

/// Latest echo reply time for one address kind.
#[derive(Debug, Default)]
pub struct LivenessCell {
    last_reply_at: RwLock<Option<Instant>>,
}

impl LivenessCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reply. Never moves the timestamp backwards.
    pub fn record(&self, at: Instant) {
        let mut last = self.last_reply_at.write();
        if last.map_or(true, |prev| at > prev) {
            *last = Some(at);
        }
    }

    pub fn last_reply_at(&self) -> Option<Instant> {
        *self.last_reply_at.read()
    }

    /// Up iff a reply was seen and it is strictly younger than `staleness`.
    pub fn is_up_at(&self, now: Instant, staleness: Duration) -> bool {
        match self.last_reply_at() {
            Some(at) => now.saturating_duration_since(at) < staleness,
            None => false,
        }
    }
}

/// Background echo stream for one (machine, address kind).
pub struct LivenessProber {
    kind: AddressKind,
    addr: IpAddr,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl LivenessProber {
    /// Opens an echo stream and starts sending one request per `interval`.
    /// `on_reply` runs on the probe task for every reply received.
    pub async fn start<F>(
        kind: AddressKind,
        addr: IpAddr,
        factory: &dyn EchoFactory,
        interval: Duration,
        shutdown: &CancellationToken,
        on_reply: F,
    ) -> Result<Self>
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        validate_address(kind, addr)?;
        if interval.is_zero() {
            return Err(TalosmonError::InvalidArgument(
                "echo interval must be greater than zero".to_string(),
            ));
        }

        let echo = factory.open(kind, addr, interval).await?;
        let token = shutdown.child_token();
        let tasks = TaskTracker::new();
        tasks.spawn(run_echo_loop(
            kind,
            addr,
            echo,
            interval,
            token.clone(),
            on_reply,
        ));
        tasks.close();

        debug!(kind = %kind, addr = %addr, "Started liveness prober");

        Ok(Self {
            kind,
            addr,
            token,
            tasks,
        })
    }

    /// Stops the stream and waits for the probe task to exit. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        self.tasks.wait().await;
        trace!(kind = %self.kind, addr = %self.addr, "Liveness prober joined");
    }

    /// True until the probe task has exited, however it ended.
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl Drop for LivenessProber {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_echo_loop<F>(
    kind: AddressKind,
    addr: IpAddr,
    mut echo: Box<dyn Echo>,
    interval: Duration,
    token: CancellationToken,
    on_reply: F,
) where
    F: Fn(Instant) + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut seq: u16 = 0;
    let mut answering = false;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            reply = echo.echo(seq) => reply,
        };
        seq = seq.wrapping_add(1);

        match reply {
            Ok(rtt) => {
                on_reply(Instant::now());
                if !answering {
                    debug!(kind = %kind, addr = %addr, "Echo replies resumed");
                    answering = true;
                }
                trace!(kind = %kind, addr = %addr, rtt_us = rtt.as_micros() as u64, "Echo reply");
            }
            Err(e) => {
                if answering {
                    debug!(kind = %kind, addr = %addr, "Echo replies stopped: {}", e);
                    answering = false;
                } else {
                    trace!(kind = %kind, addr = %addr, "Echo failed: {}", e);
                }
            }
        }
    }

    debug!(kind = %kind, addr = %addr, "Liveness prober stopped");
}
