//! In-process fakes for the ICMP and node-agent transports.

use crate::agent::{AgentConnector, NodeAgent};
use crate::machine::{AddressKind, ServiceReport};
use crate::probe::{Echo, EchoFactory};
use crate::{Result, TalosmonError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lets spawned tasks run until they block again.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Echo streams whose replies are injected by the test.
#[derive(Default)]
pub struct ScriptedEchoFactory {
    streams: Mutex<HashMap<IpAddr, Vec<mpsc::UnboundedSender<()>>>>,
    refused: Mutex<HashSet<IpAddr>>,
    open: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl ScriptedEchoFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail for `addr` as if the socket could not be created.
    pub fn refuse(&self, addr: IpAddr) {
        self.refused.lock().insert(addr);
    }

    /// Delivers one reply to every stream open towards `addr`.
    pub fn reply(&self, addr: IpAddr) -> usize {
        let mut streams = self.streams.lock();
        let Some(senders) = streams.get_mut(&addr) else {
            return 0;
        };
        senders.retain(|tx| tx.send(()).is_ok());
        senders.len()
    }

    /// Streams not yet dropped by their prober.
    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EchoFactory for ScriptedEchoFactory {
    async fn open(
        &self,
        _kind: AddressKind,
        addr: IpAddr,
        _timeout: Duration,
    ) -> Result<Box<dyn Echo>> {
        if self.refused.lock().contains(&addr) {
            return Err(TalosmonError::PermissionDenied(format!(
                "echo refused for {}",
                addr
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().entry(addr).or_default().push(tx);
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedEcho {
            rx,
            open: self.open.clone(),
        }))
    }
}

struct ScriptedEcho {
    rx: mpsc::UnboundedReceiver<()>,
    open: Arc<AtomicUsize>,
}

#[async_trait]
impl Echo for ScriptedEcho {
    async fn echo(&mut self, _seq: u16) -> Result<Duration> {
        match self.rx.recv().await {
            Some(()) => Ok(Duration::from_millis(1)),
            None => std::future::pending().await,
        }
    }
}

impl Drop for ScriptedEcho {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Node agent with scripted responses shared by every handle it hands out.
#[derive(Clone)]
pub struct FakeAgent {
    inner: Arc<FakeAgentInner>,
}

struct FakeAgentInner {
    services: Mutex<std::result::Result<Vec<ServiceReport>, String>>,
    version: Mutex<std::result::Result<String, String>>,
    service_calls: AtomicUsize,
    version_calls: AtomicUsize,
    closed: AtomicBool,
    nodes: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeAgentInner {
                services: Mutex::new(Ok(Vec::new())),
                version: Mutex::new(Err("no version yet".to_string())),
                service_calls: AtomicUsize::new(0),
                version_calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                nodes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_services(&self, services: Vec<ServiceReport>) {
        *self.inner.services.lock() = Ok(services);
    }

    pub fn fail_services(&self) {
        *self.inner.services.lock() = Err("connection refused".to_string());
    }

    pub fn set_version(&self, tag: &str) {
        *self.inner.version.lock() = Ok(tag.to_string());
    }

    pub fn fail_version(&self) {
        *self.inner.version.lock() = Err("connection refused".to_string());
    }

    pub fn service_calls(&self) -> usize {
        self.inner.service_calls.load(Ordering::SeqCst)
    }

    pub fn version_calls(&self) -> usize {
        self.inner.version_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Node names the RPCs were scoped to, in call order.
    pub fn nodes(&self) -> Vec<String> {
        self.inner.nodes.lock().clone()
    }
}

#[async_trait]
impl NodeAgent for FakeAgent {
    async fn service_list(&self, node: &str) -> Result<Vec<ServiceReport>> {
        self.inner.service_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.nodes.lock().push(node.to_string());
        self.inner
            .services
            .lock()
            .clone()
            .map_err(TalosmonError::TransientRpc)
    }

    async fn version(&self, node: &str) -> Result<String> {
        self.inner.version_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.nodes.lock().push(node.to_string());
        self.inner
            .version
            .lock()
            .clone()
            .map_err(TalosmonError::TransientRpc)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl AgentConnector for FakeAgent {
    fn connect(&self) -> Result<Arc<dyn NodeAgent>> {
        Ok(Arc::new(self.clone()))
    }
}
