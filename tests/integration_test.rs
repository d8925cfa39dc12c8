use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use talosmon::agent::{AgentConnector, NodeAgent};
use talosmon::config::Config;
use talosmon::error::{Result, TalosmonError};
use talosmon::fleet::Registry;
use talosmon::machine::{AddressKind, MachineSpec, ServiceReport, ServiceState, Timing};
use talosmon::probe::{Echo, EchoFactory};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Echoes {
    senders: Mutex<HashMap<IpAddr, mpsc::UnboundedSender<()>>>,
}

impl Echoes {
    fn reply(&self, addr: &str) {
        let addr: IpAddr = addr.parse().unwrap();
        if let Some(tx) = self.senders.lock().unwrap().get(&addr) {
            let _ = tx.send(());
        }
    }
}

struct ChannelEcho(mpsc::UnboundedReceiver<()>);

#[async_trait]
impl Echo for ChannelEcho {
    async fn echo(&mut self, _seq: u16) -> Result<Duration> {
        match self.0.recv().await {
            Some(()) => Ok(Duration::from_millis(1)),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl EchoFactory for Echoes {
    async fn open(
        &self,
        _kind: AddressKind,
        addr: IpAddr,
        _timeout: Duration,
    ) -> Result<Box<dyn Echo>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(addr, tx);
        Ok(Box::new(ChannelEcho(rx)))
    }
}

#[derive(Clone, Default)]
struct Agent {
    services: Arc<Mutex<Option<Vec<ServiceReport>>>>,
    version: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl NodeAgent for Agent {
    async fn service_list(&self, _node: &str) -> Result<Vec<ServiceReport>> {
        self.services
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TalosmonError::TransientRpc("unavailable".to_string()))
    }

    async fn version(&self, _node: &str) -> Result<String> {
        self.version
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TalosmonError::TransientRpc("unavailable".to_string()))
    }

    fn close(&self) {}
}

impl AgentConnector for Agent {
    fn connect(&self) -> Result<Arc<dyn NodeAgent>> {
        Ok(Arc::new(self.clone()))
    }
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn test_error_types() {
    let err = TalosmonError::probe_init(
        AddressKind::V4,
        TalosmonError::AddressInvalid {
            kind: AddressKind::V4,
            address: "0.0.0.0".to_string(),
            reason: "unspecified address".to_string(),
        },
    );

    assert!(err.to_string().contains("v4"));
    assert!(err.to_string().contains("0.0.0.0"));
    assert_eq!(err.probe_kind(), Some(AddressKind::V4));
}

#[test]
fn test_version_const() {
    assert!(!talosmon::VERSION.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fleet_from_config() {
    let config = Config::from_yaml(
        r#"
clusters:
  - name: lab
    machines:
      - name: node-1
        fqdn: node-1.lab
        ipv4Addr: 10.0.0.1
      - name: node-2
        fqdn: node-2.lab
        ipmiAddr: 10.0.10.2
        ipv4Addr: 10.0.0.2
"#,
    )
    .unwrap();

    let echoes = Echoes::default();
    let agent = Agent::default();
    *agent.services.lock().unwrap() = Some(vec![
        ServiceReport::new("kubelet", ServiceState::Running),
        ServiceReport::new("bootkube", ServiceState::Finished),
    ]);
    *agent.version.lock().unwrap() = Some("v1.2.3".to_string());

    let registry = Registry::build(
        config.cluster(None).unwrap().machine_specs(),
        &agent,
        &echoes,
        config.probe.timing(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    echoes.reply("10.0.0.1");
    settle().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let node1 = registry.get(0).unwrap();
    assert!(node1.ping_up(AddressKind::V4));
    assert!(!node1.ping_up(AddressKind::V6));
    assert_eq!(node1.service_state("kubelet"), ServiceState::Running);
    assert_eq!(node1.service_state("bootkube"), ServiceState::Finished);
    assert_eq!(node1.version(), "v1.2.3");

    let node2 = registry.get(1).unwrap();
    assert!(!node2.ping_up(AddressKind::Mgmt));

    // Service table drops bootkube on the next successful poll.
    *agent.services.lock().unwrap() =
        Some(vec![ServiceReport::new("kubelet", ServiceState::Running)]);
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(node1.service_state("bootkube"), ServiceState::Unknown);
    assert_eq!(node1.service_state("kubelet"), ServiceState::Running);

    // RPC outage: services degrade, version holds.
    *agent.services.lock().unwrap() = None;
    *agent.version.lock().unwrap() = None;
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(node1.service_state("kubelet"), ServiceState::Unknown);
    assert_eq!(node1.version(), "v1.2.3");
    assert!(!node1.ping_up(AddressKind::V4));

    registry.stop().await;
    registry.stop().await;
    assert!(registry.iter().all(|m| !m.has_running_tasks()));
}

#[tokio::test]
async fn test_invalid_address_fails_build() {
    let specs = vec![
        MachineSpec::new("node-1", "").with_address(AddressKind::V4, "10.0.0.1".parse().unwrap()),
        MachineSpec::new("node-2", "").with_address(AddressKind::V4, "224.0.0.1".parse().unwrap()),
    ];

    let result = Registry::build(
        specs,
        &Agent::default(),
        &Echoes::default(),
        Timing::default(),
        &CancellationToken::new(),
    )
    .await;

    match result {
        Err(TalosmonError::ProbeInit { kind, source }) => {
            assert_eq!(kind, AddressKind::V4);
            assert!(matches!(*source, TalosmonError::AddressInvalid { .. }));
        }
        _ => panic!("expected ProbeInit"),
    }
}
