//! Fleet configuration
//!
//! ```yaml
//! clusters:
//!   - name: lab
//!     config:
//!       file: ~/.talos/config
//!       context: lab
//!     machines:
//!       - name: node-1
//!         fqdn: node-1.lab.example.com
//!         ipmiAddr: 10.0.10.1
//!         ipv4Addr: 10.0.0.1
//!         ipv6Addr: fd00::1
//! probe:
//!   stalenessMs: 2000
//! ```

pub mod talosconfig;

use crate::agent::{DEFAULT_POLL_INTERVAL, DEFAULT_RPC_TIMEOUT};
use crate::machine::{AddressKind, MachineSpec, Timing};
use crate::probe::{DEFAULT_ECHO_INTERVAL, DEFAULT_STALENESS};
use crate::{Result, TalosmonError};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub probe: ProbeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cluster {
    pub name: String,

    /// Where to find credentials for the cluster's node-agent API
    #[serde(default)]
    pub config: ClientConfigRef,

    #[serde(default)]
    pub machines: Vec<MachineEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfigRef {
    /// Client config file. Defaults to `$TALOSCONFIG`, then `~/.talos/config`.
    pub file: Option<PathBuf>,

    /// Context inside the file. Defaults to the file's current context.
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineEntry {
    pub name: String,

    #[serde(default)]
    pub fqdn: String,

    pub ipmi_addr: Option<IpAddr>,
    pub ipv4_addr: Option<IpAddr>,
    pub ipv6_addr: Option<IpAddr>,
}

/// Probe tunables, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeSettings {
    pub staleness_ms: u64,
    pub poll_interval_ms: u64,
    pub echo_interval_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            staleness_ms: DEFAULT_STALENESS.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            echo_interval_ms: DEFAULT_ECHO_INTERVAL.as_millis() as u64,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ProbeSettings {
    fn validate(&self) -> Result<()> {
        self.timing().validate().map_err(|e| match e {
            TalosmonError::InvalidArgument(msg) => {
                TalosmonError::ConfigInvalid(format!("probe settings: {}", msg))
            }
            other => other,
        })
    }

    pub fn timing(&self) -> Timing {
        Timing {
            staleness: Duration::from_millis(self.staleness_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            echo_interval: Duration::from_millis(self.echo_interval_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TalosmonError::ConfigInvalid(format!(
                "failed to open configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_yaml(&raw)?;
        debug!(
            path = %path.display(),
            clusters = config.clusters.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw).map_err(|e| {
            TalosmonError::ConfigInvalid(format!("failed to parse configuration file: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.probe.validate()?;
        for cluster in &self.clusters {
            cluster.validate()?;
        }
        Ok(())
    }

    /// The named cluster, or the first one when `name` is `None`.
    pub fn cluster(&self, name: Option<&str>) -> Result<&Cluster> {
        match name {
            Some(name) => self
                .clusters
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| {
                    TalosmonError::ConfigInvalid(format!("cluster {:?} is not configured", name))
                }),
            None => self.clusters.first().ok_or_else(|| {
                TalosmonError::ConfigInvalid("no clusters configured".to_string())
            }),
        }
    }

    /// `<user config dir>/talosmon/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("talosmon").join("config.yaml"))
    }
}

impl Cluster {
    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| {
            TalosmonError::ConfigInvalid(format!("cluster {:?}: {}", self.name, msg))
        };

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if machine.name.trim().is_empty() {
                return Err(invalid("machine name must not be empty".to_string()));
            }
            if !seen.insert(machine.name.as_str()) {
                return Err(invalid(format!("duplicate machine name {:?}", machine.name)));
            }
            if machine.ipv4_addr.is_some_and(|a| !a.is_ipv4()) {
                return Err(invalid(format!("{}: ipv4Addr must be IPv4", machine.name)));
            }
            if machine.ipv6_addr.is_some_and(|a| !a.is_ipv6()) {
                return Err(invalid(format!("{}: ipv6Addr must be IPv6", machine.name)));
            }
        }
        Ok(())
    }

    pub fn machine_specs(&self) -> Vec<MachineSpec> {
        self.machines.iter().map(MachineSpec::from).collect()
    }
}

impl ClientConfigRef {
    /// Resolves the client config file path, expanding a leading `~/`.
    pub fn resolve_file(&self) -> Result<PathBuf> {
        let path = match &self.file {
            Some(path) => path.clone(),
            None => match std::env::var_os("TALOSCONFIG") {
                Some(path) => PathBuf::from(path),
                None => home_dir()?.join(".talos").join("config"),
            },
        };

        match path.strip_prefix("~") {
            Ok(rest) => Ok(home_dir()?.join(rest)),
            Err(_) => Ok(path),
        }
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        TalosmonError::ConfigInvalid("cannot determine the home directory".to_string())
    })
}

impl From<&MachineEntry> for MachineSpec {
    fn from(entry: &MachineEntry) -> Self {
        let mut spec = MachineSpec::new(entry.name.clone(), entry.fqdn.clone());
        let addresses = [
            (AddressKind::Mgmt, entry.ipmi_addr),
            (AddressKind::V4, entry.ipv4_addr),
            (AddressKind::V6, entry.ipv6_addr),
        ];
        for (kind, addr) in addresses {
            if let Some(addr) = addr {
                spec = spec.with_address(kind, addr);
            }
        }
        spec
    }
}
