use std::collections::BTreeMap;
use std::fmt;

/// State of a system service as reported by the node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceState {
    Running,
    Finished,
    Waiting,
    Stopped,
    Skipped,
    Failed,
    #[default]
    Unknown,
}

impl ServiceState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Running => "running",
            ServiceState::Finished => "finished",
            ServiceState::Waiting => "waiting",
            ServiceState::Stopped => "stopped",
            ServiceState::Skipped => "skipped",
            ServiceState::Failed => "failed",
            ServiceState::Unknown => "unknown",
        }
    }

    /// Maps a reported state string onto the known set. Anything outside
    /// it (e.g. `Preparing`) is `Unknown`.
    pub fn from_reported(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "running" => ServiceState::Running,
            "finished" => ServiceState::Finished,
            "waiting" => ServiceState::Waiting,
            "stopped" => ServiceState::Stopped,
            "skipped" => ServiceState::Skipped,
            "failed" => ServiceState::Failed,
            _ => ServiceState::Unknown,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a `ServiceList` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    pub id: String,
    pub state: ServiceState,
}

impl ServiceReport {
    pub fn new(id: impl Into<String>, state: ServiceState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

/// Latest remotely-queried facts for one machine.
///
/// Snapshots are immutable once published; every update builds a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSnapshot {
    /// Installed node-agent version, empty until the first successful poll
    pub version: String,
    pub services: BTreeMap<String, ServiceState>,
}

impl FactSnapshot {
    pub fn service_state(&self, id: &str) -> ServiceState {
        self.services.get(id).copied().unwrap_or_default()
    }

    /// Replaces the whole service table; ids missing from `reports` drop out.
    pub fn with_services(&self, reports: Vec<ServiceReport>) -> Self {
        Self {
            version: self.version.clone(),
            services: reports.into_iter().map(|r| (r.id, r.state)).collect(),
        }
    }

    /// Keeps every known id but marks it `Unknown`.
    pub fn degraded(&self) -> Self {
        Self {
            version: self.version.clone(),
            services: self
                .services
                .keys()
                .map(|id| (id.clone(), ServiceState::Unknown))
                .collect(),
        }
    }

    pub fn with_version(&self, version: String) -> Self {
        Self {
            version,
            services: self.services.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_state_is_case_insensitive() {
        assert_eq!(ServiceState::from_reported("Running"), ServiceState::Running);
        assert_eq!(ServiceState::from_reported("FINISHED"), ServiceState::Finished);
        assert_eq!(ServiceState::from_reported("Preparing"), ServiceState::Unknown);
        assert_eq!(ServiceState::from_reported(""), ServiceState::Unknown);
    }

    #[test]
    fn test_with_services_replaces_table() {
        let snap = FactSnapshot::default().with_services(vec![
            ServiceReport::new("kubelet", ServiceState::Running),
            ServiceReport::new("bootkube", ServiceState::Finished),
        ]);
        let snap = snap.with_services(vec![ServiceReport::new("kubelet", ServiceState::Running)]);

        assert_eq!(snap.service_state("kubelet"), ServiceState::Running);
        assert_eq!(snap.service_state("bootkube"), ServiceState::Unknown);
        assert_eq!(snap.services.len(), 1);
    }

    #[test]
    fn test_degraded_keeps_ids_and_version() {
        let snap = FactSnapshot::default()
            .with_version("v1.2.3".to_string())
            .with_services(vec![ServiceReport::new("etcd", ServiceState::Running)])
            .degraded();

        assert_eq!(snap.version, "v1.2.3");
        assert_eq!(snap.services.get("etcd"), Some(&ServiceState::Unknown));
    }
}
