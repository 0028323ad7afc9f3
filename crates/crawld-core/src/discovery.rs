//! Service discovery collaborator.
//!
//! The control server and every fetcher server announce themselves here on
//! start and withdraw on stop. The trait is the seam for a remote registry;
//! `LocalServiceRegistry` keeps the instances in process.

use std::fmt;
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Category of network service. Each type that spawns instances on demand
/// gets its own port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    CrawlServer,
    FetcherServer,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::CrawlServer => "CrawlServer",
            ServiceType::FetcherServer => "FetcherServer",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("crawlserver") {
            Ok(ServiceType::CrawlServer)
        } else if s.eq_ignore_ascii_case("fetcherserver") {
            Ok(ServiceType::FetcherServer)
        } else {
            anyhow::bail!("unknown service type: {s}")
        }
    }
}

/// One running service, as announced to discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    /// Advertised host; `None` means the local host.
    pub host: Option<String>,
    pub port: u16,
    pub service_type: ServiceType,
}

impl ServerInstance {
    pub fn new(host: Option<String>, port: u16, service_type: ServiceType) -> Self {
        Self {
            host,
            port,
            service_type,
        }
    }

    pub fn host_or_local(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.service_type, self.host_or_local(), self.port)
    }
}

/// Registration collaborator.
pub trait ServiceRegistry: Send + Sync {
    fn register(&self, instance: &ServerInstance) -> Result<()>;
    fn unregister(&self, instance: &ServerInstance) -> Result<()>;
    fn instances(&self) -> Vec<ServerInstance>;
}

/// In-process registry.
#[derive(Default)]
pub struct LocalServiceRegistry {
    instances: Mutex<Vec<ServerInstance>>,
}

impl LocalServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceRegistry for LocalServiceRegistry {
    fn register(&self, instance: &ServerInstance) -> Result<()> {
        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        if !instances.contains(instance) {
            instances.push(instance.clone());
        }
        tracing::debug!(%instance, "registered service instance");
        Ok(())
    }

    fn unregister(&self, instance: &ServerInstance) -> Result<()> {
        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        instances.retain(|i| i != instance);
        tracing::debug!(%instance, "unregistered service instance");
        Ok(())
    }

    fn instances(&self) -> Vec<ServerInstance> {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_unregister_removes() {
        let reg = LocalServiceRegistry::new();
        let inst = ServerInstance::new(None, 21000, ServiceType::FetcherServer);
        reg.register(&inst).unwrap();
        reg.register(&inst).unwrap();
        assert_eq!(reg.instances().len(), 1);
        reg.unregister(&inst).unwrap();
        assert!(reg.instances().is_empty());
    }

    #[test]
    fn service_type_parses_case_insensitively() {
        assert_eq!(
            "fetcherserver".parse::<ServiceType>().unwrap(),
            ServiceType::FetcherServer
        );
        assert!("browser".parse::<ServiceType>().is_err());
        let inst = ServerInstance::new(None, 8182, ServiceType::CrawlServer);
        assert_eq!(inst.to_string(), "CrawlServer@localhost:8182");
    }
}
