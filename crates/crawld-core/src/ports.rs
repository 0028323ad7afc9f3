//! Port allocation for spawned services.
//!
//! Each `PortAllocator` owns one closed range `[base, max]` for one service
//! type and tracks which ports are active (leased) and which are free. The
//! two sets are disjoint and always cover the whole range.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::discovery::ServiceType;

/// No free port is left for a service type. Callers treat this as "no
/// capacity", not a crash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no free port for {service_type} in [{base}, {max}]")]
pub struct PortExhausted {
    pub service_type: ServiceType,
    pub base: u16,
    pub max: u16,
}

#[derive(Debug, Default)]
struct PortSets {
    active: BTreeSet<u16>,
    free: BTreeSet<u16>,
}

/// Allocator over one port range for one service type.
#[derive(Debug)]
pub struct PortAllocator {
    service_type: ServiceType,
    base: u16,
    max: u16,
    sets: Mutex<PortSets>,
}

impl PortAllocator {
    /// Create an allocator with every port in `[base, max]` free. An inverted
    /// range is treated as empty.
    pub fn new(service_type: ServiceType, base: u16, max: u16) -> Self {
        let free = if base <= max {
            (base..=max).collect()
        } else {
            BTreeSet::new()
        };
        Self {
            service_type,
            base,
            max,
            sets: Mutex::new(PortSets {
                active: BTreeSet::new(),
                free,
            }),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn range(&self) -> (u16, u16) {
        (self.base, self.max)
    }

    /// Leased ports, ascending.
    pub fn active_ports(&self) -> Vec<u16> {
        self.lock().active.iter().copied().collect()
    }

    /// Available ports, ascending.
    pub fn free_ports(&self) -> Vec<u16> {
        self.lock().free.iter().copied().collect()
    }

    /// Take the lowest free port and mark it active.
    pub fn acquire(&self) -> Result<u16, PortExhausted> {
        let mut sets = self.lock();
        let Some(port) = sets.free.pop_first() else {
            return Err(PortExhausted {
                service_type: self.service_type,
                base: self.base,
                max: self.max,
            });
        };
        sets.active.insert(port);
        tracing::debug!(service = %self.service_type, port, "acquired port");
        Ok(port)
    }

    /// Return an active port to the free set. Ports that are not active are ignored.
    pub fn recycle(&self, port: u16) {
        let mut sets = self.lock();
        if sets.active.remove(&port) {
            sets.free.insert(port);
            tracing::debug!(service = %self.service_type, port, "recycled port");
        }
    }

    /// Acquire a port that is recycled when the lease is dropped.
    pub fn lease(self: &Arc<Self>) -> Result<PortLease, PortExhausted> {
        let port = self.acquire()?;
        Ok(PortLease {
            allocator: Arc::clone(self),
            port,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortSets> {
        self.sets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An active port; recycled when dropped.
#[derive(Debug)]
pub struct PortLease {
    allocator: Arc<PortAllocator>,
    port: u16,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service_type(&self) -> ServiceType {
        self.allocator.service_type()
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.allocator.recycle(self.port);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("no port range configured for {0}")]
pub struct UnknownServiceType(pub ServiceType);

/// One allocator per service type. Ranges of different types may overlap
/// numerically; selecting the right allocator is the caller's job.
#[derive(Debug, Default)]
pub struct PortRegistry {
    allocators: HashMap<ServiceType, Arc<PortAllocator>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, service_type: ServiceType, base: u16, max: u16) -> Self {
        self.allocators.insert(
            service_type,
            Arc::new(PortAllocator::new(service_type, base, max)),
        );
        self
    }

    pub fn get(&self, service_type: ServiceType) -> Result<&Arc<PortAllocator>, UnknownServiceType> {
        self.allocators
            .get(&service_type)
            .ok_or(UnknownServiceType(service_type))
    }
}
