//! Service registries that observe or fail registration calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use crawld_core::discovery::{LocalServiceRegistry, ServerInstance, ServiceRegistry};

/// In-memory registry that counts calls.
#[derive(Default)]
pub struct CountingRegistry {
    inner: LocalServiceRegistry,
    pub registers: AtomicUsize,
    pub unregisters: AtomicUsize,
}

impl CountingRegistry {
    pub fn unregister_count(&self) -> usize {
        self.unregisters.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.registers.load(Ordering::SeqCst)
    }
}

impl ServiceRegistry for CountingRegistry {
    fn register(&self, instance: &ServerInstance) -> Result<()> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        self.inner.register(instance)
    }

    fn unregister(&self, instance: &ServerInstance) -> Result<()> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        self.inner.unregister(instance)
    }

    fn instances(&self) -> Vec<ServerInstance> {
        self.inner.instances()
    }
}

/// Registry whose backend is unreachable.
pub struct UnreachableRegistry;

impl ServiceRegistry for UnreachableRegistry {
    fn register(&self, _instance: &ServerInstance) -> Result<()> {
        anyhow::bail!("discovery backend unreachable")
    }

    fn unregister(&self, _instance: &ServerInstance) -> Result<()> {
        anyhow::bail!("discovery backend unreachable")
    }

    fn instances(&self) -> Vec<ServerInstance> {
        Vec::new()
    }
}
