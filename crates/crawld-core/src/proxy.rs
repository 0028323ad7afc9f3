//! Rotating pool of outbound proxies.
//!
//! An entry handed out by `poll` is owned by the caller until it comes back
//! through `put` (healthy) or `retire` (failed). Retired entries are kept for
//! observability and are never handed out again.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};

/// One outbound proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEntry {
    host: String,
    port: u16,
}

impl ProxyEntry {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form.
    pub fn ip_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("proxy entry must be host:port, got {s:?}"))?;
        let host = host.trim();
        if host.is_empty() {
            anyhow::bail!("proxy entry has an empty host: {s:?}");
        }
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("bad proxy port in {s:?}"))?;
        Ok(Self::new(host, port))
    }
}

/// The pool has no entry available right now. Retryable after backoff or
/// once the pool is replenished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("proxy pool exhausted")]
pub struct ProxyExhausted;

#[derive(Debug, Default)]
struct PoolState {
    available: VecDeque<ProxyEntry>,
    retired: HashSet<ProxyEntry>,
}

/// Pool of proxy entries shared by all fetches of one process.
#[derive(Debug, Default)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ProxyEntry>) -> Self {
        let pool = Self::new();
        for entry in entries {
            pool.add(entry);
        }
        pool
    }

    /// Load one `host:port` per line. Blank lines and `#` comments are skipped.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read proxy list {}", path.display()))?;
        let mut entries = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: ProxyEntry = line
                .parse()
                .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
            entries.push(entry);
        }
        tracing::info!(count = entries.len(), path = %path.display(), "loaded proxy list");
        Ok(Self::from_entries(entries))
    }

    /// Add an entry to the rotation. Retired or already-present entries are
    /// refused; returns whether the entry was added.
    pub fn add(&self, entry: ProxyEntry) -> bool {
        let mut state = self.lock();
        if state.retired.contains(&entry) || state.available.contains(&entry) {
            return false;
        }
        state.available.push_back(entry);
        true
    }

    /// Take the next available entry.
    pub fn poll(&self) -> Result<ProxyEntry, ProxyExhausted> {
        self.lock().available.pop_front().ok_or(ProxyExhausted)
    }

    /// Return a healthy entry to the rotation. A retired entry stays retired.
    pub fn put(&self, entry: ProxyEntry) {
        let mut state = self.lock();
        if state.retired.contains(&entry) || state.available.contains(&entry) {
            return;
        }
        state.available.push_back(entry);
    }

    /// Remove an entry from rotation permanently.
    pub fn retire(&self, entry: ProxyEntry) {
        let mut state = self.lock();
        state.available.retain(|e| e != &entry);
        state.retired.insert(entry);
    }

    /// Number of entries available to `poll`.
    pub fn size(&self) -> usize {
        self.lock().available.len()
    }

    pub fn retired_size(&self) -> usize {
        self.lock().retired.len()
    }

    /// Borrow an entry for one fetch attempt. The entry is retired when the
    /// lease drops unless `mark_healthy` was called first.
    pub fn lease(&self) -> Result<ProxyLease<'_>, ProxyExhausted> {
        let entry = self.poll()?;
        Ok(ProxyLease {
            pool: self,
            entry,
            healthy: false,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A polled entry; returned to the pool (or retired) exactly once, on drop.
pub struct ProxyLease<'a> {
    pool: &'a ProxyPool,
    entry: ProxyEntry,
    healthy: bool,
}

impl ProxyLease<'_> {
    pub fn entry(&self) -> &ProxyEntry {
        &self.entry
    }

    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }
}

impl Drop for ProxyLease<'_> {
    fn drop(&mut self) {
        let entry = self.entry.clone();
        if self.healthy {
            tracing::debug!(proxy = %entry, "put back proxy");
            self.pool.put(entry);
        } else {
            tracing::debug!(proxy = %entry, "retire proxy");
            self.pool.retire(entry);
        }
    }
}
