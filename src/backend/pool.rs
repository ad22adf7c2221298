use super::backend::Backend;
use crate::proxy::forward::{HttpClient, ReverseProxy};
use http::Uri;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed, ordered set of backends plus the shared rotation cursor.
///
/// Membership and order never change after construction, so only the
/// cursor and each backend's liveness flag are shared-mutable.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Backend>,
    current: AtomicU64,
}

impl BackendPool {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends,
            current: AtomicU64::new(0),
        }
    }

    /// Builds one backend per target, each with its own forwarding handle
    /// sharing `client`.
    pub fn from_targets(
        targets: Vec<Uri>,
        client: HttpClient,
        forward_timeout: Option<Duration>,
    ) -> Self {
        let backends = targets
            .into_iter()
            .map(|target| {
                let proxy = ReverseProxy::new(target.clone(), client.clone(), forward_timeout);
                info!(backend = %target, "Configured backend");
                Backend::new(target, proxy)
            })
            .collect();

        Self::new(backends)
    }

    /// Round-robin pick of the next alive backend.
    ///
    /// Every call advances the cursor exactly once, then scans the whole
    /// pool starting at `cursor % len`. `None` means no backend is alive.
    pub fn next_backend(&self) -> Option<&Backend> {
        if self.backends.is_empty() {
            return None;
        }

        let len = self.backends.len() as u64;
        let next = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % len;

        for i in 0..len {
            let idx = ((next + i) % len) as usize;
            let backend = &self.backends[idx];
            if backend.is_alive() {
                return Some(backend);
            }
        }

        warn!("No healthy backends available!");
        None
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }

    /// Number of selections made so far (modulo 2^64).
    pub fn rotations(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn with_cursor(backends: Vec<Backend>, cursor: u64) -> Self {
        Self {
            backends,
            current: AtomicU64::new(cursor),
        }
    }
}

pub type SharedBackendPool = Arc<BackendPool>;
