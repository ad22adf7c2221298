use crate::backend::SharedBackendPool;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct HealthChecker {
    backend_pool: SharedBackendPool,
    check_interval: Duration,
    check_timeout: Duration,
}

impl HealthChecker {
    /// # Panics
    ///
    /// Panics if `check_interval` is zero.
    pub fn new(
        backend_pool: SharedBackendPool,
        check_interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        assert!(
            !check_interval.is_zero(),
            "health check interval must be non-zero"
        );
        Self {
            backend_pool,
            check_interval,
            check_timeout,
        }
    }

    /// Re-checks every backend once per interval until shutdown.
    ///
    /// The first periodic check happens one full interval after the call;
    /// callers run [`HealthChecker::check_all_backends`] up front.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let start = Instant::now() + self.check_interval;
        let mut interval = time::interval_at(start, self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_backends().await;
                }
                _ = shutdown.recv() => {
                    info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probes each backend in pool order and records the result.
    pub async fn check_all_backends(&self) {
        for backend in self.backend_pool.backends() {
            let alive = probe(backend.addr(), self.check_timeout).await;
            backend.set_alive(alive);
            if alive {
                info!(backend = %backend.target(), "Backend is alive");
            } else {
                warn!(backend = %backend.target(), "Backend is dead");
            }
        }

        debug!(
            alive = self.backend_pool.alive_count(),
            total = self.backend_pool.len(),
            "Health check complete"
        );
    }
}

/// TCP reachability check. The connection is closed as soon as it opens.
pub async fn probe(addr: &str, timeout: Duration) -> bool {
    debug!("Health checking {}", addr);

    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            warn!(addr, error = %e, "Site unreachable");
            false
        }
        Err(_) => {
            warn!(addr, ?timeout, "Site unreachable: connect timed out");
            false
        }
    }
}
