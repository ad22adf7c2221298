//! Round-robin HTTP load balancer.
//!
//! A fixed pool of backends is probed over TCP on an interval; each inbound
//! request goes to the next alive backend in rotation, or gets a 503.

pub mod backend;
pub mod config;
pub mod health;
pub mod proxy;
pub mod shutdown;

pub use backend::{Backend, BackendPool, SharedBackendPool};
pub use config::Config;
pub use health::HealthChecker;
pub use proxy::Proxy;
pub use shutdown::Shutdown;
