mod backend;
mod pool;

pub use backend::Backend;
pub use pool::{BackendPool, SharedBackendPool};
