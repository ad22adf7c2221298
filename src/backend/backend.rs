use http::Uri;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::proxy::forward::ReverseProxy;

/// One upstream server requests can be forwarded to.
///
/// The target and forwarding handle are fixed at construction. Liveness is
/// the only mutable part and is only reachable through [`Backend::set_alive`]
/// and [`Backend::is_alive`].
#[derive(Debug)]
pub struct Backend {
    target: Uri,
    addr: String,
    alive: AtomicBool,
    proxy: ReverseProxy,
}

impl Backend {
    /// Backends start out alive until a probe says otherwise.
    pub fn new(target: Uri, proxy: ReverseProxy) -> Self {
        let addr = probe_addr(&target);
        Self {
            target,
            addr,
            alive: AtomicBool::new(true),
            proxy,
        }
    }

    pub fn target(&self) -> &Uri {
        &self.target
    }

    /// `host:port` the health checker dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn proxy(&self) -> &ReverseProxy {
        &self.proxy
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

fn probe_addr(target: &Uri) -> String {
    let host = target.host().unwrap_or_default();
    let port = target.port_u16().unwrap_or(80);
    // IPv6 literals keep their brackets from the authority
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
