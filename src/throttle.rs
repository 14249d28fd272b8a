//! Concurrency and rate limiting.
//!
//! Two limits share one mutex: a global in-flight request counter and a
//! per-client sliding window. The client key comes from
//! `X-Forwarded-For` (first entry), then `X-Real-IP`, then the remote
//! address the transport put into the request extensions.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use http::header::HeaderValue;
use http::{HeaderMap, Request};

/// Limits applied by the throttle gate.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub max_rps: u32,
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            max_concurrent: 64,
            max_rps: 50,
            window: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct State {
    active: usize,
    clients: HashMap<String, VecDeque<Instant>>,
}

pub(crate) struct Throttle {
    cfg: ThrottleConfig,
    state: Arc<Mutex<State>>,
}

/// Why a request was turned away.
#[derive(Debug)]
pub(crate) enum ThrottleReject {
    Concurrency,
    Rate { reset_epoch: u64 },
}

/// Holds one concurrency slot; released on drop.
pub(crate) struct ThrottlePermit {
    state: Arc<Mutex<State>>,
    pub(crate) remaining: u32,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.active = st.active.saturating_sub(1);
    }
}

impl Throttle {
    pub(crate) fn new(cfg: ThrottleConfig) -> Throttle {
        Throttle {
            cfg,
            state: Arc::new(Mutex::new(State {
                active: 0,
                clients: HashMap::new(),
            })),
        }
    }

    pub(crate) fn limit(&self) -> u32 {
        self.cfg.max_rps
    }

    pub(crate) fn window_secs(&self) -> u64 {
        self.cfg.window.as_secs()
    }

    pub(crate) fn acquire(&self, client: &str) -> Result<ThrottlePermit, ThrottleReject> {
        let mut st = self.state.lock().unwrap();

        if st.active >= self.cfg.max_concurrent {
            return Err(ThrottleReject::Concurrency);
        }
        st.active += 1;

        let now = Instant::now();
        let window = self.cfg.window;
        let hits = st.clients.entry(client.to_string()).or_default();
        while let Some(front) = hits.front() {
            if now.duration_since(*front) > window {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() >= self.cfg.max_rps as usize {
            // the window ends when the oldest hit ages out
            let oldest_age = hits.front().map(|f| now.duration_since(*f)).unwrap_or_default();
            let until_reset = window.saturating_sub(oldest_age);
            let reset_epoch = (SystemTime::now() + until_reset)
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            // release the slot we just took
            st.active = st.active.saturating_sub(1);
            return Err(ThrottleReject::Rate { reset_epoch });
        }
        hits.push_back(now);
        let remaining = self.cfg.max_rps - hits.len() as u32;

        Ok(ThrottlePermit {
            state: Arc::clone(&self.state),
            remaining,
        })
    }

    /// Drop client entries with no request inside two windows. Runs from
    /// the periodic sweep.
    pub(crate) fn evict_idle(&self) {
        let horizon = 2 * self.cfg.window;
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();
        st.clients
            .retain(|_, hits| match hits.back() {
                Some(last) => now.duration_since(*last) <= horizon,
                None => false,
            });
    }
}

/// Stamp the rate-limit headers onto a response.
pub(crate) fn stamp(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert("x-ratelimit-limit", num_header(limit as u64));
    headers.insert("x-ratelimit-remaining", num_header(remaining as u64));
}

pub(crate) fn num_header(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap()
}

/// Derive the client key for rate limiting.
pub(crate) fn client_key(req: &Request<()>) -> String {
    if let Some(xff) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
    {
        return real.trim().to_string();
    }
    if let Some(addr) = req.extensions().get::<SocketAddr>() {
        return addr.ip().to_string();
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_concurrent: usize, max_rps: u32) -> ThrottleConfig {
        ThrottleConfig {
            max_concurrent,
            max_rps,
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn concurrency_limit() {
        let t = Throttle::new(cfg(2, 100));
        let p1 = t.acquire("a").unwrap();
        let _p2 = t.acquire("b").unwrap();
        assert!(matches!(
            t.acquire("c"),
            Err(ThrottleReject::Concurrency)
        ));
        drop(p1);
        assert!(t.acquire("c").is_ok());
    }

    #[test]
    fn rate_limit_per_client() {
        let t = Throttle::new(cfg(100, 2));
        assert_eq!(t.acquire("a").unwrap().remaining, 1);
        assert_eq!(t.acquire("a").unwrap().remaining, 0);
        assert!(matches!(
            t.acquire("a"),
            Err(ThrottleReject::Rate { .. })
        ));
        // another client is unaffected
        assert!(t.acquire("b").is_ok());
    }

    #[test]
    fn rate_rejection_releases_concurrency_slot() {
        let t = Throttle::new(cfg(1, 1));
        let p = t.acquire("a").unwrap();
        drop(p);
        assert!(matches!(t.acquire("a"), Err(ThrottleReject::Rate { .. })));
        // the failed acquire must not leak its slot
        assert!(t.acquire("b").is_ok());
    }

    #[test]
    fn client_key_precedence() {
        let r = Request::builder()
            .uri("/")
            .header("X-Forwarded-For", "10.0.0.1, 10.0.0.2")
            .header("X-Real-IP", "10.9.9.9")
            .body(())
            .unwrap();
        assert_eq!(client_key(&r), "10.0.0.1");

        let r = Request::builder()
            .uri("/")
            .header("X-Real-IP", "10.9.9.9")
            .body(())
            .unwrap();
        assert_eq!(client_key(&r), "10.9.9.9");

        let mut r = Request::builder().uri("/").body(()).unwrap();
        r.extensions_mut()
            .insert("1.2.3.4:5678".parse::<SocketAddr>().unwrap());
        assert_eq!(client_key(&r), "1.2.3.4");

        let r = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(client_key(&r), "unknown");
    }

    #[test]
    fn eviction_drops_idle_clients_only() {
        let t = Throttle::new(ThrottleConfig {
            max_concurrent: 10,
            max_rps: 10,
            window: Duration::from_millis(1),
        });
        let _ = t.acquire("idle").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let _busy = t.acquire("busy").unwrap();
        t.evict_idle();
        let st = t.state.lock().unwrap();
        assert!(!st.clients.contains_key("idle"));
        assert!(st.clients.contains_key("busy"));
    }
}
