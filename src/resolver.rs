use crate::address::Address;
use crate::handoff::HandoffQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const RESOLVE_INTERVAL: Duration = Duration::from_millis(250);

/// Address to display string lookup
pub trait NameResolver: Send + Sync {
    fn resolve(&self, addr: &Address) -> String;
}

/// Numeric rendering only
pub struct NumericResolver;

impl NameResolver for NumericResolver {
    fn resolve(&self, addr: &Address) -> String {
        addr.to_string()
    }
}

type LookupFn<'a> = dyn Fn(&IpAddr) -> io::Result<String> + Send + Sync + 'a;

struct Shared {
    names: Mutex<HashMap<Address, String>>,
    pending: HandoffQueue<Address>,
}

/// Resolver that answers from a cache and fills it from a background thread.
///
/// A miss returns the numeric form straight away and queues the address;
/// later calls see the resolved name once the worker has looked it up.
pub struct CachingResolver {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CachingResolver {
    pub fn spawn() -> io::Result<Self> {
        Self::with_lookup(|ip: &IpAddr| dns_lookup::lookup_addr(ip))
    }

    pub fn with_lookup<F>(lookup: F) -> io::Result<Self>
    where
        F: Fn(&IpAddr) -> io::Result<String> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            names: Mutex::new(HashMap::new()),
            pending: HandoffQueue::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let lookup: Box<LookupFn<'static>> = Box::new(lookup);
            thread::Builder::new()
                .name("nettop-resolver".into())
                .spawn(move || resolve_loop(&shared, &stop, lookup.as_ref()))?
        };

        Ok(Self {
            shared,
            stop,
            worker: Some(worker),
        })
    }
}

impl NameResolver for CachingResolver {
    fn resolve(&self, addr: &Address) -> String {
        let mut names = self.shared.names.lock();
        if let Some(name) = names.get(addr) {
            return name.clone();
        }

        let numeric = addr.to_string();
        names.insert(*addr, numeric.clone());
        self.shared.pending.push(*addr);
        numeric
    }
}

impl Drop for CachingResolver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn resolve_loop(shared: &Shared, stop: &AtomicBool, lookup: &LookupFn<'_>) {
    while !stop.load(Ordering::Relaxed) {
        for addr in shared.pending.drain() {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let name = lookup_with_retry(lookup, &addr);
            shared.names.lock().insert(addr, name);
        }
        thread::sleep(RESOLVE_INTERVAL);
    }
}

/// Look `addr` up, retrying once, and fall back to the numeric form.
fn lookup_with_retry(lookup: &LookupFn<'_>, addr: &Address) -> String {
    let ip = addr.ip();
    match lookup(&ip).or_else(|e| {
        log::debug!("Reverse lookup of {} failed ({}), retrying", ip, e);
        lookup(&ip)
    }) {
        Ok(name) if !name.is_empty() => name,
        _ => addr.to_string(),
    }
}
