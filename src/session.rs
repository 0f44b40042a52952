//! Process-wide session cache for abbreviated handshakes.
//!
//! Entries are keyed by session id and peer host together, so the client
//! and server sides of one process never clobber each other, and are
//! validated against a wall-clock lifetime. The lifetime comes from the
//! `TLS_SESSION_CACHE_TIMEOUT` environment variable (seconds); zero
//! disables caching entirely.

use crate::context::Context;
use crate::crypto;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::debug;

const DEFAULT_VALIDITY_SECS: u64 = 180;
pub const ENV_CACHE_TIMEOUT: &str = "TLS_SESSION_CACHE_TIMEOUT";

struct Entry {
    id: Vec<u8>,
    host: String,
    master_secret: Vec<u8>,
    touched: Instant,
}

impl Drop for Entry {
    fn drop(&mut self) {
        crypto::zero(&mut self.master_secret);
    }
}

lazy_static! {
    static ref CACHE: Mutex<HashMap<String, Entry>> = Mutex::new(HashMap::new());
}

fn cache_key(id: &[u8], host: &str) -> String {
    format!("{}|{}", hex::encode(id), host)
}

fn validity() -> Duration {
    let secs = std::env::var(ENV_CACHE_TIMEOUT)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_VALIDITY_SECS);
    Duration::from_secs(secs)
}

fn enabled() -> bool {
    validity() > Duration::from_secs(0)
}

fn lock_cache() -> std::sync::MutexGuard<'static, HashMap<String, Entry>> {
    match CACHE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Register (or refresh) the context's session after key derivation. A
/// context without a session id is not cacheable.
pub fn set_context_in_cache(ctx: &Context) {
    if !enabled() || ctx.session_id.is_empty() || ctx.master_secret().is_empty() {
        return;
    }
    let key = cache_key(&ctx.session_id, &ctx.host);
    debug!("caching session {}", key);
    lock_cache().insert(
        key,
        Entry {
            id: ctx.session_id.clone(),
            host: ctx.host.clone(),
            master_secret: ctx.master_secret().to_vec(),
            touched: Instant::now(),
        },
    );
}

/// Install the cached master secret for the context's session id. Returns
/// false when the id is unknown for this host or has expired; an expired
/// match evicts the entry.
pub fn set_context_from_cache(ctx: &mut Context) -> bool {
    if !enabled() || ctx.session_id.is_empty() {
        return false;
    }
    let key = cache_key(&ctx.session_id, &ctx.host);
    let mut cache = lock_cache();
    let valid_for = validity();
    match cache.get_mut(&key) {
        Some(entry) if entry.touched.elapsed() <= valid_for => {
            entry.touched = Instant::now();
            let master = entry.master_secret.clone();
            ctx.set_master_secret(&master);
            true
        }
        Some(_) => {
            debug!("session {} expired, evicting", key);
            cache.remove(&key);
            false
        }
        None => false,
    }
}

/// The resumable session id for a host, if one is still valid. Refreshes
/// the entry's timer.
pub fn id_for_host(host: &str) -> Option<Vec<u8>> {
    if !enabled() || host.is_empty() {
        return None;
    }
    let mut cache = lock_cache();
    let valid_for = validity();
    let mut stale: Option<String> = None;
    let mut found: Option<Vec<u8>> = None;
    for (key, entry) in cache.iter_mut() {
        if entry.host != host {
            continue;
        }
        if entry.touched.elapsed() > valid_for {
            stale = Some(key.clone());
            continue;
        }
        entry.touched = Instant::now();
        found = Some(entry.id.clone());
        break;
    }
    if let Some(key) = stale {
        cache.remove(&key);
    }
    found
}

/// Drop a session for every host it is cached under, e.g. after a fatal
/// alert tied to it.
pub fn remove_session(id: &[u8]) {
    lock_cache().retain(|_, entry| entry.id != id);
}

#[cfg(test)]
pub fn clear_cache() {
    lock_cache().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ConnectionEnd;
    use crate::protocol::SecurityProtocol;
    use lazy_static::lazy_static;

    lazy_static! {
        // The cache is process-global; these tests clear it, so they
        // must not interleave.
        static ref TEST_LOCK: Mutex<()> = Mutex::new(());
    }

    fn serial() -> std::sync::MutexGuard<'static, ()> {
        match TEST_LOCK.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ctx_with_session(host: &str, id: &[u8], master: &[u8]) -> Context {
        let mut ctx = Context::new(ConnectionEnd::Client, SecurityProtocol::Tls1, host);
        ctx.session_id = id.to_vec();
        ctx.set_master_secret(master);
        ctx
    }

    #[test]
    fn cache_round_trip_requires_matching_host() {
        let _guard = serial();
        clear_cache();
        let ctx = ctx_with_session("alpha.example", &[0xaa; 32], &[0x42; 48]);
        set_context_in_cache(&ctx);

        let mut same_host = ctx_with_session("alpha.example", &[0xaa; 32], &[]);
        assert!(set_context_from_cache(&mut same_host));
        assert_eq!(same_host.master_secret(), &[0x42; 48][..]);

        let mut other_host = ctx_with_session("beta.example", &[0xaa; 32], &[]);
        assert!(!set_context_from_cache(&mut other_host));
    }

    #[test]
    fn both_peers_of_one_session_can_coexist() {
        let _guard = serial();
        clear_cache();
        let client = ctx_with_session("gamma.example", &[0x17; 32], &[0x01; 48]);
        set_context_in_cache(&client);
        let server = ctx_with_session("", &[0x17; 32], &[0x01; 48]);
        set_context_in_cache(&server);

        assert_eq!(id_for_host("gamma.example"), Some(vec![0x17; 32]));
        let mut server_side = ctx_with_session("", &[0x17; 32], &[]);
        assert!(set_context_from_cache(&mut server_side));

        remove_session(&[0x17; 32]);
        assert_eq!(id_for_host("gamma.example"), None);
        let mut gone = ctx_with_session("", &[0x17; 32], &[]);
        assert!(!set_context_from_cache(&mut gone));
    }

    #[test]
    fn empty_session_id_is_not_cacheable() {
        let _guard = serial();
        clear_cache();
        let ctx = ctx_with_session("epsilon.example", &[], &[0x01; 48]);
        set_context_in_cache(&ctx);
        assert_eq!(id_for_host("epsilon.example"), None);
    }

    #[test]
    fn stale_entries_are_evicted_on_lookup() {
        let _guard = serial();
        clear_cache();
        let stale = Instant::now() - Duration::from_secs(DEFAULT_VALIDITY_SECS + 60);
        lock_cache().insert(
            cache_key(&[0x2e; 32], "delta.example"),
            Entry {
                id: vec![0x2e; 32],
                host: "delta.example".to_string(),
                master_secret: vec![0x33; 48],
                touched: stale,
            },
        );

        let mut ctx = ctx_with_session("delta.example", &[0x2e; 32], &[]);
        assert!(!set_context_from_cache(&mut ctx));
        assert!(ctx.master_secret().is_empty());
        // The expired match was evicted, not just skipped.
        assert!(lock_cache().is_empty());
    }
}
