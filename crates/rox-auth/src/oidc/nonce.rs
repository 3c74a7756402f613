//! Single-use login nonces.

use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use rand::RngCore;

const NONCE_BYTES: usize = 32;

/// Issued nonces with their expiry. Each one can be consumed once.
#[derive(Debug)]
pub struct NoncePool {
    nonces: DashMap<String, Instant>,
    ttl: Duration,
}

impl NoncePool {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            nonces: DashMap::new(),
            ttl,
        }
    }

    /// Issues a fresh random nonce.
    #[must_use]
    pub fn generate(&self) -> String {
        let now = Instant::now();
        self.nonces.retain(|_, expires_at| *expires_at > now);

        let mut bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = URL_SAFE_NO_PAD.encode(bytes);
        self.nonces.insert(nonce.clone(), now + self.ttl);
        nonce
    }

    /// Consumes `nonce`. Returns `false` if it was never issued, already
    /// consumed or expired.
    pub fn consume(&self, nonce: &str) -> bool {
        self.nonces
            .remove(nonce)
            .is_some_and(|(_, expires_at)| Instant::now() < expires_at)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_consumed_once() {
        let pool = NoncePool::new(Duration::from_secs(60));
        let nonce = pool.generate();
        assert_eq!(nonce.len(), 43);
        assert!(pool.consume(&nonce));
        assert!(!pool.consume(&nonce));
        assert!(!pool.consume("never-issued"));
    }

    #[test]
    fn test_expired_nonce_rejected() {
        let pool = NoncePool::new(Duration::ZERO);
        let nonce = pool.generate();
        assert!(!pool.consume(&nonce));
    }

    #[test]
    fn test_concurrent_consumers_single_winner() {
        let pool = Arc::new(NoncePool::new(Duration::from_secs(60)));
        let nonce = pool.generate();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let nonce = nonce.clone();
                std::thread::spawn(move || pool.consume(&nonce))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
