//! Environment abstraction (time, sleep, randomness).
//!
//! Drivers take time and randomness from an [`Environment`] so the same
//! session code runs against the system clock in production and against
//! simulated time with a seeded RNG in the harness.

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Source of time and randomness for protocol drivers.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> Instant;

    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buf` with random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Fresh frame masking key.
    fn random_mask(&self) -> [u8; 4] {
        let mut key = [0u8; 4];
        self.random_bytes(&mut key);
        key
    }

    /// Fresh 16-byte handshake nonce.
    fn random_nonce(&self) -> [u8; 16] {
        let mut nonce = [0u8; 16];
        self.random_bytes(&mut nonce);
        nonce
    }
}

/// Production environment: tokio clock, thread-local OS-seeded RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a system environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_differ() {
        let env = SystemEnv::new();
        let masks: Vec<[u8; 4]> = (0..8).map(|_| env.random_mask()).collect();
        assert!(masks.windows(2).any(|w| w[0] != w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_advances_clock() {
        let env = SystemEnv::new();
        let start = env.now();
        env.sleep(Duration::from_secs(3)).await;
        assert!(env.now() - start >= Duration::from_secs(3));
    }
}
