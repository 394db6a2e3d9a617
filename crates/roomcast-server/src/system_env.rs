//! Production environment: monotonic system clock and OS randomness.

use roomcast_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// Connection ids are drawn from getrandom, so they are unguessable as well
/// as unique in practice.
///
/// # Panics
///
/// Panics if the OS RNG fails. A server that cannot draw connection ids has
/// nothing sensible to fall back to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "time should advance");
    }

    #[test]
    fn connection_ids_differ() {
        let env = SystemEnv::new();

        let ids: std::collections::HashSet<u64> = (0..64).map(|_| env.random_u64()).collect();
        assert_eq!(ids.len(), 64);
    }
}
