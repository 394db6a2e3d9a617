//! Environment abstraction for deterministic testing.
//!
//! The driver never reads the clock or the OS RNG directly. Production passes
//! a system environment; tests pass one whose clock they advance by hand.

use std::time::Duration;

/// Time and randomness provider.
///
/// Implementations must guarantee `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, used for connection ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
