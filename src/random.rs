//! Secure random bytes, behind a small capability trait so stores can be handed
//! a deterministic source in tests.
use rand::RngCore;
use std::sync::Arc;

pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Reads from the thread-local CSPRNG (`rand::rng()`), which is seeded from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::rng().fill_bytes(dest);
    }
}

pub type RandomHandle = Arc<dyn RandomSource>;
