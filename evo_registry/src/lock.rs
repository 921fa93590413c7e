//! Config lock: the cooperative lock guarding every registry list
//!
//! The lock word lives in the root record, so every process mapping the
//! segment contends on the same word. Holding the lock is proven by a
//! [`ConfigGuard`] (configuration side, releases on drop) or a
//! [`ConfigView`] (realtime side, a non-blocking observation that some
//! configuration process holds it). Registry reads accept either through
//! [`ConfigHold`]; mutation requires `&mut ConfigGuard`.

use crate::error::{RegistryError, RegistryResult};
use crate::object::Kind;
use crate::platform::{get_current_pid, is_process_alive};
use crate::root::RegistryRoot;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

bitflags! {
    /// Registry lock levels. Each set bit refuses a class of operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LockClass: u32 {
        /// No component loading or unloading
        const LOAD = 1;
        /// No creation or destruction of wiring objects
        const CONFIG = 2;
        /// Parameters are frozen
        const PARAMS = 4;
        /// Threads may not be started or stopped
        const RUN = 8;
        /// Everything above
        const ALL = Self::LOAD.bits() | Self::CONFIG.bits() | Self::PARAMS.bits() | Self::RUN.bits();
    }
}

/// How [`ConfigGuard`] acquisition waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Give up with `LockTimeout` after this long
    pub timeout: Duration,
    /// Take over a lock whose holding process no longer exists
    pub recover_stale: bool,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            recover_stale: true,
        }
    }
}

/// Proof that the config lock is held, accepted by registry reads
pub trait ConfigHold {
    /// Physical segment the hold refers to
    fn segment_id(&self) -> u64;

    /// Holder token the lock word must contain
    fn token(&self) -> u64;
}

/// Exclusive hold of the config lock, released on drop
pub struct ConfigGuard<'a> {
    root: &'a RegistryRoot,
    segment_id: u64,
    token: u64,
}

impl std::fmt::Debug for ConfigGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigGuard")
            .field("segment_id", &self.segment_id)
            .field("token", &format_args!("{:#x}", self.token))
            .finish()
    }
}

impl ConfigGuard<'_> {
    /// Process id encoded in the holder token
    pub fn holder_pid(&self) -> u32 {
        token_pid(self.token)
    }
}

impl ConfigHold for ConfigGuard<'_> {
    fn segment_id(&self) -> u64 {
        self.segment_id
    }

    fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for ConfigGuard<'_> {
    fn drop(&mut self) {
        if self
            .root
            .lock_holder
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                segment_id = self.segment_id,
                "Config lock was taken over before release"
            );
        }
    }
}

/// Observation that the config lock is held by some process
///
/// Obtained without blocking, so usable from realtime context. It stays
/// valid only while the observed holder keeps the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigView {
    segment_id: u64,
    token: u64,
}

impl ConfigView {
    /// Process id of the observed holder
    pub fn holder_pid(&self) -> u32 {
        token_pid(self.token)
    }
}

impl ConfigHold for ConfigView {
    fn segment_id(&self) -> u64 {
        self.segment_id
    }

    fn token(&self) -> u64 {
        self.token
    }
}

static TOKEN_SEQ: AtomicU32 = AtomicU32::new(0);

/// Fresh holder token: pid in the high half, a per-process sequence below
fn next_token() -> u64 {
    let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    (u64::from(get_current_pid()) << 32) | u64::from(seq)
}

#[inline]
const fn token_pid(token: u64) -> u32 {
    (token >> 32) as u32
}

/// Single acquisition attempt
fn try_claim(root: &RegistryRoot, token: u64, recover_stale: bool) -> bool {
    let current = root.lock_holder.load(Ordering::Acquire);
    if current == 0 {
        return root
            .lock_holder
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
    }

    let pid = token_pid(current);
    if recover_stale && !is_process_alive(pid) {
        let taken = root
            .lock_holder
            .compare_exchange(current, token, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if taken {
            warn!(dead_pid = pid, "Recovered config lock from a dead process");
        }
        return taken;
    }
    false
}

/// Acquire the config lock, waiting up to the policy timeout
pub(crate) fn acquire<'a>(root: &'a RegistryRoot, policy: &LockPolicy) -> RegistryResult<ConfigGuard<'a>> {
    let token = next_token();
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if try_claim(root, token, policy.recover_stale) {
            return Ok(ConfigGuard {
                root,
                segment_id: root.segment_id(),
                token,
            });
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(RegistryError::LockTimeout {
                waited_ms: waited.as_millis() as u64,
            });
        }

        // Spin briefly, then yield, then back off to short sleeps
        match attempts {
            0..64 => std::hint::spin_loop(),
            64..256 => std::thread::yield_now(),
            _ => std::thread::sleep(Duration::from_micros(50)),
        }
        attempts = attempts.saturating_add(1);
    }
}

/// One non-blocking acquisition attempt
pub(crate) fn try_acquire<'a>(root: &'a RegistryRoot, policy: &LockPolicy) -> Option<ConfigGuard<'a>> {
    let token = next_token();
    try_claim(root, token, policy.recover_stale).then(|| ConfigGuard {
        root,
        segment_id: root.segment_id(),
        token,
    })
}

/// True if any process holds the config lock
#[inline]
pub(crate) fn is_held(root: &RegistryRoot) -> bool {
    root.lock_holder.load(Ordering::Acquire) != 0
}

/// Observe the current holder without blocking
pub(crate) fn observe(root: &RegistryRoot) -> RegistryResult<ConfigView> {
    match root.lock_holder.load(Ordering::Acquire) {
        0 => Err(RegistryError::LockNotHeld),
        token => Ok(ConfigView {
            segment_id: root.segment_id(),
            token,
        }),
    }
}

/// Check that `hold` still proves the lock on this segment
#[inline]
pub(crate) fn verify<H: ConfigHold + ?Sized>(root: &RegistryRoot, hold: &H) -> RegistryResult<()> {
    let token = hold.token();
    if token == 0
        || hold.segment_id() != root.segment_id()
        || root.lock_holder.load(Ordering::Acquire) != token
    {
        return Err(RegistryError::LockNotHeld);
    }
    Ok(())
}

/// Active lock level
#[inline]
pub(crate) fn level(root: &RegistryRoot) -> LockClass {
    LockClass::from_bits_truncate(root.lock_level.load(Ordering::Acquire))
}

pub(crate) fn set_level(root: &RegistryRoot, level: LockClass) {
    root.lock_level.store(level.bits(), Ordering::Release);
}

/// Refuse creating or destroying objects of `kind` under the active level
pub(crate) fn ensure_unlocked(root: &RegistryRoot, kind: Kind) -> RegistryResult<()> {
    let class = match kind {
        Kind::Component => LockClass::LOAD,
        _ => LockClass::CONFIG,
    };
    if level(root).contains(class) {
        warn!(%kind, ?class, "Registry lock level refused mutation");
        return Err(RegistryError::Locked { class });
    }
    Ok(())
}
