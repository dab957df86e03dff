//! Wave-scoped ownership of native handles.
//!
//! Every record gets a fresh wave. Handles created while computing that
//! record are tracked under its wave and released together once the record's
//! output has been consumed. This is the only place native memory is freed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use molsift_core::{Releasable, Result, SiftError};
use parking_lot::Mutex;

/// Identifier of one wave. Ids increase monotonically and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveId(u64);

impl WaveId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wave#{}", self.0)
    }
}

/// Counters describing arena activity since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    pub waves_opened: u64,
    pub waves_released: u64,
    pub handles_tracked: u64,
    pub handles_released: u64,
    pub release_failures: u64,
}

impl ArenaStats {
    /// Waves opened but not yet released.
    pub fn open_waves(&self) -> u64 {
        self.waves_opened - self.waves_released
    }
}

/// Tracks native handles per wave and releases them wave by wave.
pub struct ResourceArena {
    next_wave: AtomicU64,
    waves: Mutex<HashMap<WaveId, Vec<Arc<dyn Releasable>>>>,
    stats: Mutex<ArenaStats>,
}

impl ResourceArena {
    pub fn new() -> Self {
        ResourceArena {
            next_wave: AtomicU64::new(1),
            waves: Mutex::new(HashMap::new()),
            stats: Mutex::new(ArenaStats::default()),
        }
    }

    /// Open a new, empty wave.
    pub fn open_wave(&self) -> WaveId {
        let id = WaveId(self.next_wave.fetch_add(1, Ordering::Relaxed));
        self.waves.lock().insert(id, Vec::new());
        self.stats.lock().waves_opened += 1;
        id
    }

    /// Register `handle` under `wave` and hand back a shared reference to it.
    ///
    /// Tracking into a wave that is not open releases the handle right away
    /// and fails, so nothing can outlive its wave.
    pub fn track<H: Releasable + 'static>(&self, wave: WaveId, handle: H) -> Result<Arc<H>> {
        let handle = Arc::new(handle);
        {
            let mut waves = self.waves.lock();
            if let Some(handles) = waves.get_mut(&wave) {
                handles.push(handle.clone() as Arc<dyn Releasable>);
                drop(waves);
                self.stats.lock().handles_tracked += 1;
                return Ok(handle);
            }
        }
        if let Err(e) = handle.release() {
            tracing::warn!(%wave, error = %e, "failed to release handle tracked into a closed wave");
        }
        Err(SiftError::Resource(format!("{wave} is not open")))
    }

    /// Release every handle of `wave`.
    ///
    /// Idempotent: releasing a wave that is already released or was never
    /// opened does nothing. A failing handle is logged and the remaining
    /// handles are still released. Returns the number of failed releases.
    pub fn release_wave(&self, wave: WaveId) -> usize {
        let Some(handles) = self.waves.lock().remove(&wave) else {
            return 0;
        };
        let mut failures = 0;
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.release() {
                failures += 1;
                tracing::warn!(%wave, error = %e, "failed to release native handle");
            }
        }
        let mut stats = self.stats.lock();
        stats.waves_released += 1;
        stats.handles_released += (count - failures) as u64;
        stats.release_failures += failures as u64;
        failures
    }

    /// Release every wave that is still open.
    pub fn release_all(&self) -> usize {
        let open: Vec<WaveId> = self.waves.lock().keys().copied().collect();
        open.into_iter().map(|wave| self.release_wave(wave)).sum()
    }

    pub fn stats(&self) -> ArenaStats {
        *self.stats.lock()
    }
}

impl Default for ResourceArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceArena {
    fn drop(&mut self) {
        let failures = self.release_all();
        if failures > 0 {
            tracing::warn!(failures, "handles failed to release while dropping the arena");
        }
    }
}

/// The wave a record is computed in, handed to record computations.
#[derive(Clone, Copy)]
pub struct Wave<'a> {
    id: WaveId,
    arena: &'a ResourceArena,
}

impl<'a> Wave<'a> {
    pub fn new(id: WaveId, arena: &'a ResourceArena) -> Self {
        Wave { id, arena }
    }

    pub fn id(&self) -> WaveId {
        self.id
    }

    /// Track a native handle for the lifetime of this wave.
    pub fn track<H: Releasable + 'static>(&self, handle: H) -> Result<Arc<H>> {
        self.arena.track(self.id, handle)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use molsift_core::{Releasable, Result, SiftError};

    /// Handle that counts its releases and optionally fails.
    pub struct CountingHandle {
        pub released: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl Releasable for CountingHandle {
        fn release(&self) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SiftError::Resource("simulated release failure".into()))
            } else {
                Ok(())
            }
        }
    }
}
