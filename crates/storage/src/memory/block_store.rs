//! In-memory block store
//!
//! `MemBlockStore` keeps block contents in a map keyed by address and tracks
//! allocation state per block: the epoch in which the allocation
//! became durable, and pending frees and claims. That is enough to model what a
//! crash does to a pool:
//!
//! - allocations made in epochs that never synced disappear
//! - frees and claims made in epochs that never synced are undone
//! - everything written to a device stays readable
//!
//! Faults can be injected for allocation, writes, flushes, reads and whole
//! devices. Bookkeeping errors (double frees, frees of unallocated blocks) are
//! counted so tests can assert they never happen.

use crate::block_store::BlockStore;
use crate::io::IoHandle;
use intentlog_core::{BlockError, BlockRef, ChecksumKind, DeviceId, Dva, Epoch};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const SECTOR: u32 = 512;

#[derive(Debug, Clone)]
struct Allocation {
    size: u32,
    /// Epoch in which the allocation (or the claim that revived it) happened
    live_since: Epoch,
    freed_in: Option<Epoch>,
    claimed_in: Option<Epoch>,
    kind: ChecksumKind,
}

impl Allocation {
    fn is_live(&self) -> bool {
        self.freed_in.is_none()
    }
}

#[derive(Debug)]
struct Device {
    next_offset: u64,
    online: bool,
}

#[derive(Debug, Default)]
struct Faults {
    /// Allocations that still succeed before every later one fails
    allocs_before_failure: Option<u64>,
    failing_writes: u64,
    failing_flushes: u64,
    failing_reads: FxHashSet<Dva>,
    write_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreState {
    devices: Vec<Device>,
    allocations: FxHashMap<Dva, Allocation>,
    contents: FxHashMap<Dva, Vec<u8>>,
}

#[derive(Debug, Default)]
struct StoreStats {
    allocs: AtomicU64,
    alloc_failures: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    reads: AtomicU64,
    frees: AtomicU64,
    claims: AtomicU64,
    flushes: AtomicU64,
    bad_frees: AtomicU64,
}

/// Point-in-time copy of the store's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatsSnapshot {
    /// Successful allocations
    pub allocs: u64,
    /// Failed allocations
    pub alloc_failures: u64,
    /// Write requests, successful or not
    pub writes: u64,
    /// Failed writes
    pub write_failures: u64,
    /// Reads
    pub reads: u64,
    /// Frees
    pub frees: u64,
    /// Successful claims
    pub claims: u64,
    /// Device cache flushes
    pub flushes: u64,
    /// Frees of blocks that were not allocated (double frees included)
    pub bad_frees: u64,
}

/// In-memory [`BlockStore`] with fault injection and crash simulation.
pub struct MemBlockStore {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    stats: StoreStats,
}

impl MemBlockStore {
    /// Store with a single device
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    /// Store with `count` devices
    pub fn with_devices(count: u32) -> Self {
        let devices = (0..count.max(1))
            .map(|_| Device {
                // Offset 0 is never handed out so no allocated block looks like a hole address.
                next_offset: SECTOR as u64,
                online: true,
            })
            .collect();
        MemBlockStore {
            state: Mutex::new(StoreState {
                devices,
                ..Default::default()
            }),
            faults: Mutex::new(Faults::default()),
            stats: StoreStats::default(),
        }
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Let `n` more allocations succeed, then fail every later one.
    pub fn fail_allocs_after(&self, n: u64) {
        self.faults.lock().allocs_before_failure = Some(n);
    }

    /// Stop failing allocations.
    pub fn clear_alloc_failures(&self) {
        self.faults.lock().allocs_before_failure = None;
    }

    /// Fail the next `n` writes with an I/O error.
    pub fn fail_next_writes(&self, n: u64) {
        self.faults.lock().failing_writes = n;
    }

    /// Fail the next `n` cache flushes with an I/O error.
    pub fn fail_next_flushes(&self, n: u64) {
        self.faults.lock().failing_flushes = n;
    }

    /// Fail every read of `dva` with an I/O error.
    pub fn fail_reads_of(&self, dva: Dva) {
        self.faults.lock().failing_reads.insert(dva);
    }

    /// Complete writes asynchronously after `latency`.
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        self.faults.lock().write_latency = latency;
    }

    /// Take a device offline or bring it back.
    pub fn set_device_online(&self, device: DeviceId, online: bool) {
        if let Some(dev) = self.state.lock().devices.get_mut(device.0 as usize) {
            dev.online = online;
        }
    }

    /// Flip one byte of a block's stored contents.
    pub fn corrupt(&self, dva: Dva) {
        let mut state = self.state.lock();
        if let Some(bytes) = state.contents.get_mut(&dva) {
            if let Some(b) = bytes.first_mut() {
                *b ^= 0xff;
            }
        }
    }

    // ========================================================================
    // Crash simulation
    // ========================================================================

    /// Drop every allocation state change made after `last_synced`.
    ///
    /// Written contents survive; allocations, frees and claims from epochs that
    /// never synced are rolled back.
    pub fn simulate_crash(&self, last_synced: Epoch) {
        let mut state = self.state.lock();
        let before = state.allocations.len();
        state
            .allocations
            .retain(|_, alloc| alloc.live_since <= last_synced);
        for alloc in state.allocations.values_mut() {
            if alloc.freed_in.map_or(false, |e| e > last_synced) {
                alloc.freed_in = None;
            }
            if alloc.claimed_in.map_or(false, |e| e > last_synced) {
                alloc.claimed_in = None;
            }
        }
        debug!(
            last_synced,
            dropped = before - state.allocations.len(),
            "simulated crash"
        );
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Counters
    pub fn stats(&self) -> StoreStatsSnapshot {
        let s = &self.stats;
        StoreStatsSnapshot {
            allocs: s.allocs.load(Ordering::Relaxed),
            alloc_failures: s.alloc_failures.load(Ordering::Relaxed),
            writes: s.writes.load(Ordering::Relaxed),
            write_failures: s.write_failures.load(Ordering::Relaxed),
            reads: s.reads.load(Ordering::Relaxed),
            frees: s.frees.load(Ordering::Relaxed),
            claims: s.claims.load(Ordering::Relaxed),
            flushes: s.flushes.load(Ordering::Relaxed),
            bad_frees: s.bad_frees.load(Ordering::Relaxed),
        }
    }

    /// True if `block` is allocated and not freed.
    pub fn is_allocated(&self, block: &BlockRef) -> bool {
        self.state
            .lock()
            .allocations
            .get(&block.dva)
            .map_or(false, Allocation::is_live)
    }

    /// True if `block` is allocated and reserved by a claim.
    pub fn is_claimed(&self, block: &BlockRef) -> bool {
        self.state
            .lock()
            .allocations
            .get(&block.dva)
            .map_or(false, |a| a.is_live() && a.claimed_in.is_some())
    }

    /// Number of allocated, unfreed blocks of the given kind.
    pub fn live_blocks(&self, kind: ChecksumKind) -> usize {
        self.state
            .lock()
            .allocations
            .values()
            .filter(|a| a.kind == kind && a.is_live())
            .count()
    }

    /// Number of blocks of the given kind known to the store, freed or not.
    pub fn known_blocks(&self, kind: ChecksumKind) -> usize {
        self.state
            .lock()
            .allocations
            .values()
            .filter(|a| a.kind == kind)
            .count()
    }

    /// Total bytes of allocated, unfreed blocks.
    pub fn live_bytes(&self) -> u64 {
        self.state
            .lock()
            .allocations
            .values()
            .filter(|a| a.is_live())
            .map(|a| a.size as u64)
            .sum()
    }

    /// Stored contents of a block, if it was ever written.
    pub fn contents(&self, dva: Dva) -> Option<Vec<u8>> {
        self.state.lock().contents.get(&dva).cloned()
    }

    fn device_error(state: &StoreState, device: DeviceId) -> Option<BlockError> {
        match state.devices.get(device.0 as usize) {
            Some(dev) if dev.online => None,
            _ => Some(BlockError::DeviceOffline { device }),
        }
    }
}

impl Default for MemBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemBlockStore {
    fn alloc(
        &self,
        epoch: Epoch,
        min_size: u32,
        prev_hint: Option<&BlockRef>,
    ) -> Result<BlockRef, BlockError> {
        {
            let mut faults = self.faults.lock();
            if let Some(left) = faults.allocs_before_failure.as_mut() {
                if *left == 0 {
                    self.stats.alloc_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(BlockError::NoSpace {
                        requested: min_size,
                    });
                }
                *left -= 1;
            }
        }

        let size = (min_size.max(1) + SECTOR - 1) / SECTOR * SECTOR;
        let mut state = self.state.lock();
        let hinted = prev_hint
            .filter(|b| !b.is_hole())
            .map(|b| b.dva.device.0 as usize)
            .filter(|&i| state.devices.get(i).map_or(false, |d| d.online));
        let index = match hinted.or_else(|| state.devices.iter().position(|d| d.online)) {
            Some(i) => i,
            None => {
                self.stats.alloc_failures.fetch_add(1, Ordering::Relaxed);
                return Err(BlockError::NoSpace { requested: size });
            }
        };
        let device = &mut state.devices[index];
        let dva = Dva::new(DeviceId(index as u32), device.next_offset);
        device.next_offset += size as u64;
        state.allocations.insert(
            dva,
            Allocation {
                size,
                live_since: epoch,
                freed_in: None,
                claimed_in: None,
                kind: ChecksumKind::Embedded,
            },
        );
        self.stats.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(BlockRef::new(dva, size, epoch, ChecksumKind::Embedded))
    }

    fn write_async(&self, block: &BlockRef, data: Vec<u8>) -> IoHandle {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let latency = {
            let mut faults = self.faults.lock();
            if faults.failing_writes > 0 {
                faults.failing_writes -= 1;
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                return IoHandle::ready(Err(BlockError::Io {
                    dva: block.dva,
                    message: "injected write failure".to_string(),
                }));
            }
            faults.write_latency
        };

        let result = {
            let mut state = self.state.lock();
            if let Some(err) = Self::device_error(&state, block.dva.device) {
                Err(err)
            } else if data.len() > block.size as usize {
                Err(BlockError::Io {
                    dva: block.dva,
                    message: format!("{} bytes do not fit in {}", data.len(), block.size),
                })
            } else {
                if let Some(alloc) = state.allocations.get_mut(&block.dva) {
                    alloc.kind = block.kind;
                }
                state.contents.insert(block.dva, data);
                Ok(())
            }
        };
        if result.is_err() {
            self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
        }

        match latency {
            None => IoHandle::ready(result),
            Some(delay) => {
                let (handle, completer) = IoHandle::pending();
                thread::spawn(move || {
                    thread::sleep(delay);
                    completer.complete(result);
                });
                handle
            }
        }
    }

    fn read(&self, block: &BlockRef) -> Result<Vec<u8>, BlockError> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        if self.faults.lock().failing_reads.contains(&block.dva) {
            return Err(BlockError::Io {
                dva: block.dva,
                message: "injected read failure".to_string(),
            });
        }
        let state = self.state.lock();
        if let Some(err) = Self::device_error(&state, block.dva.device) {
            return Err(err);
        }
        let data = state
            .contents
            .get(&block.dva)
            .cloned()
            .unwrap_or_else(|| vec![0u8; block.size as usize]);
        if !block.verify_content(&data) {
            return Err(BlockError::Checksum { dva: block.dva });
        }
        Ok(data)
    }

    fn free(&self, block: &BlockRef, epoch: Epoch) {
        if block.is_hole() {
            return;
        }
        self.stats.frees.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match state.allocations.get_mut(&block.dva) {
            Some(alloc) if alloc.is_live() => {
                alloc.freed_in = Some(epoch);
                alloc.kind = block.kind;
            }
            Some(_) => {
                self.stats.bad_frees.fetch_add(1, Ordering::Relaxed);
                warn!(dva = %block.dva, epoch, "double free");
            }
            None => {
                self.stats.bad_frees.fetch_add(1, Ordering::Relaxed);
                warn!(dva = %block.dva, epoch, "free of unallocated block");
            }
        }
    }

    fn claim(&self, block: &BlockRef, epoch: Epoch) -> Result<(), BlockError> {
        if block.is_hole() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if let Some(alloc) = state.allocations.get_mut(&block.dva) {
            if alloc.is_live() {
                if alloc.claimed_in.is_some() {
                    return Err(BlockError::AlreadyClaimed { dva: block.dva });
                }
                alloc.claimed_in = Some(epoch);
                self.stats.claims.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
        // Not durably allocated: the claim itself allocates the block.
        if let Some(dev) = state.devices.get_mut(block.dva.device.0 as usize) {
            dev.next_offset = dev.next_offset.max(block.dva.offset + block.size as u64);
        }
        state.allocations.insert(
            block.dva,
            Allocation {
                size: block.size,
                live_since: epoch,
                freed_in: None,
                claimed_in: Some(epoch),
                kind: block.kind,
            },
        );
        self.stats.claims.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush_device_cache(&self, device: DeviceId) -> IoHandle {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        {
            let mut faults = self.faults.lock();
            if faults.failing_flushes > 0 {
                faults.failing_flushes -= 1;
                return IoHandle::ready(Err(BlockError::Io {
                    dva: Dva::new(device, 0),
                    message: "injected flush failure".to_string(),
                }));
            }
        }
        let state = self.state.lock();
        match Self::device_error(&state, device) {
            Some(err) => IoHandle::ready(Err(err)),
            None => IoHandle::ready(Ok(())),
        }
    }
}

impl std::fmt::Debug for MemBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemBlockStore")
            .field("devices", &state.devices.len())
            .field("allocations", &state.allocations.len())
            .finish()
    }
}
