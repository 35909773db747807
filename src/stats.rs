// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fault/reload/replace/zero/elf/swap counters, observable at shutdown.
//!
//! Grounded on `original_source/vm/stats.c`: `statistics_tlb` and
//! `statistics_pt` become one `Statistics` struct behind its own lock
//! (the original uses two spinlocks; one `Mutex` is sufficient here since
//! there is no interrupt-context caller that would deadlock taking it).

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct Snapshot {
    pub tlb_faults: u64,
    pub tlb_faults_with_free: u64,
    pub tlb_faults_with_replace: u64,
    pub tlb_invalidations: u64,
    pub tlb_reloads: u64,
    pub pt_faults_zeroed: u64,
    pub pt_faults_disk: u64,
    pub pt_faults_from_elf: u64,
    pub pt_faults_from_swapfile: u64,
    pub swapfile_writes: u64,
}

impl Snapshot {
    /// `faults = free + replace`, `faults = reload + disk + zeroed`,
    /// `disk = elf + swap`. Returns the names of any law that failed.
    pub fn check_consistency(&self) -> Vec<&'static str> {
        let mut broken = Vec::new();
        if self.tlb_faults != self.tlb_faults_with_free + self.tlb_faults_with_replace {
            broken.push("faults = free + replace");
        }
        if self.tlb_faults != self.tlb_reloads + self.pt_faults_disk + self.pt_faults_zeroed {
            broken.push("faults = reload + disk + zeroed");
        }
        if self.pt_faults_disk != self.pt_faults_from_elf + self.pt_faults_from_swapfile {
            broken.push("disk = elf + swap");
        }
        broken
    }
}

#[derive(Debug, Default)]
struct Counters {
    tlb_faults: u64,
    tlb_faults_with_free: u64,
    tlb_faults_with_replace: u64,
    tlb_invalidations: u64,
    tlb_reloads: u64,
    pt_faults_zeroed: u64,
    pt_faults_disk: u64,
    pt_faults_from_elf: u64,
    pt_faults_from_swapfile: u64,
    swapfile_writes: u64,
}

pub struct Statistics {
    inner: Mutex<Counters>,
}

impl Default for Statistics {
    fn default() -> Self { Statistics { inner: Mutex::new(Counters::default()) } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Fault,
    FaultWithFree,
    FaultWithReplace,
    Invalidation,
    Reload,
    FaultZeroed,
    FaultDisk,
    FaultFromElf,
    FaultFromSwapfile,
    SwapfileWrite,
}

impl Statistics {
    pub fn record(&self, event: Event) {
        let mut c = self.inner.lock().unwrap();
        match event {
            Event::Fault => c.tlb_faults += 1,
            Event::FaultWithFree => c.tlb_faults_with_free += 1,
            Event::FaultWithReplace => c.tlb_faults_with_replace += 1,
            Event::Invalidation => c.tlb_invalidations += 1,
            Event::Reload => c.tlb_reloads += 1,
            Event::FaultZeroed => c.pt_faults_zeroed += 1,
            Event::FaultDisk => c.pt_faults_disk += 1,
            Event::FaultFromElf => c.pt_faults_from_elf += 1,
            Event::FaultFromSwapfile => c.pt_faults_from_swapfile += 1,
            Event::SwapfileWrite => c.swapfile_writes += 1,
        }
    }

    /// Zeroes every counter. Production code never calls this; it exists
    /// so an integration test can assert an exact delta against the one
    /// process-wide [`STATS`] instance without inheriting counts left
    /// over from whichever scenarios ran first.
    pub fn reset(&self) {
        let mut c = self.inner.lock().unwrap();
        *c = Counters::default();
    }

    pub fn snapshot(&self) -> Snapshot {
        let c = self.inner.lock().unwrap();
        Snapshot {
            tlb_faults: c.tlb_faults,
            tlb_faults_with_free: c.tlb_faults_with_free,
            tlb_faults_with_replace: c.tlb_faults_with_replace,
            tlb_invalidations: c.tlb_invalidations,
            tlb_reloads: c.tlb_reloads,
            pt_faults_zeroed: c.pt_faults_zeroed,
            pt_faults_disk: c.pt_faults_disk,
            pt_faults_from_elf: c.pt_faults_from_elf,
            pt_faults_from_swapfile: c.pt_faults_from_swapfile,
            swapfile_writes: c.swapfile_writes,
        }
    }

    /// Prints the shutdown report and the §6 correctness checks, the way
    /// the original's `printStatistics`/`constraintsCheck` do.
    pub fn print_report(&self) {
        let s = self.snapshot();
        log::info!(
            "TLB statistics: faults={} free={} replace={} invalidations={} reloads={}",
            s.tlb_faults,
            s.tlb_faults_with_free,
            s.tlb_faults_with_replace,
            s.tlb_invalidations,
            s.tlb_reloads
        );
        log::info!(
            "PT statistics: zeroed={} disk={} from_elf={} from_swap={} swap_writes={}",
            s.pt_faults_zeroed,
            s.pt_faults_disk,
            s.pt_faults_from_elf,
            s.pt_faults_from_swapfile,
            s.swapfile_writes
        );
        for broken in s.check_consistency() {
            log::warn!("WARNING: statistics law violated: {broken}");
        }
    }
}

lazy_static::lazy_static! {
    pub static ref STATS: Statistics = Statistics::default();
    static ref STATS_TEST_LOCK: Mutex<()> = Mutex::new(());
}

/// Serializes any test that asserts an exact delta against the global
/// [`STATS`] counters. `cargo test` runs every test in the binary
/// concurrently by default, and they all share this one `lazy_static`
/// instance, so two such tests running side by side would otherwise see
/// each other's increments. Not `#[cfg(test)]`-gated: `tests/scenarios.rs`
/// links against this crate's ordinary (non-test) build, where `cfg(test)`
/// never applies.
pub fn lock_stats_for_test() -> std::sync::MutexGuard<'static, ()> {
    STATS_TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_snapshot_reports_no_violations() {
        let s = Snapshot { tlb_faults: 3, tlb_faults_with_free: 2, tlb_faults_with_replace: 1, tlb_reloads: 1, pt_faults_disk: 1, pt_faults_zeroed: 1, pt_faults_from_elf: 1, pt_faults_from_swapfile: 0, ..Default::default() };
        assert!(s.check_consistency().is_empty());
    }

    #[test]
    fn broken_law_is_reported() {
        let s = Snapshot { tlb_faults: 5, tlb_faults_with_free: 2, tlb_faults_with_replace: 1, ..Default::default() };
        assert!(s.check_consistency().contains(&"faults = free + replace"));
    }
}
