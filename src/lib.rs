// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A demand-paged virtual memory core for a teaching-grade MIPS-like
//! kernel with a software-managed TLB: an inverted page table, a swap
//! manager, and the page-fault/fork glue that ties them together.
//!
//! The boundary this crate draws is deliberately narrow: address-space
//! bookkeeping, the VFS, and ELF loading all live behind the
//! [`AddressSpace`], [`Vfs`]/[`ElfImage`] traits so a host kernel
//! supplies its own and this crate never has to know their shape.
//! [`VmCore`] is the thin struct a host wires those collaborators
//! through; everything it does is delegated straight to [`ipt`],
//! [`swap`], [`tlb`], [`pagefault`], and [`fork`].

pub mod addrspace;
pub mod error;
pub mod fork;
pub mod ipt;
pub mod pagefault;
pub mod physmem;
pub mod stats;
pub mod swap;
pub mod tlb;
pub mod vfs;

pub use addrspace::{page_align_down, AddressSpace, Pid, ProgHeader, SegmentKind, PAGE_SIZE};
pub use error::VmError;
pub use fork::as_copy;
pub use ipt::{FrameFlags, Ipt, PageLoader};
pub use pagefault::{vm_fault, FaultType, SegmentLoader};
pub use physmem::PhysMem;
pub use stats::{lock_stats_for_test, Snapshot, Statistics, STATS};
pub use swap::{SwapBackend, SwapManager};
pub use tlb::{TlbLoFlags, TlbManager};
pub use vfs::{ElfImage, InMemoryVfs, Vfs};

use std::sync::Mutex;

/// Boot-time sizing the host kernel hands in, the way `original_source`
/// derives `NUM_TLB`/total RAM pages/swap size from the MIPS machine
/// it's booting on, and the teacher's `BootConfig` (`kernel/src/main.rs`)
/// threads startup parameters through `MemoryManager::init`.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Physical frames the IPT manages. Grounded on `ram_getsize()` in
    /// the original's `initPT`.
    pub n_frames: usize,
    /// Hardware TLB entries; MIPS r3000 has 64 (`NUM_TLB` in
    /// `include/mips/tlb.h`).
    pub n_tlb: usize,
    /// Page slots in the swap file.
    pub swap_slots: usize,
}

impl Default for BootConfig {
    fn default() -> Self { BootConfig { n_frames: 256, n_tlb: 64, swap_slots: 512 } }
}

/// The wiring a host kernel holds onto: one inverted page table, one
/// software TLB, one swap manager. All three are owned here rather than
/// behind a `lazy_static` singleton (contrast the teacher's
/// `MemoryManager`) so more than one can exist side by side in a test
/// process without sharing state.
pub struct VmCore {
    pub ipt: Ipt,
    pub swap: SwapManager,
    tlb: Mutex<TlbManager>,
}

impl VmCore {
    pub fn new(config: BootConfig, swap_file: Box<dyn Vfs>) -> VmCore {
        log::info!(
            "vm core booting: {} frames, {} TLB entries, {} swap slots",
            config.n_frames,
            config.n_tlb,
            config.swap_slots
        );
        VmCore { ipt: Ipt::new(config.n_frames), swap: SwapManager::new(swap_file, config.swap_slots), tlb: Mutex::new(TlbManager::new(config.n_tlb)) }
    }

    /// Dispatches one page fault, taking the TLB lock for the duration.
    pub fn fault(&self, faulttype: FaultType, vaddr: usize, pid: Pid, addrspace: &dyn AddressSpace, loader: &dyn PageLoader) -> Result<(), VmError> {
        let mut tlb = self.tlb.lock().unwrap();
        pagefault::vm_fault(faulttype, vaddr, pid, addrspace, &self.ipt, &mut tlb, loader, &self.swap)
    }

    /// Invalidates the TLB if `pid` differs from whichever process last
    /// ran, the way a context switch does on real hardware.
    pub fn switch_to(&self, pid: Pid) {
        let mut tlb = self.tlb.lock().unwrap();
        tlb.invalidate(&self.ipt, pid);
    }

    /// The hardware TLB's currently-installed flags for `vaddr`, or `None`
    /// if it isn't cached there. Exists for integration tests to inspect
    /// TLB state directly instead of only observing it through faults.
    pub fn tlb_flags(&self, vaddr: usize) -> Option<TlbLoFlags> {
        let tlb = self.tlb.lock().unwrap();
        tlb.flags_for(vaddr)
    }

    /// `as_copy`: duplicates `old_pid`'s pages into `new_pid` for `fork`.
    pub fn fork(&self, old_pid: Pid, new_pid: Pid) { fork::as_copy(&self.ipt, &self.swap, old_pid, new_pid); }

    /// Reclaims every frame and swap slot `pid` owns, run once at
    /// process exit (order matches `sys__exit` in the original: the IPT
    /// is cleared before the swap file is).
    pub fn on_process_exit(&self, pid: Pid) {
        self.ipt.free_pages(pid);
        self.swap.free_process(pid);
    }

    pub fn alloc_kpages(&self, npages: usize) -> usize { self.ipt.get_contiguous_pages(npages, &self.swap) }

    pub fn free_kpages(&self, addr: usize) { self.ipt.free_contiguous_pages(addr); }

    /// Prints the shutdown statistics report and the §6 law checks.
    pub fn shutdown(&self) {
        STATS.print_report();
        self.swap.optimize();
    }
}
