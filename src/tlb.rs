// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Software-managed TLB manager (`spec.md` §4.5).
//!
//! Grounded on `original_source/vm/vm_tlb.c` (`tlbInsert`, `tlbVictim`,
//! `tlbInvalidate`, `tlbEntryIsValid`, `segmentIsReadOnly`), with the
//! flag-word shape borrowed from the teacher's `MMUFlags` bitflags
//! (`kernel/src/arch/riscv/mem.rs`).

use bitflags::bitflags;

use crate::addrspace::{AddressSpace, Pid};
use crate::ipt::Ipt;
use crate::stats::{Event, STATS};

bitflags! {
    /// Mirrors the subset of MIPS `TLBLO_*` bits this spec cares about:
    /// validity and the dirty (writable) bit. There is no ASID field
    /// (`spec.md` §4.5: "no ASID field").
    pub struct TlbLoFlags: u32 {
        const VALID = 0b01;
        const DIRTY = 0b10;
    }
}

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    hi: usize,
    lo_paddr: usize,
    lo_flags: TlbLoFlags,
}

impl TlbEntry {
    const fn invalid() -> TlbEntry { TlbEntry { hi: 0, lo_paddr: 0, lo_flags: TlbLoFlags::empty() } }

    fn is_valid(&self) -> bool { self.lo_flags.contains(TlbLoFlags::VALID) }
}

/// Fixed-size hardware TLB model: `N_TLB` entries, round-robin victim
/// selection, one "last active pid" slot used to detect a process switch
/// in `invalidate()`.
pub struct TlbManager {
    entries: Vec<TlbEntry>,
    next_victim: usize,
    last_pid: Option<Pid>,
}

impl TlbManager {
    pub fn new(n_tlb: usize) -> TlbManager {
        assert!(n_tlb > 0, "a TLB with zero entries cannot hold any mapping");
        TlbManager { entries: vec![TlbEntry::invalid(); n_tlb], next_victim: 0, last_pid: None }
    }

    pub fn n_tlb(&self) -> usize { self.entries.len() }

    pub fn entry_valid(&self, i: usize) -> bool { self.entries[i].is_valid() }

    /// Looks up the hardware TLB entry currently mapping `vaddr`, if any.
    /// Exposed so an integration test can assert the installed `DIRTY`
    /// bit directly rather than inferring it from side effects.
    pub fn flags_for(&self, vaddr: usize) -> Option<TlbLoFlags> {
        self.entries.iter().find(|e| e.is_valid() && e.hi == vaddr).map(|e| e.lo_flags)
    }

    /// Writes `(vaddr, paddr)` into the TLB, as `tlbInsert` does: first
    /// scan for a free (invalid) slot and record a "fault with free";
    /// otherwise round-robin a victim, tell the IPT that victim's mapping
    /// left the TLB, and record a "fault with replace".
    pub fn insert(&mut self, ipt: &Ipt, current_pid: Pid, addrspace: &dyn AddressSpace, vaddr: usize, paddr: usize) {
        let read_only = addrspace.is_read_only(vaddr);
        let mut lo_flags = TlbLoFlags::VALID;
        if !read_only {
            lo_flags |= TlbLoFlags::DIRTY;
        }

        if let Some(slot) = self.entries.iter().position(|e| !e.is_valid()) {
            self.entries[slot] = TlbEntry { hi: vaddr, lo_paddr: paddr, lo_flags };
            STATS.record(Event::FaultWithFree);
            return;
        }

        let victim = self.next_victim;
        self.next_victim = (self.next_victim + 1) % self.entries.len();
        let evicted = self.entries[victim];
        if evicted.is_valid() && !ipt.tlb_update_bit(evicted.hi, current_pid) {
            log::warn!("tlbUpdateBit found no matching IPT entry for evicted vaddr {:#x}", evicted.hi);
        }
        self.entries[victim] = TlbEntry { hi: vaddr, lo_paddr: paddr, lo_flags };
        STATS.record(Event::FaultWithReplace);
    }

    /// Called on context switch. If the incoming pid differs from the
    /// last one this TLB served, every valid entry is hand back to the
    /// IPT (`TLB -> REF`) and invalidated, mirroring `tlbInvalidate`.
    /// Per `spec.md` §9 open questions, REF bits elsewhere in the IPT are
    /// left untouched.
    pub fn invalidate(&mut self, ipt: &Ipt, incoming_pid: Pid) {
        if self.last_pid == Some(incoming_pid) {
            return;
        }
        let previous_pid = self.last_pid;
        for entry in self.entries.iter_mut() {
            if entry.is_valid() {
                if let Some(prev) = previous_pid {
                    if !ipt.tlb_update_bit(entry.hi, prev) {
                        log::warn!("tlbUpdateBit found no matching IPT entry for vaddr {:#x} of outgoing pid {prev}", entry.hi);
                    }
                }
            }
            *entry = TlbEntry::invalid();
        }
        self.last_pid = Some(incoming_pid);
        STATS.record(Event::Invalidation);
    }
}
