// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Inverted Page Table: the core allocator and second-chance
//! replacement engine this crate is built around (`spec.md` §4.1).
//!
//! Grounded line-for-line on `original_source/vm/pt.c`
//! (`findFreeEntryPT`, `getFramePT`, `findVictim`, `getContiguousPages`,
//! `freeContiguousPages`, `freePages`, `prepareCopyPT`/`copyPTEntries`/
//! `endCopyPT`, `tlbUpdateBit`) and `include/pt.h` for the entry bit
//! layout. Unlike the teacher's `MemoryManager`, reached through one
//! `lazy_static` instance behind a `with`/`with_mut` shim
//! (`kernel/src/mem.rs`), `Ipt` is a plain struct a host owns one of per
//! `VmCore` -- no singleton, no free-function shim -- so independent
//! tests never contend over shared replacement-algorithm state. It keeps
//! the teacher's blocking-`Condvar` style (adapted from the teacher's
//! cooperative-yield model) for its suspension points -- see
//! `DESIGN.md`'s concurrency deviation and singleton-pattern notes.

use std::sync::{Condvar, Mutex};

use bitflags::bitflags;

use crate::addrspace::{page_align_down, Pid};
use crate::physmem::PhysMem;
use crate::stats::{Event, STATS};

bitflags! {
    /// One entry's bit layout, straight out of `include/pt.h`'s
    /// `PT_VALID`/`PT_REF`/`PT_KERN`/`PT_TLB`/`PT_IO`/`PT_SWAP` macros.
    pub struct FrameFlags: u8 {
        const VALID = 0b0000_0001;
        const REF   = 0b0000_0010;
        const KERN  = 0b0000_0100;
        const TLB   = 0b0000_1000;
        const IO    = 0b0001_0000;
        const SWAP  = 0b0010_0000;
    }
}

/// An entry is "truly free" the way `findFreeEntryPT` tests it: no
/// content, no frame claimed, nothing in flight.
fn is_free(flags: FrameFlags) -> bool {
    !flags.intersects(FrameFlags::VALID | FrameFlags::KERN | FrameFlags::SWAP | FrameFlags::IO)
}

/// An entry is a second-chance *candidate* the way `findVictim` tests
/// it: never a kernel frame, never still cached in the hardware TLB,
/// never mid-I/O, never frozen for a fork in progress. `VALID` is
/// deliberately not checked -- an already-free entry is harmless to
/// "evict" (there is nothing to write back) and picking it up this way
/// matches the original.
fn is_selectable(flags: FrameFlags) -> bool {
    !flags.intersects(FrameFlags::KERN | FrameFlags::TLB | FrameFlags::SWAP | FrameFlags::IO)
}

#[derive(Debug, Clone, Copy)]
struct IptEntry {
    pid: Option<Pid>,
    vpage: usize,
    flags: FrameFlags,
}

impl IptEntry {
    const fn free() -> IptEntry { IptEntry { pid: None, vpage: 0, flags: FrameFlags::empty() } }
}

/// Segment-loader collaborator: fills a freshly claimed frame with the
/// right content (ELF bytes, swapped-out bytes, or zeros) once the IPT
/// has decided which physical frame a virtual page will live in. Kept as
/// a trait so `ipt.rs` never depends on `pagefault.rs` (only the other
/// way around).
pub trait PageLoader {
    fn load_page(&self, vpage: usize, pid: Pid, paddr: usize, mem: &dyn PhysMem);
}

struct IptState {
    entries: Vec<IptEntry>,
    /// Run length of a kernel allocation starting at this index, or `-1`
    /// if this index isn't the first frame of one. Mirrors
    /// `alloc_size[]` in `include/pt.h`.
    alloc_size: Vec<i64>,
    next_victim: usize,
}

/// The inverted page table plus its backing physical RAM. Owning RAM
/// here (rather than addressing it through a raw kernel alias, as the
/// original and the teacher both do) is what lets every frame-shuffling
/// operation in this crate be exercised from a plain test.
pub struct Ipt {
    state: Mutex<IptState>,
    cv: Condvar,
    ram: Mutex<Vec<u8>>,
    page_size: usize,
}

impl Ipt {
    /// `initPT`: claims `n_frames` physical frames for the table.
    pub fn new(n_frames: usize) -> Ipt {
        assert!(n_frames > 0, "an IPT with zero frames cannot back any address space");
        let page_size = crate::addrspace::PAGE_SIZE;
        Ipt {
            state: Mutex::new(IptState {
                entries: vec![IptEntry::free(); n_frames],
                alloc_size: vec![-1; n_frames],
                next_victim: 0,
            }),
            cv: Condvar::new(),
            ram: Mutex::new(vec![0u8; n_frames * page_size]),
            page_size,
        }
    }

    pub fn n_frames(&self) -> usize { self.state.lock().unwrap().entries.len() }

    fn frame_addr(&self, index: usize) -> usize { index * self.page_size }

    fn frame_index(&self, paddr: usize) -> usize { paddr / self.page_size }

    /// `getPAddressPT`: translates `(vpage, pid)` to a physical address
    /// if a valid, non-kernel mapping already exists, marking the entry
    /// as TLB-resident on the way out.
    pub fn resolve(&self, vaddr: usize, pid: Pid) -> Option<usize> {
        let vpage = page_align_down(vaddr);
        let mut st = self.state.lock().unwrap();
        let idx = st.entries.iter().position(|e| {
            e.pid == Some(pid) && e.vpage == vpage && e.flags.contains(FrameFlags::VALID) && !e.flags.contains(FrameFlags::KERN)
        })?;
        st.entries[idx].flags.insert(FrameFlags::TLB);
        Some(self.frame_addr(idx))
    }

    /// `getFramePT`: the page-fault hot path. Resolves an existing
    /// mapping, or claims a frame (free, or second-chance victim),
    /// evicts the previous occupant to swap if it held valid content,
    /// then asks `loader` to populate the frame.
    pub fn get_frame(&self, vaddr: usize, pid: Pid, loader: &dyn PageLoader, swap: &dyn crate::swap::SwapBackend) -> usize {
        let vpage = page_align_down(vaddr);
        if let Some(paddr) = self.resolve(vpage, pid) {
            STATS.record(Event::Reload);
            return paddr;
        }

        let (frame_idx, evicted) = self.claim_frame_locked(pid, vpage);
        let paddr = self.frame_addr(frame_idx);

        if let Some((old_pid, old_vpage)) = evicted {
            swap.store(old_vpage, old_pid, paddr, self);
        }

        loader.load_page(vpage, pid, paddr, self);

        let mut st = self.state.lock().unwrap();
        st.entries[frame_idx].flags.remove(FrameFlags::IO);
        st.entries[frame_idx].flags.insert(FrameFlags::TLB);
        paddr
    }

    /// Claims one frame for `(pid, vpage)`: a free slot if one exists,
    /// otherwise a second-chance victim. Blocks on `cv` if two full
    /// revolutions turn up nothing selectable.
    fn claim_frame_locked(&self, pid: Pid, vpage: usize) -> (usize, Option<(Pid, usize)>) {
        let mut st = self.state.lock().unwrap();

        if let Some(i) = st.entries.iter().position(|e| is_free(e.flags)) {
            st.entries[i] = IptEntry { pid: Some(pid), vpage, flags: FrameFlags::VALID | FrameFlags::IO };
            return (i, None);
        }

        loop {
            let n = st.entries.len();
            for _revolution in 0..2 {
                for _ in 0..n {
                    let i = st.next_victim;
                    st.next_victim = (st.next_victim + 1) % n;
                    if !is_selectable(st.entries[i].flags) {
                        continue;
                    }
                    if st.entries[i].flags.contains(FrameFlags::REF) {
                        st.entries[i].flags.remove(FrameFlags::REF);
                        continue;
                    }
                    let old = st.entries[i];
                    let evicted = old.flags.contains(FrameFlags::VALID).then(|| (old.pid.unwrap(), old.vpage));
                    st.entries[i] = IptEntry { pid: Some(pid), vpage, flags: FrameFlags::VALID | FrameFlags::IO };
                    return (i, evicted);
                }
            }
            st = self.cv.wait(st).unwrap();
        }
    }

    /// `getContiguousPages`: allocates `k` physically contiguous kernel
    /// frames. Pass 1 looks for a truly free run; pass 2 runs the
    /// second-chance sweep over runs of evictable entries; blocks on
    /// `cv` if two full sweeps can't assemble a run of the right length.
    /// The anti-fragmentation "longest run wins" heuristic in the
    /// original is treated as advisory and not reproduced here; any
    /// free run of at least `k` frames is accepted (see `DESIGN.md`).
    pub fn get_contiguous_pages(&self, k: usize, swap: &dyn crate::swap::SwapBackend) -> usize {
        assert!(k >= 1);
        let mut st = self.state.lock().unwrap();
        let n = st.entries.len();
        assert!(k <= n, "cannot allocate {k} contiguous pages out of {n} total frames");

        if let Some(first) = find_free_run(&st.entries, k) {
            for j in first..first + k {
                st.entries[j] = IptEntry { pid: None, vpage: 0, flags: FrameFlags::VALID | FrameFlags::KERN };
            }
            st.alloc_size[first] = k as i64;
            return self.frame_addr(first);
        }

        loop {
            for _revolution in 0..2 {
                if let Some((first, evictions)) = find_victim_run(&mut st, k, self.page_size) {
                    for j in first..first + k {
                        st.entries[j] = IptEntry { pid: None, vpage: 0, flags: FrameFlags::VALID | FrameFlags::KERN };
                    }
                    st.alloc_size[first] = k as i64;
                    st.next_victim = (first + k) % n;
                    drop(st);
                    for (old_pid, old_vpage, paddr) in evictions {
                        swap.store(old_vpage, old_pid, paddr, self);
                    }
                    return self.frame_addr(first);
                }
            }
            st = self.cv.wait(st).unwrap();
        }
    }

    /// `freeContiguousPages`: releases a kernel run starting at `addr`
    /// and wakes anyone blocked on allocation.
    pub fn free_contiguous_pages(&self, addr: usize) {
        let first = self.frame_index(addr);
        let mut st = self.state.lock().unwrap();
        let k = st.alloc_size[first];
        assert!(k > 0, "free_contiguous_pages called on an address that did not start a kernel run");
        for j in first..first + k as usize {
            st.entries[j] = IptEntry::free();
        }
        st.alloc_size[first] = -1;
        self.cv.notify_all();
    }

    /// `freePages`: releases every non-kernel frame owned by `pid`, run
    /// at process exit.
    pub fn free_pages(&self, pid: Pid) {
        let mut st = self.state.lock().unwrap();
        for entry in st.entries.iter_mut() {
            if entry.pid == Some(pid) && entry.flags.contains(FrameFlags::VALID) && !entry.flags.contains(FrameFlags::KERN) {
                *entry = IptEntry::free();
            }
        }
        self.cv.notify_all();
    }

    /// `prepareCopyPT`: freezes `pid`'s resident pages (`SWAP` bit) so
    /// none of them can be chosen as a victim while `fork.rs` is copying
    /// them.
    pub fn prepare_copy_pt(&self, pid: Pid) {
        let mut st = self.state.lock().unwrap();
        for entry in st.entries.iter_mut() {
            if entry.pid == Some(pid) && entry.flags.contains(FrameFlags::VALID) && !entry.flags.contains(FrameFlags::KERN) {
                entry.flags.insert(FrameFlags::SWAP);
            }
        }
    }

    /// `copyPTEntries`: duplicates every frozen page of `old_pid` into a
    /// fresh frame owned by `new_pid`; if no frame is free, writes the
    /// duplicate straight to `new_pid`'s swap slot instead, the way
    /// `copyPTEntries` falls back to `storeSwapFrame` under memory
    /// pressure.
    pub fn copy_pt_entries(&self, old_pid: Pid, new_pid: Pid, swap: &dyn crate::swap::SwapBackend) {
        let frozen: Vec<(usize, usize)> = {
            let st = self.state.lock().unwrap();
            st.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.pid == Some(old_pid) && e.flags.contains(FrameFlags::SWAP))
                .map(|(i, e)| (i, e.vpage))
                .collect()
        };

        for (old_idx, vpage) in frozen {
            let old_paddr = self.frame_addr(old_idx);
            let mut st = self.state.lock().unwrap();
            if let Some(new_idx) = st.entries.iter().position(|e| is_free(e.flags)) {
                st.entries[new_idx] = IptEntry { pid: Some(new_pid), vpage, flags: FrameFlags::VALID };
                drop(st);
                self.copy_page(old_paddr, self.frame_addr(new_idx));
            } else {
                drop(st);
                swap.store(vpage, new_pid, old_paddr, self);
            }
        }
    }

    /// `endCopyPT`: thaws `old_pid`'s pages and wakes anyone who was
    /// blocked on the frames this fork was holding hostage.
    pub fn end_copy_pt(&self, old_pid: Pid) {
        let mut st = self.state.lock().unwrap();
        for entry in st.entries.iter_mut() {
            if entry.pid == Some(old_pid) {
                entry.flags.remove(FrameFlags::SWAP);
            }
        }
        self.cv.notify_all();
    }

    /// `tlbUpdateBit`: called by the TLB manager when it evicts or
    /// invalidates a mapping. Clears `TLB`, sets `REF`. Returns `false`
    /// (logged by the caller) if the IPT no longer has a matching valid
    /// entry -- it was stolen out from under the TLB by a replacement.
    pub fn tlb_update_bit(&self, vaddr: usize, pid: Pid) -> bool {
        let vpage = page_align_down(vaddr);
        let mut st = self.state.lock().unwrap();
        match st.entries.iter_mut().find(|e| e.pid == Some(pid) && e.vpage == vpage && e.flags.contains(FrameFlags::VALID)) {
            Some(entry) => {
                entry.flags.remove(FrameFlags::TLB);
                entry.flags.insert(FrameFlags::REF);
                true
            }
            None => false,
        }
    }

    /// Total RAM, in bytes, currently attributed to `pid` (non-kernel
    /// resident frames only). Supplemental accounting per `spec.md` §4.1.
    pub fn ram_used_by(&self, pid: Pid) -> usize {
        let st = self.state.lock().unwrap();
        st.entries
            .iter()
            .filter(|e| e.pid == Some(pid) && e.flags.contains(FrameFlags::VALID) && !e.flags.contains(FrameFlags::KERN))
            .count()
            * self.page_size
    }

    /// Logs one line per resident frame, for interactive debugging --
    /// the Rust analogue of `pt.c`'s `printPT`.
    pub fn print_ownership(&self) {
        let st = self.state.lock().unwrap();
        for (i, entry) in st.entries.iter().enumerate() {
            if entry.flags.contains(FrameFlags::VALID) {
                log::info!("frame {i}: pid={:?} vpage={:#x} flags={:?}", entry.pid, entry.vpage, entry.flags);
            }
        }
    }
}

impl PhysMem for Ipt {
    fn read_page(&self, paddr: usize, buf: &mut [u8]) {
        let ram = self.ram.lock().unwrap();
        buf.copy_from_slice(&ram[paddr..paddr + buf.len()]);
    }

    fn write_page(&self, paddr: usize, buf: &[u8]) {
        let mut ram = self.ram.lock().unwrap();
        ram[paddr..paddr + buf.len()].copy_from_slice(buf);
    }
}

fn find_free_run(entries: &[IptEntry], k: usize) -> Option<usize> {
    let mut run_start = None;
    for (i, entry) in entries.iter().enumerate() {
        if is_free(entry.flags) {
            let start = *run_start.get_or_insert(i);
            if i - start + 1 == k {
                return Some(start);
            }
        } else {
            run_start = None;
        }
    }
    None
}

/// One second-chance sweep over the whole table looking for a run of `k`
/// consecutive selectable entries, as `getContiguousPages`'s fallback
/// pass does. An entry with `REF` set is cleared and excluded from the
/// run on this pass (it becomes eligible on the next sweep); any other
/// non-selectable entry simply breaks the run.
fn find_victim_run(st: &mut IptState, k: usize, page_size: usize) -> Option<(usize, Vec<(Pid, usize, usize)>)> {
    let n = st.entries.len();
    let mut run_start: Option<usize> = None;
    for i in 0..n {
        if !is_selectable(st.entries[i].flags) {
            run_start = None;
            continue;
        }
        if st.entries[i].flags.contains(FrameFlags::REF) {
            st.entries[i].flags.remove(FrameFlags::REF);
            run_start = None;
            continue;
        }
        let start = *run_start.get_or_insert(i);
        if i - start + 1 == k {
            let evictions = (start..start + k)
                .filter_map(|j| {
                    let e = st.entries[j];
                    e.flags.contains(FrameFlags::VALID).then(|| (e.pid.unwrap(), e.vpage, j * page_size))
                })
                .collect();
            return Some((start, evictions));
        }
    }
    None
}
