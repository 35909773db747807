// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `AddressSpace` collaborator: per-process segment geometry.
//!
//! `spec.md` places process/address-space bookkeeping out of scope for
//! this core, consumed only through a narrow shape (§6). `Pid`, the
//! segment classification rule, and `ProgHeader` are grounded on
//! `original_source/include/addrspace.h`'s fields as used throughout
//! `pt.c`/`swapfile.c`/`segments.c` (`as_vbase1`, `as_npages1`,
//! `prog_head_text`, `initial_offset_text`, ...).

use std::num::NonZeroU32;

pub const PAGE_SIZE: usize = 4096;

/// Process identifier. `0` is reserved by the IPT to mean "frame is free",
/// matching `pt_entry_s.pid == 0` in the original and the teacher's `PID`
/// newtype (`xous_kernel::PID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(NonZeroU32);

impl Pid {
    pub fn new(raw: u32) -> Option<Pid> { NonZeroU32::new(raw).map(Pid) }

    pub fn get(self) -> u32 { self.0.get() }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Which of the three growable regions a faulting virtual address falls
/// into. Mirrors the `segVar` / list selection in `swapfile.c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Data,
    Stack,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 3] = [SegmentKind::Text, SegmentKind::Data, SegmentKind::Stack];
}

/// ELF program-header fields needed to compute per-page filesz/memsz,
/// mirroring `struct prog_head` usage (`p_offset`, `p_filesz`,
/// `p_memsz`) in `segments.c::loadPage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgHeader {
    pub p_offset: usize,
    pub p_filesz: usize,
    pub p_memsz: usize,
}

/// Narrow view onto a process's address space, as consumed from the IPT,
/// swap manager, TLB manager, and page-fault handler. Implementors own
/// whatever richer address-space bookkeeping the rest of the kernel needs;
/// this core never constructs or mutates one.
pub trait AddressSpace {
    /// Base virtual address of the text segment.
    fn text_base(&self) -> usize;
    /// Number of pages spanned by the text segment.
    fn text_npages(&self) -> usize;
    /// Base virtual address of the data segment.
    fn data_base(&self) -> usize;
    /// Number of pages spanned by the data segment.
    fn data_npages(&self) -> usize;
    /// Top of the user stack (exclusive upper bound for stack addresses).
    fn user_stack_top(&self) -> usize;
    /// Bytes between the text segment's first byte and the page boundary
    /// of `text_base()`. Zero for page-aligned segments.
    fn initial_offset_text(&self) -> usize;
    /// Bytes between the data segment's first byte and the page boundary
    /// of `data_base()`.
    fn initial_offset_data(&self) -> usize;
    fn prog_head_text(&self) -> ProgHeader;
    fn prog_head_data(&self) -> ProgHeader;

    fn text_end(&self) -> usize { self.text_base() + self.text_npages() * PAGE_SIZE }
    fn data_end(&self) -> usize { self.data_base() + self.data_npages() * PAGE_SIZE }

    /// Classifies `vaddr` by the rule shared between the swap manager and
    /// the segment loader (`spec.md` §4.2/§4.3): text, else data, else
    /// stack if it lies strictly above the data segment and at or below
    /// the user stack top; otherwise `None` (a segmentation fault).
    fn classify(&self, vaddr: usize) -> Option<SegmentKind> {
        if vaddr >= self.text_base() && vaddr <= self.text_end() {
            Some(SegmentKind::Text)
        } else if vaddr >= self.data_base() && vaddr <= self.data_end() {
            Some(SegmentKind::Data)
        } else if vaddr > self.data_end() && vaddr <= self.user_stack_top() {
            Some(SegmentKind::Stack)
        } else {
            None
        }
    }

    /// True when `vaddr` lies within the (read-only) text segment,
    /// matching `segmentIsReadOnly` in `vm_tlb.c`.
    fn is_read_only(&self, vaddr: usize) -> bool {
        vaddr >= self.text_base() && vaddr <= self.text_end()
    }
}

pub fn page_align_down(vaddr: usize) -> usize { vaddr & !(PAGE_SIZE - 1) }
