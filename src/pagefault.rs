// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level fault dispatch and the ELF/zero-fill segment loader
//! (`spec.md` §4.3/§4.4).
//!
//! `vm_fault` is grounded on `original_source/vm/vm_tlb.c::vm_fault`;
//! the per-page filesz/memsz arithmetic in `elf_page_layout` is grounded
//! on `original_source/vm/segments.c::loadPage`, re-expressed as a pure
//! function of segment geometry rather than the original's direct
//! vnode-and-uio plumbing.

use crate::addrspace::{page_align_down, AddressSpace, Pid, ProgHeader, SegmentKind, PAGE_SIZE};
use crate::error::VmError;
use crate::ipt::{Ipt, PageLoader};
use crate::physmem::PhysMem;
use crate::stats::{Event, STATS};
use crate::swap::{SwapBackend, SwapManager};
use crate::tlb::TlbManager;
use crate::vfs::ElfImage;

/// Mirrors MIPS `VM_FAULT_READ`/`VM_FAULT_WRITE`/`VM_FAULT_READONLY`: the
/// third case is a write that found a valid, non-dirty TLB entry -- only
/// possible if the page is read-only, which makes it a fatal access
/// violation rather than an ordinary miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    Read,
    Write,
    ReadOnly,
}

/// `vm_fault`: classifies the address, resolves or allocates a frame,
/// and installs the mapping in the TLB. Returns `Err(SegmentationFault)`
/// for an address outside every segment, or for a write against the
/// read-only text segment -- both fatal to the faulting process.
#[allow(clippy::too_many_arguments)]
pub fn vm_fault(
    faulttype: FaultType,
    vaddr: usize,
    pid: Pid,
    addrspace: &dyn AddressSpace,
    ipt: &Ipt,
    tlb: &mut TlbManager,
    loader: &dyn PageLoader,
    swap: &dyn SwapBackend,
) -> Result<(), VmError> {
    if faulttype == FaultType::ReadOnly {
        return if addrspace.is_read_only(vaddr) { Err(VmError::SegmentationFault) } else { Ok(()) };
    }

    if addrspace.classify(vaddr).is_none() {
        return Err(VmError::SegmentationFault);
    }

    STATS.record(Event::Fault);
    let paddr = ipt.get_frame(vaddr, pid, loader, swap);
    tlb.insert(ipt, pid, addrspace, vaddr, paddr);
    Ok(())
}

/// What a page-aligned slice of a segment needs from its backing ELF
/// file: how many leading bytes of the page stay zero, how many bytes to
/// read from the file and at what file offset, and how many total bytes
/// of the page are "real" (the rest, up to `PAGE_SIZE`, is BSS).
struct PageLayout {
    in_page_start: usize,
    file_offset: usize,
    file_bytes: usize,
}

/// `loadPage`'s per-page arithmetic: `page_index` counts pages from the
/// segment's first (possibly unaligned) page. `initial_offset` is the
/// byte offset of the segment's true first byte within that first page.
fn elf_page_layout(header: ProgHeader, initial_offset: usize, page_index: usize) -> PageLayout {
    let (in_page_start, seg_byte_start) =
        if page_index == 0 { (initial_offset, 0) } else { (0, page_index * PAGE_SIZE - initial_offset) };

    let bytes_available = PAGE_SIZE - in_page_start;
    let file_bytes = header.p_filesz.saturating_sub(seg_byte_start).min(bytes_available);
    let file_offset = header.p_offset + seg_byte_start;

    PageLayout { in_page_start, file_offset, file_bytes }
}

/// The `PageLoader` wired into `Ipt::get_frame`: tries swap first (a
/// page that was evicted once already), then ELF content for
/// text/data, then a bare zero-fill for the stack (or for BSS/anonymous
/// tails of text and data, handled inside `elf_page_layout`).
pub struct SegmentLoader<'a> {
    pub addrspace: &'a dyn AddressSpace,
    pub text_image: &'a dyn ElfImage,
    pub data_image: &'a dyn ElfImage,
    pub swap: &'a SwapManager,
}

impl PageLoader for SegmentLoader<'_> {
    fn load_page(&self, vpage: usize, pid: Pid, paddr: usize, mem: &dyn PhysMem) {
        if self.swap.load(vpage, pid, paddr, mem) {
            STATS.record(Event::FaultDisk);
            return;
        }

        match self.addrspace.classify(vpage) {
            Some(SegmentKind::Text) => {
                let page_index = (vpage - page_align_down(self.addrspace.text_base())) / PAGE_SIZE;
                self.load_elf_page(self.text_image, self.addrspace.prog_head_text(), self.addrspace.initial_offset_text(), page_index, paddr, mem);
                STATS.record(Event::FaultFromElf);
                STATS.record(Event::FaultDisk);
            }
            Some(SegmentKind::Data) => {
                let page_index = (vpage - page_align_down(self.addrspace.data_base())) / PAGE_SIZE;
                self.load_elf_page(self.data_image, self.addrspace.prog_head_data(), self.addrspace.initial_offset_data(), page_index, paddr, mem);
                STATS.record(Event::FaultFromElf);
                STATS.record(Event::FaultDisk);
            }
            Some(SegmentKind::Stack) => {
                mem.zero_page(paddr);
                STATS.record(Event::FaultZeroed);
            }
            None => crate::vm_panic!("page fault resolved to a frame for an address outside every segment: {vpage:#x}"),
        }
    }
}

impl SegmentLoader<'_> {
    fn load_elf_page(&self, image: &dyn ElfImage, header: ProgHeader, initial_offset: usize, page_index: usize, paddr: usize, mem: &dyn PhysMem) {
        let layout = elf_page_layout(header, initial_offset, page_index);
        let mut buf = [0u8; PAGE_SIZE];
        if layout.file_bytes > 0 {
            image.read_exact(layout.file_offset, &mut buf[layout.in_page_start..layout.in_page_start + layout.file_bytes]);
        }
        mem.write_page(paddr, &buf);
    }
}
