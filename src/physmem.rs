// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Physical-memory access shared by the IPT, swap manager, segment
//! loader, and fork duplicator.
//!
//! The original kernel and the teacher both address physical frames
//! through a fixed kernel virtual alias (`PADDR_TO_KVADDR` in the
//! original, direct pointer arithmetic in `xous-kernel`'s `mem.rs`).
//! This crate is hosted rather than bare-metal, so "the kernel alias of
//! a physical frame" becomes an indexed slice of an owned byte buffer;
//! `PhysMem` is the narrow interface every component that touches frame
//! contents is written against.

use crate::addrspace::PAGE_SIZE;

pub trait PhysMem: Send + Sync {
    fn read_page(&self, paddr: usize, buf: &mut [u8]);
    fn write_page(&self, paddr: usize, buf: &[u8]);

    fn zero_page(&self, paddr: usize) {
        let zeros = [0u8; PAGE_SIZE];
        self.write_page(paddr, &zeros);
    }

    fn copy_page(&self, src_paddr: usize, dst_paddr: usize) {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_page(src_paddr, &mut buf);
        self.write_page(dst_paddr, &buf);
    }
}
