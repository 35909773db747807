// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fork-time address-space duplication (`spec.md` §4.6).
//!
//! Grounded on `original_source/vm/addrspace.c::as_copy`, which drives
//! the table in a fixed order so nothing can be evicted out from under
//! the copy: freeze the parent's resident pages, duplicate whatever was
//! already in swap, copy the (now frozen) resident frames, then thaw.

use crate::addrspace::Pid;
use crate::ipt::Ipt;
use crate::swap::SwapManager;

/// `as_copy`: duplicates every page `old_pid` owns -- resident or
/// swapped out -- into fresh pages owned by `new_pid`.
///
/// Order matters: `prepare_copy_pt` sets the `SWAP` freeze bit on the
/// parent's resident frames *before* `Swap::duplicate` runs, so the
/// second-chance replacement algorithm cannot select one of those frames
/// as a victim mid-copy (`is_selectable` excludes `SWAP`-flagged
/// entries). `end_copy_pt` must always run, even if duplication above it
/// panics, so a single stuck fork can't starve every other process of
/// frames forever -- hence the `Drop` guard rather than a plain call at
/// the end of the function.
pub fn as_copy(ipt: &Ipt, swap: &SwapManager, old_pid: Pid, new_pid: Pid) {
    ipt.prepare_copy_pt(old_pid);
    struct Thaw<'a> {
        ipt: &'a Ipt,
        pid: Pid,
    }
    impl Drop for Thaw<'_> {
        fn drop(&mut self) { self.ipt.end_copy_pt(self.pid); }
    }
    let _thaw = Thaw { ipt, pid: old_pid };

    swap.duplicate(new_pid, old_pid);
    ipt.copy_pt_entries(old_pid, new_pid, swap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipt::PageLoader;
    use crate::physmem::PhysMem;
    use crate::vfs::InMemoryVfs;

    struct ZeroLoader;
    impl PageLoader for ZeroLoader {
        fn load_page(&self, _vpage: usize, _pid: Pid, _paddr: usize, _mem: &dyn PhysMem) {}
    }

    #[test]
    fn fork_duplicates_both_resident_and_swapped_pages() {
        let ipt = Ipt::new(4);
        let swap = SwapManager::new(Box::new(InMemoryVfs::new(4 * crate::addrspace::PAGE_SIZE)), 4);
        let old_pid = Pid::new(1).unwrap();
        let new_pid = Pid::new(2).unwrap();
        let loader = ZeroLoader;

        let resident = ipt.get_frame(0x1000, old_pid, &loader, &swap);
        ipt.write_page(resident, &[0xAAu8; crate::addrspace::PAGE_SIZE]);

        // force a second page for old_pid straight into swap by storing it directly.
        let mut scratch = [0u8; crate::addrspace::PAGE_SIZE];
        scratch.fill(0xBB);
        let scratch_ipt = Ipt::new(1);
        scratch_ipt.write_page(0, &scratch);
        swap.store(0x2000, old_pid, 0, &scratch_ipt);

        as_copy(&ipt, &swap, old_pid, new_pid);

        let new_resident = ipt.resolve(0x1000, new_pid).expect("resident page must be duplicated");
        let mut buf = [0u8; crate::addrspace::PAGE_SIZE];
        ipt.read_page(new_resident, &mut buf);
        assert_eq!(buf, [0xAAu8; crate::addrspace::PAGE_SIZE]);

        assert!(swap.load(0x2000, new_pid, new_resident, &ipt));
        ipt.read_page(new_resident, &mut buf);
        assert_eq!(buf, [0xBBu8; crate::addrspace::PAGE_SIZE]);
    }
}
