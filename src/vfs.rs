// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The VFS collaborator: page-granular reads/writes of the swap file and
//! the ELF backing file, in the shape `spec.md` §6 describes
//! (`vfs_open`, `VOP_READ`/`VOP_WRITE` against a UIO descriptor of
//! `{kernel-alias address, length, file offset, direction}`).
//!
//! `original_source/vm/swapfile.c` and `segments.c` call through
//! `uio_kinit` + `VOP_READ`/`VOP_WRITE`; this trait collapses that into
//! two direct methods since the direction is implied by which method is
//! called. `InMemoryVfs` is the hosted test double used throughout this
//! crate's test suite, playing the role `xous-kernel`'s `hosted` arch
//! backend plays for the rest of the kernel.

use std::sync::Mutex;

/// A page-granular random-access file: the swap backing store or an ELF
/// image. `read_exact`/`write_all` panic on short I/O the way
/// `VOP_READ`/`VOP_WRITE` failures panic the kernel in `spec.md` §7 (swap
/// and ELF I/O errors are always fatal).
pub trait Vfs: Send + Sync {
    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_exact(&self, offset: usize, buf: &mut [u8]);
    /// Writes exactly `buf.len()` bytes starting at `offset`.
    fn write_exact(&self, offset: usize, buf: &[u8]);
}

/// Marker for the ELF vnode handle an `AddressSpace` carries, distinct
/// from the swap file so a fault handler can be generic over "read some
/// bytes from a page-addressable file" without conflating the two.
pub trait ElfImage: Vfs {}

/// A `Vfs` backed by an in-memory byte vector, standing in for
/// `lhd0raw:` (the swap device) or an ELF vnode in tests.
pub struct InMemoryVfs {
    bytes: Mutex<Vec<u8>>,
}

impl InMemoryVfs {
    pub fn new(size: usize) -> Self { InMemoryVfs { bytes: Mutex::new(vec![0u8; size]) } }

    pub fn from_bytes(bytes: Vec<u8>) -> Self { InMemoryVfs { bytes: Mutex::new(bytes) } }

    pub fn len(&self) -> usize { self.bytes.lock().unwrap().len() }
}

impl Vfs for InMemoryVfs {
    fn read_exact(&self, offset: usize, buf: &mut [u8]) {
        let store = self.bytes.lock().unwrap();
        let end = offset + buf.len();
        assert!(end <= store.len(), "read past end of backing file: {end} > {}", store.len());
        buf.copy_from_slice(&store[offset..end]);
    }

    fn write_exact(&self, offset: usize, buf: &[u8]) {
        let mut store = self.bytes.lock().unwrap();
        let end = offset + buf.len();
        assert!(end <= store.len(), "write past end of backing file: {end} > {}", store.len());
        store[offset..end].copy_from_slice(buf);
    }
}

impl ElfImage for InMemoryVfs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let vfs = InMemoryVfs::new(4096);
        let page = [0xAAu8; 4096];
        vfs.write_exact(0, &page);
        let mut out = [0u8; 4096];
        vfs.read_exact(0, &mut out);
        assert_eq!(out, page);
    }

    #[test]
    #[should_panic(expected = "read past end")]
    fn read_past_end_panics() {
        let vfs = InMemoryVfs::new(4096);
        let mut out = [0u8; 8];
        vfs.read_exact(4090, &mut out);
    }
}
