// SPDX-FileCopyrightText: 2026 Kit Okonkwo <kit@osteaching.dev>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error kinds returned across the VM core's public surface.
//!
//! Most failure modes in a demand-paging kernel are not recoverable: a
//! corrupt boot-time allocation, a failed swap I/O, or an exhausted swap
//! file all leave the kernel unable to make further progress on behalf of
//! *any* process, so those paths panic (via [`vm_panic!`]) rather than
//! return an error. [`VmError`] covers the one disposition `spec.md` §7
//! leaves non-fatal and reachable from this crate's own surface: a
//! bad-address fault. `spec.md` §7 also lists a segment-table overflow
//! (`as_define_region`, non-fatal) and an invalid fault-type dispatch as
//! non-fatal dispositions, but both belong to collaborators outside this
//! crate's boundary: `as_define_region` is an `AddressSpace` operation
//! this crate only consumes, never calls, and [`crate::FaultType`] is a
//! closed three-variant enum with no fourth value to dispatch on. Neither
//! has a constructible call site here, so neither gets a `VmError`
//! variant of its own.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The faulting address does not lie within the process's text, data,
    /// or stack segments. Disposition: terminate the process with -1.
    SegmentationFault,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::SegmentationFault => write!(f, "segmentation fault: address outside of text/data/stack"),
        }
    }
}

impl std::error::Error for VmError {}

/// Panics the way the original kernel's `panic("...")` call sites do: a
/// formatted message followed by an unconditional abort. Named separately
/// from `panic!` so that call sites document which failures in this crate
/// are the fatal-by-design kind spec.md §7 enumerates (boot allocation
/// failure, swap exhaustion, swap/ELF I/O error) rather than a bug.
#[macro_export]
macro_rules! vm_panic {
    ($($args:tt)+) => {{
        log::error!($($args)+);
        panic!($($args)+)
    }};
}
