//! Recoverable error taxonomy (§7). Unrecoverable conditions go through
//! `panic!`/`unreachable!` directly at their call site instead of being
//! threaded through here, matching this codebase's existing preference for
//! plain enums over an error-handling crate.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfaError {
    /// A frame targeted by `free()` was already marked free.
    DoubleFree,
    /// No run of physically contiguous free frames satisfies the request.
    OutOfMemory,
}

impl fmt::Display for PfaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PfaError::DoubleFree => write!(f, "double free of a physical frame"),
            PfaError::OutOfMemory => write!(f, "physical frame allocator out of memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// No virtual address window of the requested size is free.
    OutOfVirtualSpace,
    /// The physical frame allocator could not back the request.
    OutOfMemory,
}

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmmError::OutOfVirtualSpace => write!(f, "virtual memory manager out of address space"),
            VmmError::OutOfMemory => write!(f, "virtual memory manager could not back mapping"),
        }
    }
}
