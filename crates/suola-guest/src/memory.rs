//! Bounds-checked access to guest linear memory.
//!
//! [`GuestMemoryPool`] is the only place the host touches guest memory. The
//! memory size is re-queried before every bounds check because any guest
//! call may grow (and relocate) the linear memory; nothing borrowed from
//! guest memory outlives a single pool method.

use std::collections::HashSet;

use tracing::{debug, error};

use crate::error::{BoundaryError, BoundaryResult};
use crate::module::{RELEASE_EXPORT, SIGNATURE_EXPORT};
use crate::packed::PackedResult;

/// The guest-side half of the call contract.
///
/// Implemented by [`WasmtimeGuest`](crate::WasmtimeGuest) for real modules.
/// Errors are runtime-level failures (traps, exits), not guest diagnostics.
pub trait GuestExports {
    /// Call the guest allocator. Returns 0 when the guest refuses.
    fn allocate(&mut self, size: u32) -> wasmtime::Result<u32>;

    /// Call the guest deallocator.
    fn release(&mut self, offset: u32) -> wasmtime::Result<()>;

    /// Call the compute export, returning the packed result.
    fn compute_signature(&mut self, offset: u32, len: u32) -> wasmtime::Result<u64>;

    /// The current linear memory.
    fn memory(&self) -> &[u8];

    /// The current linear memory, mutably.
    fn memory_mut(&mut self) -> &mut [u8];
}

/// Allocation, copy-in, copy-out, and release over a borrowed guest.
///
/// The pool tracks every offset it allocated so that double release and
/// release of foreign offsets are caught on the host side.
pub struct GuestMemoryPool<'g, G: GuestExports + ?Sized> {
    guest: &'g mut G,
    live: HashSet<u32>,
}

impl<'g, G: GuestExports + ?Sized> GuestMemoryPool<'g, G> {
    /// Wrap a guest for the duration of one call.
    pub fn new(guest: &'g mut G) -> Self {
        Self {
            guest,
            live: HashSet::new(),
        }
    }

    /// Current guest memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.guest.memory().len()
    }

    /// Number of allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Request `size` bytes from the guest allocator.
    pub fn allocate(&mut self, size: u32) -> BoundaryResult<u32> {
        let offset = self
            .guest
            .allocate(size)
            .map_err(|err| BoundaryError::AllocationFailed {
                size,
                reason: Some(describe_failure(&err)),
            })?;

        if offset == 0 {
            return Err(BoundaryError::AllocationFailed { size, reason: None });
        }

        self.live.insert(offset);
        debug!(offset, size, "Allocated guest buffer");
        Ok(offset)
    }

    /// Copy `bytes` into guest memory at `offset`.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> BoundaryResult<()> {
        let range = self.checked_range(offset, bytes.len())?;
        self.guest.memory_mut()[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes out of guest memory at `offset`.
    pub fn read(&self, offset: u32, len: usize) -> BoundaryResult<Vec<u8>> {
        let range = self.checked_range(offset, len)?;
        Ok(self.guest.memory()[range].to_vec())
    }

    /// Copy out the payload a packed result points at.
    ///
    /// Violations are reported as [`BoundaryError::ResultOutOfBounds`]
    /// since the region came from the guest, not the host.
    pub fn read_result(&self, result: &PackedResult) -> BoundaryResult<Vec<u8>> {
        let (offset, len) = result.region();
        if offset == 0 || len == 0 {
            return Ok(Vec::new());
        }
        self.read(offset, len as usize).map_err(|_| BoundaryError::ResultOutOfBounds {
            offset,
            len,
            memory_size: self.memory_size(),
        })
    }

    /// Return a host allocation to the guest allocator.
    pub fn release(&mut self, offset: u32) -> BoundaryResult<()> {
        if !self.live.remove(&offset) {
            return Err(BoundaryError::UnownedRelease(offset));
        }
        self.guest
            .release(offset)
            .map_err(|err| BoundaryError::GuestTrap {
                function: RELEASE_EXPORT,
                message: describe_failure(&err),
            })?;
        debug!(offset, "Released guest buffer");
        Ok(())
    }

    /// Invoke the compute export and decode its packed result.
    pub fn compute(&mut self, offset: u32, len: u32) -> BoundaryResult<PackedResult> {
        let raw = self
            .guest
            .compute_signature(offset, len)
            .map_err(|err| BoundaryError::GuestTrap {
                function: SIGNATURE_EXPORT,
                message: describe_failure(&err),
            })?;
        PackedResult::decode(raw)
    }

    /// Copy `bytes` into a fresh guest buffer, run `f` with its
    /// `(offset, len)`, and release the buffer on every exit path.
    ///
    /// If both `f` and the release fail, the error from `f` wins and the
    /// release failure is logged.
    pub fn with_allocation<T>(
        &mut self,
        bytes: &[u8],
        f: impl FnOnce(&mut Self, u32, u32) -> BoundaryResult<T>,
    ) -> BoundaryResult<T> {
        let len = u32::try_from(bytes.len()).map_err(|_| BoundaryError::AllocationFailed {
            size: u32::MAX,
            reason: Some(format!("{} bytes exceeds the 32-bit address space", bytes.len())),
        })?;

        let offset = self.allocate(len)?;
        let result = match self.write(offset, bytes) {
            Ok(()) => f(self, offset, len),
            Err(err) => Err(err),
        };
        let released = self.release(offset);

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                error!(offset, error = %release_err, "Failed to release guest buffer after error");
                Err(err)
            }
        }
    }

    fn checked_range(&self, offset: u32, len: usize) -> BoundaryResult<std::ops::Range<usize>> {
        let memory_size = self.memory_size();
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= memory_size => Ok(start..end),
            _ => Err(BoundaryError::OutOfBounds {
                offset,
                len,
                memory_size,
            }),
        }
    }
}

impl<G: GuestExports + ?Sized> std::fmt::Debug for GuestMemoryPool<'_, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemoryPool")
            .field("memory_size", &self.memory_size())
            .field("live", &self.live.len())
            .finish()
    }
}

/// Describe a runtime-level failure of a guest call.
pub(crate) fn describe_failure(err: &wasmtime::Error) -> String {
    if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
        return format!("guest exited with code {}", exit.0);
    }
    if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
        return trap.to_string();
    }
    err.to_string()
}
