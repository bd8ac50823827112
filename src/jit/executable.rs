//! Executable memory owned by a native artifact.
//!
//! Pages are mapped read-write, filled, then flipped to read-execute, so the
//! mapping is never writable and executable at once. The mapping is released
//! on drop, including when the flip fails halfway.

use std::ptr;

use crate::error::JitError;

/// A private mapping holding machine code.
pub struct ExecutableCode {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
}

// SAFETY: the pages are read-only after construction.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

impl ExecutableCode {
    /// Maps `code` into fresh executable pages.
    #[cfg(unix)]
    pub fn new(code: &[u8]) -> Result<Self, JitError> {
        use libc::{mmap, mprotect, MAP_ANON, MAP_PRIVATE, PROT_EXEC, PROT_READ, PROT_WRITE};

        if code.is_empty() {
            return Err(JitError::ExecutableMemory("empty code buffer"));
        }

        let page_size = page_size();
        let capacity = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, checked against MAP_FAILED.
        let raw = unsafe {
            mmap(
                ptr::null_mut(),
                capacity,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(JitError::ExecutableMemory("mmap failed"));
        }

        // From here on Drop unmaps, whatever happens below.
        let exec = ExecutableCode {
            ptr: raw as *mut u8,
            len: code.len(),
            capacity,
        };

        // SAFETY: the mapping is `capacity >= code.len()` writable bytes.
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), exec.ptr, code.len());
            if mprotect(raw, capacity, PROT_READ | PROT_EXEC) != 0 {
                return Err(JitError::ExecutableMemory("mprotect failed"));
            }
        }

        Ok(exec)
    }

    #[cfg(not(unix))]
    pub fn new(_code: &[u8]) -> Result<Self, JitError> {
        Err(JitError::UnsupportedTarget("native"))
    }

    /// Reinterprets the start of the mapping as a function pointer.
    ///
    /// # Safety
    /// The code must implement the calling convention and signature of `F`,
    /// and the pointer must not be called after `self` is dropped.
    #[inline]
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        std::mem::transmute_copy(&self.ptr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `len` bytes were copied in and the mapping is readable.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Drop for ExecutableCode {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    #[cfg(target_os = "macos")]
    {
        16384
    }
    #[cfg(not(target_os = "macos"))]
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
}
