// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// A backing memory region for object payloads, exposed as a file
// descriptor. The store creates segments with `memfd_create` so they
// have no path in the filesystem namespace; clients receive the fd
// over the socket (via `wire::fd_channel`) and map it read/write.

use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::ptr;

/// An mmap-backed region, either store-owned (freshly created) or
/// client-owned (mapped from a received fd). Append-only: once created,
/// a segment's backing file never shrinks and is never unmapped while
/// this handle is alive.
pub struct Segment {
    fd: RawFd,
    ptr: *mut u8,
    size: usize,
    owns_fd: bool,
}

// The mapped region is meant to be shared across threads within one
// process (the store's event loop is single-threaded, but a client may
// hold a `Segment` from a background thread).
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new anonymous, `size`-byte segment. Used by the store
    /// when admission needs a fresh backing region.
    pub fn create(size: usize) -> io::Result<Self> {
        let name = CString::new("plasma-segment").unwrap();
        let fd = unsafe { libc::memfd_create(name.as_ptr(), 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Self::map(fd, size, true)
    }

    /// Map an existing fd (received from the store over the socket) as a
    /// `size`-byte segment. The caller retains ownership of `fd`'s
    /// lifetime semantics via `owns_fd`: client-side mappings own the fd
    /// they were handed (it came from `dup`/`recvmsg` and nothing else
    /// references it).
    pub fn from_fd(fd: RawFd, size: usize) -> io::Result<Self> {
        Self::map(fd, size, true)
    }

    fn map(fd: RawFd, size: usize, owns_fd: bool) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if owns_fd {
                unsafe { libc::close(fd) };
            }
            return Err(err);
        }
        Ok(Self {
            fd,
            ptr: ptr as *mut u8,
            size,
            owns_fd,
        })
    }

    /// Grow the segment's backing file and remap it to cover the new
    /// size. Segments are append-only: `new_size` must be >= the
    /// current size, and any previously handed-out pointers into the old
    /// mapping are invalidated by the remap.
    pub fn grow(&mut self, new_size: usize) -> io::Result<()> {
        assert!(new_size >= self.size, "segments never shrink");
        if new_size == self.size {
            return Ok(());
        }
        if unsafe { libc::ftruncate(self.fd, new_size as libc::off_t) } != 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.size) };
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                new_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        self.ptr = ptr as *mut u8;
        self.size = new_size;
        Ok(())
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whole-segment byte slice.
    ///
    /// # Safety
    /// Callers must not construct overlapping mutable slices into the
    /// same segment; the object table's offset bookkeeping is what
    /// guarantees distinct objects never overlap.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.size)
    }

    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.size)
    }

    /// Byte range `[offset, offset+len)` within the segment.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.size, "slice out of bounds");
        unsafe { &self.as_slice()[offset..offset + len] }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset + len <= self.size, "slice out of bounds");
        unsafe { &mut self.as_mut_slice()[offset..offset + len] }
    }
}

impl AsRawFd for Segment {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl IntoRawFd for Segment {
    fn into_raw_fd(mut self) -> RawFd {
        self.owns_fd = false;
        self.fd
    }
}

impl FromRawFd for Segment {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // Size is unknown from the fd alone in this constructor; callers
        // that need a mapped segment should use `from_fd` instead, which
        // takes an explicit size. This impl exists only to satisfy
        // trait-bound plumbing in generic fd-owning helpers.
        Self {
            fd,
            ptr: ptr::null_mut(),
            size: 0,
            owns_fd: true,
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.ptr.is_null() && self.size > 0 {
            unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.size) };
        }
        if self.owns_fd {
            unsafe { libc::close(self.fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_write_roundtrip() {
        let seg = Segment::create(4096).unwrap();
        seg.slice_mut(0, 4).copy_from_slice(b"abcd");
        assert_eq!(seg.slice(0, 4), b"abcd");
    }

    #[test]
    fn grow_preserves_existing_bytes() {
        let mut seg = Segment::create(64).unwrap();
        seg.slice_mut(0, 4).copy_from_slice(b"abcd");
        seg.grow(128).unwrap();
        assert_eq!(seg.size(), 128);
        assert_eq!(seg.slice(0, 4), b"abcd");
    }
}
