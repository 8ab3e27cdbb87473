// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Single-shot, non-blocking `sendmsg`/`recvmsg` primitives for the
// server's event loop. Unlike `wire::fd_channel` (which loops until a
// blocking client socket finishes a whole frame), these perform exactly
// one syscall and report partial progress or `WouldBlock` back to the
// caller, which is `store::server::Connection`'s read/write state
// machine.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK
    )
}

/// Send whatever of `buf` fits in one `sendmsg` call, attaching
/// `fd_to_send` as `SCM_RIGHTS` ancillary data. Returns `Ok(None)` on
/// `WouldBlock`, `Ok(Some(n))` for `n` bytes written (`n` may be less
/// than `buf.len()`), or an error on any other failure.
pub fn send_chunk(fd: RawFd, buf: &[u8], fd_to_send: Option<RawFd>) -> io::Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(Some(0));
    }
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let cmsg_len = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_len];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(pass_fd) = fd_to_send {
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.len() as _;
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, pass_fd);
        }
    }

    let n = unsafe { libc::sendmsg(fd, &msg, libc::MSG_NOSIGNAL) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if is_would_block(&err) {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(n as usize))
}

/// Receive whatever is available in one `recvmsg` call, into `buf`.
/// Returns `Ok(None)` on `WouldBlock`, `Ok(Some((0, None)))` when the
/// peer has closed the connection, or `Ok(Some((n, fd)))` for `n` bytes
/// read and an optional fd carried as `SCM_RIGHTS`.
pub fn recv_chunk(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<(usize, Option<RawFd>)>> {
    if buf.is_empty() {
        return Ok(Some((0, None)));
    }
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let cmsg_len = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_len];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if is_would_block(&err) {
            return Ok(None);
        }
        return Err(err);
    }

    let mut received_fd = None;
    if msg.msg_controllen as usize >= cmsg_len {
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if !cmsg.is_null()
                && (*cmsg).cmsg_level == libc::SOL_SOCKET
                && (*cmsg).cmsg_type == libc::SCM_RIGHTS
            {
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                received_fd = Some(ptr::read(data));
            }
        }
    }

    Ok(Some((n as usize, received_fd)))
}
