// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Framing and file-descriptor passing over a UNIX-domain stream socket.
// A frame is `u64 tag_le || u64 length_le || body[length]`; when a
// reply needs to hand the peer a new segment, its file descriptor rides as
// `SCM_RIGHTS` ancillary data on the `sendmsg` call that carries the frame
// header. Reads are strict — any short read tears down the connection.

use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::ptr;

const HEADER_LEN: usize = 16;

/// A decoded frame: tag, body, and an optional file descriptor received
/// alongside the header — at most one fd per message.
pub struct Frame {
    pub tag: u64,
    pub body: Vec<u8>,
    pub fd: Option<RawFd>,
}

/// Wraps a connected `UnixStream` with frame-aware send/recv. Works for
/// both the client's blocking socket and a server connection driven by the
/// event loop in non-blocking mode (callers handle `WouldBlock` themselves;
/// see `store::server::Connection`).
pub struct FdChannel {
    stream: UnixStream,
}

impl FdChannel {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }

    pub fn into_inner(self) -> UnixStream {
        self.stream
    }

    /// Send one frame, never partial. `fd` is attached to the header's
    /// `sendmsg` call; the body (if any) follows as plain writes.
    pub fn send(&mut self, tag: u64, body: &[u8], fd: Option<RawFd>) -> io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[0..8].copy_from_slice(&tag.to_le_bytes());
        header[8..16].copy_from_slice(&(body.len() as u64).to_le_bytes());

        sendmsg_all(self.stream.as_raw_fd(), &header, fd)?;
        if !body.is_empty() {
            self.stream.write_all(body)?;
        }
        Ok(())
    }

    /// Receive one frame. A short read anywhere (header or body) is an
    /// `IoError` — the caller tears the connection down.
    pub fn recv(&mut self) -> io::Result<Frame> {
        let mut header = [0u8; HEADER_LEN];
        let fd = recvmsg_fill(self.stream.as_raw_fd(), &mut header)?;

        let tag = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let len = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;

        let mut body = vec![0u8; len];
        if len > 0 {
            self.stream.read_exact(&mut body)?;
        }
        Ok(Frame { tag, body, fd })
    }
}

/// Writes `buf` in full over `fd`, attaching `fd_to_send` as `SCM_RIGHTS`
/// ancillary data on the first `sendmsg` call that transfers any bytes.
fn sendmsg_all(fd: RawFd, buf: &[u8], fd_to_send: Option<RawFd>) -> io::Result<()> {
    let mut offset = 0usize;
    let mut pending_fd = fd_to_send;

    while offset < buf.len() {
        let chunk = &buf[offset..];
        let mut iov = libc::iovec {
            iov_base: chunk.as_ptr() as *mut libc::c_void,
            iov_len: chunk.len(),
        };

        let cmsg_len = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
        let mut cmsg_buf = vec![0u8; cmsg_len];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        if let Some(pass_fd) = pending_fd {
            msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = cmsg_buf.len() as _;

            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
                ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, pass_fd);
            }
        } else {
            msg.msg_control = ptr::null_mut();
            msg.msg_controllen = 0;
        }

        let n = unsafe { libc::sendmsg(fd, &msg, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "sendmsg wrote zero bytes",
            ));
        }
        // The fd (if any) travelled with this syscall regardless of how
        // many bytes it accepted; never attach it again.
        pending_fd = None;
        offset += n as usize;
    }
    Ok(())
}

/// Fills `buf` completely via `recvmsg`, returning any fd received as
/// ancillary data on the call that delivered the first byte.
fn recvmsg_fill(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<RawFd>> {
    let mut offset = 0usize;
    let mut received_fd: Option<RawFd> = None;

    while offset < buf.len() {
        let chunk = &mut buf[offset..];
        let mut iov = libc::iovec {
            iov_base: chunk.as_mut_ptr() as *mut libc::c_void,
            iov_len: chunk.len(),
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
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            ));
        }

        if received_fd.is_none() && msg.msg_controllen as usize >= cmsg_len {
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

        offset += n as usize;
    }
    Ok(received_fd)
}

/// Wraps a raw fd received via `SCM_RIGHTS` as an owned `std::fs::File`,
/// taking ownership (the fd is closed when the returned value drops).
///
/// # Safety
/// `fd` must be a valid, open, and otherwise unowned file descriptor.
pub unsafe fn owned_file_from_raw(fd: RawFd) -> std::fs::File {
    std::fs::File::from_raw_fd(fd)
}
