// UNIX domain socket backend.
//
// Only stream-oriented sockets are supported. UNIX addresses (pathname or
// abstract) are never materialized on any filesystem; instead the raw path
// bytes are hashed into a fixed-length hex name and the socket rendezvous
// happens over named PAL pipes: the server binds "pipe.srv:<digest>" and
// clients connect to "pipe:<digest>". Two addresses meet iff their effective
// path bytes are identical.

use std::cmp::min;

use sha2::{Digest, Sha256};

use crate::interface;
use crate::interface::errnos::{syscall_error, Errno};
use crate::interface::{
    pal_to_unix_errno, PalError, SockaddrStorage, SOCKADDR_STORAGE_SIZE,
    SOCKADDR_UN_HEADER_SIZE, SOCKADDR_UN_SIZE,
};
use crate::libos::constants::*;
use crate::libos::epoll;
use crate::libos::handle::{Handle, HandleData, HandleRef};
use crate::libos::socket::{SockHandle, SockInner, SockOps, SockState};

pub struct UnixSockOps;

pub static SOCK_UNIX_OPS: UnixSockOps = UnixSockOps;

/// Validates a raw UNIX socket address and derives the transport endpoint
/// name from it: a SHA-256 digest of the effective path bytes, rendered as
/// 64 hex characters. Pathname addresses hash up to their null terminator;
/// abstract addresses (leading null byte) hash their bytes verbatim, length
/// included.
pub fn unaddr_to_sockname(addr: &[u8]) -> Result<String, i32> {
    let addrlen = min(addr.len(), SOCKADDR_UN_SIZE);
    if addrlen < SOCKADDR_UN_HEADER_SIZE + 1 {
        return Err(syscall_error(Errno::EINVAL, "socket", "UNIX address is too short"));
    }
    let family = u16::from_ne_bytes([addr[0], addr[1]]);
    if family != AF_UNIX as u16 {
        return Err(syscall_error(
            Errno::EAFNOSUPPORT,
            "socket",
            "address family does not match the socket domain",
        ));
    }

    let path = &addr[SOCKADDR_UN_HEADER_SIZE..addrlen];
    let pathlen = if path[0] != 0 {
        // Named UNIX socket.
        strnlen(path)
    } else {
        path.len()
    };

    let hash = Sha256::digest(&path[..pathlen]);
    Ok(hex::encode(hash))
}

/// Normalizes a stored pathname address: zeroes any garbage after the
/// embedded null terminator and recomputes the length to exactly cover
/// header + string + one null byte. Abstract addresses are left untouched;
/// their trailing bytes are significant, not a C string.
pub fn fixup_sockaddr_un_path(addr: &mut SockaddrStorage) {
    // The address was already validated by `unaddr_to_sockname`.
    let addrlen = addr.len();
    debug_assert!(addrlen > SOCKADDR_UN_HEADER_SIZE);
    debug_assert!(addrlen <= SOCKADDR_UN_SIZE);

    let bytes = addr.raw_bytes_mut();
    if bytes[SOCKADDR_UN_HEADER_SIZE] == 0 {
        // Abstract UNIX socket - nothing to do.
        return;
    }

    let pathlen = strnlen(&bytes[SOCKADDR_UN_HEADER_SIZE..addrlen]);
    for byte in bytes[SOCKADDR_UN_HEADER_SIZE + pathlen..SOCKADDR_STORAGE_SIZE].iter_mut() {
        *byte = 0;
    }
    addr.set_len(SOCKADDR_UN_HEADER_SIZE + pathlen + 1);
}

fn strnlen(bytes: &[u8]) -> usize {
    bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len())
}

/// Truncates the caller's raw address to sockaddr_un size before storing it.
fn store_addr(addr: &[u8]) -> SockaddrStorage {
    let len = min(addr.len(), SOCKADDR_UN_SIZE);
    let mut stored = SockaddrStorage::from_bytes(&addr[..len]);
    fixup_sockaddr_un_path(&mut stored);
    stored
}

impl SockOps for UnixSockOps {
    fn create(&self, sock: &SockHandle) -> Result<(), i32> {
        assert_eq!(sock.domain, AF_UNIX);
        if sock.socktype == SOCK_DGRAM {
            // We do not support datagram UNIX sockets.
            return Err(syscall_error(
                Errno::EPROTONOSUPPORT,
                "socket",
                "datagram UNIX sockets are not supported",
            ));
        }
        if sock.socktype != SOCK_STREAM {
            return Err(syscall_error(
                Errno::EPROTONOSUPPORT,
                "socket",
                "unsupported UNIX socket type",
            ));
        }
        if sock.protocol != 0 {
            return Err(syscall_error(
                Errno::EPROTONOSUPPORT,
                "socket",
                "UNIX sockets only support protocol 0",
            ));
        }
        Ok(())
    }

    fn bind(
        &self,
        handle: &Handle,
        sock: &SockHandle,
        inner: &mut SockInner,
        addr: &[u8],
    ) -> Result<(), i32> {
        let sock_name = unaddr_to_sockname(addr)?;
        let uri = [interface::URI_PREFIX_PIPE_SRV, &sock_name].concat();

        let pal_handle =
            interface::stream_open(&uri, handle.is_nonblocking()).map_err(|e| match e {
                PalError::StreamExist => syscall_error(
                    Errno::EADDRINUSE,
                    "bind",
                    "another socket is already bound to this address",
                ),
                e => syscall_error(pal_to_unix_errno(e), "bind", "could not open the listening endpoint"),
            })?;

        sock.set_pal_handle(pal_handle);
        inner.local_addr = store_addr(addr);

        epoll::interrupt_epolls(handle);
        Ok(())
    }

    fn listen(&self, sock: &SockHandle, inner: &mut SockInner, _backlog: u32) -> Result<(), i32> {
        // PAL pipes don't have a changeable wait queue size, so the backlog
        // is ignored.
        if sock.socktype != SOCK_STREAM {
            return Err(syscall_error(Errno::EOPNOTSUPP, "listen", "not a stream socket"));
        }
        // This socket must have been bound before.
        assert!(inner.state == SockState::Bound || inner.state == SockState::Listening);
        Ok(())
    }

    fn accept(&self, handle: &Handle, is_nonblocking: bool) -> Result<HandleRef, i32> {
        let sock = handle.sock();
        // Since this socket is listening, it must have a PAL handle.
        let pal_handle = sock.pal_handle().expect("listening socket without a PAL stream");

        let client_pal_handle = pal_handle
            .wait_for_client(is_nonblocking)
            .map_err(|e| syscall_error(pal_to_unix_errno(e), "accept", "waiting for a client failed"))?;
        // From here on the accepted stream is owned by `client_sock`; if
        // handle setup bails out it is closed on drop rather than leaked.

        let client_sock = SockHandle::new(sock.domain, sock.socktype, sock.protocol, sock.ops);
        client_sock.set_pal_handle(client_pal_handle);
        {
            let mut client_inner = client_sock.lock();
            client_inner.state = SockState::Connected;
            // UNIX sockets don't expose peer identity over this transport.
            client_inner.remote_addr = SockaddrStorage::family_only(AF_UNIX as u16);

            let listener_inner = sock.lock();
            client_inner.local_addr = listener_inner.local_addr;
        }

        let flags = if is_nonblocking { O_NONBLOCK } else { 0 };
        Ok(Handle::new(HandleData::Sock(client_sock), flags, O_RDWR))
    }

    fn connect(
        &self,
        handle: &Handle,
        sock: &SockHandle,
        inner: &mut SockInner,
        addr: &[u8],
    ) -> Result<(), i32> {
        if inner.state != SockState::New {
            log::warn!("connect on an already bound UNIX socket is not supported");
            return Err(syscall_error(Errno::EINVAL, "connect", "socket is not in the initial state"));
        }

        let sock_name = unaddr_to_sockname(addr)?;
        let uri = [interface::URI_PREFIX_PIPE, &sock_name].concat();

        let pal_handle =
            interface::stream_open(&uri, handle.is_nonblocking()).map_err(|e| match e {
                PalError::ConnFailed => syscall_error(
                    Errno::ENOENT,
                    "connect",
                    "no socket is bound to this address",
                ),
                e => syscall_error(pal_to_unix_errno(e), "connect", "could not open the connecting endpoint"),
            })?;

        sock.set_pal_handle(pal_handle);
        inner.remote_addr = store_addr(addr);

        if inner.state != SockState::Bound {
            assert_eq!(inner.state, SockState::New);
            inner.local_addr = SockaddrStorage::family_only(AF_UNIX as u16);
        }

        epoll::interrupt_epolls(handle);
        Ok(())
    }

    fn disconnect(&self, _sock: &SockHandle, _inner: &mut SockInner) -> Result<(), i32> {
        // We do not support disconnecting UNIX sockets.
        Err(syscall_error(Errno::EINVAL, "disconnect", "UNIX sockets cannot disconnect"))
    }

    fn setsockopt(
        &self,
        _sock: &SockHandle,
        _inner: &mut SockInner,
        _level: i32,
        _optname: i32,
        _optval: i32,
    ) -> Result<(), i32> {
        Err(syscall_error(Errno::ENOPROTOOPT, "setsockopt", "no UNIX-level socket options"))
    }

    fn getsockopt(
        &self,
        _sock: &SockHandle,
        _inner: &SockInner,
        _level: i32,
        _optname: i32,
    ) -> Result<i32, i32> {
        Err(syscall_error(Errno::ENOPROTOOPT, "getsockopt", "no UNIX-level socket options"))
    }

    fn send(&self, sock: &SockHandle, iov: &[&[u8]]) -> Result<usize, i32> {
        // Datagram sockets are rejected at creation.
        assert_eq!(sock.socktype, SOCK_STREAM);

        let pal_handle = match sock.pal_handle() {
            Some(stream) => stream,
            None => return Err(syscall_error(Errno::ENOTCONN, "send", "the socket is not connected")),
        };

        // The transport write takes one contiguous buffer, so a scatter list
        // is coalesced before the write.
        let result = if iov.len() == 1 {
            // Common case - no need for copying.
            pal_handle.write(iov[0])
        } else {
            let backing_buf: Vec<u8> = iov.concat();
            pal_handle.write(&backing_buf)
        };

        result.map_err(|e| match e {
            PalError::TooLong => syscall_error(Errno::EMSGSIZE, "send", "message too long for the transport"),
            e => syscall_error(pal_to_unix_errno(e), "send", "transport write failed"),
        })
    }

    fn recv(
        &self,
        sock: &SockHandle,
        iov: &mut [&mut [u8]],
        is_nonblocking: bool,
    ) -> Result<usize, i32> {
        assert_eq!(sock.socktype, SOCK_STREAM);

        let pal_handle = match sock.pal_handle() {
            Some(stream) => stream,
            None => return Err(syscall_error(Errno::ENOTCONN, "recv", "the socket is not connected")),
        };

        if iov.len() == 1 {
            // Common simple case.
            return pal_handle
                .read(iov[0], is_nonblocking)
                .map_err(|e| syscall_error(pal_to_unix_errno(e), "recv", "transport read failed"));
        }

        // Gather list: stage through one contiguous buffer, then copy back
        // into each segment in order until the bytes read run out.
        let size: usize = iov.iter().map(|buf| buf.len()).sum();
        let mut backing_buf = vec![0u8; size];
        let read = pal_handle
            .read(&mut backing_buf, is_nonblocking)
            .map_err(|e| syscall_error(pal_to_unix_errno(e), "recv", "transport read failed"))?;

        let mut copied = 0;
        for buf in iov.iter_mut() {
            if copied == read {
                break;
            }
            let this_size = min(read - copied, buf.len());
            buf[..this_size].copy_from_slice(&backing_buf[copied..copied + this_size]);
            copied += this_size;
        }
        assert_eq!(copied, read);
        Ok(read)
    }
}
