// Socket state and the domain-polymorphic operations vtable.
//
// A socket-type handle carries a `SockHandle`: immutable identity
// (domain/type/protocol and the ops vtable chosen at creation), a write-once
// PAL stream, and the lock-protected mutable state. The verb dispatchers in
// this file enforce the state machine (NEW -> BOUND -> LISTENING, or
// NEW -> CONNECTED) and only commit transitions after the backend succeeds,
// so a cancelled or failed blocking operation never leaves half-updated
// state behind.

use std::cmp::min;

use crate::interface::errnos::{syscall_error, Errno};
use crate::interface::{Mutex, MutexGuard, PalStreamRef, RustOnceCell, SockaddrStorage};
use crate::libos::constants::*;
use crate::libos::handle::{Handle, HandleData, HandleRef};
use crate::libos::unix::SOCK_UNIX_OPS;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SockState {
    New,
    Bound,
    Connected,
    Listening,
}

/// Mutable socket state, protected by the socket lock. Backends whose
/// operations require the lock receive `&mut SockInner`, which makes the
/// "caller must hold the lock" precondition impossible to miss.
pub struct SockInner {
    pub state: SockState,
    pub local_addr: SockaddrStorage,
    pub remote_addr: SockaddrStorage,
    pub last_error: i32,
    pub sendtimeout_us: u64,
    pub receivetimeout_us: u64,
    pub was_bound: bool,
    pub read_shutdown: bool,
    pub write_shutdown: bool,
}

/// One-slot out-of-band buffer for stream peeking. Guarded by the socket's
/// receive lock, which also serializes sequential stream reads so bytes are
/// never reordered between a peek and the read that consumes them.
pub struct PeekBuffer {
    pub data: Vec<u8>,
}

pub struct SockHandle {
    // Read-only after creation, no locking needed.
    pub domain: i32,
    pub socktype: i32,
    pub protocol: i32,
    pub ops: &'static dyn SockOps,

    // Set at most once; `RustOnceCell` publishes with release ordering and
    // readers observe with acquire, so a thread seeing the stream also sees
    // everything written before it was installed.
    pal_handle: RustOnceCell<PalStreamRef>,

    inner: Mutex<SockInner>,
    recv: Mutex<PeekBuffer>,
}

impl SockHandle {
    pub fn new(domain: i32, socktype: i32, protocol: i32, ops: &'static dyn SockOps) -> Self {
        SockHandle {
            domain,
            socktype,
            protocol,
            ops,
            pal_handle: RustOnceCell::new(),
            inner: Mutex::new(SockInner {
                state: SockState::New,
                local_addr: SockaddrStorage::empty(),
                remote_addr: SockaddrStorage::empty(),
                last_error: 0,
                sendtimeout_us: 0,
                receivetimeout_us: 0,
                was_bound: false,
                read_shutdown: false,
                write_shutdown: false,
            }),
            recv: Mutex::new(PeekBuffer { data: Vec::new() }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SockInner> {
        self.inner.lock()
    }

    pub fn recv_lock(&self) -> MutexGuard<'_, PeekBuffer> {
        self.recv.lock()
    }

    pub fn pal_handle(&self) -> Option<&PalStreamRef> {
        self.pal_handle.get()
    }

    /// Publishes the PAL stream. It transitions from unset to set at most
    /// once; a second store is a bug in the calling layer.
    pub fn set_pal_handle(&self, stream: PalStreamRef) {
        if self.pal_handle.set(stream).is_err() {
            panic!("socket PAL stream may only be set once");
        }
    }
}

/// Per-domain socket operations. The UNIX backend lives in `libos::unix`;
/// other domains are outside this core and would plug in at the same seam.
///
/// Operations taking `&mut SockInner` are called with the socket lock held by
/// the dispatcher; `accept`, `send` and `recv` are called without it.
pub trait SockOps: Send + Sync {
    fn create(&self, sock: &SockHandle) -> Result<(), i32>;
    fn bind(
        &self,
        handle: &Handle,
        sock: &SockHandle,
        inner: &mut SockInner,
        addr: &[u8],
    ) -> Result<(), i32>;
    fn listen(&self, sock: &SockHandle, inner: &mut SockInner, backlog: u32) -> Result<(), i32>;
    fn accept(&self, handle: &Handle, is_nonblocking: bool) -> Result<HandleRef, i32>;
    fn connect(
        &self,
        handle: &Handle,
        sock: &SockHandle,
        inner: &mut SockInner,
        addr: &[u8],
    ) -> Result<(), i32>;
    fn disconnect(&self, sock: &SockHandle, inner: &mut SockInner) -> Result<(), i32>;
    fn setsockopt(
        &self,
        sock: &SockHandle,
        inner: &mut SockInner,
        level: i32,
        optname: i32,
        optval: i32,
    ) -> Result<(), i32>;
    fn getsockopt(
        &self,
        sock: &SockHandle,
        inner: &SockInner,
        level: i32,
        optname: i32,
    ) -> Result<i32, i32>;
    fn send(&self, sock: &SockHandle, iov: &[&[u8]]) -> Result<usize, i32>;
    fn recv(
        &self,
        sock: &SockHandle,
        iov: &mut [&mut [u8]],
        is_nonblocking: bool,
    ) -> Result<usize, i32>;
}

/// Creates a socket handle for the given domain. `socktype` may carry
/// SOCK_NONBLOCK/SOCK_CLOEXEC in its high bits; the cloexec bit belongs to
/// the descriptor entry, so it is surfaced in the returned flags for the
/// caller installing the handle.
pub fn create_socket(domain: i32, socktype: i32, protocol: i32) -> Result<HandleRef, i32> {
    let real_socktype = socktype & SOCK_TYPE_MASK;
    let nonblocking = (socktype & SOCK_NONBLOCK) != 0;

    let ops: &'static dyn SockOps = match domain {
        AF_UNIX => &SOCK_UNIX_OPS,
        _ => {
            return Err(syscall_error(
                Errno::EAFNOSUPPORT,
                "socket",
                "trying to use an unimplemented domain",
            ))
        }
    };

    let sock = SockHandle::new(domain, real_socktype, protocol, ops);
    ops.create(&sock)?;

    let flags = if nonblocking { O_NONBLOCK } else { 0 };
    Ok(Handle::new(HandleData::Sock(sock), flags, O_RDWR))
}

/// bind(2): only valid on a fresh socket; commits BOUND after the backend
/// succeeds.
pub fn bind(handle: &HandleRef, addr: &[u8]) -> Result<(), i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    if inner.state != SockState::New {
        return Err(syscall_error(Errno::EINVAL, "bind", "the socket is already bound to an address"));
    }
    sock.ops.bind(handle, sock, &mut inner, addr)?;
    inner.state = SockState::Bound;
    inner.was_bound = true;
    Ok(())
}

/// listen(2): BOUND -> LISTENING (idempotent on an already listening
/// socket).
pub fn listen(handle: &HandleRef, backlog: u32) -> Result<(), i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    match inner.state {
        SockState::Bound | SockState::Listening => {}
        _ => {
            return Err(syscall_error(Errno::EINVAL, "listen", "the socket is not bound to an address"))
        }
    }
    sock.ops.listen(sock, &mut inner, backlog)?;
    inner.state = SockState::Listening;
    Ok(())
}

/// accept(2): returns a brand-new CONNECTED handle, independent of the
/// listener, with one reference owned by the caller. Called without the
/// socket lock held since it may block.
pub fn accept(handle: &HandleRef, nonblocking: bool) -> Result<HandleRef, i32> {
    let sock = handle.sock();
    {
        let inner = sock.lock();
        if inner.state != SockState::Listening {
            return Err(syscall_error(Errno::EINVAL, "accept", "the socket is not listening"));
        }
    }
    let is_nonblocking = nonblocking || handle.is_nonblocking();
    sock.ops.accept(handle, is_nonblocking)
}

/// connect(2): commits CONNECTED only after the backend succeeds, so a
/// failed or cancelled connect leaves the socket exactly as it was.
pub fn connect(handle: &HandleRef, addr: &[u8]) -> Result<(), i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    if inner.state == SockState::Connected {
        return Err(syscall_error(Errno::EISCONN, "connect", "the socket is already connected"));
    }
    sock.ops.connect(handle, sock, &mut inner, addr)?;
    inner.state = SockState::Connected;
    inner.last_error = 0;
    Ok(())
}

pub fn shutdown(handle: &HandleRef, how: i32) -> Result<(), i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    match inner.state {
        SockState::Connected | SockState::Listening => {}
        _ => return Err(syscall_error(Errno::ENOTCONN, "shutdown", "the socket is not connected")),
    }
    match how {
        SHUT_RD => inner.read_shutdown = true,
        SHUT_WR => inner.write_shutdown = true,
        SHUT_RDWR => {
            inner.read_shutdown = true;
            inner.write_shutdown = true;
        }
        _ => return Err(syscall_error(Errno::EINVAL, "shutdown", "invalid how value")),
    }
    Ok(())
}

/// sendmsg(2) over a scatter list.
pub fn sendmsg(handle: &HandleRef, iov: &[&[u8]]) -> Result<usize, i32> {
    let sock = handle.sock();
    {
        let inner = sock.lock();
        if inner.write_shutdown {
            return Err(syscall_error(Errno::EPIPE, "send", "the socket was shut down for writing"));
        }
    }
    sock.ops.send(sock, iov)
}

/// recvmsg(2) over a gather list. `peek` serves bytes out of the one-slot
/// peek buffer without consuming them; a subsequent plain recv drains that
/// buffer first so stream ordering is preserved. `nonblocking` is the
/// per-call MSG_DONTWAIT-style flag; the transport read primitive accepts it
/// directly, so it works independently of the handle's own mode.
pub fn recvmsg(
    handle: &HandleRef,
    iov: &mut [&mut [u8]],
    peek: bool,
    nonblocking: bool,
) -> Result<usize, i32> {
    let sock = handle.sock();
    {
        let inner = sock.lock();
        if inner.read_shutdown {
            return Ok(0);
        }
    }
    let is_nonblocking = nonblocking || handle.is_nonblocking();

    // The receive lock serializes all reads and peeks on this socket.
    let mut peek_buf = sock.recv_lock();
    let wanted: usize = iov.iter().map(|buf| buf.len()).sum();

    if peek {
        if peek_buf.data.len() < wanted {
            let mut staging = vec![0u8; wanted - peek_buf.data.len()];
            match sock.ops.recv(sock, &mut [&mut staging[..]], is_nonblocking) {
                Ok(read) => peek_buf.data.extend_from_slice(&staging[..read]),
                // an empty peek propagates the error; buffered bytes win
                Err(e) if peek_buf.data.is_empty() => return Err(e),
                Err(_) => {}
            }
        }
        return Ok(copy_to_iov(&peek_buf.data, iov));
    }

    if !peek_buf.data.is_empty() {
        // Short reads are fine for a stream; serve buffered bytes first.
        let copied = copy_to_iov(&peek_buf.data, iov);
        peek_buf.data.drain(..copied);
        return Ok(copied);
    }
    sock.ops.recv(sock, iov, is_nonblocking)
}

/// Distributes `data` across the gather list in order, copying as much as
/// fits.
fn copy_to_iov(data: &[u8], iov: &mut [&mut [u8]]) -> usize {
    let mut copied = 0;
    for buf in iov.iter_mut() {
        if copied == data.len() {
            break;
        }
        let this_size = min(data.len() - copied, buf.len());
        buf[..this_size].copy_from_slice(&data[copied..copied + this_size]);
        copied += this_size;
    }
    copied
}

pub fn setsockopt(handle: &HandleRef, level: i32, optname: i32, optval: i32) -> Result<(), i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    if level == SOL_SOCKET {
        match optname {
            SO_RCVTIMEO => {
                inner.receivetimeout_us = optval as u64;
                return Ok(());
            }
            SO_SNDTIMEO => {
                inner.sendtimeout_us = optval as u64;
                return Ok(());
            }
            _ => {}
        }
    }
    sock.ops.setsockopt(sock, &mut inner, level, optname, optval)
}

pub fn getsockopt(handle: &HandleRef, level: i32, optname: i32) -> Result<i32, i32> {
    let sock = handle.sock();
    let mut inner = sock.lock();
    if level == SOL_SOCKET {
        match optname {
            SO_TYPE => return Ok(sock.socktype),
            SO_DOMAIN => return Ok(sock.domain),
            SO_PROTOCOL => return Ok(sock.protocol),
            SO_ACCEPTCONN => return Ok((inner.state == SockState::Listening) as i32),
            SO_ERROR => {
                // read-and-clear
                let err = inner.last_error;
                inner.last_error = 0;
                return Ok(err);
            }
            SO_RCVTIMEO => return Ok(inner.receivetimeout_us as i32),
            SO_SNDTIMEO => return Ok(inner.sendtimeout_us as i32),
            _ => {}
        }
    }
    sock.ops.getsockopt(sock, &inner, level, optname)
}
