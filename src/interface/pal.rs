// PAL stream transport, emulated in-process.
//
// The LibOS layer consumes a pipe-like stream API: open a named listening
// endpoint ("pipe.srv:<name>"), connect to one ("pipe:<name>"), accept queued
// clients, and move bytes over reliable unidirectional ring buffers. Real
// hosts back this with platform pipes; here the whole namespace lives in one
// process so the emulation core can be exercised end to end.

use std::cmp::min;
use std::collections::VecDeque;

use ringbuf::{Consumer, Producer, RingBuffer};

use crate::interface;
use crate::interface::errnos::Errno;
use crate::interface::{
    Condvar, Mutex, RustAtomicBool, RustAtomicOrdering, RustHashEntry, RustHashMap,
    RustLazyGlobal, RustRfc,
};

pub const URI_PREFIX_PIPE_SRV: &str = "pipe.srv:";
pub const URI_PREFIX_PIPE: &str = "pipe:";

const PIPE_CAPACITY: usize = 65536;
const MAX_PIPE_NAME: usize = 96;

/// Error namespace of the transport. The LibOS layer translates these to
/// errnos, either one-to-one through `pal_to_unix_errno` or with an
/// operation-specific override (e.g. `StreamExist` -> `EADDRINUSE` in bind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PalError {
    StreamExist,
    StreamNotExist,
    ConnFailed,
    TooLong,
    TryAgain,
    Interrupted,
    Denied,
    Inval,
    NoMem,
}

pub fn pal_to_unix_errno(err: PalError) -> Errno {
    match err {
        PalError::StreamExist => Errno::EEXIST,
        PalError::StreamNotExist => Errno::ENOENT,
        PalError::ConnFailed => Errno::EPIPE,
        PalError::TooLong => Errno::ENAMETOOLONG,
        PalError::TryAgain => Errno::EAGAIN,
        PalError::Interrupted => Errno::EINTR,
        PalError::Denied => Errno::EACCES,
        PalError::Inval => Errno::EINVAL,
        PalError::NoMem => Errno::ENOMEM,
    }
}

/// One direction of a connection: a ring buffer plus the two close flags that
/// give it pipe semantics. `write_closed` means no more data will ever arrive
/// (reads drain the buffer, then report EOF); `read_closed` means the reader
/// is gone (writes fail).
#[derive(Clone)]
pub struct EmulatedPipe {
    write_end: RustRfc<Mutex<Producer<u8>>>,
    read_end: RustRfc<Mutex<Consumer<u8>>>,
    write_closed: RustRfc<RustAtomicBool>,
    read_closed: RustRfc<RustAtomicBool>,
}

impl EmulatedPipe {
    fn new_with_capacity(size: usize) -> EmulatedPipe {
        let rb = RingBuffer::<u8>::new(size);
        let (prod, cons) = rb.split();
        EmulatedPipe {
            write_end: RustRfc::new(Mutex::new(prod)),
            read_end: RustRfc::new(Mutex::new(cons)),
            write_closed: RustRfc::new(RustAtomicBool::new(false)),
            read_closed: RustRfc::new(RustAtomicBool::new(false)),
        }
    }

    fn mark_write_closed(&self) {
        self.write_closed.store(true, RustAtomicOrdering::Release);
    }

    fn mark_read_closed(&self) {
        self.read_closed.store(true, RustAtomicOrdering::Release);
    }

    fn read(&self, buf: &mut [u8], nonblocking: bool) -> Result<usize, PalError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut read_end = self.read_end.lock();
                let avail = read_end.len();
                if avail > 0 {
                    let bytes_to_read = min(buf.len(), avail);
                    read_end.pop_slice(&mut buf[..bytes_to_read]);
                    return Ok(bytes_to_read);
                }
            }
            if self.write_closed.load(RustAtomicOrdering::Acquire) {
                return Ok(0); // EOF
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            // empty pipe, let the writer run
            interface::thread_yield();
        }
    }

    fn write(&self, buf: &[u8], nonblocking: bool) -> Result<usize, PalError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        loop {
            if self.read_closed.load(RustAtomicOrdering::Acquire) {
                return Err(PalError::ConnFailed);
            }
            {
                let mut write_end = self.write_end.lock();
                let remaining = write_end.remaining();
                if remaining > 0 {
                    let bytes_to_write = min(buf.len() - written, remaining);
                    write_end.push_slice(&buf[written..written + bytes_to_write]);
                    written += bytes_to_write;
                    if written == buf.len() {
                        return Ok(written);
                    }
                }
            }
            if nonblocking {
                if written > 0 {
                    return Ok(written);
                }
                return Err(PalError::TryAgain);
            }
            // full pipe, let the reader drain it
            interface::thread_yield();
        }
    }
}

pub struct ListenerCore {
    name: String,
    backlog: Mutex<VecDeque<PalStreamRef>>,
    has_client: Condvar,
}

/// A connected stream: one pipe per direction.
pub struct PipeConnection {
    send: EmulatedPipe,
    recv: EmulatedPipe,
    nonblocking: RustAtomicBool,
}

impl PipeConnection {
    fn pair(client_nonblocking: bool) -> (PipeConnection, PipeConnection) {
        let client_to_server = EmulatedPipe::new_with_capacity(PIPE_CAPACITY);
        let server_to_client = EmulatedPipe::new_with_capacity(PIPE_CAPACITY);
        let client = PipeConnection {
            send: client_to_server.clone(),
            recv: server_to_client.clone(),
            nonblocking: RustAtomicBool::new(client_nonblocking),
        };
        let server = PipeConnection {
            send: server_to_client,
            recv: client_to_server,
            nonblocking: RustAtomicBool::new(false),
        };
        (client, server)
    }
}

impl Drop for PipeConnection {
    fn drop(&mut self) {
        // EOF for the peer's reads, failure for the peer's writes
        self.send.mark_write_closed();
        self.recv.mark_read_closed();
    }
}

pub enum PalStream {
    Listener {
        core: RustRfc<ListenerCore>,
        nonblocking: RustAtomicBool,
    },
    Connection(PipeConnection),
}

pub type PalStreamRef = RustRfc<PalStream>;

// All live listening endpoints, keyed by pipe name. A listener owns its slot
// for its whole lifetime and removes it on drop, so a name can be reused once
// the previous server is gone.
static PIPE_NAMESPACE: RustLazyGlobal<RustHashMap<String, RustRfc<ListenerCore>>> =
    RustLazyGlobal::new(RustHashMap::new);

/// Opens a PAL stream by URI.
///
/// `pipe.srv:<name>` registers a listening endpoint with create-if-absent
/// semantics (an already registered name fails with `StreamExist`).
/// `pipe:<name>` connects to a registered listener (an absent name fails with
/// `ConnFailed`), queueing the server end of a fresh connection for the
/// listener to accept.
pub fn stream_open(uri: &str, nonblocking: bool) -> Result<PalStreamRef, PalError> {
    if let Some(name) = uri.strip_prefix(URI_PREFIX_PIPE_SRV) {
        if name.is_empty() {
            return Err(PalError::Inval);
        }
        if name.len() > MAX_PIPE_NAME {
            return Err(PalError::TooLong);
        }
        let core = RustRfc::new(ListenerCore {
            name: name.to_owned(),
            backlog: Mutex::new(VecDeque::new()),
            has_client: Condvar::new(),
        });
        match PIPE_NAMESPACE.entry(name.to_owned()) {
            RustHashEntry::Occupied(_) => Err(PalError::StreamExist),
            RustHashEntry::Vacant(v) => {
                v.insert(core.clone());
                Ok(RustRfc::new(PalStream::Listener {
                    core,
                    nonblocking: RustAtomicBool::new(nonblocking),
                }))
            }
        }
    } else if let Some(name) = uri.strip_prefix(URI_PREFIX_PIPE) {
        if name.len() > MAX_PIPE_NAME {
            return Err(PalError::TooLong);
        }
        let core = match PIPE_NAMESPACE.get(name) {
            Some(entry) => entry.value().clone(),
            None => return Err(PalError::ConnFailed),
        };
        let (client, server) = PipeConnection::pair(nonblocking);
        {
            let mut backlog = core.backlog.lock();
            backlog.push_back(RustRfc::new(PalStream::Connection(server)));
        }
        core.has_client.notify_one();
        log::trace!("pipe client connected to {}", name);
        Ok(RustRfc::new(PalStream::Connection(client)))
    } else {
        Err(PalError::Inval)
    }
}

impl PalStream {
    /// Waits for (or polls for, when nonblocking) one queued client
    /// connection on a listening stream.
    pub fn wait_for_client(&self, nonblocking: bool) -> Result<PalStreamRef, PalError> {
        let (core, default_nonblocking) = match self {
            PalStream::Listener { core, nonblocking } => (core, nonblocking),
            PalStream::Connection(_) => return Err(PalError::Inval),
        };
        let nonblocking = nonblocking || default_nonblocking.load(RustAtomicOrdering::Relaxed);
        let mut backlog = core.backlog.lock();
        loop {
            if let Some(client) = backlog.pop_front() {
                log::trace!("pipe server accepted client on {}", core.name);
                return Ok(client);
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            core.has_client.wait(&mut backlog);
        }
    }

    pub fn read(&self, buf: &mut [u8], nonblocking: bool) -> Result<usize, PalError> {
        match self {
            PalStream::Connection(conn) => {
                let nonblocking =
                    nonblocking || conn.nonblocking.load(RustAtomicOrdering::Relaxed);
                conn.recv.read(buf, nonblocking)
            }
            PalStream::Listener { .. } => Err(PalError::Inval),
        }
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, PalError> {
        match self {
            PalStream::Connection(conn) => {
                let nonblocking = conn.nonblocking.load(RustAtomicOrdering::Relaxed);
                conn.send.write(buf, nonblocking)
            }
            PalStream::Listener { .. } => Err(PalError::Inval),
        }
    }

    pub fn set_nonblocking(&self, on: bool) {
        match self {
            PalStream::Connection(conn) => {
                conn.nonblocking.store(on, RustAtomicOrdering::Relaxed)
            }
            PalStream::Listener { nonblocking, .. } => {
                nonblocking.store(on, RustAtomicOrdering::Relaxed)
            }
        }
    }
}

impl Drop for PalStream {
    fn drop(&mut self) {
        if let PalStream::Listener { core, .. } = self {
            // Unregister only our own slot; a name could in principle have
            // been re-registered by the time a stale listener is dropped.
            PIPE_NAMESPACE
                .remove_if(&core.name, |_, registered| RustRfc::ptr_eq(registered, core));
        }
    }
}
