// The LibOS handle object.
//
// Every open resource (file, pipe, socket, epoll set, eventfd) is one
// `Handle` behind a `HandleRef`. Reference counting is the smart pointer's:
// allocate creates the single owner, acquire is `clone`, release is drop, and
// the last drop tears the handle down exactly once (closing the PAL stream
// and freeing type-specific buffers through the usual `Drop` chain).
//
// Lock ordering: `pos_lock` is taken before the handle lock, and the handle
// lock before any inode lock. Never acquire in the other order, even
// transiently.

use crate::interface::{Mutex, MutexGuard, PalStreamRef, RustOnceCell, RustRfc};
use crate::libos::constants::*;
use crate::libos::epoll::{EpollHandle, EpollItem};
use crate::libos::socket::SockHandle;

pub type HandleRef = RustRfc<Handle>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HandleType {
    /* Files: */
    Chroot,          //host files
    ChrootEncrypted, //encrypted host files
    Dev,             //emulated devices
    Str,             //string-backed files, data inside the handle
    Pseudo,          //pseudo nodes, currently directories
    Tmpfs,           //string-backed files, data inside the dentry
    Synthetic,       //synthetic tree nodes
    /* Pipes and sockets: */
    Pipe,
    Sock,
    /* Special handles: */
    Epoll,
    Eventfd,
}

/// String-file payload: the backing buffer lives inside the handle and is
/// freed with it.
pub struct StrHandle {
    pub buf: Mutex<Vec<u8>>,
}

/// Pipe payload. `ready_for_ops` is false for FIFOs that were mknod'ed but
/// never opened.
pub struct PipeHandle {
    pub ready_for_ops: bool,
    pub name: String,
}

/// Type-specific payload, gated strictly by the handle type. The accessors
/// below panic on a wrong-arm access since that is a bug in the calling
/// layer, not a runtime condition.
pub enum HandleData {
    Chroot,
    ChrootEncrypted,
    Dev,
    Str(StrHandle),
    Pseudo,
    Tmpfs,
    Synthetic,
    Pipe(PipeHandle),
    Sock(SockHandle),
    Epoll(EpollHandle),
    Eventfd { is_semaphore: bool },
}

impl HandleData {
    pub fn handle_type(&self) -> HandleType {
        match self {
            HandleData::Chroot => HandleType::Chroot,
            HandleData::ChrootEncrypted => HandleType::ChrootEncrypted,
            HandleData::Dev => HandleType::Dev,
            HandleData::Str(_) => HandleType::Str,
            HandleData::Pseudo => HandleType::Pseudo,
            HandleData::Tmpfs => HandleType::Tmpfs,
            HandleData::Synthetic => HandleType::Synthetic,
            HandleData::Pipe(_) => HandleType::Pipe,
            HandleData::Sock(_) => HandleType::Sock,
            HandleData::Epoll(_) => HandleType::Epoll,
            HandleData::Eventfd { .. } => HandleType::Eventfd,
        }
    }
}

/// Minimal inode: authoritative metadata once attached to a handle. Concrete
/// filesystem backends own richer state; this core only needs the lock and
/// the set-once attachment discipline.
pub struct Inode {
    pub metadata: Mutex<InodeData>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InodeData {
    pub size: u64,
    pub mode: u32,
}

/// Path-tree node reference. Only the name matters to this core.
pub struct Dentry {
    pub name: String,
}

struct HandleInner {
    flags: i32, //Linux O_* flags
    acc_mode: i32,
}

pub struct Handle {
    data: HandleData,
    pub is_dir: bool,

    pub dentry: Option<RustRfc<Dentry>>,
    // Does not change once set, so reading it does not require the handle
    // lock.
    inode: RustOnceCell<RustRfc<Inode>>,

    // Offset in file. Take before the handle lock.
    pos: Mutex<i64>,

    // PAL URI for this handle (if any). Does not change.
    pub uri: Option<String>,
    // Handle-level PAL stream for non-socket handles; sockets keep theirs
    // inside `SockHandle` where it has its own publication rules.
    pal_handle: RustOnceCell<PalStreamRef>,

    // Epoll items this handle is registered in.
    epoll_items: Mutex<Vec<RustRfc<EpollItem>>>,

    lock: Mutex<HandleInner>,
}

impl Handle {
    /// Allocates a fresh handle with reference count 1.
    pub fn new(data: HandleData, flags: i32, acc_mode: i32) -> HandleRef {
        RustRfc::new(Handle {
            data,
            is_dir: false,
            dentry: None,
            inode: RustOnceCell::new(),
            pos: Mutex::new(0),
            uri: None,
            pal_handle: RustOnceCell::new(),
            epoll_items: Mutex::new(Vec::new()),
            lock: Mutex::new(HandleInner { flags, acc_mode }),
        })
    }

    pub fn handle_type(&self) -> HandleType {
        self.data.handle_type()
    }

    pub fn data(&self) -> &HandleData {
        &self.data
    }

    pub fn sock(&self) -> &SockHandle {
        match &self.data {
            HandleData::Sock(sock) => sock,
            _ => panic!("handle of type {:?} accessed as a socket", self.handle_type()),
        }
    }

    pub fn pipe(&self) -> &PipeHandle {
        match &self.data {
            HandleData::Pipe(pipe) => pipe,
            _ => panic!("handle of type {:?} accessed as a pipe", self.handle_type()),
        }
    }

    pub fn str_data(&self) -> &StrHandle {
        match &self.data {
            HandleData::Str(s) => s,
            _ => panic!("handle of type {:?} accessed as a string file", self.handle_type()),
        }
    }

    pub fn epoll(&self) -> &EpollHandle {
        match &self.data {
            HandleData::Epoll(ep) => ep,
            _ => panic!("handle of type {:?} accessed as an epoll set", self.handle_type()),
        }
    }

    pub fn flags(&self) -> i32 {
        self.lock.lock().flags
    }

    pub fn acc_mode(&self) -> i32 {
        self.lock.lock().acc_mode
    }

    pub fn is_nonblocking(&self) -> bool {
        self.lock.lock().flags & O_NONBLOCK != 0
    }

    /// Toggles blocking mode on both the LibOS flag and, where a PAL stream
    /// exists, the platform-level mode. The flag update and the PAL update
    /// happen under the handle lock so readers never see them split.
    pub fn set_nonblocking(&self, on: bool) {
        let mut inner = self.lock.lock();
        if on {
            inner.flags |= O_NONBLOCK;
        } else {
            inner.flags &= !O_NONBLOCK;
        }
        let pal = match &self.data {
            HandleData::Sock(sock) => sock.pal_handle(),
            _ => self.pal_handle.get(),
        };
        if let Some(stream) = pal {
            stream.set_nonblocking(on);
        }
    }

    pub fn inode(&self) -> Option<&RustRfc<Inode>> {
        self.inode.get()
    }

    /// Attaches the inode. Immutable after assignment; a second attachment is
    /// a contract violation.
    pub fn set_inode(&self, inode: RustRfc<Inode>) {
        if self.inode.set(inode).is_err() {
            panic!("handle inode may only be assigned once");
        }
    }

    pub fn pal_handle(&self) -> Option<&PalStreamRef> {
        self.pal_handle.get()
    }

    pub fn set_pal_handle(&self, stream: PalStreamRef) {
        if self.pal_handle.set(stream).is_err() {
            panic!("handle PAL stream may only be assigned once");
        }
    }

    /// Guard over the file offset. This is the `pos_lock`; take it before the
    /// handle lock and before any inode lock.
    pub fn pos_lock(&self) -> MutexGuard<'_, i64> {
        self.pos.lock()
    }

    pub fn register_epoll_item(&self, item: RustRfc<EpollItem>) {
        self.epoll_items.lock().push(item);
    }

    pub fn unregister_epoll_item(&self, item: &RustRfc<EpollItem>) {
        self.epoll_items.lock().retain(|it| !RustRfc::ptr_eq(it, item));
    }

    pub(crate) fn epoll_items(&self) -> Vec<RustRfc<EpollItem>> {
        self.epoll_items.lock().clone()
    }

    /// Reference count currently held on this handle, for invariant checks.
    pub fn current_refcount(this: &HandleRef) -> usize {
        RustRfc::strong_count(this)
    }
}
