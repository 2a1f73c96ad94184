// Misc wrappers for the interface
// Locks, shared pointers, maps, thread helpers.

use std::thread;

pub use dashmap::{
    mapref::entry::Entry as RustHashEntry, DashMap as RustHashMap, DashSet as RustHashSet,
};
pub use once_cell::sync::{Lazy as RustLazyGlobal, OnceCell as RustOnceCell};
pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock as RustLock};
pub use std::sync::Arc as RustRfc;
pub use std::sync::atomic::{
    AtomicBool as RustAtomicBool, AtomicI32 as RustAtomicI32, AtomicU32 as RustAtomicU32,
    AtomicU64 as RustAtomicU64, AtomicUsize as RustAtomicUsize,
    Ordering as RustAtomicOrdering,
};
pub use std::time::Duration as RustDuration;

pub fn helper_thread<F>(func: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(func)
}

pub fn sleep(dur: RustDuration) {
    thread::sleep(dur);
}

// Used by blocking loops in the transport emulation to let peers make
// progress while we wait for buffer space or data.
pub fn thread_yield() {
    thread::yield_now();
}
