// Epoll readiness notification sink.
//
// The full epoll machinery (interest lists, event collection, edge
// triggering) lives outside this core; what the socket layer needs from it is
// the hook: after bind/connect changes what a handle means to pollers, every
// epoll item registered on that handle must be woken so blocked waiters
// re-evaluate readiness.

use crate::interface::{Condvar, Mutex, RustRfc};
use crate::libos::handle::Handle;

/// One registration of a handle in an epoll instance. Waiters block on the
/// condvar; every notification bumps the generation counter so a wakeup is
/// never lost even if it races the wait.
pub struct EpollItem {
    generation: Mutex<u64>,
    wakeup: Condvar,
}

impl EpollItem {
    pub fn new() -> RustRfc<Self> {
        RustRfc::new(Self { generation: Mutex::new(0), wakeup: Condvar::new() })
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.wakeup.notify_all();
    }

    /// Number of times this item has been notified.
    pub fn wakeups(&self) -> u64 {
        *self.generation.lock()
    }

    /// Blocks until the next notification after `seen`.
    pub fn wait_past(&self, seen: u64) {
        let mut generation = self.generation.lock();
        while *generation <= seen {
            self.wakeup.wait(&mut generation);
        }
    }
}

impl Default for EpollItem {
    fn default() -> Self {
        Self { generation: Mutex::new(0), wakeup: Condvar::new() }
    }
}

/// Payload of an epoll-type handle: the items registered in this instance.
pub struct EpollHandle {
    pub items: Mutex<Vec<RustRfc<EpollItem>>>,
}

impl EpollHandle {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }
}

impl Default for EpollHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Wakes every epoll item registered on `handle`. Called after operations
/// that change the handle's readiness semantics (bind, connect).
pub fn interrupt_epolls(handle: &Handle) {
    for item in handle.epoll_items() {
        item.notify();
    }
}
