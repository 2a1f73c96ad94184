// Per-process descriptor table.
//
// A `HandleMap` owns one handle reference per occupied slot; installing a
// handle consumes the caller's reference into the table and detaching hands
// it back out. Duplicating a table (fork-like operations) clones every slot,
// so the underlying handles are shared while the per-descriptor flags
// (FD_CLOEXEC) stay independent.

use crate::interface::errnos::{syscall_error, Errno};
use crate::interface::{Mutex, RustRfc};
use crate::libos::constants::*;
use crate::libos::handle::HandleRef;

#[derive(Clone)]
pub struct FdEntry {
    pub flags: i32, //descriptor flags, only FD_CLOEXEC
    pub handle: HandleRef,
}

struct HandleMapInner {
    // A slot is either empty or holds exactly one live handle reference.
    map: Vec<Option<FdEntry>>,
    // One past the highest occupied slot, 0 if the table is empty.
    fd_top: u32,
}

pub struct HandleMap {
    inner: Mutex<HandleMapInner>,
}

impl HandleMap {
    pub fn new() -> RustRfc<HandleMap> {
        RustRfc::new(HandleMap {
            inner: Mutex::new(HandleMapInner {
                map: vec![None; INIT_FD_SIZE],
                fd_top: 0,
            }),
        })
    }

    /// Returns the handle at `fd` and its descriptor flags without removing
    /// it. The returned reference is the caller's to release.
    pub fn lookup(&self, fd: u32) -> Option<(HandleRef, i32)> {
        let inner = self.inner.lock();
        if fd >= inner.fd_top {
            return None;
        }
        inner.map[fd as usize]
            .as_ref()
            .map(|entry| (entry.handle.clone(), entry.flags))
    }

    /// Assigns the lowest free descriptor >= 0, taking ownership of one
    /// reference to `handle`.
    pub fn install(&self, handle: HandleRef, flags: i32) -> Result<u32, i32> {
        self.install_above(0, handle, flags)
    }

    /// Assigns the lowest free descriptor >= `floor`. The search is linear
    /// and must find the true minimum, not merely an unoccupied slot.
    pub fn install_above(&self, floor: u32, handle: HandleRef, flags: i32) -> Result<u32, i32> {
        if floor >= MAX_FD {
            return Err(syscall_error(Errno::EINVAL, "fcntl", "descriptor floor is out of range"));
        }
        let mut inner = self.inner.lock();
        let mut fd = floor;
        while fd < MAX_FD {
            if fd as usize >= inner.map.len() {
                grow(&mut inner, fd as usize + 1);
            }
            if inner.map[fd as usize].is_none() {
                inner.map[fd as usize] = Some(FdEntry { flags, handle });
                if fd >= inner.fd_top {
                    inner.fd_top = fd + 1;
                }
                return Ok(fd);
            }
            fd += 1;
        }
        Err(syscall_error(Errno::ENFILE, "open", "no available file descriptor number could be found"))
    }

    /// Assigns `handle` to exactly `fd`, closing and releasing any previous
    /// occupant of that slot.
    pub fn install_at(&self, fd: u32, handle: HandleRef, flags: i32) -> Result<(), i32> {
        if fd >= MAX_FD {
            return Err(syscall_error(Errno::EBADF, "dup2", "requested descriptor is out of range"));
        }
        let mut inner = self.inner.lock();
        if fd as usize >= inner.map.len() {
            grow(&mut inner, fd as usize + 1);
        }
        // the displaced entry's reference drops here
        inner.map[fd as usize] = Some(FdEntry { flags, handle });
        if fd >= inner.fd_top {
            inner.fd_top = fd + 1;
        }
        Ok(())
    }

    /// Atomically removes the entry at `fd`, transferring the handle
    /// reference (and its flags) to the caller.
    pub fn detach(&self, fd: u32) -> Option<(HandleRef, i32)> {
        let mut inner = self.inner.lock();
        if fd >= inner.fd_top {
            return None;
        }
        let entry = inner.map[fd as usize].take()?;
        if fd + 1 == inner.fd_top {
            let mut top = fd;
            while top > 0 && inner.map[top as usize - 1].is_none() {
                top -= 1;
            }
            inner.fd_top = top;
        }
        Some((entry.handle, entry.flags))
    }

    /// Duplicates the table: the new table shares every handle (one extra
    /// reference per occupied slot) but carries its own descriptor flags.
    pub fn dup(&self) -> RustRfc<HandleMap> {
        let inner = self.inner.lock();
        RustRfc::new(HandleMap {
            inner: Mutex::new(HandleMapInner {
                map: inner.map.clone(),
                fd_top: inner.fd_top,
            }),
        })
    }

    /// Invokes `callback` for every occupied slot under the table lock. A
    /// nonzero return aborts the walk and is returned to the caller.
    pub fn walk<F>(&self, mut callback: F) -> i32
    where
        F: FnMut(u32, &mut FdEntry) -> i32,
    {
        let mut inner = self.inner.lock();
        let top = inner.fd_top;
        for fd in 0..top {
            if let Some(entry) = inner.map[fd as usize].as_mut() {
                let ret = callback(fd, entry);
                if ret != 0 {
                    return ret;
                }
            }
        }
        0
    }

    /// Updates the descriptor flags at `fd` in place.
    pub fn set_flags(&self, fd: u32, flags: i32) -> Result<(), i32> {
        let mut inner = self.inner.lock();
        if fd >= inner.fd_top {
            return Err(syscall_error(Errno::EBADF, "fcntl", "invalid file descriptor"));
        }
        match inner.map[fd as usize].as_mut() {
            Some(entry) => {
                entry.flags = flags;
                Ok(())
            }
            None => Err(syscall_error(Errno::EBADF, "fcntl", "invalid file descriptor")),
        }
    }

    pub fn fd_top(&self) -> u32 {
        self.inner.lock().fd_top
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.map.iter().filter(|slot| slot.is_some()).count()
    }
}

// Growth preserves all existing mappings; we double to keep installs
// amortized cheap.
fn grow(inner: &mut HandleMapInner, needed: usize) {
    let mut new_len = inner.map.len().max(INIT_FD_SIZE);
    while new_len < needed {
        new_len *= 2;
    }
    inner.map.resize(new_len.min(MAX_FD as usize), None);
}
