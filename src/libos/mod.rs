//! POSIX emulation core: handles, descriptor tables and sockets.
//!
//! Layering, leaves first: `handle` defines the reference-counted handle
//! object every open resource lives behind; `fdtable` maps per-process
//! descriptor numbers onto handles; `socket` holds the domain-independent
//! socket state machine and the `SockOps` vtable; `unix` is the UNIX-domain
//! backend that rides on named PAL pipes. `epoll` is the readiness
//! notification sink the socket layer pokes after bind/connect.

pub mod constants;
pub mod epoll;
pub mod fdtable;
pub mod handle;
pub mod socket;
pub mod unix;
