// Socket and descriptor constants
#![allow(dead_code)]
#![allow(non_upper_case_globals)]

// Imported throughout the libos module

pub const SOCK_STREAM: i32 = 1; //stream socket
pub const SOCK_DGRAM: i32 = 2; //datagram socket
pub const SOCK_RAW: i32 = 3; //raw protocol interface
pub const SOCK_TYPE_MASK: i32 = 0x7; //type lives in the low 3 bits
pub const SOCK_CLOEXEC: i32 = 0o2000000;
pub const SOCK_NONBLOCK: i32 = 0o4000;

/* Supported address families. */
pub const AF_UNSPEC: i32 = 0;
pub const AF_UNIX: i32 = 1; /* Unix domain sockets   */
pub const AF_LOCAL: i32 = 1; /* POSIX name for AF_UNIX */
pub const AF_INET: i32 = 2; /* Internet IP Protocol  */
pub const AF_INET6: i32 = 10; /* IP version 6   */

/* Open flags and access modes carried on handles. */
pub const O_RDONLY: i32 = 0o0;
pub const O_WRONLY: i32 = 0o1;
pub const O_RDWR: i32 = 0o2;
pub const O_ACCMODE: i32 = 0o3;
pub const O_NONBLOCK: i32 = 0o4000;
pub const O_CLOEXEC: i32 = 0o2000000;

/* Descriptor flags (per-slot, not per-handle). */
pub const FD_CLOEXEC: i32 = 1;

/* Upper bound on descriptor numbers a table will hand out. */
pub const MAX_FD: u32 = 1024;
/* Initial slot count of a fresh descriptor table. */
pub const INIT_FD_SIZE: usize = 32;

/* shutdown() directions. */
pub const SHUT_RD: i32 = 0;
pub const SHUT_WR: i32 = 1;
pub const SHUT_RDWR: i32 = 2;

/* Socket option levels and names (Linux values). */
pub const SOL_SOCKET: i32 = 1;
pub const SO_REUSEADDR: i32 = 2;
pub const SO_TYPE: i32 = 3;
pub const SO_ERROR: i32 = 4;
pub const SO_SNDBUF: i32 = 7;
pub const SO_RCVBUF: i32 = 8;
pub const SO_RCVTIMEO: i32 = 20;
pub const SO_SNDTIMEO: i32 = 21;
pub const SO_ACCEPTCONN: i32 = 30;
pub const SO_PROTOCOL: i32 = 38;
pub const SO_DOMAIN: i32 = 39;
