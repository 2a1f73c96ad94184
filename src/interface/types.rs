// Socket address encodings shared between the LibOS layer and its callers.
//
// Addresses cross this boundary as raw `sockaddr`-shaped byte strings, the
// same way they arrive from an application: a native-endian u16 family tag
// followed by family-specific payload. `SockaddrStorage` is the generic
// fixed-size container used to store any supported address inside a socket.

use std::cmp::min;

pub const SUN_PATH_SIZE: usize = 108;
/// offsetof(sockaddr_un, sun_path)
pub const SOCKADDR_UN_HEADER_SIZE: usize = 2;
pub const SOCKADDR_UN_SIZE: usize = SOCKADDR_UN_HEADER_SIZE + SUN_PATH_SIZE;
pub const SOCKADDR_STORAGE_SIZE: usize = 128;

#[repr(C)]
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct SockaddrUnix {
    pub sun_family: u16,
    pub sun_path: [u8; SUN_PATH_SIZE],
}

pub fn new_sockaddr_unix(family: u16, path: &[u8]) -> SockaddrUnix {
    let pathlen = path.len();
    assert!(pathlen <= SUN_PATH_SIZE);
    let mut array_path: [u8; SUN_PATH_SIZE] = [0; SUN_PATH_SIZE];
    array_path[0..pathlen].copy_from_slice(path);
    SockaddrUnix { sun_family: family, sun_path: array_path }
}

impl SockaddrUnix {
    /// Serializes the first `addrlen` bytes of the C-layout address. This is
    /// what a caller would pass as `(sockaddr*, socklen_t)`.
    pub fn to_bytes(&self, addrlen: usize) -> Vec<u8> {
        assert!(addrlen <= SOCKADDR_UN_SIZE);
        let mut out = Vec::with_capacity(addrlen);
        out.extend_from_slice(&self.sun_family.to_ne_bytes());
        out.extend_from_slice(&self.sun_path);
        out.truncate(addrlen);
        out
    }
}

/// Generic address storage, sized to hold any supported address family plus
/// the explicit length that POSIX address handling tracks alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockaddrStorage {
    bytes: [u8; SOCKADDR_STORAGE_SIZE],
    len: usize,
}

impl SockaddrStorage {
    pub fn empty() -> Self {
        Self { bytes: [0; SOCKADDR_STORAGE_SIZE], len: 0 }
    }

    /// Copies in raw address bytes, truncating to the storage size.
    pub fn from_bytes(addr: &[u8]) -> Self {
        let len = min(addr.len(), SOCKADDR_STORAGE_SIZE);
        let mut bytes = [0; SOCKADDR_STORAGE_SIZE];
        bytes[..len].copy_from_slice(&addr[..len]);
        Self { bytes, len }
    }

    /// An address carrying only the family tag and nothing else, e.g. the
    /// anonymous peer identity of an accepted UNIX socket.
    pub fn family_only(family: u16) -> Self {
        let mut bytes = [0; SOCKADDR_STORAGE_SIZE];
        bytes[..2].copy_from_slice(&family.to_ne_bytes());
        Self { bytes, len: 2 }
    }

    pub fn family(&self) -> u16 {
        if self.len < 2 {
            return 0;
        }
        u16::from_ne_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8; SOCKADDR_STORAGE_SIZE] {
        &mut self.bytes
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        assert!(len <= SOCKADDR_STORAGE_SIZE);
        self.len = len;
    }
}
