mod socket_tests;

use crate::libos::constants::AF_UNIX;

// Builds the raw bytes of a pathname sockaddr_un: family tag, path, one
// terminating null byte.
pub fn pathname_addr(path: &str) -> Vec<u8> {
    let mut addr = (AF_UNIX as u16).to_ne_bytes().to_vec();
    addr.extend_from_slice(path.as_bytes());
    addr.push(0);
    addr
}

// Builds the raw bytes of an abstract sockaddr_un: family tag, leading null,
// then the name bytes verbatim (no terminator; the length is significant).
pub fn abstract_addr(name: &[u8]) -> Vec<u8> {
    let mut addr = (AF_UNIX as u16).to_ne_bytes().to_vec();
    addr.push(0);
    addr.extend_from_slice(name);
    addr
}
