//! Handle and socket core for a library OS.
//!
//! This crate implements the file-descriptor plumbing a POSIX personality
//! needs when the platform underneath only offers primitive byte streams:
//! reference-counted handle objects, per-process descriptor tables, and a
//! UNIX-domain socket emulation layered over named PAL pipes.
//!
//! The `interface` module wraps everything platform-shaped (locks, maps,
//! errnos, socket address encodings, and the PAL stream transport itself) so
//! that the `libos` module can be written purely against that surface.

pub mod interface;
pub mod libos;

#[cfg(test)]
mod tests;
