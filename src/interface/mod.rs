//! Platform interface for the LibOS core.
//!
//! Everything the emulation layer needs from the outside world is funneled
//! through this module: synchronization primitives, shared maps, errno
//! definitions, socket address encodings, and the PAL stream transport.
//! Libraries are imported only via `use` statements within these files so the
//! rest of the crate sees one narrow, swappable surface.

pub mod errnos;
mod misc;
mod pal;
mod types;

pub use errnos::*;
pub use misc::*;
pub use pal::*;
pub use types::*;
