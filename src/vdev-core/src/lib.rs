//! Shared types for the leaf vdev I/O engine and the pool activity state
//! machine: the zio request model, the client-visible error kinds, the
//! event ring, and the process-wide tunables.

pub mod error;
pub mod events;
pub mod hash;
pub mod tunables;
pub mod zio;

pub use error::{ErrorKind, Result};
pub use events::{Event, EventRing};
pub use hash::Hash256;
pub use tunables::Tunables;
pub use zio::{Zio, ZioFlags, ZioKind};
