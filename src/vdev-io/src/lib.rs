//! Leaf vdev I/O engine: block device driver, page-list builder, completion
//! dispatcher and checksum-verify gate (spec §4.A-§4.D).

pub mod checksum;
pub mod device;
pub mod geometry;
pub mod queue;
pub mod vbio;

pub use checksum::VerifyGate;
pub use device::{DeviceState, LeafDevice};
pub use geometry::Geometry;
pub use vbio::{SubBatch, VBio};
