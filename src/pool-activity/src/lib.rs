//! Pool activity state machine: scrub/resilver/rebuild/initialize/trim/
//! removal/raidz-expand/checkpoint-discard, progress observation, and
//! device lifecycle operations against an imported pool-handle interface
//! (spec §4.E-§4.G, §6.2).

pub mod activity;
pub mod checkpoint;
pub mod lifecycle;
pub mod memory;
pub mod pool;
pub mod waiter;

pub use activity::{ActivityCommand, ActivityKind, ActivityRecord, ActivityState};
pub use checkpoint::{CheckpointRecord, CheckpointState};
pub use pool::{MembershipState, PoolHandle, RefreshResult, VdevNode, VdevParentKind};
pub use waiter::{WaitOptions, WaitOutcome};
