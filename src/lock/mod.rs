//! Async mutual exclusion for shared planner resources.

pub mod priority;
pub mod registry;

pub use priority::{
    AcquireRequest, LockError, LockResult, LockStatus, PriorityLock, WaiterStatus,
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_PRIORITY,
};
pub use registry::{names, LockRegistry};
