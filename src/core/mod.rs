//! Lock implementations and the machinery under them.

pub mod deadline;
pub mod fifo_lock;
pub mod os_lock;
pub mod paths;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_lock;
pub mod reentrant;
pub mod settings;
