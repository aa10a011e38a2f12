mod task_id;
pub use task_id::TaskId;

mod task_state;
pub use task_state::{StopReason, TaskState};

mod task_snapshot;
pub use task_snapshot::TaskSnapshot;

/// Elapsed time in seconds, as reported by the coordinator or measured locally.
pub type Seconds = f64;

/// Amount of money in US dollars.
pub type Dollars = f64;
