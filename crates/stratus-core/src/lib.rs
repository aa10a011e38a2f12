pub mod error;
pub use error::{ClientKind, CoreError};

pub mod platform;
pub use platform::{
    CapacityProbe, CommandHost, Connector, Coordinator, PlatformError, Probe, ProbeError,
};

mod clients;
pub use clients::ClientFactory;

pub mod events;
pub use events::{Event, EventBus, EventKind, Subscribe};

mod maintainer;
pub use maintainer::{FleetMaintainer, MaintainerExit, TickOutcome, UNOBSERVED, shortage};

mod task;
pub use task::{Task, TaskContext, TaskSettings};

pub mod preprocess;
pub use preprocess::preprocess;
pub mod grid;
pub use grid::{GridConfig, GridSearch, HyperGrid, Registry};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
