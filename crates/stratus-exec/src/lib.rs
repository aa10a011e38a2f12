//! Remote invocation machinery: bounded retry and the deduplicating fan-out
//! launcher used to start worker and preprocessing invocations.

mod error;
pub use error::{ExecError, ExecResult};

mod invoke;
pub use invoke::{InvokeError, Invoker};

pub mod retry;
pub use retry::{Verdict, retry};

pub mod launch;
pub use launch::{LaunchConfig, LaunchFailure, LaunchReport, Launcher};

#[cfg(feature = "local")]
pub mod proc;

#[cfg(feature = "local")]
pub mod local;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::invoke::{InvokeError, Invoker};
    pub use crate::launch::{LaunchConfig, LaunchReport, Launcher};
    pub use crate::retry::{Verdict, retry};
}
