mod config;
mod dispatch;
mod events;
mod runner;
mod store;

pub use config::RunnerConfig;
pub use dispatch::{DispatchOutcome, DispatchTable, LocalHandler, StepDispatcher};
pub use events::{EventBus, EventLog};
pub use runner::{TaskRunner, DEFAULT_WAIT_POLL, DEFAULT_WAIT_TIMEOUT};
pub use store::RunStore;
