mod capability;
mod event;
mod job;
mod run;
mod verification;

pub use capability::{Capability, CapabilityMatch, Domain, Method, PlanStep, TaskIntent};
pub use event::RuntimeEvent;
pub use job::{Job, JobState, JobType};
pub use run::{
    Checkpoint, Diagnostics, ExecutionRecord, ExecutionStepResult, RunState, RunStatusGrade,
    TaskRun,
};
pub use verification::{VerificationCheck, VerificationSummary};
