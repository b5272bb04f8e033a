pub mod command_dispatcher;
pub mod operation;
pub mod report;

pub use command_dispatcher::{CommandDispatcher, RunHandle, RunState};
pub use operation::{BackupTarget, Operation, RunPlan};
pub use report::{RunOutcome, RunReport, RunResult};
