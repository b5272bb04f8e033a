pub mod invocation;
pub mod lines;
pub mod process_run;

pub use invocation::Invocation;
pub use lines::OutputLines;
pub use process_run::{CancelToken, ProcessRun};
