pub mod ansi;
pub mod output_relay;
pub mod progress_parser;

pub use ansi::strip_ansi_escape_codes;
pub use output_relay::{FailureKind, OutputRelay, RunEvent, RunListener};
pub use progress_parser::{PercentProgressParser, ProgressEstimate, ProgressParser};
