use crate::config::Config;
use crate::dispatcher::operation::{Operation, RunPlan};
use crate::dispatcher::report::{RunOutcome, RunReport, RunResult};
use crate::error::{LogicalBackupError, Result, UserFriendlyError};
use crate::relay::{
    strip_ansi_escape_codes, FailureKind, OutputRelay, PercentProgressParser, ProgressParser,
    RunListener,
};
use crate::runner::{CancelToken, ProcessRun};
use chrono::Utc;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Succeeded,
            3 => RunState::Failed,
            _ => RunState::Idle,
        }
    }
}

/// Turns an operation selection into a background run of the external tool.
/// At most one run is active per dispatcher.
pub struct CommandDispatcher {
    program: String,
    create_missing: bool,
    diagnostic_lines: usize,
    parser: Option<Arc<dyn ProgressParser>>,
    listener: Arc<dyn RunListener>,
    state: Arc<AtomicU8>,
}

impl CommandDispatcher {
    pub fn new<L: RunListener>(config: &Config, listener: L) -> Self {
        let parser: Option<Arc<dyn ProgressParser>> = if config.progress.enabled {
            Some(Arc::new(PercentProgressParser::new()))
        } else {
            None
        };

        Self {
            program: config.tool.program.clone(),
            create_missing: config.backup.create_missing,
            diagnostic_lines: config.tool.diagnostic_lines.max(1),
            parser,
            listener: Arc::new(listener),
            state: Arc::new(AtomicU8::new(RunState::Idle as u8)),
        }
    }

    pub fn with_parser<P: ProgressParser + 'static>(mut self, parser: P) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_busy(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Validate a selection without starting anything.
    pub fn plan(
        &self,
        operation: Option<Operation>,
        destination: Option<&Path>,
    ) -> Result<RunPlan> {
        RunPlan::new(operation, destination, &self.program)
    }

    /// Start a run from free-text inputs, as a form would supply them.
    pub fn dispatch_selection(
        &self,
        selection: Option<&str>,
        destination: &str,
    ) -> Result<RunHandle> {
        let operation = Operation::from_selection(selection)?;
        let destination = (!destination.trim().is_empty()).then(|| Path::new(destination));
        self.dispatch(Some(operation), destination)
    }

    /// Validate, claim the dispatcher and launch the run on the blocking pool.
    ///
    /// Configuration problems and [`LogicalBackupError::Busy`] are returned
    /// here; everything after the launch is reported through the listener
    /// and the returned [`RunHandle`].
    pub fn dispatch(
        &self,
        operation: Option<Operation>,
        destination: Option<&Path>,
    ) -> Result<RunHandle> {
        let plan = self.plan(operation, destination)?;
        let runtime = Handle::try_current()
            .map_err(|e| LogicalBackupError::unexpected("dispatcher", e))?;

        let previous = self.begin()?;

        if let Some(ref target) = plan.target {
            if let Err(e) = target.prepare(self.create_missing) {
                self.state.store(previous as u8, Ordering::SeqCst);
                return Err(e);
            }
        }

        log::info!("Dispatching {}: {}", plan.operation, plan.invocation);

        let cancel = CancelToken::new();
        let relay =
            OutputRelay::new(self.listener.clone()).with_shared_parser(self.parser.clone());
        let guard = RunGuard::new(self.state.clone());
        let job_cancel = cancel.clone();
        let diagnostic_lines = self.diagnostic_lines;
        let operation = plan.operation;

        let task = runtime.spawn_blocking(move || {
            execute_run(plan, relay, job_cancel, diagnostic_lines, guard)
        });

        Ok(RunHandle {
            operation,
            cancel,
            task,
        })
    }

    fn begin(&self) -> Result<RunState> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current == RunState::Running as u8 {
                log::warn!("Rejected trigger while a run is active");
                return Err(LogicalBackupError::Busy);
            }
            match self.state.compare_exchange(
                current,
                RunState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(previous) => return Ok(RunState::from_u8(previous)),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Handle to an active run.
pub struct RunHandle {
    operation: Operation,
    cancel: CancelToken,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Kill the external tool. The run ends as [`LogicalBackupError::Cancelled`].
    pub fn cancel(&self) -> Result<bool> {
        self.cancel.cancel()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the run and return its report whatever the outcome.
    pub async fn finish(self) -> Result<RunResult> {
        self.task
            .await
            .map_err(|e| LogicalBackupError::unexpected(self.operation.name(), e))
    }

    /// Wait for the run; a failed run becomes its error.
    pub async fn wait(self) -> Result<RunReport> {
        self.finish().await?.into_result()
    }
}

/// Publishes the run's final state, even if the job unwinds.
struct RunGuard {
    state: Arc<AtomicU8>,
    outcome: RunState,
}

impl RunGuard {
    fn new(state: Arc<AtomicU8>) -> Self {
        Self {
            state,
            outcome: RunState::Failed,
        }
    }

    fn succeed(&mut self) {
        self.outcome = RunState::Succeeded;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.store(self.outcome as u8, Ordering::SeqCst);
    }
}

fn execute_run(
    plan: RunPlan,
    mut relay: OutputRelay,
    cancel: CancelToken,
    diagnostic_lines: usize,
    mut guard: RunGuard,
) -> RunResult {
    let started_at = Utc::now();
    let start = Instant::now();

    relay.log(plan.start_message());

    let streamed = panic::catch_unwind(AssertUnwindSafe(|| {
        stream_output(&plan, &mut relay, &cancel, diagnostic_lines)
    }))
    .unwrap_or_else(|payload| {
        Err(LogicalBackupError::unexpected(
            plan.operation.name(),
            panic_message(payload.as_ref()),
        ))
    });

    let (outcome, exit_code, summary, error) = match streamed {
        Ok(status) => {
            relay.log(plan.success_message());
            let summary = plan.completion_summary();
            // Free the dispatcher before the terminal notice so a listener can re-trigger
            guard.succeed();
            drop(guard);
            relay.complete(summary.clone());
            log::info!("{} finished in {:?}", plan.operation, start.elapsed());
            (RunOutcome::Succeeded, status.code(), summary, None)
        }
        Err(e) => {
            match e {
                LogicalBackupError::Cancelled => log::warn!("{} cancelled", plan.operation),
                _ => log::error!("{} failed: {}", plan.operation, e),
            }
            relay.log(plan.failure_message());
            drop(guard);
            relay.fail(&e);

            let exit_code = match &e {
                LogicalBackupError::ToolExecutionFailure { exit_code, .. } => *exit_code,
                _ => None,
            };
            let outcome = RunOutcome::Failed {
                kind: FailureKind::from(&e),
            };
            (outcome, exit_code, e.user_message(), Some(e))
        }
    };

    RunResult {
        report: RunReport {
            operation: plan.operation,
            destination: plan.destination().map(Path::to_path_buf),
            command: plan.invocation.to_string(),
            outcome,
            exit_code,
            lines_relayed: relay.lines_relayed(),
            last_progress: relay.last_progress(),
            started_at,
            duration: start.elapsed(),
            summary,
        },
        error,
    }
}

fn stream_output(
    plan: &RunPlan,
    relay: &mut OutputRelay,
    cancel: &CancelToken,
    diagnostic_lines: usize,
) -> Result<ExitStatus> {
    let mut run = ProcessRun::spawn(&plan.invocation, cancel)?;
    let mut tail: VecDeque<String> = VecDeque::with_capacity(diagnostic_lines);

    if let Some(lines) = run.take_output() {
        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    let _ = cancel.cancel();
                    let _ = run.wait();
                    return Err(LogicalBackupError::unexpected(
                        plan.operation.name(),
                        format!("reading tool output failed: {}", e),
                    ));
                }
            };

            relay.relay_line(&line);

            if tail.len() == diagnostic_lines {
                tail.pop_front();
            }
            tail.push_back(strip_ansi_escape_codes(&line).into_owned());
        }
    }

    let status = run.wait()?;
    check_exit(plan, status, cancel.is_cancelled(), tail)
}

/// Classify a reaped exit status. A cancel request only counts when the tool
/// did not succeed; one that raced a clean exit is ignored.
fn check_exit(
    plan: &RunPlan,
    status: ExitStatus,
    cancel_requested: bool,
    tail: VecDeque<String>,
) -> Result<ExitStatus> {
    if status.success() {
        if cancel_requested {
            log::debug!("Cancel arrived after {} had already succeeded", plan.operation);
        }
        return Ok(status);
    }

    if cancel_requested {
        return Err(LogicalBackupError::Cancelled);
    }

    Err(LogicalBackupError::ToolExecutionFailure {
        program: plan.invocation.program.clone(),
        exit_code: status.code(),
        diagnostic: tail.into_iter().collect(),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
