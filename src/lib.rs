pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod relay;
pub mod runner;
pub mod ui;

// Public API re-exports
pub use cli::{Cli, Command, OutputFormat};
pub use config::{BackupConfig, CliOverrides, Config, ProgressConfig, ToolConfig};
pub use error::{LogicalBackupError, Result, UserFriendlyError};

// Core functionality re-exports
pub use dispatcher::{
    BackupTarget, CommandDispatcher, Operation, RunHandle, RunOutcome, RunPlan, RunReport,
    RunResult, RunState,
};
pub use relay::{
    FailureKind, OutputRelay, PercentProgressParser, ProgressEstimate, ProgressParser, RunEvent,
    RunListener,
};
pub use runner::{CancelToken, Invocation, OutputLines, ProcessRun};
pub use ui::{GracefulShutdown, OutputFormatter, OutputMode, ProgressManager};

use indicatif::ProgressBar;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Terminal front-end: dispatches one operation and renders its events.
pub struct LogicalBackup {
    config: Config,
    output_formatter: OutputFormatter,
    progress_manager: ProgressManager,
    shutdown: GracefulShutdown,
}

impl LogicalBackup {
    pub fn new(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Result<Self> {
        let shutdown = GracefulShutdown::new()?;
        Ok(Self::with_shutdown(config, output_mode, verbose, quiet, shutdown))
    }

    /// Instance without a Ctrl+C handler, so several can coexist in one test binary.
    #[cfg(test)]
    pub fn new_for_test(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Self {
        Self::with_shutdown(
            config,
            output_mode,
            verbose,
            quiet,
            GracefulShutdown::new_for_test(),
        )
    }

    fn with_shutdown(
        config: Config,
        output_mode: OutputMode,
        verbose: u8,
        quiet: bool,
        shutdown: GracefulShutdown,
    ) -> Self {
        let output_formatter = OutputFormatter::new(output_mode, verbose, quiet);
        // The bar would corrupt machine-readable output.
        let show_progress = config.progress.enabled && !quiet && output_mode == OutputMode::Human;
        let progress_manager = ProgressManager::new(show_progress);

        Self {
            config,
            output_formatter,
            progress_manager,
            shutdown,
        }
    }

    pub fn from_cli(cli_args: &Cli) -> Result<Self> {
        let config = cli_args.load_config()?;
        let output_mode = match cli_args.output_format {
            OutputFormat::Human => OutputMode::Human,
            OutputFormat::Json => OutputMode::Json,
            OutputFormat::Plain => OutputMode::Plain,
        };

        Self::new(config, output_mode, cli_args.verbose, cli_args.quiet)
    }

    /// Validate a selection and build the invocation without running it.
    pub fn plan(&self, operation: Option<Operation>, destination: Option<&Path>) -> Result<RunPlan> {
        RunPlan::new(operation, destination, &self.config.tool.program)
    }

    /// Run one operation to completion, relaying its output as it arrives.
    ///
    /// `Err` means nothing was launched. A launched run always yields a
    /// [`RunResult`] whose report is filled in even when the tool failed.
    /// Ctrl+C cancels the external tool; the run then ends with
    /// [`LogicalBackupError::Cancelled`].
    pub async fn run_operation(
        &self,
        operation: Option<Operation>,
        destination: Option<&Path>,
    ) -> Result<RunResult> {
        self.shutdown.check_shutdown()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<RunEvent>();
        let handle = {
            let dispatcher = CommandDispatcher::new(&self.config, tx);
            dispatcher.dispatch(operation, destination)?
        };
        // The dispatcher's sender is gone; the channel closes when the run does.

        let pb = match handle.operation() {
            Operation::Backup => self.progress_manager.create_backup_progress(),
            Operation::ListDevices => self
                .progress_manager
                .create_spinner("Waiting for pymobiledevice3..."),
        };

        let mut cancel_requested = false;
        loop {
            if !cancel_requested && !self.shutdown.is_running() {
                cancel_requested = true;
                log::info!("Interrupt received, cancelling {}", handle.operation());
                if let Err(e) = handle.cancel() {
                    log::warn!("Failed to cancel run: {}", e);
                }
            }

            match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, rx.recv()).await {
                Ok(Some(event)) => self.render_event(&pb, &event),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        if !pb.is_finished() {
            pb.abandon();
        }

        handle.finish().await
    }

    fn render_event(&self, pb: &ProgressBar, event: &RunEvent) {
        match event {
            RunEvent::Log { .. } => {
                self.progress_manager
                    .suspend(|| self.output_formatter.print_event(event));
            }
            RunEvent::Progress { percent } => {
                ui::progress::update_run_progress(pb, *percent);
                self.output_formatter.print_event(event);
            }
            RunEvent::Completed { .. } => {
                ui::progress::finish_progress_with_summary(pb, "Done", pb.elapsed());
                self.output_formatter.print_event(event);
            }
            // The error itself is printed by handle_error once the run returns
            RunEvent::Failed { .. } => pb.abandon(),
        }
    }

    /// Generate sample configuration file
    pub fn generate_sample_config<P: AsRef<Path>>(output_path: P) -> Result<()> {
        let sample_config = Config::create_sample_config();
        std::fs::write(output_path.as_ref(), sample_config).map_err(LogicalBackupError::Io)?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output_formatter(&self) -> &OutputFormatter {
        &self.output_formatter
    }

    pub fn progress_manager(&self) -> &ProgressManager {
        &self.progress_manager
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Handle error with user-friendly output
    pub fn handle_error(&self, error: &LogicalBackupError) {
        self.progress_manager
            .suspend(|| self.output_formatter.print_user_friendly_error(error));
    }
}
