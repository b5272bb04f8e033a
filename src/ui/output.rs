use crate::dispatcher::{RunOutcome, RunReport};
use crate::error::{LogicalBackupError, UserFriendlyError};
use crate::relay::RunEvent;
use crate::ui::progress::format_duration;
use console::{style, Emoji, StyledObject, Term};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
    Plain,
}

static SPARKLES: Emoji = Emoji("✨ ", "* ");
static LIGHTBULB: Emoji = Emoji("💡 ", "i ");

/// Severity of a status message from this program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Success,
    Error,
    Warning,
    Info,
}

impl Level {
    fn name(self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
        }
    }

    fn emoji(self) -> Emoji<'static, 'static> {
        match self {
            Level::Success => Emoji("✅ ", "✓ "),
            Level::Error => Emoji("❌ ", "✗ "),
            Level::Warning => Emoji("⚠️  ", "! "),
            Level::Info => Emoji("ℹ️  ", "i "),
        }
    }

    fn paint(self, message: &str) -> StyledObject<&str> {
        match self {
            Level::Success => style(message).green().bold(),
            Level::Error => style(message).red().bold(),
            Level::Warning => style(message).yellow().bold(),
            Level::Info => style(message).cyan(),
        }
    }

    /// Outcome messages survive `--quiet`; chatter does not.
    fn is_outcome(self) -> bool {
        matches!(self, Level::Success | Level::Error)
    }
}

/// Writes everything the terminal front-end shows: status messages, tool
/// output, errors and the final run report.
///
/// JSON mode writes one object per line on stdout. Human and Plain modes send
/// errors to stderr and everything else to stdout.
pub struct OutputFormatter {
    mode: OutputMode,
    use_colors: bool,
    verbose_level: u8,
    quiet: bool,
}

impl OutputFormatter {
    pub fn new(mode: OutputMode, verbose: u8, quiet: bool) -> Self {
        let use_colors = mode == OutputMode::Human
            && !quiet
            && Term::stdout().features().colors_supported();

        Self {
            mode,
            use_colors,
            verbose_level: if quiet { 0 } else { verbose },
            quiet,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn success(&self, message: &str) {
        self.emit(Level::Success, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message);
    }

    pub fn warning(&self, message: &str) {
        self.emit(Level::Warning, message);
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    /// Render one run event as it arrives.
    ///
    /// Tool output is shown even with `--quiet`, since device listings are
    /// the point of the run. `Failed` is never rendered here: the error that
    /// ends the run is reported once, by [`Self::print_user_friendly_error`].
    pub fn print_event(&self, event: &RunEvent) {
        if self.mode == OutputMode::Json {
            if let Some(value) = event_json(event) {
                self.print_json_object(&value);
            }
            return;
        }

        match event {
            RunEvent::Log { line } => println!("{}", line),
            RunEvent::Completed { summary } => self.success(summary),
            // Progress is drawn by the bar
            RunEvent::Progress { .. } | RunEvent::Failed { .. } => {}
        }
    }

    pub fn print_user_friendly_error(&self, error: &LogicalBackupError) {
        self.error(&error.user_message());

        if let LogicalBackupError::ToolExecutionFailure { diagnostic, .. } = error {
            if self.mode != OutputMode::Json && self.should_show_message(1) {
                for line in diagnostic {
                    eprintln!("    {}", line);
                }
            }
        }

        let Some(suggestion) = error.suggestion() else {
            return;
        };
        match self.mode {
            OutputMode::Json => self.print_json_object(&json!({
                "type": "suggestion",
                "message": suggestion,
            })),
            OutputMode::Human if self.use_colors => {
                eprintln!();
                eprintln!("{}{}", LIGHTBULB, style(format!("Suggestion: {}", suggestion)).cyan());
            }
            OutputMode::Human => {
                eprintln!();
                eprintln!("Suggestion: {}", suggestion);
            }
            OutputMode::Plain => eprintln!("SUGGESTION: {}", suggestion),
        }
    }

    /// Final report for a run, successful or not.
    pub fn print_run_report(&self, report: &RunReport) {
        match self.mode {
            OutputMode::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputMode::Human => self.print_human_report(report),
            OutputMode::Plain if !self.quiet => {
                println!("REPORT:");
                for line in report.display_summary().lines() {
                    println!("  {}", line);
                }
                println!("  Duration: {}", format_duration(report.duration));
            }
            OutputMode::Plain => {}
        }
    }

    pub fn print_separator(&self) {
        if self.quiet || self.mode == OutputMode::Json {
            return;
        }
        if self.use_colors {
            println!("{}", style("─".repeat(60)).dim());
        } else {
            println!("{}", "-".repeat(60));
        }
    }

    fn should_show_message(&self, min_verbose_level: u8) -> bool {
        !self.quiet && self.verbose_level >= min_verbose_level
    }

    fn emit(&self, level: Level, message: &str) {
        if !level.is_outcome() && !self.should_show_message(0) {
            return;
        }

        if self.mode == OutputMode::Json {
            self.print_json_object(&json!({
                "type": "message",
                "level": level.name(),
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }));
            return;
        }

        let text = match self.mode {
            OutputMode::Human if self.use_colors => {
                format!("{}{}", level.emoji(), level.paint(message))
            }
            OutputMode::Human => format!("{}{}", level.emoji().1, message),
            _ => format!("{}: {}", level.name().to_uppercase(), message),
        };

        if level == Level::Error {
            eprintln!("{}", text);
        } else {
            println!("{}", text);
        }
    }

    fn print_json_object(&self, obj: &Value) {
        println!(
            "{}",
            serde_json::to_string(obj).unwrap_or_else(|_| "{}".to_string())
        );
    }

    fn print_human_report(&self, report: &RunReport) {
        if !self.should_show_message(1) {
            return;
        }

        println!();
        if self.use_colors {
            println!("{} {}", SPARKLES, style("Run Report").bold().cyan());
        } else {
            println!("=== Run Report ===");
        }
        println!();

        let outcome = match report.outcome {
            RunOutcome::Succeeded => "succeeded".to_string(),
            RunOutcome::Failed { kind } => format!("failed ({:?})", kind),
        };
        println!("Outcome:    {}", outcome);
        println!("Command:    {}", report.command);
        if let Some(code) = report.exit_code {
            println!("Exit code:  {}", code);
        }
        if let Some(ref destination) = report.destination {
            println!("Saved to:   {}", destination.display());
        }
        println!(
            "Started at: {}",
            report.started_at.format("%Y-%m-%d %H:%M UTC")
        );
        println!("Duration:   {}", format_duration(report.duration));
        println!("Lines:      {}", report.lines_relayed);
        if let Some(progress) = report.last_progress {
            println!("Progress:   {}", progress);
        }
    }
}

/// JSON line for an event, or `None` for events reported elsewhere.
fn event_json(event: &RunEvent) -> Option<Value> {
    match event {
        RunEvent::Failed { .. } => None,
        _ => serde_json::to_value(event).ok(),
    }
}
