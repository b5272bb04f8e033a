use crate::error::{LogicalBackupError, UserFriendlyError};
use crate::relay::ansi::strip_ansi_escape_codes;
use crate::relay::progress_parser::{PercentProgressParser, ProgressEstimate, ProgressParser};
use serde::Serialize;
use std::sync::Arc;

/// Notification delivered to the presentation layer, in output order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Log { line: String },
    Progress { percent: ProgressEstimate },
    Completed { summary: String },
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    ToolNotFound,
    ToolExecution,
    Cancelled,
    Unexpected,
}

impl From<&LogicalBackupError> for FailureKind {
    fn from(error: &LogicalBackupError) -> Self {
        match error {
            LogicalBackupError::Configuration { .. } => FailureKind::Configuration,
            LogicalBackupError::ToolNotFound { .. } => FailureKind::ToolNotFound,
            LogicalBackupError::ToolExecutionFailure { .. } => FailureKind::ToolExecution,
            LogicalBackupError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Unexpected,
        }
    }
}

/// Receiver of [`RunEvent`]s. Events for one run are delivered sequentially
/// from the run's background thread.
pub trait RunListener: Send + Sync + 'static {
    fn on_event(&self, event: RunEvent);
}

impl<F> RunListener for F
where
    F: Fn(RunEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: RunEvent) {
        self(event)
    }
}

impl RunListener for tokio::sync::mpsc::UnboundedSender<RunEvent> {
    fn on_event(&self, event: RunEvent) {
        // Receiver gone means the front-end stopped listening; the run still finishes.
        let _ = self.send(event);
    }
}

impl RunListener for std::sync::mpsc::Sender<RunEvent> {
    fn on_event(&self, event: RunEvent) {
        let _ = self.send(event);
    }
}

pub struct OutputRelay {
    listener: Arc<dyn RunListener>,
    parser: Option<Arc<dyn ProgressParser>>,
    last_progress: Option<ProgressEstimate>,
    lines_relayed: usize,
    finished: bool,
}

impl OutputRelay {
    pub fn new(listener: Arc<dyn RunListener>) -> Self {
        Self {
            listener,
            parser: Some(Arc::new(PercentProgressParser::new())),
            last_progress: None,
            lines_relayed: 0,
            finished: false,
        }
    }

    /// Replace the parser with a shared one; `None` disables progress scraping.
    pub fn with_shared_parser(mut self, parser: Option<Arc<dyn ProgressParser>>) -> Self {
        self.parser = parser;
        self
    }

    /// Status message produced by this program rather than the tool.
    pub fn log<S: Into<String>>(&mut self, message: S) {
        self.listener.on_event(RunEvent::Log {
            line: message.into(),
        });
    }

    /// Forward one line of tool output, then any progress value it carries.
    pub fn relay_line(&mut self, raw: &str) {
        let line = strip_ansi_escape_codes(raw).into_owned();
        let progress = self.parser.as_ref().and_then(|parser| parser.parse(&line));

        self.lines_relayed += 1;
        self.listener.on_event(RunEvent::Log { line });

        if let Some(progress) = progress {
            if self.last_progress != Some(progress) {
                self.last_progress = Some(progress);
                self.listener.on_event(RunEvent::Progress { percent: progress });
            }
        }
    }

    /// Emit the completion notice. Returns `false` if the run already ended.
    pub fn complete<S: Into<String>>(&mut self, summary: S) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.listener.on_event(RunEvent::Completed {
            summary: summary.into(),
        });
        true
    }

    /// Emit the failure notice. Returns `false` if the run already ended.
    pub fn fail(&mut self, error: &LogicalBackupError) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.listener.on_event(RunEvent::Failed {
            kind: FailureKind::from(error),
            message: error.user_message(),
        });
        true
    }

    pub fn lines_relayed(&self) -> usize {
        self.lines_relayed
    }

    pub fn last_progress(&self) -> Option<ProgressEstimate> {
        self.last_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn relay() -> (OutputRelay, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel();
        (OutputRelay::new(Arc::new(tx)), rx)
    }

    #[test]
    fn test_relay_strips_escape_codes() {
        let (mut relay, rx) = relay();
        relay.relay_line("\x1b[33mWARNING\x1b[0m  device locked ");

        assert_eq!(
            rx.try_recv().unwrap(),
            RunEvent::Log {
                line: "WARNING  device locked ".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_emits_progress_after_line() {
        let (mut relay, rx) = relay();
        relay.relay_line("  42%|####      | 42.0/100.0 [00:10<00:14]");

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RunEvent::Log { .. }));
        assert_eq!(
            events[1],
            RunEvent::Progress {
                percent: ProgressEstimate::new(42).unwrap()
            }
        );
        assert_eq!(relay.last_progress().map(|p| p.percent()), Some(42));
    }

    #[test]
    fn test_repeated_progress_is_not_re_emitted() {
        let (mut relay, rx) = relay();
        relay.relay_line(" 10%|#         | 10/100");
        relay.relay_line(" 10%|#         | 10/100");
        relay.relay_line(" 11%|#         | 11/100");

        let progress: Vec<u8> = rx
            .try_iter()
            .filter_map(|event| match event {
                RunEvent::Progress { percent } => Some(percent.percent()),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![10, 11]);
        assert_eq!(relay.lines_relayed(), 3);
    }

    #[test]
    fn test_without_progress_only_logs() {
        let (relay, rx) = relay();
        let mut relay = relay.with_shared_parser(None);
        relay.relay_line("50% done");

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(relay.last_progress().is_none());
    }

    #[test]
    fn test_single_terminal_notification() {
        let (mut relay, rx) = relay();
        assert!(relay.complete("Backup completed and saved to /tmp/b."));
        assert!(!relay.complete("again"));
        assert!(!relay.fail(&LogicalBackupError::Cancelled));

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![RunEvent::Completed {
                summary: "Backup completed and saved to /tmp/b.".to_string()
            }]
        );
    }

    #[test]
    fn test_failure_kind_is_distinguishable() {
        let (mut relay, rx) = relay();
        relay.fail(&LogicalBackupError::ToolNotFound {
            program: "pymobiledevice3".to_string(),
        });

        match rx.try_recv().unwrap() {
            RunEvent::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::ToolNotFound);
                assert!(message.contains("pymobiledevice3"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut relay = OutputRelay::new(Arc::new(move |event: RunEvent| {
            sink.lock().unwrap().push(event);
        }));

        relay.log("Listing connected devices...");
        relay.relay_line("[]");

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let event = RunEvent::Progress {
            percent: ProgressEstimate::new(7).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 7);
    }
}
