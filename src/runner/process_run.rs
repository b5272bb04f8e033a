use crate::error::{LogicalBackupError, Result};
use crate::runner::invocation::Invocation;
use crate::runner::lines::OutputLines;
use std::io::{self, PipeReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle for terminating a run from another thread.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    requested: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and kill the child if one is running.
    /// Returns `true` when a live process was signalled.
    pub fn cancel(&self) -> Result<bool> {
        self.inner.requested.store(true, Ordering::SeqCst);

        let mut slot = self.lock_child()?;
        match slot.as_mut() {
            Some(child) => match child.kill() {
                Ok(()) => {
                    log::info!("Killed external tool (pid {})", child.id());
                    Ok(true)
                }
                // Already exited
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(false),
                Err(e) => Err(LogicalBackupError::Io(e)),
            },
            None => Ok(false),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    fn lock_child(&self) -> Result<MutexGuard<'_, Option<Child>>> {
        self.inner
            .child
            .lock()
            .map_err(|_| LogicalBackupError::unexpected("cancellation", "child handle lock poisoned"))
    }
}

/// One external-process invocation with its merged stdout/stderr stream.
pub struct ProcessRun {
    invocation: Invocation,
    output: Option<PipeReader>,
    cancel: CancelToken,
    pid: u32,
}

impl ProcessRun {
    pub fn spawn(invocation: &Invocation, cancel: &CancelToken) -> Result<Self> {
        let (reader, writer) = io::pipe()?;

        // The Command holds our copies of the write end; it has to be gone
        // before reading or the pipe never reports EOF.
        let spawned = {
            let mut command = Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .env("PYTHONUNBUFFERED", "1")
                .stdin(Stdio::null())
                .stdout(writer.try_clone()?)
                .stderr(writer);
            command.spawn()
        };

        let mut child = spawned.map_err(|e| spawn_error(e, &invocation.program))?;
        let pid = child.id();
        log::debug!("Spawned `{}` as pid {}", invocation, pid);

        // Checked under the lock: cancel() raises the flag before locking, so
        // a request either sees the stored child or is seen here.
        let mut slot = cancel.lock_child()?;
        if cancel.is_cancelled() {
            let _ = child.kill();
        }
        *slot = Some(child);
        drop(slot);

        Ok(Self {
            invocation: invocation.clone(),
            output: Some(reader),
            cancel: cancel.clone(),
            pid,
        })
    }

    /// Take the merged output stream. Subsequent calls return `None`.
    pub fn take_output(&mut self) -> Option<OutputLines<PipeReader>> {
        self.output.take().map(OutputLines::new)
    }

    /// Wait for the process to exit. Call after the output is drained.
    ///
    /// The child stays in the cancel token until it is reaped, so a cancel
    /// arriving while the tool lingers after closing its output still kills it.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.output.take();

        loop {
            {
                let mut slot = self.cancel.lock_child()?;
                let child = slot.as_mut().ok_or_else(|| {
                    LogicalBackupError::unexpected(
                        self.invocation.program.clone(),
                        "child handle missing",
                    )
                })?;
                if let Some(status) = child.try_wait()? {
                    slot.take();
                    log::debug!("pid {} exited with {}", self.pid, status);
                    return Ok(status);
                }
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }
}

fn spawn_error(error: io::Error, program: &str) -> LogicalBackupError {
    match error.kind() {
        io::ErrorKind::NotFound => LogicalBackupError::ToolNotFound {
            program: program.to_string(),
        },
        _ => LogicalBackupError::unexpected(program, format!("failed to start: {}", error)),
    }
}
