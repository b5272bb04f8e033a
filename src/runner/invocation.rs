use std::ffi::OsString;
use std::fmt;
use std::path::Path;

/// Program plus fixed argument list for one external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<A: Into<OsString>>(mut self, arg: A) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `<tool> backup2 backup --full <destination>`
    pub fn full_backup<S: Into<String>>(program: S, destination: &Path) -> Self {
        Self::new(program)
            .arg("backup2")
            .arg("backup")
            .arg("--full")
            .arg(destination.as_os_str())
    }

    /// `<tool> usbmux list`
    pub fn list_devices<S: Into<String>>(program: S) -> Self {
        Self::new(program).arg("usbmux").arg("list")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}
