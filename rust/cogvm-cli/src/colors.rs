//! Terminal styling for CLI output.
//!
//! Escapes are only emitted when stdout is a terminal and `NO_COLOR` is
//! unset, so piped output stays plain.

use cogvm_vm::ExecutionStatus;
use std::io::IsTerminal;
use std::sync::OnceLock;

fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
    })
}

fn paint(code: &str, s: &str, on: bool) -> String {
    if on {
        format!("\x1b[{}m{}\x1b[0m", code, s)
    } else {
        s.to_string()
    }
}

pub fn green(s: &str) -> String {
    paint("32", s, enabled())
}

pub fn red(s: &str) -> String {
    paint("31", s, enabled())
}

pub fn yellow(s: &str) -> String {
    paint("33", s, enabled())
}

pub fn cyan(s: &str) -> String {
    paint("36", s, enabled())
}

pub fn gray(s: &str) -> String {
    paint("90", s, enabled())
}

/// Bold label padded to the width of the widest verb, cargo style.
pub fn status_label(label: &str) -> String {
    paint("1;32", &format!("{:>12}", label), enabled())
}

/// An execution status colored by where it stands: finished runs green,
/// failures red, runs waiting on an answer cyan.
pub fn execution_status(status: ExecutionStatus) -> String {
    let code = match status {
        ExecutionStatus::Completed => "32",
        ExecutionStatus::Failed => "31",
        ExecutionStatus::AwaitingInput => "36",
        ExecutionStatus::Ready | ExecutionStatus::Running => "90",
    };
    paint(code, &status.to_string(), enabled())
}
