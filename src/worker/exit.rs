//! Exit-cause analysis for worker processes.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Why a worker process went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
    /// The supervisor could not determine the outcome.
    Unknown,
}

impl ExitCause {
    /// A zero exit status.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Human-readable description, with a hint for the usual suspects.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(Signal::SIGKILL) => "killed by SIGKILL (forced or OOM killer)".into(),
            Self::Signaled(Signal::SIGSEGV) => "killed by SIGSEGV (segfault or stack overflow)".into(),
            Self::Signaled(Signal::SIGBUS) => "killed by SIGBUS".into(),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Unknown => "unknown reason".into(),
        }
    }
}

impl std::fmt::Display for ExitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Map a `WaitStatus` from `waitpid` to an exit cause.
pub fn analyze_wait_status(status: WaitStatus) -> ExitCause {
    match status {
        WaitStatus::Exited(_, code) => ExitCause::Exited(code),
        WaitStatus::Signaled(_, signal, _) => ExitCause::Signaled(signal),
        _ => ExitCause::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_analyze_exit() {
        let status = WaitStatus::Exited(Pid::from_raw(100), 3);
        let cause = analyze_wait_status(status);
        assert_eq!(cause, ExitCause::Exited(3));
        assert!(!cause.is_clean());
    }

    #[test]
    fn test_analyze_signal() {
        let status = WaitStatus::Signaled(Pid::from_raw(100), Signal::SIGKILL, false);
        let cause = analyze_wait_status(status);
        assert_eq!(cause, ExitCause::Signaled(Signal::SIGKILL));
        assert!(cause.to_string().contains("SIGKILL"));
    }

    #[test]
    fn test_non_terminal_status_is_unknown() {
        assert_eq!(analyze_wait_status(WaitStatus::StillAlive), ExitCause::Unknown);
    }

    #[test]
    fn test_clean_exit() {
        assert!(ExitCause::Exited(0).is_clean());
        assert!(!ExitCause::Signaled(Signal::SIGTERM).is_clean());
        assert!(!ExitCause::Unknown.is_clean());
    }
}
