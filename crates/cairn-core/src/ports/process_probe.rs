//! ProcessProbe port - "is the process that owned this job still alive?"

/// Used by start-up reconciliation to decide whether a `running` job can
/// still be reattached (it never is) or must be marked `unknown`.
pub trait ProcessProbe: Send + Sync {
    fn current_pid(&self) -> u32;

    fn is_alive(&self, pid: u32) -> bool;
}
