/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the service is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}
