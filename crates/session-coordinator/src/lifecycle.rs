//! Application lifecycle transitions

use std::fmt;
use std::str::FromStr;

use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle state the host application moved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppLifecycleState {
    /// Visible and receiving input; the only state the coordinator acts on
    Resumed,
    Inactive,
    Paused,
    Detached,
}

impl AppLifecycleState {
    pub fn label(&self) -> &'static str {
        match self {
            AppLifecycleState::Resumed => "resumed",
            AppLifecycleState::Inactive => "inactive",
            AppLifecycleState::Paused => "paused",
            AppLifecycleState::Detached => "detached",
        }
    }
}

impl fmt::Display for AppLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AppLifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resumed" => Ok(AppLifecycleState::Resumed),
            "inactive" => Ok(AppLifecycleState::Inactive),
            "paused" => Ok(AppLifecycleState::Paused),
            "detached" => Ok(AppLifecycleState::Detached),
            other => Err(format!("unknown lifecycle state: {other}")),
        }
    }
}

/// Host environment that reports lifecycle transitions.
///
/// Each call to `observe` registers a new observer; dropping the receiver
/// removes it.
pub trait LifecycleHost: Send + Sync {
    fn observe(&self) -> broadcast::Receiver<AppLifecycleState>;
}

/// In-process lifecycle host. The application calls `notify` on every
/// transition.
#[derive(Clone)]
pub struct LifecycleHub {
    tx: broadcast::Sender<AppLifecycleState>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Report a transition. Returns how many observers received it.
    pub fn notify(&self, state: AppLifecycleState) -> usize {
        let delivered = self.tx.send(state).unwrap_or(0);
        debug!(state = state.label(), observers = delivered, "lifecycle transition");
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LifecycleHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleHost for LifecycleHub {
    fn observe(&self) -> broadcast::Receiver<AppLifecycleState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_parse_case_insensitively() {
        assert_eq!("resumed".parse::<AppLifecycleState>(), Ok(AppLifecycleState::Resumed));
        assert_eq!("Paused".parse::<AppLifecycleState>(), Ok(AppLifecycleState::Paused));
        assert!("foreground".parse::<AppLifecycleState>().is_err());
    }

    #[tokio::test]
    async fn observers_receive_transitions() {
        let hub = LifecycleHub::new();
        assert_eq!(hub.notify(AppLifecycleState::Paused), 0);

        let mut rx = hub.observe();
        assert_eq!(hub.observer_count(), 1);
        assert_eq!(hub.notify(AppLifecycleState::Resumed), 1);
        assert_eq!(rx.recv().await.unwrap(), AppLifecycleState::Resumed);

        drop(rx);
        assert_eq!(hub.observer_count(), 0);
    }
}
