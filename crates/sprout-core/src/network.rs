//! Device connectivity monitor
//!
//! The platform's connectivity API pushes reports into [`NetworkMonitor`];
//! consumers observe them as a stream that starts with the current value.
//! Identical consecutive reports are passed through as-is.

use tracing::info;

use crate::models::ConnectivityState;
use crate::subscription::{Broadcaster, Subscription};

/// Latest known connectivity plus its observers
#[derive(Clone)]
pub struct NetworkMonitor {
    states: Broadcaster<ConnectivityState>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::default())
    }
}

impl NetworkMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        Self {
            states: Broadcaster::new(initial),
        }
    }

    /// Best currently known state
    pub fn current(&self) -> ConnectivityState {
        self.states.latest()
    }

    /// Record a state reported by the platform
    pub fn report(&self, state: ConnectivityState) {
        info!(
            "Network state changed: connected={}, type={}",
            state.is_connected, state.connection_type
        );
        self.states.emit(state);
    }

    /// Stream of states, starting with the current one
    pub fn observe(&self) -> Subscription<ConnectivityState> {
        self.states.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionType;

    #[tokio::test]
    async fn test_observe_emits_current_then_reports() {
        let monitor = NetworkMonitor::default();
        let mut states = monitor.observe();
        assert_eq!(states.recv().await, Some(ConnectivityState::default()));

        monitor.report(ConnectivityState::offline());
        assert_eq!(states.recv().await, Some(ConnectivityState::offline()));
        assert!(!monitor.current().is_connected);
    }

    #[tokio::test]
    async fn test_duplicates_are_delivered() {
        let monitor = NetworkMonitor::new(ConnectivityState::online(ConnectionType::Wifi));
        let mut states = monitor.observe();
        states.recv().await;

        let wifi = ConnectivityState::online(ConnectionType::Wifi);
        monitor.report(wifi);
        monitor.report(wifi);
        assert_eq!(states.try_recv(), Some(wifi));
        assert_eq!(states.try_recv(), Some(wifi));
    }

    #[test]
    fn test_unsubscribed_observer_gets_nothing() {
        let monitor = NetworkMonitor::default();
        let mut states = monitor.observe();
        states.unsubscribe();

        monitor.report(ConnectivityState::offline());
        assert_eq!(states.try_recv(), None);
    }
}
