//! Client lifecycle state machine.
//!
//! Transitions:
//! - Active ↔ Paused (coordinator driven)
//! - Active/Paused → Deregistering (terminal)
//!
//! The state is an atomic read by every loop on each iteration. Every applied
//! transition is also published on a watch channel so async tasks can wait for
//! it instead of polling.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Serving and reporting health
    Active = 0,
    /// Coordinator stopped sending new traffic, VIP still attached
    Paused = 1,
    /// Leaving the coordinator, nothing restarts from here
    Deregistering = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Active,
            1 => LifecycleState::Paused,
            _ => LifecycleState::Deregistering,
        }
    }

    /// Whether loops gated on this state should keep running.
    pub fn is_running(self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Paused)
    }

    /// Whether `self → to` is in the transition table.
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Active, Paused) | (Paused, Active) | (Active, Deregistering) | (Paused, Deregistering)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Active => write!(f, "ACTIVE"),
            LifecycleState::Paused => write!(f, "PAUSED"),
            LifecycleState::Deregistering => write!(f, "DEREGISTERING"),
        }
    }
}

/// Shared lifecycle state
pub struct Lifecycle {
    state: AtomicU8,
    notify: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    /// Create a lifecycle in the Active state.
    pub fn new() -> Self {
        let (notify, _) = watch::channel(LifecycleState::Active);
        Self {
            state: AtomicU8::new(LifecycleState::Active as u8),
            notify,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether loops should keep running
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Subscribe to applied transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.notify.subscribe()
    }

    /// Attempt a transition.
    ///
    /// Returns true if the transition was applied. Transitions outside the table,
    /// including self-transitions, leave the state untouched.
    pub fn transition(&self, to: LifecycleState) -> bool {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                LifecycleState::from_u8(current)
                    .can_transition_to(to)
                    .then_some(to as u8)
            });

        match result {
            Ok(previous) => {
                let from = LifecycleState::from_u8(previous);
                info!(from = %from, to = %to, "Lifecycle transition");
                // Publish the atomic's value, not `to`: a racing transition into
                // Deregistering must never be overwritten by a stale send.
                self.notify.send_replace(self.state());
                true
            }
            Err(current) => {
                debug!(
                    current = %LifecycleState::from_u8(current),
                    requested = %to,
                    "Ignoring transition outside the lifecycle table"
                );
                false
            }
        }
    }

    /// Move into Deregistering.
    ///
    /// Returns true only for the caller that performed the transition.
    pub fn begin_deregister(&self) -> bool {
        self.transition(LifecycleState::Deregistering)
    }

    /// Wait until the state leaves {Active, Paused}.
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| !state.is_running()).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use LifecycleState::*;

    #[test]
    fn test_transition_table() {
        let all = [Active, Paused, Deregistering];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Active, Paused)
                        | (Paused, Active)
                        | (Active, Deregistering)
                        | (Paused, Deregistering)
                );
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_pause_resume() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), Active);

        assert!(lifecycle.transition(Paused));
        assert_eq!(lifecycle.state(), Paused);
        assert!(lifecycle.is_running());

        // Paused -> Paused is not in the table
        assert!(!lifecycle.transition(Paused));

        assert!(lifecycle.transition(Active));
        assert_eq!(lifecycle.state(), Active);
    }

    #[test]
    fn test_deregistering_is_terminal() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_deregister());
        assert!(!lifecycle.is_running());

        assert!(!lifecycle.transition(Active));
        assert!(!lifecycle.transition(Paused));
        assert!(!lifecycle.begin_deregister());
        assert_eq!(lifecycle.state(), Deregistering);
    }

    #[test]
    fn test_single_deregister_winner() {
        let lifecycle = Arc::new(Lifecycle::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                std::thread::spawn(move || lifecycle.begin_deregister())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let rx = lifecycle.subscribe();
        assert_eq!(*rx.borrow(), Active);

        lifecycle.transition(Paused);
        assert_eq!(*rx.borrow(), Paused);

        lifecycle.begin_deregister();
        assert_eq!(*rx.borrow(), Deregistering);
    }

    #[tokio::test]
    async fn test_stopped_resolves_on_deregister() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.stopped().await })
        };

        lifecycle.transition(Paused);
        assert!(!waiter.is_finished());

        lifecycle.begin_deregister();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stopped() should resolve")
            .unwrap();
    }
}
