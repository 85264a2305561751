//! Coordinator phase tracking and mutual exclusion.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Deploying,
    Upgrading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Deploying => "deploying",
            Self::Upgrading => "upgrading",
        };
        f.write_str(label)
    }
}

/// Snapshot published to everyone waiting on a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub phase: Phase,
    pub deploy_completed: bool,
    pub upgrade_completed: bool,
}

impl CoordinatorStatus {
    pub fn deploy_in_progress(&self) -> bool {
        self.phase == Phase::Deploying
    }

    pub fn upgrade_in_progress(&self) -> bool {
        self.phase == Phase::Upgrading
    }
}

/// Exclusive claim on a coordinator. Dropping it returns the phase to idle
/// and wakes every waiter, on success and on error alike.
#[derive(Debug)]
pub(crate) struct PhaseGuard<'a> {
    status: &'a watch::Sender<CoordinatorStatus>,
}

impl PhaseGuard<'_> {
    /// Record completion before the phase is released.
    pub(crate) fn finish(self, mark: impl FnOnce(&mut CoordinatorStatus)) {
        self.status.send_modify(mark);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.status.send_modify(|status| status.phase = Phase::Idle);
    }
}

/// Claim `phase` if the coordinator is idle.
///
/// Otherwise wait, without polling, until the running operation releases it
/// and return `None`; the caller then reports whatever state that run left.
pub(crate) async fn claim(
    status: &watch::Sender<CoordinatorStatus>,
    phase: Phase,
) -> Option<PhaseGuard<'_>> {
    let claimed = status.send_if_modified(|current| {
        if current.phase == Phase::Idle {
            current.phase = phase;
            true
        } else {
            false
        }
    });
    if claimed {
        return Some(PhaseGuard { status });
    }

    let mut rx = status.subscribe();
    tracing::debug!(waiting_for = %rx.borrow().phase, "Waiting for running operation");
    // The sender lives as long as `status`, so the channel cannot close here.
    let _ = rx.wait_for(|current| current.phase == Phase::Idle).await;
    None
}
