//! Single-flight coordination for token refresh.
//!
//! At most one refresh call may be in flight at a time process-wide. The
//! contract is an explicit state transition (`idle -> pending -> idle`)
//! guarded by a mutex, with a `tokio::sync::broadcast` channel fanning the
//! settled outcome out to every waiter.
//!
//! The first caller to [`RefreshGate::begin`] while the gate is idle becomes
//! the *leader* and owns the actual refresh call. Everyone arriving while a
//! refresh is pending becomes a *follower* and suspends on the broadcast
//! receiver. Followers are released strictly after the leader settles; a
//! failed refresh fails all of them. A leader dropped before settling (its
//! request future was cancelled) resets the gate and releases followers
//! with [`RefreshError::Cancelled`], so no waiter is orphaned.

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::error::RefreshError;
use crate::session::ClientSession;

/// Settled result of a refresh, fanned out to all waiters.
pub type RefreshOutcome = Result<ClientSession, RefreshError>;

enum GateState {
    Idle,
    Pending(broadcast::Sender<RefreshOutcome>),
}

/// The gate. One per client; shared by every in-flight request.
pub struct RefreshGate {
    state: Mutex<GateState>,
}

/// Role assigned to a caller by [`RefreshGate::begin`].
pub enum Flight<'a> {
    /// This caller must perform the refresh and settle it via
    /// [`FlightLeader::finish`].
    Leader(FlightLeader<'a>),
    /// A refresh is already pending; await its outcome on the receiver.
    Follower(broadcast::Receiver<RefreshOutcome>),
}

/// Leadership token for the single in-flight refresh.
pub struct FlightLeader<'a> {
    gate: &'a RefreshGate,
    sender: broadcast::Sender<RefreshOutcome>,
    finished: bool,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    /// Join the current refresh cycle, either as leader or follower.
    pub fn begin(&self) -> Flight<'_> {
        let mut state = self.state.lock().expect("gate lock poisoned");
        match &*state {
            GateState::Pending(sender) => Flight::Follower(sender.subscribe()),
            GateState::Idle => {
                // Capacity 1: exactly one message is ever sent per cycle.
                let (sender, _) = broadcast::channel(1);
                *state = GateState::Pending(sender.clone());
                Flight::Leader(FlightLeader {
                    gate: self,
                    sender,
                    finished: false,
                })
            }
        }
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightLeader<'_> {
    /// Settle the refresh: reset the gate to idle, then release all
    /// followers with the outcome.
    ///
    /// The reset happens before the send so that a request arriving between
    /// the two becomes a fresh leader instead of subscribing to a channel
    /// that has already delivered its one message.
    pub fn finish(mut self, outcome: RefreshOutcome) {
        self.finished = true;
        self.settle(outcome);
    }

    fn settle(&self, outcome: RefreshOutcome) {
        {
            let mut state = self.gate.state.lock().expect("gate lock poisoned");
            *state = GateState::Idle;
        }
        // SendError only means there were no followers.
        let _ = self.sender.send(outcome);
    }
}

impl Drop for FlightLeader<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // The leader's future was dropped mid-refresh. Release any
            // followers and reopen the gate.
            self.settle(Err(RefreshError::Cancelled));
        }
    }
}

/// Await the outcome of a pending refresh as a follower.
///
/// A closed channel (leader dropped without settling, which [`FlightLeader`]
/// already guards against) is reported as a cancellation.
pub async fn await_outcome(mut receiver: broadcast::Receiver<RefreshOutcome>) -> RefreshOutcome {
    match receiver.recv().await {
        Ok(outcome) => outcome,
        Err(_) => Err(RefreshError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn session(tag: &str) -> ClientSession {
        ClientSession {
            access_token: format!("access-{tag}"),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            email: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn test_first_caller_leads_second_follows() {
        let gate = RefreshGate::new();

        let leader = match gate.begin() {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first caller must lead"),
        };
        assert!(matches!(gate.begin(), Flight::Follower(_)));

        leader.finish(Ok(session("a")));

        // After settling, the gate is idle again.
        assert!(matches!(gate.begin(), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_followers_receive_leader_outcome() {
        let gate = RefreshGate::new();

        let leader = match gate.begin() {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first caller must lead"),
        };

        let rx_a = match gate.begin() {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second caller must follow"),
        };
        let rx_b = match gate.begin() {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("third caller must follow"),
        };

        leader.finish(Ok(session("fresh")));

        let out_a = await_outcome(rx_a).await.expect("follower a gets result");
        let out_b = await_outcome(rx_b).await.expect("follower b gets result");
        assert_eq!(out_a.access_token, "access-fresh");
        assert_eq!(out_b.access_token, "access-fresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_fails_all_followers() {
        let gate = RefreshGate::new();

        let leader = match gate.begin() {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first caller must lead"),
        };
        let rx = match gate.begin() {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second caller must follow"),
        };

        leader.finish(Err(RefreshError::Rejected { status: 401 }));

        assert_matches!(
            await_outcome(rx).await,
            Err(RefreshError::Rejected { status: 401 })
        );
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers_and_reopens_gate() {
        let gate = RefreshGate::new();

        let leader = match gate.begin() {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first caller must lead"),
        };
        let rx = match gate.begin() {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second caller must follow"),
        };

        drop(leader);

        assert_matches!(await_outcome(rx).await, Err(RefreshError::Cancelled));
        assert!(matches!(gate.begin(), Flight::Leader(_)));
    }
}
