//! Shared session access
//!
//! The instrument answers strictly in order, so several callers may only use
//! one session by taking turns on whole operations. [`SharedSession`] holds
//! the lock for the full closure; a holder that panics leaves the session
//! poisoned and it comes back `ParameterUnknown`.

use std::sync::{Arc, Mutex};

use super::session::Session;

/// A session that can be cloned across threads
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
}

impl SharedSession {
    /// Take ownership of a session
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `op` with exclusive access to the session.
    ///
    /// If a previous holder panicked mid-exchange the wire state is unknown,
    /// so the session is marked desynchronized before `op` sees it.
    pub fn with<T>(&self, op: impl FnOnce(&mut Session) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                self.inner.clear_poison();
                let mut guard = poisoned.into_inner();
                guard.mark_desync('?', &"previous holder panicked");
                guard
            }
        };
        op(&mut guard)
    }
}

impl From<Session> for SharedSession {
    fn from(session: Session) -> Self {
        Self::new(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Model, SessionState, SimulatedMdaq};

    #[test]
    fn test_poisoned_lock_marks_desync() {
        let sim = SimulatedMdaq::new(Model::Mdaq107, 3);
        let shared = SharedSession::new(Session::with_link(Box::new(sim), Model::Mdaq107));
        shared.with(|s| s.reset()).unwrap();
        assert_eq!(shared.with(|s| s.state()), SessionState::Ready);

        let clone = shared.clone();
        let joined = std::thread::spawn(move || {
            clone.with(|_| panic!("holder died mid-exchange"));
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(shared.with(|s| s.state()), SessionState::ParameterUnknown);
        shared.with(|s| s.reset()).unwrap();
        assert_eq!(shared.with(|s| s.state()), SessionState::Ready);
    }
}
