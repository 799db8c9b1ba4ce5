//! Pending ICE candidate queue
//!
//! Candidates gathered before the server has issued a session id are held
//! here in generation order. Setting the session id hands them back exactly
//! once; later candidates pass straight through.

use crate::api::IceCandidateInit;

#[derive(Debug, Default)]
pub struct IceTrickle {
    session_id: Option<String>,
    pending: Vec<IceCandidateInit>,
}

impl IceTrickle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `candidate`, or return it with the session id if it can be sent now
    pub fn push(&mut self, candidate: IceCandidateInit) -> Option<(String, IceCandidateInit)> {
        match &self.session_id {
            Some(id) => Some((id.clone(), candidate)),
            None => {
                self.pending.push(candidate);
                None
            }
        }
    }

    /// Record the session id and drain the queue
    ///
    /// Only the first call drains; later calls return nothing and keep the
    /// original id.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) -> Vec<IceCandidateInit> {
        if self.session_id.is_some() {
            return Vec::new();
        }
        self.session_id = Some(session_id.into());
        std::mem::take(&mut self.pending)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop queued candidates and forget the session
    pub fn clear(&mut self) {
        self.pending.clear();
        self.session_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidateInit {
        IceCandidateInit::new(format!("candidate:{}", n), Some("0"), Some(0))
    }

    #[test]
    fn test_queues_until_session_id() {
        let mut trickle = IceTrickle::new();
        assert!(trickle.push(candidate(1)).is_none());
        assert!(trickle.push(candidate(2)).is_none());
        assert_eq!(trickle.pending_len(), 2);

        let flushed = trickle.set_session_id("s1");
        assert_eq!(flushed, vec![candidate(1), candidate(2)]);
        assert_eq!(trickle.pending_len(), 0);
    }

    #[test]
    fn test_flushes_only_once() {
        let mut trickle = IceTrickle::new();
        trickle.push(candidate(1));
        assert_eq!(trickle.set_session_id("s1").len(), 1);
        assert!(trickle.set_session_id("s2").is_empty());
        assert_eq!(trickle.session_id(), Some("s1"));
    }

    #[test]
    fn test_later_candidates_pass_through() {
        let mut trickle = IceTrickle::new();
        trickle.set_session_id("s1");
        let (id, c) = trickle.push(candidate(3)).unwrap();
        assert_eq!(id, "s1");
        assert_eq!(c, candidate(3));
        assert_eq!(trickle.pending_len(), 0);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut trickle = IceTrickle::new();
        trickle.push(candidate(1));
        trickle.clear();
        assert!(trickle.set_session_id("s1").is_empty());
    }
}
