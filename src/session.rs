//! Per-call session: identity, conversation history, and the agent state
//! machine. Guarded by a `parking_lot::Mutex` that is never held across an
//! `.await` — collaborator calls always happen outside the lock, against a
//! snapshot returned by `get_context`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const MAX_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

struct Inner {
    conversation_history: Vec<Turn>,
    agent_state: AgentState,
}

pub struct Session {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub start_time: Instant,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(call_id: String, from_number: String, to_number: String) -> Self {
        Self {
            call_id,
            from_number,
            to_number,
            start_time: Instant::now(),
            inner: Mutex::new(Inner {
                conversation_history: Vec::new(),
                agent_state: AgentState::Listening,
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn agent_state(&self) -> AgentState {
        self.inner.lock().agent_state
    }

    /// Idempotent: setting to the current state is a no-op.
    pub fn set_state(&self, state: AgentState) {
        let mut inner = self.inner.lock();
        if inner.agent_state != state {
            inner.agent_state = state;
        }
    }

    /// Appends a user turn and its assistant reply, truncating history to
    /// the most recent `MAX_HISTORY_LEN` entries.
    pub fn add_exchange(&self, user_input: &str, agent_response: &str) {
        let mut inner = self.inner.lock();
        inner.conversation_history.push(Turn {
            role: Role::User,
            content: user_input.to_string(),
        });
        inner.conversation_history.push(Turn {
            role: Role::Assistant,
            content: agent_response.to_string(),
        });
        let len = inner.conversation_history.len();
        if len > MAX_HISTORY_LEN {
            inner.conversation_history.drain(0..len - MAX_HISTORY_LEN);
        }
    }

    /// Snapshot copy of the conversation history, safe to hold across awaits.
    pub fn get_context(&self) -> Vec<Turn> {
        self.inner.lock().conversation_history.clone()
    }

    pub fn should_end(&self, max_call_duration_s: u64) -> bool {
        self.duration() >= Duration::from_secs(max_call_duration_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("CA123".into(), "+15551234567".into(), "+15557654321".into())
    }

    #[test]
    fn starts_listening_with_empty_history() {
        let s = session();
        assert_eq!(s.agent_state(), AgentState::Listening);
        assert!(s.get_context().is_empty());
    }

    #[test]
    fn history_caps_at_ten_entries() {
        let s = session();
        for i in 0..8 {
            s.add_exchange(&format!("u{i}"), &format!("a{i}"));
        }
        assert_eq!(s.get_context().len(), 10);
        let ctx = s.get_context();
        // Oldest two turns (u0/a0) should have been dropped.
        assert_eq!(ctx.first().unwrap().content, "u1");
    }

    #[test]
    fn set_state_is_idempotent() {
        let s = session();
        s.set_state(AgentState::Listening);
        assert_eq!(s.agent_state(), AgentState::Listening);
        s.set_state(AgentState::Speaking);
        assert_eq!(s.agent_state(), AgentState::Speaking);
        s.set_state(AgentState::Speaking);
        assert_eq!(s.agent_state(), AgentState::Speaking);
    }

    #[test]
    fn should_end_once_max_duration_elapsed() {
        let s = session();
        assert!(!s.should_end(600));
        assert!(s.should_end(0));
    }
}
