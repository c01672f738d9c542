use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    AwaitingReply,
}

/// Single-flight turn control: one outbound user message may wait for its
/// assistant reply at a time. Memory only; a fresh gate is always idle.
#[derive(Debug)]
pub struct SendGate {
    state: GateState,
    /// Pending temp id of the send that latched the gate.
    turn: Option<String>,
}

impl Default for SendGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SendGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Idle,
            turn: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == GateState::Idle
    }

    /// Accept `text` if the gate is idle and the text is not blank. On
    /// acceptance the gate latches and the trimmed text is returned; a
    /// rejection has no side effect.
    pub fn try_enter<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.state == GateState::AwaitingReply {
            return None;
        }
        self.state = GateState::AwaitingReply;
        self.turn = None;
        Some(trimmed)
    }

    /// Record which send holds the latch. Ignored when idle.
    pub fn assign_turn(&mut self, turn: &str) {
        if self.state == GateState::AwaitingReply {
            self.turn = Some(turn.to_string());
        }
    }

    /// Returns `true` if the gate was latched.
    pub fn release(&mut self) -> bool {
        let was_latched = self.state == GateState::AwaitingReply;
        self.state = GateState::Idle;
        self.turn = None;
        was_latched
    }

    /// Release only if `turn` is the send holding the latch. A late result
    /// from an earlier turn leaves a newer turn latched.
    pub fn release_turn(&mut self, turn: &str) -> bool {
        if self.turn.as_deref() == Some(turn) {
            self.release()
        } else {
            false
        }
    }
}
