//! Command/status sequencing and the UI enablement derived from it.
//!
//! The protocol carries no correlation id between a command and the status frame that answers
//! it, so the machine treats the next status frame of any origin as the answer to every
//! outstanding command. An unrelated status therefore releases the lock early, and a lost status
//! keeps it held indefinitely. Both are known limitations and are surfaced through
//! [`CommandStateMachine::outstanding`] rather than hidden.

use shared::protocol::StatusSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Idle,
    AwaitingStatus,
}

/// What the UI layer may offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enablement {
    /// Advisory lock while a command is waiting for a status frame.
    pub locked: bool,
    /// The device is framing or engraving.
    pub disabled: bool,
    /// Device not connected, or `disabled`.
    pub total_disabled: bool,
}

#[derive(Debug, Clone)]
pub struct CommandStateMachine {
    phase: CommandPhase,
    outstanding: u32,
    status: StatusSnapshot,
}

impl Default for CommandStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandStateMachine {
    pub fn new() -> Self {
        Self {
            phase: CommandPhase::Idle,
            outstanding: 0,
            status: StatusSnapshot::default(),
        }
    }

    pub fn phase(&self) -> CommandPhase {
        self.phase
    }

    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// Commands sent since the last status frame. They all share the single lock.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn is_locked(&self) -> bool {
        self.phase == CommandPhase::AwaitingStatus
    }

    /// Records a send. Never refuses: the lock only informs the UI.
    pub fn on_send(&mut self) {
        self.phase = CommandPhase::AwaitingStatus;
        self.outstanding = self.outstanding.saturating_add(1);
    }

    /// Any status frame resolves every outstanding command and replaces the snapshot.
    pub fn on_status(&mut self, status: StatusSnapshot) -> Enablement {
        if self.outstanding > 1 {
            tracing::debug!(
                outstanding = self.outstanding,
                "status frame releases several uncorrelated commands"
            );
        }
        self.phase = CommandPhase::Idle;
        self.outstanding = 0;
        self.status = status;
        self.enablement()
    }

    /// The control link dropped. The snapshot is marked disconnected; the lock stays as it
    /// was, since only a status frame can answer an outstanding command.
    pub fn on_link_lost(&mut self) -> Enablement {
        self.status.connected = false;
        self.enablement()
    }

    pub fn enablement(&self) -> Enablement {
        Enablement {
            locked: self.is_locked(),
            disabled: self.status.disabled(),
            total_disabled: self.status.total_disabled(),
        }
    }
}
