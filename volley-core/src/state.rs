use tokio::sync::watch;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Idle,
    SettingUp,
    Running,
    TearingDown,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::SettingUp)
                | (Self::SettingUp, Self::Running)
                | (Self::SettingUp, Self::Aborted)
                | (Self::Running, Self::TearingDown)
                | (Self::Running, Self::Aborted)
                | (Self::TearingDown, Self::Completed)
        )
    }
}

/// Run state published to observers. Illegal transitions are engine faults.
#[derive(Debug)]
pub struct RunStateCell {
    tx: watch::Sender<RunState>,
}

impl RunStateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    pub fn advance(&self, next: RunState) -> Result<()> {
        let mut illegal = None;
        self.tx.send_modify(|state| {
            if state.can_move_to(next) {
                *state = next;
            } else {
                illegal = Some(*state);
            }
        });

        match illegal {
            Some(from) => Err(Error::EngineFault(format!(
                "illegal run state transition {from} -> {next}"
            ))),
            None => {
                tracing::info!(state = %next, "run state changed");
                Ok(())
            }
        }
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}
