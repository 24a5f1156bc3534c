// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Mutex;

use crate::error::ChannelError;

/// The worker lifecycle: `Default -> Initializing -> Initialized -> (Reloading <-> Initialized)
/// -> Disposed`. `Disposed` is absorbing — every state can transition into it, and once there, no
/// further transition is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Default,
    Initializing,
    Initialized,
    Reloading,
    Disposed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Default => "Default",
            ChannelState::Initializing => "Initializing",
            ChannelState::Initialized => "Initialized",
            ChannelState::Reloading => "Reloading",
            ChannelState::Disposed => "Disposed",
        };
        f.write_str(name)
    }
}

/// A mutex-guarded `ChannelState` with transition checking.
///
/// A plain `Mutex` rather than an atomic is deliberate: transitions are rare (they happen once per
/// lifecycle phase, not per invocation) and the check-then-set needs to be a single critical
/// section so two concurrent callers can't both observe a legal `from` state and both apply their
/// transition.
pub struct ChannelStateCell {
    worker_id: String,
    state: Mutex<ChannelState>,
}

impl ChannelStateCell {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: Mutex::new(ChannelState::Default),
        }
    }

    pub fn get(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    /// Transitions to `to` if the current state is one of `from`. Disposal is always legal
    /// regardless of `from`, since dispose must be reachable from any state.
    pub fn transition(&self, from: &[ChannelState], to: ChannelState) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        if *state == ChannelState::Disposed && to != ChannelState::Disposed {
            return Err(ChannelError::Disposed {
                worker_id: self.worker_id.clone(),
            });
        }
        if !from.contains(&*state) {
            return Err(ChannelError::IllegalStateTransition {
                worker_id: self.worker_id.clone(),
                message: format!("illegal transition to {to} from {state}"),
            });
        }
        *state = to;
        Ok(())
    }

    /// Unconditionally transitions to `Disposed`. A second call is a harmless no-op.
    pub fn dispose(&self) {
        *self.state.lock().unwrap() = ChannelState::Disposed;
    }

    pub fn is_disposed(&self) -> bool {
        self.get() == ChannelState::Disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_startup_sequence() {
        let cell = ChannelStateCell::new("w1");
        cell.transition(&[ChannelState::Default], ChannelState::Initializing)
            .unwrap();
        cell.transition(&[ChannelState::Initializing], ChannelState::Initialized)
            .unwrap();
        assert_eq!(cell.get(), ChannelState::Initialized);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let cell = ChannelStateCell::new("w1");
        let err = cell
            .transition(&[ChannelState::Initializing], ChannelState::Initialized)
            .unwrap_err();
        assert!(matches!(err, ChannelError::IllegalStateTransition { .. }));
        assert_eq!(cell.get(), ChannelState::Default);
    }

    #[test]
    fn dispose_is_absorbing() {
        let cell = ChannelStateCell::new("w1");
        cell.dispose();
        let err = cell
            .transition(&[ChannelState::Default], ChannelState::Initializing)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Disposed { .. }));
        cell.dispose();
        assert_eq!(cell.get(), ChannelState::Disposed);
    }

    #[test]
    fn reload_round_trips_to_initialized() {
        let cell = ChannelStateCell::new("w1");
        cell.transition(&[ChannelState::Default], ChannelState::Initializing)
            .unwrap();
        cell.transition(&[ChannelState::Initializing], ChannelState::Initialized)
            .unwrap();
        cell.transition(&[ChannelState::Initialized], ChannelState::Reloading)
            .unwrap();
        cell.transition(&[ChannelState::Reloading], ChannelState::Initialized)
            .unwrap();
        assert_eq!(cell.get(), ChannelState::Initialized);
    }
}
