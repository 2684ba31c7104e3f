//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! State machine of one transfer direction

use crate::types::{Direction, TransferState};
use tracing::{trace, warn};

/// Inputs of a [`TransferFsm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferEvent {
    /// Accepter is up
    Start,
    /// Startup failed, or the port went down and must start again
    Stop,
    /// Port disabled administratively
    Disable,
    /// A network connection attached
    Connected,
    /// The sink did not take everything
    OutputBlocked,
    /// The sink drained
    OutputCleared,
    /// Close string queued to the device
    CloseBegin,
    /// The last network connection left
    Disconnected,
}

/// Transfer state of one direction, changed only through [`TransferFsm::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFsm {
    direction: Direction,
    state: TransferState,
}

impl TransferFsm {
    /// New machine in [`TransferState::NotStarted`]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: TransferState::NotStarted,
        }
    }

    /// Current state
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Direction this machine tracks
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Apply `event`. An event with no transition from the current state is
    /// logged and leaves the state unchanged.
    pub fn handle(&mut self, event: TransferEvent) -> TransferState {
        use TransferEvent as E;
        use TransferState as S;

        let next = match (self.state, event) {
            (_, E::Stop) => Some(S::NotStarted),
            (_, E::Disable) => Some(S::Closed),
            (S::NotStarted | S::Closed, E::Start) => Some(S::Unconnected),
            (S::NotStarted | S::Closed, E::Disconnected) => Some(self.state),

            (S::Unconnected, E::Connected) => Some(S::WaitingInput),
            (S::Unconnected, E::Disconnected) => Some(S::Unconnected),
            (S::Unconnected, E::CloseBegin) => Some(S::Closing),

            (S::WaitingInput | S::WaitingOutputClear, E::Connected) => Some(self.state),
            (S::WaitingInput, E::OutputBlocked) => Some(S::WaitingOutputClear),
            (S::WaitingInput, E::OutputCleared) => Some(S::WaitingInput),
            (S::WaitingOutputClear, E::OutputBlocked) => Some(S::WaitingOutputClear),
            (S::WaitingOutputClear, E::OutputCleared) => Some(S::WaitingInput),
            (S::WaitingInput | S::WaitingOutputClear, E::CloseBegin) => Some(S::Closing),
            (S::WaitingInput | S::WaitingOutputClear, E::Disconnected) => Some(S::Unconnected),

            (S::Closing, E::OutputBlocked | E::OutputCleared | E::CloseBegin) => Some(S::Closing),
            (S::Closing, E::Disconnected) => Some(S::Unconnected),

            _ => None,
        };

        match next {
            Some(next) => {
                if next != self.state {
                    trace!(direction = %self.direction, from = %self.state, to = %next, ?event, "transfer state change");
                }
                self.state = next;
            }
            None => {
                warn!(direction = %self.direction, state = %self.state, ?event, "ignoring invalid transfer transition");
            }
        }
        self.state
    }
}
