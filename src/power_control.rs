/*
 * SPDX-FileCopyrightText: Copyright (c) 2023 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
//! Power cycle scenario correlated with Redfish power events.
//!
//! Every transition is judged twice: by the event delivered to the listener and by the
//! power state read back from the BMC. An event without the state change and a state
//! change without an event are reported as different failures.

use std::{thread, time::Duration};

use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{ListenerConfig, PowerControlTimings};
use crate::model::{ActionInfo, ComputerSystem, PowerState, SystemPowerControl};
use crate::network::Transport;
use crate::report::ScenarioOutcome;
use crate::subscription::{SubscriptionKind, SubscriptionTestSession};
use crate::walker::SYSTEMS_PATH;

const RESET_TYPE: &str = "ResetType";

/// How a single power transition went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Completed,
    /// Event received, state did not follow
    StateMismatch(PowerState),
    /// State changed, no event received
    EventMissing,
    /// Neither event nor state change
    NotCompleted(PowerState),
}

/// ResetType to power a system off: GracefulShutdown if offered, else Off.
pub fn select_off_reset(allowable: &[String]) -> Option<SystemPowerControl> {
    [SystemPowerControl::GracefulShutdown, SystemPowerControl::Off]
        .into_iter()
        .find(|candidate| allowable.iter().any(|v| *v == candidate.to_string()))
}

fn state_word(state: PowerState) -> &'static str {
    match state {
        PowerState::On => "On",
        _ => "Off",
    }
}

pub struct PowerControlTest<T: Transport> {
    session: SubscriptionTestSession<T>,
    timings: PowerControlTimings,
    system_path: String,
}

impl<T: Transport> PowerControlTest<T> {
    pub fn new(transport: T, listener: ListenerConfig, timings: PowerControlTimings) -> Self {
        PowerControlTest {
            session: SubscriptionTestSession::new(transport, SubscriptionKind::PowerTest, listener),
            timings,
            system_path: String::new(),
        }
    }

    fn transport(&self) -> &T {
        self.session.transport()
    }

    fn first_system(&self) -> Option<String> {
        let collection = match self.transport().get_json(SYSTEMS_PATH) {
            Ok(c) => c,
            Err(failure) => {
                warn!("Redfish call to get Systems failed: {failure}");
                return None;
            }
        };
        crate::jsonmap::member_ids(&collection)?.into_iter().next()
    }

    fn system(&self) -> Option<ComputerSystem> {
        let value = match self.transport().get_json(&self.system_path) {
            Ok(v) => v,
            Err(failure) => {
                warn!(
                    "Redfish call to get computer system information for {} failed: {failure}",
                    self.system_path
                );
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(system) => Some(system),
            Err(e) => {
                warn!("Unexpected computer system at {}: {e}", self.system_path);
                None
            }
        }
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.system()?.power_state
    }

    /// Polls the power state until it is `expected` or the attempts run out. Returns the
    /// last state read.
    fn wait_for_state(&self, expected: PowerState) -> Option<PowerState> {
        let mut state = self.power_state();
        let mut attempts = 0;
        while state != Some(expected) && attempts < self.timings.poll_attempts {
            thread::sleep(self.timings.poll_interval);
            state = self.power_state();
            attempts += 1;
        }
        state
    }

    fn off_reset_type(&self, system: &ComputerSystem) -> Option<SystemPowerControl> {
        let action = system.reset_action()?;
        let allowable = match (&action.allowable_values, &action.action_info) {
            (Some(values), _) => values.clone(),
            (None, Some(info_path)) => {
                let info: ActionInfo = match self.transport().get_json(info_path) {
                    Ok(v) => serde_json::from_value(v).ok()?,
                    Err(failure) => {
                        warn!("Redfish call to get ActionInfo for {info_path} failed: {failure}");
                        return None;
                    }
                };
                info.allowable_values(RESET_TYPE)?.to_vec()
            }
            (None, None) => return None,
        };
        select_off_reset(&allowable)
    }

    // Sends a reset. Failures are logged only, the wait that follows reports them.
    fn reset(&self, reset_type: Option<SystemPowerControl>) {
        let Some(system) = self.system() else {
            return;
        };
        let reset_type = match reset_type {
            Some(r) => r,
            None => match self.off_reset_type(&system) {
                Some(r) => r,
                None => {
                    warn!("Could not determine ResetType for power Off.");
                    return;
                }
            },
        };
        let Some(action) = system.reset_action() else {
            warn!("{} has no ComputerSystem.Reset action", self.system_path);
            return;
        };
        info!("Sending {reset_type} to {}.", self.system_path);
        if let Err(failure) = self
            .transport()
            .post(&action.target, &json!({ "ResetType": reset_type }))
        {
            warn!("Redfish call to perform {reset_type} power action failed: {failure}");
        }
    }

    /// Issues a reset and judges the transition to `expected`.
    pub fn transition(
        &mut self,
        reset_type: Option<SystemPowerControl>,
        expected: PowerState,
        timeout: Duration,
    ) -> Transition {
        self.reset(reset_type);
        if self.session.wait_for_event(timeout) {
            match self.wait_for_state(expected) {
                Some(s) if s == expected => Transition::Completed,
                other => Transition::StateMismatch(other.unwrap_or(PowerState::Unknown)),
            }
        } else {
            match self.power_state() {
                Some(s) if s == expected => Transition::EventMissing,
                other => Transition::NotCompleted(other.unwrap_or(PowerState::Unknown)),
            }
        }
    }

    // Records a transition. Returns false if the scenario cannot go on.
    fn judge(
        transition: Transition,
        expected: PowerState,
        outcome: &mut ScenarioOutcome,
    ) -> bool {
        let word = state_word(expected);
        match transition {
            Transition::Completed => {
                info!("PASS: Node properly turned {word}.");
                true
            }
            Transition::StateMismatch(actual) => {
                error!("FAIL: Node sent Redfish event but is not {word} (state {actual}).");
                outcome.fail();
                false
            }
            Transition::EventMissing => {
                error!("FAIL: Node turned {word} but did not send a Redfish event.");
                outcome.fail();
                true
            }
            Transition::NotCompleted(actual) => {
                error!("FAIL: Node failed to turn {word} in the alloted time (state {actual}).");
                outcome.fail();
                false
            }
        }
    }

    fn cycle_from_on(&mut self, outcome: &mut ScenarioOutcome) {
        info!("Starting with node in the On state.");
        let t = &self.timings;
        let (graceful_wait, transition_wait, settle) =
            (t.graceful_off_wait, t.transition_wait, t.settle_after_off);

        let graceful = self.transition(None, PowerState::Off, graceful_wait);
        let off = match graceful {
            Transition::Completed | Transition::EventMissing => {
                Self::judge(graceful, PowerState::Off, outcome)
            }
            Transition::StateMismatch(_) | Transition::NotCompleted(_) => {
                if let Transition::StateMismatch(_) = graceful {
                    Self::judge(graceful, PowerState::Off, outcome);
                }
                info!("INFO: Node failed to turn Off in the alloted time, attempting force Off.");
                let forced = self.transition(
                    Some(SystemPowerControl::ForceOff),
                    PowerState::Off,
                    transition_wait,
                );
                Self::judge(forced, PowerState::Off, outcome)
            }
        };
        if !off {
            outcome.abort();
            return;
        }

        thread::sleep(settle);
        let on = self.transition(Some(SystemPowerControl::On), PowerState::On, transition_wait);
        if !Self::judge(on, PowerState::On, outcome) {
            outcome.abort();
        }
    }

    fn cycle_from_off(&mut self, outcome: &mut ScenarioOutcome) {
        info!("Starting with node in the Off state.");
        let transition_wait = self.timings.transition_wait;
        let on = self.transition(Some(SystemPowerControl::On), PowerState::On, transition_wait);
        if !Self::judge(on, PowerState::On, outcome) {
            outcome.abort();
            return;
        }

        thread::sleep(self.timings.settle_after_on);
        info!("INFO: Attempting force Off.");
        let off = self.transition(
            Some(SystemPowerControl::ForceOff),
            PowerState::Off,
            transition_wait,
        );
        if !Self::judge(off, PowerState::Off, outcome) {
            outcome.abort();
        }
    }

    /// Subscribes, listens, cycles the first system's power and cleans up. A failed
    /// cleanup is logged but leaves the verdict alone.
    pub fn run(&mut self) -> ScenarioOutcome {
        let mut outcome = ScenarioOutcome::default();
        if let Err(e) = self.session.subscribe() {
            error!("FAIL: Could not subscribe to Redfish event notifications. {e}");
            outcome.abort();
            return outcome;
        }
        if let Err(e) = self.session.listen() {
            error!("FAIL: Could not start the event listener. {e}");
            outcome.abort();
        } else {
            self.exercise(&mut outcome);
        }

        let cleanup = self.session.cleanup();
        if !cleanup.is_clean() {
            error!("Failed to delete Redfish event notification subscription.");
        }
        if outcome.passed() {
            info!("SUCCESS: All tests passed.");
        } else {
            error!("{outcome}");
        }
        outcome
    }

    fn exercise(&mut self, outcome: &mut ScenarioOutcome) {
        let Some(system_path) = self.first_system() else {
            error!("FAIL: No node found, cannot perform power actions.");
            outcome.abort();
            return;
        };
        info!("Using node {system_path}.");
        self.system_path = system_path;
        match self.power_state() {
            Some(PowerState::On) => self.cycle_from_on(outcome),
            Some(PowerState::Off) => self.cycle_from_off(outcome),
            other => {
                error!(
                    "FAIL: Could not query power state of target node {} ({other:?}).",
                    self.system_path
                );
                outcome.abort();
            }
        }
    }
}
