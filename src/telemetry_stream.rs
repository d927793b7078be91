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
//! Streaming telemetry scenario: a CrayTelemetry subscription has to deliver within the
//! configured wait.

use std::time::Duration;

use tracing::{error, info};

use crate::config::ListenerConfig;
use crate::network::Transport;
use crate::report::ScenarioOutcome;
use crate::subscription::{SubscriptionKind, SubscriptionTestSession};

pub struct StreamingTelemetryTest<T: Transport> {
    session: SubscriptionTestSession<T>,
    wait: Duration,
}

impl<T: Transport> StreamingTelemetryTest<T> {
    pub fn new(transport: T, listener: ListenerConfig, wait: Duration) -> Self {
        StreamingTelemetryTest {
            session: SubscriptionTestSession::new(
                transport,
                SubscriptionKind::TelemetryTest,
                listener,
            ),
            wait,
        }
    }

    pub fn run(&mut self) -> ScenarioOutcome {
        let mut outcome = ScenarioOutcome::default();
        if let Err(e) = self.session.subscribe() {
            error!("FAIL: Could not subscribe to streaming telemetry. {e}");
            outcome.abort();
            return outcome;
        }
        match self.session.listen() {
            Ok(()) => {
                info!("Waiting {:?} for streaming telemetry.", self.wait);
                if self.session.wait_for_event(self.wait) {
                    info!("PASS: Streaming telemetry received.");
                } else {
                    error!("FAIL: No streaming telemetry received.");
                    outcome.fail();
                }
            }
            Err(e) => {
                error!("FAIL: Could not start the event listener. {e}");
                outcome.abort();
            }
        }
        if !self.session.cleanup().is_clean() {
            error!("Failed to delete streaming telemetry subscription.");
        }
        outcome
    }
}
