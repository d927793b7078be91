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
//! Event subscription lifecycle: subscribe, listen, wait for a delivery, clean up.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::listener::{EventListener, WaitSignal};
use crate::model::event_service::ALL_EVENT_TYPES;
use crate::model::EventDestination;
use crate::network::{CallFailure, Scheme, Transport};
use crate::HwvalError;

pub const SUBSCRIPTIONS_PATH: &str = "/redfish/v1/EventService/Subscriptions";
// A BMC exposing one of these registries only delivers events over https.
const HTTPS_REGISTRIES: [&str; 2] = ["/redfish/v1/Registries/iLO", "/redfish/v1/Registries/OpenBMC"];
const TELEMETRY_REGISTRY: &str = "CrayTelemetry";

/// Which tool created a subscription. Determines its Context tag and event filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Power cycle scenario
    PowerTest,
    /// Streaming telemetry scenario
    TelemetryTest,
    /// Redfish test event scenario. `legacy` is an EventService older than v1.3.0.
    EventTest { legacy: bool },
    /// Stand-alone subscription commands
    Tool { cray: bool, telemetry: bool },
}

impl SubscriptionKind {
    pub fn context(&self, bmc: &str) -> String {
        match self {
            SubscriptionKind::PowerTest => format!("PowerTest-{bmc}-PowerTest"),
            SubscriptionKind::TelemetryTest => format!("TelemetryTest-{bmc}-TelemetryTest"),
            SubscriptionKind::EventTest { .. } => format!("RFSubTest-{bmc}-RFSubTest"),
            SubscriptionKind::Tool { .. } => format!("{bmc}-sub-tool"),
        }
    }

    pub fn event_types(&self) -> Option<Vec<String>> {
        let types: &[&str] = match self {
            SubscriptionKind::PowerTest | SubscriptionKind::Tool { cray: true, .. } => {
                &ALL_EVENT_TYPES
            }
            SubscriptionKind::TelemetryTest | SubscriptionKind::EventTest { legacy: true } => {
                &["StatusChange"]
            }
            SubscriptionKind::EventTest { legacy: false } => return None,
            SubscriptionKind::Tool { cray: false, .. } => &["Alert"],
        };
        Some(types.iter().map(|t| t.to_string()).collect())
    }

    pub fn registry_prefixes(&self) -> Option<Vec<String>> {
        match self {
            SubscriptionKind::TelemetryTest
            | SubscriptionKind::Tool {
                telemetry: true, ..
            } => Some(vec![TELEMETRY_REGISTRY.to_string()]),
            _ => None,
        }
    }

    /// The subscription to create for `bmc` delivering to `{scheme}://{ip}:{port}/{bmc}`.
    pub fn subscription(&self, bmc: &str, scheme: Scheme, ip: &str, port: u16) -> EventDestination {
        EventDestination {
            odata_id: None,
            context: Some(self.context(bmc)),
            destination: Some(format!("{scheme}://{ip}:{port}/{bmc}")),
            protocol: Some("Redfish".to_string()),
            event_types: self.event_types(),
            registry_prefixes: self.registry_prefixes(),
        }
    }

    /// Whether an existing subscription was created by this kind for the same target.
    /// Subscriptions of the stand-alone tool are matched by Context only.
    pub fn matches(&self, created: &EventDestination, existing: &EventDestination) -> bool {
        if existing.context != created.context {
            return false;
        }
        match self {
            SubscriptionKind::Tool { .. } => true,
            _ => existing.destination == created.destination,
        }
    }
}

/// https if the BMC has a registry known to require it, else http.
pub fn determine_scheme<T: Transport + ?Sized>(transport: &T) -> Scheme {
    debug!("Determining which http scheme to use.");
    if HTTPS_REGISTRIES.iter().any(|r| transport.exists(r)) {
        Scheme::Https
    } else {
        Scheme::Http
    }
}

pub fn create_subscription<T: Transport + ?Sized>(
    transport: &T,
    subscription: &EventDestination,
) -> Result<(), HwvalError> {
    let body = serde_json::to_value(subscription).map_err(|e| HwvalError::JsonSerializeError {
        url: SUBSCRIPTIONS_PATH.to_string(),
        object_debug: format!("{subscription:?}"),
        source: e,
    })?;
    transport
        .post(SUBSCRIPTIONS_PATH, &body)
        .map_err(|failure| HwvalError::Subscription {
            label: failure.label,
            message: failure.message,
        })?;
    info!(
        "Created subscription. Context: {}, Destination: {}, EventTypes: {:?}",
        subscription.context.as_deref().unwrap_or_default(),
        subscription.destination.as_deref().unwrap_or_default(),
        subscription.event_types.as_deref().unwrap_or_default(),
    );
    Ok(())
}

fn fetch_subscription<T: Transport + ?Sized>(
    transport: &T,
    path: &str,
) -> Result<EventDestination, CallFailure> {
    let value: Value = transport.get_json(path)?;
    let mut sub: EventDestination = serde_json::from_value(value)
        .map_err(|e| CallFailure::new(path, format!("Malformed subscription ({e})")))?;
    sub.odata_id.get_or_insert_with(|| path.to_string());
    Ok(sub)
}

fn subscription_paths<T: Transport + ?Sized>(transport: &T) -> Result<Vec<String>, CallFailure> {
    let collection = transport.get_json(SUBSCRIPTIONS_PATH)?;
    crate::jsonmap::member_ids(&collection)
        .ok_or_else(|| CallFailure::new(format!("{SUBSCRIPTIONS_PATH} .Members"), "missing"))
}

/// Every subscription on the BMC. An entry that cannot be read is logged and left out.
pub fn list_subscriptions<T: Transport + ?Sized>(
    transport: &T,
) -> Result<Vec<EventDestination>, CallFailure> {
    let mut subs = Vec::new();
    for path in subscription_paths(transport)? {
        match fetch_subscription(transport, &path) {
            Ok(sub) => subs.push(sub),
            Err(failure) => warn!("Redfish call to get subscription entry {path} failed: {failure}"),
        }
    }
    Ok(subs)
}

/// Result of a find-and-delete pass.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub failures: Vec<CallFailure>,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes every subscription accepted by `matches`. Finding none is a success; listing,
/// fetching and deleting failures are collected and the pass goes on.
pub fn delete_matching<T, F>(transport: &T, matches: F) -> CleanupOutcome
where
    T: Transport + ?Sized,
    F: Fn(&EventDestination) -> bool,
{
    let mut outcome = CleanupOutcome::default();
    let paths = match subscription_paths(transport) {
        Ok(p) => p,
        Err(failure) => {
            warn!("Redfish call to list subscriptions failed: {failure}");
            outcome.failures.push(failure);
            return outcome;
        }
    };
    for path in paths {
        let sub = match fetch_subscription(transport, &path) {
            Ok(sub) => sub,
            Err(failure) => {
                warn!("Redfish call to get subscription entry {path} failed: {failure}");
                outcome.failures.push(failure);
                continue;
            }
        };
        if !matches(&sub) {
            continue;
        }
        match transport.delete(&path) {
            Ok(_) => {
                info!(
                    "Deleted url: {path}, context: {}",
                    sub.context.as_deref().unwrap_or_default()
                );
                outcome.deleted += 1;
            }
            Err(failure) => {
                warn!("Redfish call to delete subscription entry {path} failed: {failure}");
                outcome.failures.push(failure);
            }
        }
    }
    debug!("{} subscriptions deleted", outcome.deleted);
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Subscribed,
    Listening,
    CallbackReceived,
    TimedOut,
    CleanedUp,
}

/// One subscribe / listen / wait / clean up run against a single BMC.
///
/// Owns the listener and its signal. Waits consume the signal, so every wait needs a
/// delivery that arrived after the previous wait returned.
pub struct SubscriptionTestSession<T: Transport> {
    transport: T,
    kind: SubscriptionKind,
    listener_config: ListenerConfig,
    scheme: Scheme,
    subscription: Option<EventDestination>,
    signal: Arc<WaitSignal>,
    listener: Option<EventListener>,
    state: SessionState,
}

impl<T: Transport> SubscriptionTestSession<T> {
    pub fn new(transport: T, kind: SubscriptionKind, listener_config: ListenerConfig) -> Self {
        SubscriptionTestSession {
            transport,
            kind,
            listener_config,
            scheme: Scheme::Http,
            subscription: None,
            signal: Arc::new(WaitSignal::new()),
            listener: None,
            state: SessionState::Idle,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn signal(&self) -> Arc<WaitSignal> {
        self.signal.clone()
    }

    pub fn subscription(&self) -> Option<&EventDestination> {
        self.subscription.as_ref()
    }

    /// Picks the callback scheme and registers the subscription. Without a registration
    /// nothing can be correlated, so the caller has to give up on an error.
    pub fn subscribe(&mut self) -> Result<(), HwvalError> {
        self.scheme = determine_scheme(&self.transport);
        info!("Subscribing to Redfish events with {}.", self.scheme);
        let sub = self.kind.subscription(
            self.transport.controller(),
            self.scheme,
            &self.listener_config.ip,
            self.listener_config.port,
        );
        create_subscription(&self.transport, &sub)?;
        self.subscription = Some(sub);
        self.state = SessionState::Subscribed;
        Ok(())
    }

    /// Starts the embedded listener with the scheme chosen at subscribe time.
    pub fn listen(&mut self) -> Result<(), HwvalError> {
        let listener = EventListener::start(
            &self.listener_config.ip,
            self.listener_config.port,
            self.scheme,
            &self.listener_config.cert_dir,
            self.signal.clone(),
        )?;
        self.listener = Some(listener);
        self.state = SessionState::Listening;
        Ok(())
    }

    /// Waits up to `timeout` for a delivery and consumes it.
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        let received = self.signal.take(timeout);
        self.state = if received {
            SessionState::CallbackReceived
        } else {
            SessionState::TimedOut
        };
        received
    }

    /// Stops the listener and deletes every subscription this session's kind created
    /// for the target. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> CleanupOutcome {
        self.listener = None;
        let created = match &self.subscription {
            Some(sub) => sub.clone(),
            None => self.kind.subscription(
                self.transport.controller(),
                self.scheme,
                &self.listener_config.ip,
                self.listener_config.port,
            ),
        };
        let kind = self.kind;
        let outcome = delete_matching(&self.transport, |existing| {
            kind.matches(&created, existing)
        });
        self.state = SessionState::CleanedUp;
        outcome
    }
}
