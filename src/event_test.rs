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
//! Redfish test event scenario: the BMC is asked to submit a test event to our own
//! subscription and the delivery is awaited.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::classify::{classify_chassis_member, HardwareClass};
use crate::config::ListenerConfig;
use crate::model::EventService;
use crate::network::Transport;
use crate::report::Report;
use crate::subscription::{SubscriptionKind, SubscriptionTestSession};
use crate::walker::{CHASSIS_PATH, EVENT_SERVICE_PATH, LABEL_EVENT_SERVICE};
use crate::HwvalError;

pub const LABEL_SUBSCRIBE: &str = "eventSubscribe";
pub const LABEL_VALIDATE: &str = "eventValidate";
pub const LABEL_DELETE: &str = "eventDelete";

const SUBMIT_TEST_EVENT: &str = "/redfish/v1/EventService/Actions/EventService.SubmitTestEvent";

/// The SubmitTestEvent body a BMC of `class` accepts, or None if it cannot submit one.
pub fn test_event_payload(class: HardwareClass, now: DateTime<Utc>) -> Option<Value> {
    match class {
        HardwareClass::Gigabyte => {
            let event_id = 10000 + now.timestamp_subsec_nanos() % 90000;
            Some(json!({
                "EventTimestamp": now.to_rfc3339_opts(SecondsFormat::Secs, false),
                "EventId": event_id,
                "OriginOfCondition": "/redfish/v1/Chassis/Self",
                "MessageId": "PropertyValueNotInList",
                "MessageArgs": ["Lit", "IndicatorLED"],
                "Severity": "Warning",
            }))
        }
        HardwareClass::HpeRiver => Some(json!({
            "EventID": "Test Event",
            "Severity": "OK",
            "EventType": "StatusChange",
            "OriginOfCondition": "Test",
            "EventTimestamp": now.to_rfc3339(),
            "MessageArgs": [],
            "Message": "This is a test event",
            "MessageId": "TestMsg.v0",
        })),
        _ => None,
    }
}

pub struct RedfishEventTest<T: Transport> {
    transport: T,
    listener: ListenerConfig,
    wait: Duration,
}

impl<T: Transport> RedfishEventTest<T> {
    pub fn new(transport: T, listener: ListenerConfig, wait: Duration) -> Self {
        RedfishEventTest {
            transport,
            listener,
            wait,
        }
    }

    /// Subscribes, submits a test event, waits for it and deletes the subscription.
    /// Returns the number of failed steps.
    pub fn run(self, report: &mut Report) -> u32 {
        let legacy = match self.transport.get_json(EVENT_SERVICE_PATH) {
            Ok(v) => serde_json::from_value::<EventService>(v)
                .map(|s| s.is_legacy())
                .unwrap_or(false),
            Err(failure) => {
                report.error(LABEL_EVENT_SERVICE, failure.label, failure.message);
                return 1;
            }
        };

        let mut session = SubscriptionTestSession::new(
            self.transport,
            SubscriptionKind::EventTest { legacy },
            self.listener,
        );
        match session.subscribe() {
            Ok(()) => report.ok(LABEL_SUBSCRIBE),
            Err(HwvalError::Subscription { label, message }) => {
                report.error(LABEL_SUBSCRIBE, label, message);
                return 1;
            }
            Err(e) => {
                report.error(LABEL_SUBSCRIBE, SUBSCRIPTION_KEY, e.to_string());
                return 1;
            }
        }

        let mut failures = validate(&mut session, self.wait, report);

        let cleanup = session.cleanup();
        if cleanup.is_clean() {
            report.ok(LABEL_DELETE);
        } else {
            for failure in cleanup.failures {
                report.error(LABEL_DELETE, failure.label, failure.message);
            }
            failures += 1;
        }
        failures
    }
}

const SUBSCRIPTION_KEY: &str = "subscription";

fn validate<T: Transport>(
    session: &mut SubscriptionTestSession<T>,
    wait: Duration,
    report: &mut Report,
) -> u32 {
    let first_member = match session.transport().get_json(CHASSIS_PATH) {
        Ok(chassis) => crate::jsonmap::member_ids(&chassis).and_then(|m| m.into_iter().next()),
        Err(failure) => {
            report.error(LABEL_VALIDATE, failure.label, failure.message);
            return 1;
        }
    };
    let Some(first_member) = first_member else {
        report.error(LABEL_VALIDATE, format!("{CHASSIS_PATH} .Members"), "missing");
        return 1;
    };
    let class = classify_chassis_member(&first_member);
    let Some(payload) = test_event_payload(class, Utc::now()) else {
        report.info(LABEL_VALIDATE, "Test Event", "Not supported");
        return 0;
    };

    if let Err(e) = session.listen() {
        report.error(LABEL_VALIDATE, "listener", e.to_string());
        return 1;
    }
    info!("Submitting {class} test event.");
    if let Err(failure) = session.transport().post(SUBMIT_TEST_EVENT, &payload) {
        report.error(LABEL_VALIDATE, failure.label, failure.message);
        return 1;
    }
    if session.wait_for_event(wait) {
        report.ok(LABEL_VALIDATE);
        0
    } else {
        report.error(LABEL_VALIDATE, "event", "timed out waiting for Redfish test event");
        1
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use reqwest::{Method, StatusCode};

    use super::*;
    use crate::report::Severity;
    use crate::subscription::SUBSCRIPTIONS_PATH;
    use crate::testing::MockTransport;

    fn loopback() -> ListenerConfig {
        ListenerConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    fn bmc(chassis: &str, odata_type: &str) -> MockTransport {
        MockTransport::new("x3000c0s19b0")
            .with(SUBSCRIPTIONS_PATH, json!({"Members": []}))
            .with(EVENT_SERVICE_PATH, json!({"@odata.type": odata_type}))
            .with(CHASSIS_PATH, json!({"Members": [{"@odata.id": chassis}]}))
    }

    fn labels(report: &Report) -> Vec<(String, Severity)> {
        report
            .findings()
            .iter()
            .map(|f| (f.label.clone(), f.severity))
            .collect()
    }

    // test_payloads tests vendor specific SubmitTestEvent bodies.
    #[test]
    fn test_payloads() {
        let now = Utc.with_ymd_and_hms(2024, 5, 26, 21, 4, 9).unwrap();
        let gigabyte = test_event_payload(HardwareClass::Gigabyte, now).unwrap();
        assert_eq!(gigabyte["MessageId"], "PropertyValueNotInList");
        assert_eq!(gigabyte["EventTimestamp"], "2024-05-26T21:04:09+00:00");
        let id = gigabyte["EventId"].as_u64().unwrap();
        assert!((10000..100000).contains(&id));

        let river = test_event_payload(HardwareClass::HpeRiver, now).unwrap();
        assert_eq!(river["Message"], "This is a test event");
        assert_eq!(river["MessageArgs"], json!([]));

        assert!(test_event_payload(HardwareClass::HpeMountain, now).is_none());
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    // test_event_delivered tests the whole run with a BMC that posts back.
    #[test]
    fn test_event_delivered() {
        let port = free_port();
        let mock = bmc("/redfish/v1/Chassis/1", "#EventService.v1_0_8.EventService");
        mock.on(Method::POST, SUBMIT_TEST_EVENT, move |_, body| {
            reqwest::blocking::Client::new()
                .post(format!("http://127.0.0.1:{port}/x3000c0s19b0"))
                .json(body.unwrap())
                .send()
                .unwrap();
        });
        let listener = ListenerConfig {
            port,
            ..loopback()
        };
        let mut report = Report::new();
        let failures =
            RedfishEventTest::new(&mock, listener, Duration::from_secs(5)).run(&mut report);
        assert_eq!(failures, 0, "{report:?}");
        let created = mock.bodies(Method::POST, SUBSCRIPTIONS_PATH);
        assert_eq!(created[0].as_ref().unwrap()["EventTypes"], json!(["StatusChange"]));
        assert_eq!(
            labels(&report),
            [
                (LABEL_SUBSCRIBE.to_string(), Severity::Ok),
                (LABEL_VALIDATE.to_string(), Severity::Ok),
                (LABEL_DELETE.to_string(), Severity::Ok),
            ]
        );
        assert!(mock.resource(&format!("{SUBSCRIPTIONS_PATH}/1")).is_none());
    }

    // test_event_timeout tests a BMC that accepts the event but never delivers it.
    #[test]
    fn test_event_timeout() {
        let mock = bmc("/redfish/v1/Chassis/Self", "#EventService.v1_5_0.EventService");
        let mut report = Report::new();
        let failures = RedfishEventTest::new(&mock, loopback(), Duration::from_millis(20))
            .run(&mut report);
        assert_eq!(failures, 1);
        assert_eq!(report.findings()[1].severity, Severity::Error);
        assert_eq!(
            report.findings()[1].detail.as_ref().unwrap().message,
            "timed out waiting for Redfish test event"
        );
    }

    // test_mountain_not_supported tests the skip keeps the run clean.
    #[test]
    fn test_mountain_not_supported() {
        let mock = bmc("/redfish/v1/Chassis/Enclosure", "#EventService.v1_5_0.EventService");
        let mut report = Report::new();
        let failures = RedfishEventTest::new(&mock, loopback(), Duration::from_millis(20))
            .run(&mut report);
        assert_eq!(failures, 0);
        assert_eq!(report.findings()[1].severity, Severity::Info);
        assert_eq!(mock.count(Method::POST, SUBMIT_TEST_EVENT), 0);
        // current event services get no EventTypes filter
        let created = mock.bodies(Method::POST, SUBSCRIPTIONS_PATH);
        assert!(created[0].as_ref().unwrap().get("EventTypes").is_none());
    }

    // test_submit_rejected tests a refused test event is an eventValidate error.
    #[test]
    fn test_submit_rejected() {
        let mock = bmc("/redfish/v1/Chassis/Self", "#EventService.v1_5_0.EventService");
        mock.fail(Method::POST, SUBMIT_TEST_EVENT, StatusCode::BAD_REQUEST);
        let mut report = Report::new();
        let failures = RedfishEventTest::new(&mock, loopback(), Duration::from_millis(20))
            .run(&mut report);
        assert_eq!(failures, 1);
        let detail = report.findings()[1].detail.as_ref().unwrap();
        assert_eq!(detail.key, SUBMIT_TEST_EVENT);
        assert_eq!(detail.message, "Bad Request (400)");
    }
}
