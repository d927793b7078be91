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
/// Tests against an in-process mock BMC. The mock serves a small Redfish tree from memory
/// on a loopback port, honours `If-Match` on resources carrying an `@odata.etag` and
/// records every request it sees, so the blocking HTTP transport and the walker run
/// exactly as they do against hardware.
use std::{
    collections::HashMap,
    net::{SocketAddr, TcpListener},
    path::Path,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use hwval::listener::{EventListener, WaitSignal};
use hwval::subscription::SUBSCRIPTIONS_PATH;
use hwval::{walker, Endpoint, HwvalError, Payload, RedfishClientPool, RedfishHttpClient};
use hwval::{Report, Scheme, Severity, Transport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

const ETAG: &str = "W/\"1\"";
const POWER_LIMIT: &str = "/redfish/v1/Chassis/Enclosure/Controls/NodePowerLimit";
const DEEP_CONTROLS: &str = "/redfish/v1/Chassis/Enclosure/Controls.Deep";

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    method: Method,
    path: String,
    if_match: Option<String>,
}

#[derive(Default)]
struct BmcState {
    resources: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<Recorded>>,
}

struct MockBmc {
    address: SocketAddr,
    state: Arc<BmcState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockBmc {
    fn start(resources: HashMap<String, Value>) -> Result<Self, anyhow::Error> {
        let state = Arc::new(BmcState {
            resources: Mutex::new(resources),
            requests: Mutex::new(Vec::new()),
        });
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let app = Router::new()
            .fallback(handle)
            .with_state(state.clone());
        let (tx, rx) = oneshot::channel::<()>();
        let thread = std::thread::spawn(move || {
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        rx.await.ok();
                    })
                    .await
                    .unwrap();
            });
        });
        Ok(MockBmc {
            address,
            state,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    fn client(&self) -> Result<RedfishHttpClient, anyhow::Error> {
        let pool = RedfishClientPool::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(pool.create_client(Endpoint {
            host: self.address.ip().to_string(),
            port: Some(self.address.port()),
            user: Some("root".to_string()),
            password: Some("initial0".to_string()),
            scheme: Scheme::Http,
        }))
    }

    fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    fn resource(&self, path: &str) -> Option<Value> {
        self.state.resources.lock().get(path).cloned()
    }

    fn remove(&self, path: &str) {
        self.state.resources.lock().remove(path);
    }
}

impl Drop for MockBmc {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

async fn handle(
    State(state): State<Arc<BmcState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let if_match = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        if_match: if_match.clone(),
    });

    match path.as_str() {
        "/redfish/v1/broken" => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "/redfish/v1/moved" => {
            return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/redfish/v1/")])
                .into_response()
        }
        _ => {}
    }

    let mut resources = state.resources.lock();
    match method {
        Method::GET => match resources.get(&path) {
            Some(v) => Json(v.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Method::PATCH if path.ends_with(".Deep") => StatusCode::NO_CONTENT.into_response(),
        Method::PATCH => {
            let Some(resource) = resources.get_mut(&path) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            if let Some(etag) = resource.get("@odata.etag").and_then(Value::as_str) {
                if if_match.as_deref() != Some(etag) {
                    return StatusCode::PRECONDITION_FAILED.into_response();
                }
            }
            let Ok(Value::Object(changes)) = serde_json::from_slice::<Value>(&body) else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            if let Some(fields) = resource.as_object_mut() {
                fields.extend(changes);
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Method::POST if path == SUBSCRIPTIONS_PATH => StatusCode::CREATED.into_response(),
        Method::DELETE => match resources.remove(&path) {
            Some(_) => StatusCode::NO_CONTENT.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

// A tree where every check passes, plus one Blade chassis the walker skips.
fn bmc_tree() -> HashMap<String, Value> {
    let mut tree = HashMap::new();
    let mut add = |path: &str, v: Value| {
        tree.insert(path.to_string(), v);
    };
    add(
        "/redfish/v1/",
        json!({
            "Chassis": {"@odata.id": "/redfish/v1/Chassis"},
            "EventService": {"@odata.id": "/redfish/v1/EventService"},
            "Managers": {"@odata.id": "/redfish/v1/Managers"},
            "Systems": {"@odata.id": "/redfish/v1/Systems"},
            "UpdateService": {"@odata.id": "/redfish/v1/UpdateService"}
        }),
    );
    add(
        "/redfish/v1/Chassis",
        json!({"Members": [
            {"@odata.id": "/redfish/v1/Chassis/Enclosure"},
            {"@odata.id": "/redfish/v1/Chassis/Blade0"}
        ]}),
    );
    add(
        "/redfish/v1/Chassis/Enclosure",
        json!({
            "ChassisType": "Enclosure",
            "AssetTag": "A1",
            "SerialNumber": "SN123",
            "Power": {"@odata.id": "/redfish/v1/Chassis/Enclosure/Power"},
            "PartNumber": "102254300",
            "Manufacturer": "HPE",
            "Model": "HPE Cray EX"
        }),
    );
    add(
        "/redfish/v1/Chassis/Blade0",
        json!({"ChassisType": "Blade"}),
    );
    add(
        POWER_LIMIT,
        json!({
            "@odata.etag": ETAG,
            "ControlMode": "Disabled",
            "SetPoint": 0
        }),
    );
    add(
        "/redfish/v1/Managers",
        json!({"Members": [{"@odata.id": "/redfish/v1/Managers/BMC"}]}),
    );
    add(
        "/redfish/v1/Managers/BMC",
        json!({
            "Name": "BMC",
            "Actions": {"#Manager.Reset": {"target": "/redfish/v1/Managers/BMC/Actions/Manager.Reset"}},
            "ManagerType": "EnclosureManager",
            "NetworkProtocol": {"@odata.id": "/redfish/v1/Managers/BMC/NetworkProtocol"}
        }),
    );
    add(
        "/redfish/v1/EventService",
        json!({
            "@odata.type": "#EventService.v1_5_0.EventService",
            "RegistryPrefixes": ["CrayAlerts", "ResourceEvent"],
            "ResourceTypes": ["Chassis"],
            "Subscriptions": {"@odata.id": SUBSCRIPTIONS_PATH}
        }),
    );
    add(SUBSCRIPTIONS_PATH, json!({"Members": []}));
    add(
        "/redfish/v1/Systems",
        json!({"Members": [{"@odata.id": "/redfish/v1/Systems/Node0"}]}),
    );
    add(
        "/redfish/v1/Systems/Node0",
        json!({
            "Actions": {"#ComputerSystem.Reset": {"target": "/redfish/v1/Systems/Node0/Actions/ComputerSystem.Reset"}},
            "Bios": {"@odata.id": "/redfish/v1/Systems/Node0/Bios"},
            "BiosVersion": "1.2.3",
            "EthernetInterfaces": {"@odata.id": "/redfish/v1/Systems/Node0/EthernetInterfaces"},
            "Manufacturer": "HPE",
            "Memory": {"@odata.id": "/redfish/v1/Systems/Node0/Memory"},
            "MemorySummary": {"TotalSystemMemoryGiB": 512},
            "Model": "EX425",
            "PartNumber": "P1",
            "PowerState": "On",
            "Processors": {"@odata.id": "/redfish/v1/Systems/Node0/Processors"},
            "SerialNumber": "SN-N0",
            "SKU": "SKU0",
            "Status": {"State": "Enabled", "Health": "OK"}
        }),
    );
    add(
        "/redfish/v1/Systems/Node0/Memory",
        json!({
            "Members": [
                {"@odata.id": "/redfish/v1/Systems/Node0/Memory/DIMM0"},
                {"@odata.id": "/redfish/v1/Systems/Node0/Memory/DIMM1"}
            ],
            "Members@odata.count": 2
        }),
    );
    add(
        "/redfish/v1/Systems/Node0/Memory/DIMM0",
        json!({
            "CapacityMiB": 65536,
            "Id": "DIMM0",
            "MemoryDeviceType": "DDR4",
            "Manufacturer": "Hynix",
            "PartNumber": "HMAA8GR7AJR4N-XN",
            "SerialNumber": "3A1B2C3D",
            "OperatingSpeedMhz": 3200,
            "Status": {"State": "Enabled"}
        }),
    );
    add(
        "/redfish/v1/Systems/Node0/Memory/DIMM1",
        json!({"Id": "DIMM1", "Status": {"State": "Absent"}}),
    );
    add(
        "/redfish/v1/Systems/Node0/Processors",
        json!({
            "Members": [{"@odata.id": "/redfish/v1/Systems/Node0/Processors/CPU0"}],
            "Members@odata.count": 1
        }),
    );
    add(
        "/redfish/v1/Systems/Node0/Processors/CPU0",
        json!({
            "Manufacturer": "AMD",
            "Model": "AMD EPYC 7763",
            "SerialNumber": "CPU-SN0",
            "TotalCores": 64,
            "TotalThreads": 128,
            "MaxSpeedMHz": 3500
        }),
    );
    add(
        "/redfish/v1/UpdateService",
        json!({
            "Actions": {"#UpdateService.SimpleUpdate": {
                "@Redfish.ActionInfo": "/redfish/v1/UpdateService/SimpleUpdateActionInfo",
                "target": "/redfish/v1/UpdateService/Actions/SimpleUpdate"
            }},
            "FirmwareInventory": {"@odata.id": "/redfish/v1/UpdateService/FirmwareInventory"}
        }),
    );
    add(
        "/redfish/v1/UpdateService/FirmwareInventory",
        json!({"Members": [{"@odata.id": "/redfish/v1/UpdateService/FirmwareInventory/BMC"}]}),
    );
    add(
        "/redfish/v1/UpdateService/FirmwareInventory/BMC",
        json!({
            "@odata.id": "/redfish/v1/UpdateService/FirmwareInventory/BMC",
            "Id": "BMC",
            "Version": "1.7.2",
            "Name": "BMC Firmware"
        }),
    );
    tree
}

// test_patch_sends_etag tests that a PATCH first reads the etag and sends it as If-Match.
#[test]
fn test_patch_sends_etag() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    let client = bmc.client()?;

    let payload = client
        .patch(POWER_LIMIT, &json!({"ControlMode": "Automatic", "SetPoint": 500}))
        .map_err(|f| anyhow::anyhow!("{f}"))?;
    assert_eq!(payload, Payload::NoContent(reqwest::StatusCode::NO_CONTENT));

    let requests = bmc.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[1].method, Method::PATCH);
    assert_eq!(requests[1].if_match.as_deref(), Some(ETAG));
    let limit = bmc.resource(POWER_LIMIT).unwrap();
    assert_eq!(limit["SetPoint"], 500);
    assert_eq!(limit["ControlMode"], "Automatic");
    Ok(())
}

// test_deep_patch_skips_etag tests that a .Deep PATCH goes out without a precondition.
#[test]
fn test_deep_patch_skips_etag() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    let client = bmc.client()?;

    let body = json!({"Members": [{"@odata.id": POWER_LIMIT, "SetPoint": 825}]});
    client
        .patch(DEEP_CONTROLS, &body)
        .map_err(|f| anyhow::anyhow!("{f}"))?;

    assert_eq!(
        bmc.requests(),
        vec![Recorded {
            method: Method::PATCH,
            path: DEEP_CONTROLS.to_string(),
            if_match: None,
        }]
    );
    Ok(())
}

// test_status_classification tests the failure label and message per status class.
#[test]
fn test_status_classification() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    let client = bmc.client()?;

    let failure = client.get("/redfish/v1/broken").unwrap_err();
    assert_eq!(failure.label, "Redfish");
    assert_eq!(failure.message, "Internal Redfish Error");

    let missing = client.endpoint().url("/redfish/v1/missing");
    let failure = client.get("/redfish/v1/missing").unwrap_err();
    assert_eq!(failure.label, missing);
    assert_eq!(failure.message, "Bad Request (404)");

    let failure = client.get("/redfish/v1/moved").unwrap_err();
    assert_eq!(failure.label, "Redfish");
    assert_eq!(failure.message, "URI redirection");
    Ok(())
}

// test_empty_body_sentinel tests that a 2xx response without a body is NoContent.
#[test]
fn test_empty_body_sentinel() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    let client = bmc.client()?;

    let created = client
        .post(SUBSCRIPTIONS_PATH, &json!({"Context": "x1000c0s0b0-sub-tool"}))
        .map_err(|f| anyhow::anyhow!("{f}"))?;
    assert_eq!(created, Payload::NoContent(reqwest::StatusCode::CREATED));
    assert!(created.text().is_none());

    let root = client
        .get("/redfish/v1/")
        .map_err(|f| anyhow::anyhow!("{f}"))?;
    assert!(root.text().is_some_and(|t| t.contains("UpdateService")));
    Ok(())
}

// test_connection_refused tests that an unreachable BMC fails with the service label.
#[test]
fn test_connection_refused() -> Result<(), anyhow::Error> {
    let pool = RedfishClientPool::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let client = pool.create_client(Endpoint {
        host: "127.0.0.1".to_string(),
        port: Some(1),
        scheme: Scheme::Http,
        ..Default::default()
    });
    let failure = client.get("/redfish/v1/").unwrap_err();
    assert_eq!(failure.label, "Redfish");
    assert!(!failure.message.is_empty());
    assert_eq!(failure.status, None);
    Ok(())
}

// test_walk_all tests a full walk of a healthy BMC.
#[test]
fn test_walk_all() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    let client = bmc.client()?;
    let mut report = Report::new();

    let failures = walker::walk_all(&client, &mut report);

    assert_eq!(failures, 0, "{:#?}", report.findings());
    assert!(!report.has_errors());
    assert_eq!(report.count(Severity::Ok), 6);
    assert_eq!(report.count(Severity::Info), 2);
    let skipped = report
        .findings()
        .iter()
        .filter_map(|f| f.detail.as_ref())
        .find(|d| d.key == "Skipping /redfish/v1/Chassis/Blade0")
        .unwrap();
    assert_eq!(skipped.message, "URI is for a Blade");
    Ok(())
}

// test_walk_missing_manager tests that an unreadable member is one failure and the
// other resource kinds still pass.
#[test]
fn test_walk_missing_manager() -> Result<(), anyhow::Error> {
    let bmc = MockBmc::start(bmc_tree())?;
    bmc.remove("/redfish/v1/Managers/BMC");
    let client = bmc.client()?;
    let mut report = Report::new();

    let failures = walker::walk_all(&client, &mut report);

    assert_eq!(failures, 1);
    assert!(report.has_errors());
    assert_eq!(report.count(Severity::Ok), 5);
    let error = report
        .findings()
        .iter()
        .find(|f| f.severity == Severity::Error)
        .unwrap();
    assert_eq!(error.label, walker::LABEL_MANAGERS);
    assert_eq!(error.detail.as_ref().unwrap().message, "Bad Request (404)");
    Ok(())
}

// test_listener_receives_post tests that a POST over loopback fires the signal and
// other methods do not.
#[test]
fn test_listener_receives_post() -> Result<(), anyhow::Error> {
    let signal = Arc::new(WaitSignal::new());
    let listener = EventListener::start(
        "127.0.0.1",
        0,
        Scheme::Http,
        Path::new("cert"),
        signal.clone(),
    )?;
    let url = format!("http://{}/x1000c0s0b0", listener.local_addr());
    let http = reqwest::blocking::Client::new();

    let rejected = http.get(&url).send()?;
    assert_eq!(rejected.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert!(!signal.is_set());

    let delivered = http
        .post(&url)
        .body(r#"{"Events":[{"EventType":"StatusChange","Message":"power on"}]}"#)
        .send()?;
    assert_eq!(delivered.status(), reqwest::StatusCode::OK);
    assert!(signal.take(Duration::from_secs(5)));
    assert!(!signal.is_set());
    Ok(())
}

// test_listener_missing_certificate tests that https without a key pair fails to start.
#[test]
fn test_listener_missing_certificate() {
    let signal = Arc::new(WaitSignal::new());
    let err = EventListener::start(
        "127.0.0.1",
        0,
        Scheme::Https,
        Path::new("/nonexistent/cert"),
        signal,
    )
    .unwrap_err();
    assert!(matches!(err, HwvalError::Tls { .. }));
}
