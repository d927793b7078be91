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
//! Power-control service (CAPMC) checks for one node.

use chrono::{Local, NaiveDateTime, TimeDelta};
use reqwest::{
    blocking::Client as HttpClient, header::HeaderValue, header::CACHE_CONTROL,
    header::CONTENT_TYPE, Method,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::jsonmap;
use crate::network::{classify_status, CallFailure, SERVICE_CAPMC};
use crate::report::Report;
use crate::HwvalError;

pub const GET_POWER_CAP_CAPABILITIES: &str = "get_power_cap_capabilities";
pub const GET_POWER_CAP: &str = "get_power_cap";
pub const SET_POWER_CAP: &str = "set_power_cap";
pub const GET_NODE_ENERGY: &str = "get_node_energy";
pub const GET_NODE_ENERGY_STATS: &str = "get_node_energy_stats";
pub const GET_NODE_ENERGY_COUNTER: &str = "get_node_energy_counter";
pub const GET_XNAME_STATUS: &str = "get_xname_status";

/// Every check in run order.
pub const CAPMC_CHECKS: &[&str] = &[
    GET_POWER_CAP_CAPABILITIES,
    GET_POWER_CAP,
    SET_POWER_CAP,
    GET_NODE_ENERGY,
    GET_NODE_ENERGY_STATS,
    GET_NODE_ENERGY_COUNTER,
    GET_XNAME_STATUS,
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const NODE_CONTROL: &str = "node";
// How far below the maximum the test cap is set.
const CAP_OFFSET: i64 = 10;

/// The cluster's power-control service and the component state it relies on.
pub trait PowerControlService {
    /// POST `body` to a CAPMC operation such as `get_power_cap`.
    fn request(&self, operation: &str, body: &Value) -> Result<Value, CallFailure>;

    /// The HSM state component of `xname`.
    fn component(&self, xname: &str) -> Result<Value, CallFailure>;
}

/// CAPMC and HSM through the API gateway with a bearer token.
pub struct CapmcClient {
    http_client: HttpClient,
    gateway: GatewayConfig,
    token: String,
}

impl CapmcClient {
    pub fn new(http_client: HttpClient, gateway: GatewayConfig, token: String) -> Self {
        CapmcClient {
            http_client,
            gateway,
            token,
        }
    }

    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, CallFailure> {
        let body_enc = body.map(Value::to_string);
        debug!("TX {method} {url} {}", body_enc.as_deref().unwrap_or_default());
        let mut req_b = self
            .http_client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(b) = body_enc {
            req_b = req_b
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(b);
        }
        let response = req_b
            .send()
            .map_err(|e| CallFailure::new(SERVICE_CAPMC, e.to_string()))?;
        let status_code = response.status();
        let response_body = response
            .text()
            .map_err(|e| CallFailure::new(SERVICE_CAPMC, e.to_string()))?;
        debug!("RX {status_code} {response_body}");
        if let Some(failure) = classify_status(SERVICE_CAPMC, url, status_code) {
            return Err(failure);
        }
        serde_json::from_str(&response_body)
            .map_err(|e| CallFailure::new(SERVICE_CAPMC, format!("Malformed JSON response ({e})")))
    }
}

impl PowerControlService for CapmcClient {
    fn request(&self, operation: &str, body: &Value) -> Result<Value, CallFailure> {
        self.send(Method::POST, &self.gateway.capmc_url(operation), Some(body))
    }

    fn component(&self, xname: &str) -> Result<Value, CallFailure> {
        self.send(
            Method::GET,
            &self.gateway.hsm_url(&format!("State/Components/{xname}")),
            None,
        )
    }
}

#[derive(Debug, Deserialize)]
struct CapControl {
    #[serde(default)]
    name: String,
    #[serde(default)]
    min: i64,
    #[serde(default)]
    max: i64,
}

#[derive(Debug, Deserialize)]
struct CapGroup {
    #[serde(default)]
    controls: Vec<CapControl>,
    #[serde(default)]
    supply: i64,
}

#[derive(Debug, Deserialize)]
struct CapabilitiesResponse {
    groups: Vec<CapGroup>,
}

#[derive(Debug, Deserialize)]
struct NidControl {
    #[serde(default)]
    name: String,
    val: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NidPowerCap {
    err_msg: Option<String>,
    #[serde(default)]
    controls: Vec<NidControl>,
}

#[derive(Debug, Deserialize)]
struct PowerCapResponse {
    e: i64,
    #[serde(default)]
    nids: Vec<NidPowerCap>,
}

impl PowerCapResponse {
    fn err_msg(&self) -> String {
        self.nids
            .first()
            .and_then(|n| n.err_msg.clone())
            .unwrap_or_default()
    }

    fn first_value(&self) -> Option<i64> {
        self.nids.first()?.controls.first()?.val
    }

    fn node_value(&self) -> Option<i64> {
        self.nids
            .first()?
            .controls
            .iter()
            .find(|c| c.name == NODE_CONTROL)?
            .val
    }
}

#[derive(Debug, Deserialize)]
struct NodeEnergy {
    energy: Option<f64>,
    energy_ctr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EnergyResponse {
    e: i64,
    #[serde(default)]
    nodes: Vec<NodeEnergy>,
    energy_total: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    e: i64,
}

/// Power cap range learned by `get_power_cap_capabilities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapCapabilities {
    pub min: i64,
    pub max: i64,
}

/// Start and end of the last hour in the service's time format.
pub fn energy_window(now: NaiveDateTime) -> (String, String) {
    let start = now - TimeDelta::hours(1);
    (
        start.format(TIME_FORMAT).to_string(),
        now.format(TIME_FORMAT).to_string(),
    )
}

/// The CAPMC checks against one node. Capabilities found by one check are used by
/// the ones after it.
pub struct CapmcSession<S: PowerControlService> {
    service: S,
    xname: String,
    capabilities: Option<CapCapabilities>,
}

impl<S: PowerControlService> CapmcSession<S> {
    pub fn new(service: S, xname: &str) -> Self {
        CapmcSession {
            service,
            xname: xname.to_string(),
            capabilities: None,
        }
    }

    pub fn capabilities(&self) -> Option<CapCapabilities> {
        self.capabilities
    }

    /// Runs the named check. Unknown names count as nothing.
    pub fn run(&mut self, check: &str, report: &mut Report) -> u32 {
        match check {
            GET_POWER_CAP_CAPABILITIES => self.get_power_cap_capabilities(report),
            GET_POWER_CAP => self.get_power_cap(report),
            SET_POWER_CAP => self.set_power_cap(report),
            GET_NODE_ENERGY => self.get_node_energy(report),
            GET_NODE_ENERGY_STATS => self.get_node_energy_stats(report),
            GET_NODE_ENERGY_COUNTER => self.get_node_energy_counter(report),
            GET_XNAME_STATUS => self.get_xname_status(report),
            _ => 0,
        }
    }

    // A failed call as an Error finding. Rejected requests name the node.
    fn call_failed(&self, label: &str, failure: CallFailure, report: &mut Report) -> u32 {
        let key = match failure.status {
            Some(s) if s.is_client_error() => self.xname.clone(),
            _ => failure.label,
        };
        report.error(label, key, failure.message);
        1
    }

    fn request<D: DeserializeOwned>(
        &self,
        label: &str,
        operation: &str,
        body: &Value,
        report: &mut Report,
    ) -> Option<D> {
        let result = self.service.request(operation, body).and_then(|v| {
            serde_json::from_value(v).map_err(|e| {
                CallFailure::new(SERVICE_CAPMC, format!("Malformed {operation} response ({e})"))
            })
        });
        match result {
            Ok(d) => Some(d),
            Err(failure) => {
                self.call_failed(label, failure, report);
                None
            }
        }
    }

    fn nid(&self, label: &str, report: &mut Report) -> Option<i64> {
        let nid = self
            .service
            .component(&self.xname)
            .map_err(HwvalError::from)
            .and_then(|c| jsonmap::get_i64(&c, "NID", &self.xname));
        match nid {
            Ok(nid) if nid >= 0 => Some(nid),
            other => {
                debug!("no NID for {}: {other:?}", self.xname);
                report.error(label, self.xname.clone(), "Could not get nid");
                None
            }
        }
    }

    pub fn get_power_cap_capabilities(&mut self, report: &mut Report) -> u32 {
        let label = GET_POWER_CAP_CAPABILITIES;
        let Some(nid) = self.nid(label, report) else {
            return 1;
        };
        let Some(info) =
            self.request::<CapabilitiesResponse>(label, label, &json!({ "nids": [nid] }), report)
        else {
            return 1;
        };
        let Some(group) = info.groups.first() else {
            report.error(label, "groups", "missing");
            return 1;
        };
        let (min, mut max) = group
            .controls
            .iter()
            .find(|c| c.name.starts_with("Node"))
            .map(|c| (c.min, c.max))
            .unwrap_or((0, 0));
        if max == 0 {
            if group.supply == 0 {
                report.error(label, "min", min.to_string());
                report.error(label, "max", max.to_string());
                report.error(label, "supply", group.supply.to_string());
                return 1;
            }
            max = group.supply;
        }
        self.capabilities = Some(CapCapabilities { min, max });
        report.ok(label);
        0
    }

    pub fn get_power_cap(&mut self, report: &mut Report) -> u32 {
        let label = GET_POWER_CAP;
        let Some(nid) = self.nid(label, report) else {
            return 1;
        };
        let Some(cap) =
            self.request::<PowerCapResponse>(label, label, &json!({ "nids": [nid] }), report)
        else {
            return 1;
        };
        if cap.e != 0 {
            report.error(label, self.xname.clone(), cap.err_msg());
            return 1;
        }
        if let Some(val) = cap.first_value().filter(|v| *v <= 0) {
            report.error(label, "value", val.to_string());
            return 1;
        }
        report.ok(label);
        0
    }

    // Current node cap. `Err` has already been reported.
    fn read_node_cap(&self, label: &str, nid: i64, report: &mut Report) -> Result<Option<i64>, ()> {
        let cap = self
            .request::<PowerCapResponse>(label, GET_POWER_CAP, &json!({ "nids": [nid] }), report)
            .ok_or(())?;
        if cap.e != 0 {
            report.error(label, self.xname.clone(), "Node not in the Ready state");
            return Err(());
        }
        match cap.node_value() {
            Some(val) if val <= 0 => {
                report.error(label, "value", val.to_string());
                Err(())
            }
            other => Ok(other),
        }
    }

    fn write_node_cap(&self, label: &str, nid: i64, val: i64, report: &mut Report) -> Result<(), ()> {
        let body = json!({
            "nids": [{"controls": [{"name": NODE_CONTROL, "val": val}], "nid": nid}]
        });
        let result = self
            .request::<PowerCapResponse>(label, SET_POWER_CAP, &body, report)
            .ok_or(())?;
        if result.e != 0 {
            report.error(label, self.xname.clone(), result.err_msg());
            return Err(());
        }
        Ok(())
    }

    /// Sets the cap just below the maximum, reads it back and puts the original back.
    pub fn set_power_cap(&mut self, report: &mut Report) -> u32 {
        let label = SET_POWER_CAP;
        let caps = match self.capabilities {
            Some(c) if c.max != 0 => c,
            other => {
                let max = other.map(|c| c.max).unwrap_or_default();
                report.error(label, "Invalid max cap value", max.to_string());
                return 1;
            }
        };
        let Some(nid) = self.nid(label, report) else {
            return 1;
        };
        let Ok(original) = self.read_node_cap(label, nid, report) else {
            return 1;
        };
        if let Some(val) = original.filter(|v| *v < caps.min || *v > caps.max) {
            report.error(label, "value", val.to_string());
            return 1;
        }

        let target = caps.max - CAP_OFFSET;
        if self.write_node_cap(label, nid, target, report).is_err() {
            return 1;
        }
        let Ok(now) = self.read_node_cap(label, nid, report) else {
            return 1;
        };
        if now != Some(target) {
            let set = now.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string());
            report.error(label, "set value", set);
            report.error(label, "expected value", target.to_string());
            return 1;
        }

        // an uncapped node is restored with 0
        if self
            .write_node_cap(label, nid, original.unwrap_or(0), report)
            .is_err()
        {
            return 1;
        }
        report.ok(label);
        0
    }

    fn energy(&self, label: &str, report: &mut Report) -> Option<EnergyResponse> {
        let nid = self.nid(label, report)?;
        let (start, end) = energy_window(Local::now().naive_local());
        let body = json!({ "nids": [nid], "start_time": start, "end_time": end });
        let energy: EnergyResponse = self.request(label, label, &body, report)?;
        if energy.e > 0 {
            report.error(label, self.xname.clone(), "No data in time window");
            return None;
        }
        Some(energy)
    }

    fn positive(label: &str, key: &str, value: Option<f64>, report: &mut Report) -> u32 {
        match value {
            Some(v) if v > 0.0 => {
                report.ok(label);
                0
            }
            other => {
                let shown = other.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string());
                report.error(label, key, shown);
                1
            }
        }
    }

    pub fn get_node_energy(&mut self, report: &mut Report) -> u32 {
        let label = GET_NODE_ENERGY;
        let Some(energy) = self.energy(label, report) else {
            return 1;
        };
        let value = energy.nodes.first().and_then(|n| n.energy);
        Self::positive(label, "energy", value, report)
    }

    pub fn get_node_energy_stats(&mut self, report: &mut Report) -> u32 {
        let label = GET_NODE_ENERGY_STATS;
        let Some(energy) = self.energy(label, report) else {
            return 1;
        };
        Self::positive(label, "energy_total", energy.energy_total, report)
    }

    pub fn get_node_energy_counter(&mut self, report: &mut Report) -> u32 {
        let label = GET_NODE_ENERGY_COUNTER;
        let Some(energy) = self.energy(label, report) else {
            return 1;
        };
        let value = energy.nodes.first().and_then(|n| n.energy_ctr);
        Self::positive(label, "energy_ctr", value, report)
    }

    pub fn get_xname_status(&mut self, report: &mut Report) -> u32 {
        let label = GET_XNAME_STATUS;
        let body = json!({ "xnames": [self.xname] });
        let Some(status) = self.request::<StatusResponse>(label, label, &body, report) else {
            return 1;
        };
        if status.e < 0 {
            report.error(label, self.xname.clone(), "Could not talk to BMC, undefined");
            return 1;
        }
        report.ok(label);
        0
    }
}
