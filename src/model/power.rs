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
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ODataId;

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PowerLimit {
    pub limit_in_watts: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PowerMetrics {
    pub min_consumed_watts: Option<f64>,
    pub average_consumed_watts: Option<f64>,
}

/// `Oem.Vendor.PowerLimit` range published by some BMC firmware.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct VendorPowerLimit {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct VendorPowerControl {
    pub power_limit: Option<VendorPowerLimit>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PowerControlOem {
    pub vendor: Option<VendorPowerControl>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct PowerControl {
    pub name: Option<String>,
    pub power_capacity_watts: Option<f64>,
    pub power_limit: Option<PowerLimit>,
    pub power_metrics: Option<PowerMetrics>,
    pub oem: Option<PowerControlOem>,
}

/// http://redfish.dmtf.org/schemas/v1/Power.v1_7_1.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Power {
    #[serde(default)]
    pub power_control: Vec<PowerControl>,
    pub oem: Option<Value>,
}

impl Power {
    /// Link to the HPE accelerator power limit resource, if the BMC has one.
    pub fn hpe_power_limit_link(&self) -> Option<&str> {
        self.oem
            .as_ref()?
            .pointer("/Hpe/Links/PowerLimit/@odata.id")?
            .as_str()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Automatic,
    Override,
    Manual,
    Disabled,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// http://redfish.dmtf.org/schemas/v1/Control.v1_0_0.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Control {
    pub id: Option<String>,
    pub setting_range_min: Option<f64>,
    pub setting_range_max: Option<f64>,
    pub set_point: Option<f64>,
    pub control_mode: Option<ControlMode>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PowerLimitRange {
    pub minimum_power_limit: Option<f64>,
    pub maximum_power_limit: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ZonePowerLimit {
    pub power_limit_in_watts: Option<f64>,
    pub zone_number: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ActionTarget {
    pub target: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AccPowerLimitActions {
    #[serde(rename = "#HpeServerAccPowerLimit.ConfigurePowerLimit")]
    pub configure_power_limit: Option<ActionTarget>,
}

/// HPE Apollo `HpeServerAccPowerLimit` resource.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct AccPowerLimit {
    #[serde(rename = "@odata.id")]
    pub odata_id: Option<String>,
    #[serde(default)]
    pub power_limit_ranges: Vec<PowerLimitRange>,
    #[serde(default)]
    pub power_limits: Vec<ZonePowerLimit>,
    pub actions: Option<AccPowerLimitActions>,
}

impl AccPowerLimit {
    pub fn configure_target(&self) -> Option<&str> {
        self.actions
            .as_ref()?
            .configure_power_limit
            .as_ref()
            .map(|a| a.target.as_str())
    }
}

/// Controls collection entries; only the link is needed to find the node limit.
pub fn node_power_limit(members: &[ODataId]) -> Option<&ODataId> {
    members
        .iter()
        .find(|m| m.odata_id.contains("NodePowerLimit"))
}
