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
//! Power capping scenario across the three payload shapes BMCs use for it.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::model::power::node_power_limit;
use crate::model::{AccPowerLimit, Chassis, Collection, Control, ControlMode, Power};
use crate::network::Transport;
use crate::report::ScenarioOutcome;
use crate::walker::CHASSIS_PATH;
use crate::HwvalError;

const GIGABYTE_LIMIT_TRIGGER: &str = "/redfish/v1/Chassis/Self/Power/Actions/LimitTrigger";
// How far below the maximum the test cap is set.
const CAP_OFFSET: i64 = 100;

/// The power capping interface a BMC exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapScheme {
    /// Olympus `Controls/NodePowerLimit`, written with a `.Deep` PATCH of the collection
    Controls { control: String },
    /// Generic `Power.PowerControl[0]`
    PowerControl { power: String },
    /// HPE Apollo `HpeServerAccPowerLimit`: resource to read, action target to write
    PowerService { resource: String, target: String },
}

impl CapScheme {
    fn uri(&self) -> &str {
        match self {
            CapScheme::Controls { control } => control,
            CapScheme::PowerControl { power } => power,
            CapScheme::PowerService { target, .. } => target,
        }
    }

    fn is_gigabyte(&self) -> bool {
        self.uri().contains("Self")
    }
}

impl fmt::Display for CapScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapScheme::Controls { control } => write!(f, "Chassis Controls {control}"),
            CapScheme::PowerControl { power } => write!(f, "Chassis Power PowerControl {power}"),
            CapScheme::PowerService { resource, .. } => {
                write!(f, "HPE ServerAccPowerLimit {resource}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerCapSettings {
    pub min: i64,
    pub max: i64,
    pub current: i64,
}

fn fetch<T: Transport + ?Sized, D: DeserializeOwned>(
    transport: &T,
    path: &str,
) -> Result<D, HwvalError> {
    let value: Value = transport.get_json(path)?;
    serde_json::from_value(value.clone()).map_err(|e| HwvalError::JsonDeserializeError {
        url: path.to_string(),
        body: value.to_string(),
        source: e,
    })
}

fn watts(value: Option<f64>, key: &str, url: &str) -> Result<i64, HwvalError> {
    value
        .map(|w| w.round() as i64)
        .ok_or_else(|| HwvalError::MissingKey {
            key: key.to_string(),
            url: url.to_string(),
        })
}

// Path with its last `n` segments removed.
fn strip_segments(path: &str, n: usize) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    segments[..segments.len().saturating_sub(n)].join("/")
}

/// First chassis member that is neither a mezzanine card nor the enclosure.
pub fn select_chassis<T: Transport + ?Sized>(transport: &T) -> Result<Option<String>, HwvalError> {
    let collection: Collection = fetch(transport, CHASSIS_PATH)?;
    Ok(collection
        .members
        .into_iter()
        .map(|m| m.odata_id)
        .find(|id| !id.contains("Mezz") && !id.contains("Enclosure")))
}

/// Tries Controls, then the HPE power limit link, then falls back to PowerControl.
pub fn determine_cap_scheme<T: Transport + ?Sized>(
    transport: &T,
    chassis_path: &str,
) -> Result<CapScheme, HwvalError> {
    info!("Determining which power cap scheme and URI to use.");
    let chassis: Chassis = fetch(transport, chassis_path)?;

    if let Some(controls) = &chassis.controls {
        let collection: Collection = fetch(transport, &controls.odata_id)?;
        if let Some(member) = node_power_limit(&collection.members) {
            info!("Using Chassis Controls for power capping.");
            return Ok(CapScheme::Controls {
                control: member.odata_id.clone(),
            });
        }
    }

    let power_path = chassis
        .power
        .map(|p| p.odata_id)
        .ok_or_else(|| HwvalError::MissingKey {
            key: "Power".to_string(),
            url: chassis_path.to_string(),
        })?;
    let power: Power = fetch(transport, &power_path)?;
    if let Some(limit_path) = power.hpe_power_limit_link() {
        let limit: AccPowerLimit = fetch(transport, limit_path)?;
        let target = limit
            .configure_target()
            .ok_or_else(|| HwvalError::MissingKey {
                key: "Actions.#HpeServerAccPowerLimit.ConfigurePowerLimit".to_string(),
                url: limit_path.to_string(),
            })?;
        info!("Using HPE ServerAccPowerLimit for power capping.");
        return Ok(CapScheme::PowerService {
            resource: limit_path.to_string(),
            target: target.to_string(),
        });
    }

    info!("Using Chassis Power PowerControl for power capping.");
    Ok(CapScheme::PowerControl { power: power_path })
}

/// Turns capping on or off. Olympus nodes enable capping with the limit itself.
pub fn set_capping<T: Transport + ?Sized>(
    transport: &T,
    scheme: &CapScheme,
    enabled: bool,
) -> Result<(), HwvalError> {
    if let CapScheme::Controls { control } = scheme {
        if enabled {
            info!("Olympus power capping will be enabled at power capping time.");
            return Ok(());
        }
        let payload = json!({
            "Members": [{"@odata.id": control, "ControlMode": ControlMode::Disabled}]
        });
        transport.patch(&format!("{}.Deep", strip_segments(control, 1)), &payload)?;
        return Ok(());
    }

    if scheme.is_gigabyte() {
        let trigger = if enabled { "Activate" } else { "Deactivate" };
        transport.post(GIGABYTE_LIMIT_TRIGGER, &json!({ "PowerLimitTrigger": trigger }))?;
        return Ok(());
    }

    match scheme {
        CapScheme::PowerControl { power } => {
            let chassis_id = power.rsplit('/').nth(1).unwrap_or_default();
            let state = if enabled { "Enabled" } else { "Disabled" };
            transport.patch(
                &format!("/redfish/v1/Systems/{chassis_id}/BIOS/settings"),
                &json!({ "Attributes": { "DynamicPowerCapping": state } }),
            )?;
        }
        CapScheme::PowerService { target, .. } => {
            transport.patch(
                &strip_segments(target, 3),
                &json!({
                    "PowerRegulationEnabled": enabled,
                    "PowerRegulatorMode": "UserConfig",
                }),
            )?;
        }
        CapScheme::Controls { .. } => {}
    }
    Ok(())
}

/// Reads min, max and current cap from the scheme's resource.
pub fn read_settings<T: Transport + ?Sized>(
    transport: &T,
    scheme: &CapScheme,
) -> Result<PowerCapSettings, HwvalError> {
    match scheme {
        CapScheme::Controls { control } => {
            let c: Control = fetch(transport, control)?;
            Ok(PowerCapSettings {
                min: watts(c.setting_range_min, "SettingRangeMin", control)?,
                max: watts(c.setting_range_max, "SettingRangeMax", control)?,
                current: watts(c.set_point, "SetPoint", control)?,
            })
        }
        CapScheme::PowerControl { power } => {
            let p: Power = fetch(transport, power)?;
            let control = p.power_control.first().ok_or_else(|| HwvalError::MissingKey {
                key: "PowerControl".to_string(),
                url: power.clone(),
            })?;
            let current = watts(
                control.power_limit.and_then(|l| l.limit_in_watts),
                "PowerControl[0].PowerLimit.LimitInWatts",
                power,
            )?;
            let vendor = control
                .oem
                .and_then(|o| o.vendor)
                .and_then(|v| v.power_limit);
            match vendor {
                Some(range) => Ok(PowerCapSettings {
                    min: watts(range.min, "PowerControl[0].Oem.Vendor.PowerLimit.Min", power)?,
                    max: watts(range.max, "PowerControl[0].Oem.Vendor.PowerLimit.Max", power)?,
                    current,
                }),
                None => Ok(PowerCapSettings {
                    min: watts(
                        control.power_metrics.and_then(|m| m.min_consumed_watts),
                        "PowerControl[0].PowerMetrics.MinConsumedWatts",
                        power,
                    )?,
                    max: watts(
                        control.power_capacity_watts,
                        "PowerControl[0].PowerCapacityWatts",
                        power,
                    )?,
                    current,
                }),
            }
        }
        CapScheme::PowerService { resource, .. } => {
            let l: AccPowerLimit = fetch(transport, resource)?;
            let range = l.power_limit_ranges.first().copied().unwrap_or_default();
            let limit = l.power_limits.first().copied().unwrap_or_default();
            Ok(PowerCapSettings {
                min: watts(range.minimum_power_limit, "PowerLimitRanges[0].MinimumPowerLimit", resource)?,
                max: watts(range.maximum_power_limit, "PowerLimitRanges[0].MaximumPowerLimit", resource)?,
                current: watts(limit.power_limit_in_watts, "PowerLimits[0].PowerLimitInWatts", resource)?,
            })
        }
    }
}

/// Writes a new cap. `value` has to be inside the range in `settings`.
pub fn set_power_cap<T: Transport + ?Sized>(
    transport: &T,
    scheme: &CapScheme,
    settings: &PowerCapSettings,
    value: i64,
) -> Result<(), HwvalError> {
    info!("Setting the power cap of {} to {value}.", scheme.uri());
    if value < settings.min || value > settings.max {
        return Err(HwvalError::Call {
            label: scheme.uri().to_string(),
            message: format!(
                "Power capping value {value} out of range {}..{}",
                settings.min, settings.max
            ),
        });
    }
    match scheme {
        CapScheme::Controls { control } => {
            let payload = json!({
                "Members": [{
                    "@odata.id": control,
                    "ControlMode": ControlMode::Automatic,
                    "SetPoint": value,
                }]
            });
            transport.patch(&format!("{}.Deep", strip_segments(control, 1)), &payload)?;
        }
        CapScheme::PowerService { target, .. } => {
            let payload = json!({
                "PowerLimits": [{"PowerLimitInWatts": value, "ZoneNumber": 0}]
            });
            transport.post(target, &payload)?;
        }
        CapScheme::PowerControl { power } => {
            let payload = json!({
                "PowerControl": [{"PowerLimit": {"LimitInWatts": value}}]
            });
            transport.patch(power, &payload)?;
        }
    }
    Ok(())
}

pub struct PowerCapTest<T: Transport> {
    transport: T,
}

impl<T: Transport> PowerCapTest<T> {
    pub fn new(transport: T) -> Self {
        PowerCapTest { transport }
    }

    /// Enables capping, sets the cap below the maximum, verifies the read-back, then
    /// restores the original cap and disables capping again.
    pub fn run(&self) -> ScenarioOutcome {
        let mut outcome = ScenarioOutcome::default();
        let t = &self.transport;

        let chassis = match select_chassis(t) {
            Ok(Some(c)) => c,
            Ok(None) | Err(_) => {
                error!("FAIL: Unable to determine which chassis entry to use for power capping.");
                outcome.abort();
                return outcome;
            }
        };
        info!("Using node {chassis}.");
        let scheme = match determine_cap_scheme(t, &chassis) {
            Ok(s) => s,
            Err(e) => {
                error!("FAIL: Unable to determine which type of power capping to use. {e}");
                outcome.abort();
                return outcome;
            }
        };
        info!("Power capping through {scheme}.");
        if let Err(e) = set_capping(t, &scheme, true) {
            error!("FAIL: Could not enable power capping. {e}");
            outcome.abort();
            return outcome;
        }

        let mut outcome = self.cap_and_restore(&scheme);
        if let Err(e) = set_capping(t, &scheme, false) {
            error!("FAIL: Could not disable power capping. {e}");
            outcome.fail();
        }
        outcome
    }

    // Runs with capping enabled. The caller disables capping on every path out.
    fn cap_and_restore(&self, scheme: &CapScheme) -> ScenarioOutcome {
        let mut outcome = ScenarioOutcome::default();
        let t = &self.transport;

        let original = match read_settings(t, scheme) {
            Ok(s) => s,
            Err(e) => {
                error!("FAIL: Unable to determine current power cap settings. {e}");
                outcome.abort();
                return outcome;
            }
        };
        info!(
            "Current power cap settings: min {} max {} current {}",
            original.min, original.max, original.current
        );

        let target = original.max - CAP_OFFSET;
        if let Err(e) = set_power_cap(t, scheme, &original, target) {
            error!("FAIL: Could not set power cap. {e}");
            outcome.abort();
            return outcome;
        }
        match read_settings(t, scheme) {
            Ok(now) => {
                info!("\tMin: {} expected {}", now.min, original.min);
                info!("\tMax: {} expected {}", now.max, original.max);
                info!("\tCurrent: {} expected {}", now.current, target);
                if now.min != original.min || now.max != original.max || now.current != target {
                    error!("FAIL: Currently set power cap settings does not match expected.");
                    outcome.fail();
                } else {
                    info!("PASS: Power capping succeeded.");
                }
            }
            Err(e) => {
                error!("FAIL: Unable to determine new power cap settings. {e}");
                outcome.fail();
            }
        }

        if let Err(e) = set_power_cap(t, scheme, &original, restore_value(&original)) {
            error!("FAIL: Could not reset power cap. {e}");
            outcome.fail();
        }
        outcome
    }
}

// Nodes with capping off often report a cap of 0; those go back to the maximum.
fn restore_value(original: &PowerCapSettings) -> i64 {
    if (original.min..=original.max).contains(&original.current) {
        original.current
    } else {
        original.max
    }
}
