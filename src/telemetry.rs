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
//! Power and thermal readings a BMC must publish for telemetry collection.
//!
//! Which readings are required depends on the hardware class of each chassis member.
//! The class checks are independent, a member matching several classes gets every
//! rule set that applies.

use serde_json::Value;

use crate::classify::HardwareClass;
use crate::network::Transport;
use crate::report::Report;
use crate::walker::CHASSIS_PATH;

pub const LABEL_POLL: &str = "telemetryPoll";
pub const LABEL_POWER: &str = "telemetryPoll power";
pub const LABEL_THERMAL: &str = "telemetryPoll thermal";

// An absent array is treated as an empty one.
fn entries<'a>(doc: &'a Value, field: &str) -> &'a [Value] {
    doc.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn has(v: &Value, field: &str) -> bool {
    v.get(field).is_some()
}

fn has_hpe_oem(v: &Value) -> bool {
    v.get("Oem").is_some_and(|oem| has(oem, "Hpe"))
}

fn named(v: &Value) -> bool {
    v.get("Name")
        .and_then(Value::as_str)
        .is_some_and(|n| !n.is_empty())
}

/// `PowerControl[0].PowerMetrics.AverageConsumedWatts`, with a Name on the control or the
/// document and a PhysicalContext on the control (or an HPE OEM block).
pub fn has_avg_consumed_watts(power: &Value) -> bool {
    let Some(control) = entries(power, "PowerControl").first() else {
        return false;
    };
    let Some(metrics) = control.get("PowerMetrics") else {
        return false;
    };
    (has(control, "Name") || has(power, "Name"))
        && (has(control, "PhysicalContext") || has_hpe_oem(power))
        && has(metrics, "AverageConsumedWatts")
}

/// Every named voltage sensor has a reading and a physical context.
pub fn has_voltages(power: &Value) -> bool {
    entries(power, "Voltages")
        .iter()
        .filter(|v| named(v))
        .all(|v| has(v, "ReadingVolts") && has(v, "PhysicalContext"))
}

/// Every named power supply reports its line input voltage.
pub fn has_line_voltages(power: &Value) -> bool {
    entries(power, "PowerSupplies")
        .iter()
        .filter(|p| named(p))
        .all(|p| has(p, "LineInputVoltage"))
}

pub fn has_fans(thermal: &Value) -> bool {
    entries(thermal, "Fans").iter().all(|fan| {
        has(fan, "Reading")
            && has(fan, "Name")
            && (has(fan, "PhysicalContext") || has_hpe_oem(fan))
    })
}

/// Every temperature sensor that is not reported Absent has a reading, name and context.
pub fn has_temperatures(thermal: &Value) -> bool {
    entries(thermal, "Temperatures")
        .iter()
        .filter(|t| t.pointer("/Status/State").and_then(Value::as_str) != Some("Absent"))
        .all(|t| has(t, "ReadingCelsius") && has(t, "Name") && has(t, "PhysicalContext"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    AvgConsumedWatts,
    Voltages,
    LineVoltages,
    Fans,
    Temperatures,
}

impl Reading {
    fn present(self, power: &Value, thermal: &Value) -> bool {
        match self {
            Reading::AvgConsumedWatts => has_avg_consumed_watts(power),
            Reading::Voltages => has_voltages(power),
            Reading::LineVoltages => has_line_voltages(power),
            Reading::Fans => has_fans(thermal),
            Reading::Temperatures => has_temperatures(thermal),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Reading::AvgConsumedWatts | Reading::Voltages | Reading::LineVoltages => LABEL_POWER,
            Reading::Fans | Reading::Temperatures => LABEL_THERMAL,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Reading::AvgConsumedWatts => "AverageConsumedWatts missing",
            Reading::Voltages | Reading::LineVoltages => "Voltages missing",
            Reading::Fans => "Fans missing",
            Reading::Temperatures => "Temperatures missing",
        }
    }
}

// Mountain controllers are not polled, only what they publish anyway is checked.
const RULES: &[(HardwareClass, &[Reading])] = &[
    (
        HardwareClass::Gigabyte,
        &[
            Reading::AvgConsumedWatts,
            Reading::Voltages,
            Reading::Fans,
            Reading::Temperatures,
        ],
    ),
    (
        HardwareClass::HpeMountain,
        &[Reading::Voltages, Reading::Temperatures],
    ),
    (
        HardwareClass::HpeRiver,
        &[
            Reading::AvgConsumedWatts,
            Reading::LineVoltages,
            Reading::Fans,
            Reading::Temperatures,
        ],
    ),
];

/// Checks the Power and Thermal documents of one chassis member. Returns the number of
/// missing readings, or 1 if either document could not be fetched.
pub fn poll_chassis<T: Transport + ?Sized>(
    transport: &T,
    member: &str,
    report: &mut Report,
) -> u32 {
    let controller = transport.controller();
    let power = match transport.get_json(&format!("{member}/Power")) {
        Ok(v) => v,
        Err(failure) => {
            report.error(LABEL_POWER, failure.label, failure.message);
            return 1;
        }
    };
    let thermal = match transport.get_json(&format!("{member}/Thermal")) {
        Ok(v) => v,
        Err(failure) => {
            report.error(LABEL_THERMAL, failure.label, failure.message);
            return 1;
        }
    };

    let mut failures = 0;
    for (class, readings) in RULES {
        if !class.matches_member(member) {
            continue;
        }
        for reading in *readings {
            if !reading.present(&power, &thermal) {
                report.error(reading.label(), controller, reading.message());
                failures += 1;
            }
        }
    }
    failures
}

/// Polls every chassis member of the BMC.
pub fn telemetry_poll<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let collection = match transport.get_json(CHASSIS_PATH) {
        Ok(v) => v,
        Err(failure) => {
            report.error(LABEL_POLL, failure.label, failure.message);
            return 1;
        }
    };
    let Some(members) = crate::jsonmap::member_ids(&collection) else {
        report.error(LABEL_POLL, format!("{CHASSIS_PATH} .Members"), "missing");
        return 1;
    };
    let failures: u32 = members
        .iter()
        .map(|member| poll_chassis(transport, member, report))
        .sum();
    if failures == 0 {
        report.ok(LABEL_POLL);
    }
    failures
}
