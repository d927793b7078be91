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

//! Declarative field rules for Redfish resources and the validator that applies them.

use std::fmt;

use serde_json::Value;

use crate::report::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    List,
    Object,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::List => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::List => "list",
            FieldType::Object => "object",
        };
        f.write_str(name)
    }
}

/// Runtime type name of a JSON value, in the same vocabulary as [`FieldType`].
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaRule {
    pub field: &'static str,
    pub expected: FieldType,
}

const fn rule(field: &'static str, expected: FieldType) -> SchemaRule {
    SchemaRule { field, expected }
}

use FieldType::{Integer, List, Object, String as Str};

pub const SERVICE_ROOT_RULES: &[SchemaRule] = &[
    rule("Chassis", Object),
    rule("EventService", Object),
    rule("Managers", Object),
    rule("Systems", Object),
    rule("UpdateService", Object),
];

pub const COLLECTION_RULES: &[SchemaRule] = &[rule("Members", List)];

pub const UPDATE_SERVICE_ROOT_RULES: &[SchemaRule] = &[
    rule("Actions", Object),
    rule("FirmwareInventory", Object),
];

pub const EVENT_SERVICE_ROOT_RULES: &[SchemaRule] = &[rule("Subscriptions", Object)];

pub const CHASSIS_RULES: &[SchemaRule] = &[
    rule("AssetTag", Str),
    rule("SerialNumber", Str),
    rule("Power", Object),
    rule("PartNumber", Str),
    rule("Manufacturer", Str),
    rule("Model", Str),
];

pub const SYSTEM_RULES: &[SchemaRule] = &[
    rule("Actions", Object),
    rule("Bios", Object),
    rule("BiosVersion", Str),
    rule("EthernetInterfaces", Object),
    rule("Manufacturer", Str),
    rule("Memory", Object),
    rule("MemorySummary", Object),
    rule("Model", Str),
    rule("PartNumber", Str),
    rule("PowerState", Str),
    rule("Processors", Object),
    rule("SerialNumber", Str),
    rule("SKU", Str),
    rule("Status", Object),
];

// Memory and Processors collections share one shape.
pub const COUNTED_COLLECTION_RULES: &[SchemaRule] = &[
    rule("Members", List),
    rule("Members@odata.count", Integer),
];

pub const MEMORY_DIMM_RULES: &[SchemaRule] = &[
    rule("CapacityMiB", Integer),
    rule("Id", Str),
    rule("MemoryDeviceType", Str),
    rule("Manufacturer", Str),
    rule("PartNumber", Str),
    rule("SerialNumber", Str),
    rule("OperatingSpeedMhz", Integer),
];

pub const PROCESSOR_RULES: &[SchemaRule] = &[
    rule("Manufacturer", Str),
    rule("Model", Str),
    rule("SerialNumber", Str),
    rule("TotalCores", Integer),
    rule("TotalThreads", Integer),
    rule("MaxSpeedMHz", Integer),
];

pub const MANAGER_RULES: &[SchemaRule] = &[
    rule("Name", Str),
    rule("Actions", Object),
    rule("ManagerType", Str),
    rule("NetworkProtocol", Object),
];

/// EventService below v1.3.0
pub const EVENT_SERVICE_LEGACY_RULES: &[SchemaRule] = &[
    rule("EventTypesForSubscription", List),
    rule("Subscriptions", Object),
];

/// EventService v1.3.0 and later
pub const EVENT_SERVICE_RULES: &[SchemaRule] = &[
    rule("RegistryPrefixes", List),
    rule("ResourceTypes", List),
    rule("Subscriptions", Object),
];

pub const SIMPLE_UPDATE_ACTION_RULES: &[SchemaRule] = &[
    rule("@Redfish.ActionInfo", Str),
    rule("target", Str),
];

pub const FIRMWARE_COMPONENT_RULES: &[SchemaRule] = &[
    rule("@odata.id", Str),
    rule("Id", Str),
    rule("Version", Str),
    rule("Name", Str),
];

/// Checks every rule against `response` and returns how many fields failed.
///
/// Absent, empty and zero fields are Warnings keyed `"<path> .<field>"`; a field of the
/// wrong type is an Error keyed by the field name. Passing fields say nothing, the
/// caller owns the OK line.
pub fn validate(
    label: &str,
    rules: &[SchemaRule],
    path: &str,
    response: &Value,
    report: &mut Report,
) -> u32 {
    let mut failures = 0;
    for r in rules {
        let Some(value) = response.get(r.field) else {
            report.warning(label, format!("{path} .{}", r.field), "Missing");
            failures += 1;
            continue;
        };
        if !r.expected.matches(value) {
            report.error(
                label,
                r.field,
                format!("Is a {} not a {}", json_type_name(value), r.expected),
            );
            failures += 1;
            continue;
        }
        let trivial = match value {
            Value::String(s) => s.is_empty().then_some("Zero length or empty"),
            Value::Object(o) => o.is_empty().then_some("Zero length or empty"),
            Value::Number(n) => (n.as_i64() == Some(0) || n.as_u64() == Some(0)).then_some("Is zero"),
            _ => None,
        };
        if let Some(message) = trivial {
            report.warning(label, format!("{path} .{}", r.field), message);
            failures += 1;
        }
    }
    failures
}
