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
//! Walks the Redfish tree of one BMC and validates every resource it finds.
//!
//! Every walk is sequential. A failed fetch is reported and counted, then the walk moves
//! on to the next sibling. Only a collection root without `Members` ends the walk of that
//! resource kind.

use serde_json::Value;
use tracing::debug;

use crate::model::{ChassisType, EventService, ResourceState, ResourceStatus};
use crate::network::Transport;
use crate::report::Report;
use crate::schema::{self, SchemaRule};

pub const LABEL_URIS: &str = "checkRedfishURIs";
pub const LABEL_CHASSIS: &str = "checkRedfishChassis";
pub const LABEL_MANAGERS: &str = "checkRedfishManagers";
pub const LABEL_EVENT_SERVICE: &str = "checkRedfishEventService";
pub const LABEL_SYSTEMS: &str = "checkRedfishSystems";
pub const LABEL_MEMORY: &str = "checkRedfishSystemsMemory";
pub const LABEL_DIMMS: &str = "checkRedfishSystemsMemoryDimms";
pub const LABEL_PROCESSORS: &str = "checkRedfishSystemsProcessors";
pub const LABEL_CPU: &str = "checkRedfishSystemsProcessorsCPU";
pub const LABEL_UPDATE_SERVICE: &str = "checkRedfishUpdateService";
pub const LABEL_FIRMWARE: &str = "checkRedfishFirmwareInventory";
pub const LABEL_FIRMWARE_COMP: &str = "checkRedfishFirmwareInventoryComp";

pub const CHASSIS_PATH: &str = "/redfish/v1/Chassis";
pub const SYSTEMS_PATH: &str = "/redfish/v1/Systems";
pub const MANAGERS_PATH: &str = "/redfish/v1/Managers";
pub const EVENT_SERVICE_PATH: &str = "/redfish/v1/EventService";
pub const UPDATE_SERVICE_PATH: &str = "/redfish/v1/UpdateService";

const SIMPLE_UPDATE_ACTION: &str = "#UpdateService.SimpleUpdate";

/// Root documents checked by `check_uris`.
const URI_CHECKS: &[(&str, &[SchemaRule])] = &[
    ("/redfish/v1/", schema::SERVICE_ROOT_RULES),
    (CHASSIS_PATH, schema::COLLECTION_RULES),
    (SYSTEMS_PATH, schema::COLLECTION_RULES),
    (MANAGERS_PATH, schema::COLLECTION_RULES),
    (UPDATE_SERVICE_PATH, schema::UPDATE_SERVICE_ROOT_RULES),
    (EVENT_SERVICE_PATH, schema::EVENT_SERVICE_ROOT_RULES),
];

// GET and decode, turning a failure into an Error finding.
fn fetch<T: Transport + ?Sized>(
    transport: &T,
    label: &str,
    path: &str,
    report: &mut Report,
) -> Option<Value> {
    debug!("{label} checking {path}");
    match transport.get_json(path) {
        Ok(v) => Some(v),
        Err(failure) => {
            report.error(label, failure.label, failure.message);
            None
        }
    }
}

// Members of a collection root, or the failure count that ends this resource kind.
fn collection_members<T: Transport + ?Sized>(
    transport: &T,
    label: &str,
    path: &str,
    report: &mut Report,
) -> Result<Vec<String>, u32> {
    let collection = fetch(transport, label, path, report).ok_or(1u32)?;
    crate::jsonmap::member_ids(&collection).ok_or_else(|| {
        report.error(label, format!("{path} .Members"), "missing");
        1
    })
}

fn link<'a>(resource: &'a Value, field: &str) -> Option<&'a str> {
    resource.get(field)?.get("@odata.id")?.as_str()
}

fn finish(label: &str, failures: u32, report: &mut Report) -> u32 {
    if failures == 0 {
        report.ok(label);
    }
    failures
}

/// Checks the service root and the top level collections for their expected links.
pub fn check_uris<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let mut failures = 0;
    for (path, rules) in URI_CHECKS {
        let Some(response) = fetch(transport, LABEL_URIS, path, report) else {
            failures += 1;
            continue;
        };
        failures += schema::validate(LABEL_URIS, rules, path, &response, report);
    }
    finish(LABEL_URIS, failures, report)
}

/// Validates every Enclosure and RackMount chassis. Other chassis are noted and skipped.
pub fn check_chassis<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let members = match collection_members(transport, LABEL_CHASSIS, CHASSIS_PATH, report) {
        Ok(m) => m,
        Err(n) => return n,
    };
    let mut failures = 0;
    for member in members {
        let Some(response) = fetch(transport, LABEL_CHASSIS, &member, report) else {
            failures += 1;
            continue;
        };
        let chassis_type = response
            .get("ChassisType")
            .and_then(|t| serde_json::from_value::<ChassisType>(t.clone()).ok());
        match chassis_type {
            Some(t) if t.is_validated() => {
                failures += schema::validate(
                    LABEL_CHASSIS,
                    schema::CHASSIS_RULES,
                    &member,
                    &response,
                    report,
                );
            }
            _ => {
                let kind = response
                    .get("ChassisType")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown chassis type");
                report.info(
                    LABEL_CHASSIS,
                    format!("Skipping {member}"),
                    format!("URI is for a {kind}"),
                );
            }
        }
    }
    finish(LABEL_CHASSIS, failures, report)
}

pub fn check_managers<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let members = match collection_members(transport, LABEL_MANAGERS, MANAGERS_PATH, report) {
        Ok(m) => m,
        Err(n) => return n,
    };
    let mut failures = 0;
    for member in members {
        let Some(response) = fetch(transport, LABEL_MANAGERS, &member, report) else {
            failures += 1;
            continue;
        };
        failures += schema::validate(
            LABEL_MANAGERS,
            schema::MANAGER_RULES,
            &member,
            &response,
            report,
        );
    }
    finish(LABEL_MANAGERS, failures, report)
}

/// Picks the field set by EventService schema version: `EventTypesForSubscription`
/// before v1.3.0, `RegistryPrefixes` and `ResourceTypes` from then on.
pub fn check_event_service<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let Some(response) = fetch(transport, LABEL_EVENT_SERVICE, EVENT_SERVICE_PATH, report) else {
        return 1;
    };
    let service: EventService = serde_json::from_value(response.clone()).unwrap_or_default();
    let rules = if service.is_legacy() {
        schema::EVENT_SERVICE_LEGACY_RULES
    } else {
        schema::EVENT_SERVICE_RULES
    };
    let failures = schema::validate(
        LABEL_EVENT_SERVICE,
        rules,
        EVENT_SERVICE_PATH,
        &response,
        report,
    );
    finish(LABEL_EVENT_SERVICE, failures, report)
}

/// Validates every system along with its memory and processor inventory.
pub fn check_systems<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let members = match collection_members(transport, LABEL_SYSTEMS, SYSTEMS_PATH, report) {
        Ok(m) => m,
        Err(n) => return n,
    };
    let mut failures = 0;
    for member in members {
        let Some(response) = fetch(transport, LABEL_SYSTEMS, &member, report) else {
            failures += 1;
            continue;
        };
        failures += schema::validate(
            LABEL_SYSTEMS,
            schema::SYSTEM_RULES,
            &member,
            &response,
            report,
        );
        if let Some(memory) = link(&response, "Memory") {
            failures += check_memory(transport, memory, report);
        }
        if let Some(processors) = link(&response, "Processors") {
            failures += check_processors(transport, processors, report);
        }
    }
    finish(LABEL_SYSTEMS, failures, report)
}

// Nested collections are validated themselves, and every member they list is walked.
fn check_nested<T, F>(
    transport: &T,
    label: &str,
    path: &str,
    report: &mut Report,
    mut each: F,
) -> u32
where
    T: Transport + ?Sized,
    F: FnMut(&T, &str, &mut Report) -> u32,
{
    let Some(response) = fetch(transport, label, path, report) else {
        return 1;
    };
    let mut failures = schema::validate(
        label,
        schema::COUNTED_COLLECTION_RULES,
        path,
        &response,
        report,
    );
    for member in crate::jsonmap::member_ids(&response).unwrap_or_default() {
        failures += each(transport, &member, report);
    }
    failures
}

pub fn check_memory<T: Transport + ?Sized>(transport: &T, path: &str, report: &mut Report) -> u32 {
    check_nested(transport, LABEL_MEMORY, path, report, check_dimm)
}

/// DIMM slots reporting `Status.State == Absent` are empty and not validated.
pub fn check_dimm<T: Transport + ?Sized>(transport: &T, path: &str, report: &mut Report) -> u32 {
    let Some(response) = fetch(transport, LABEL_DIMMS, path, report) else {
        return 1;
    };
    let status: ResourceStatus = response
        .get("Status")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or_default();
    if status.state == Some(ResourceState::Absent) {
        report.info(LABEL_DIMMS, path, "Not present");
        return 0;
    }
    schema::validate(
        LABEL_DIMMS,
        schema::MEMORY_DIMM_RULES,
        path,
        &response,
        report,
    )
}

pub fn check_processors<T: Transport + ?Sized>(
    transport: &T,
    path: &str,
    report: &mut Report,
) -> u32 {
    check_nested(transport, LABEL_PROCESSORS, path, report, check_cpu)
}

pub fn check_cpu<T: Transport + ?Sized>(transport: &T, path: &str, report: &mut Report) -> u32 {
    let Some(response) = fetch(transport, LABEL_CPU, path, report) else {
        return 1;
    };
    schema::validate(LABEL_CPU, schema::PROCESSOR_RULES, path, &response, report)
}

/// Validates the SimpleUpdate action and the firmware inventory behind the update service.
pub fn check_update_service<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    let Some(response) = fetch(transport, LABEL_UPDATE_SERVICE, UPDATE_SERVICE_PATH, report) else {
        return 1;
    };
    let mut failures = 0;
    match response
        .get("Actions")
        .and_then(|a| a.get(SIMPLE_UPDATE_ACTION))
    {
        Some(action) => {
            failures += schema::validate(
                LABEL_UPDATE_SERVICE,
                schema::SIMPLE_UPDATE_ACTION_RULES,
                UPDATE_SERVICE_PATH,
                action,
                report,
            );
        }
        None => {
            report.warning(
                LABEL_UPDATE_SERVICE,
                format!("{UPDATE_SERVICE_PATH} .Actions.{SIMPLE_UPDATE_ACTION}"),
                "Missing",
            );
            failures += 1;
        }
    }
    match link(&response, "FirmwareInventory") {
        Some(inventory) => failures += check_firmware_inventory(transport, inventory, report),
        None => {
            report.warning(
                LABEL_UPDATE_SERVICE,
                format!("{UPDATE_SERVICE_PATH} .FirmwareInventory"),
                "Missing",
            );
            failures += 1;
        }
    }
    finish(LABEL_UPDATE_SERVICE, failures, report)
}

pub fn check_firmware_inventory<T: Transport + ?Sized>(
    transport: &T,
    path: &str,
    report: &mut Report,
) -> u32 {
    let Some(response) = fetch(transport, LABEL_FIRMWARE, path, report) else {
        return 1;
    };
    let mut failures = schema::validate(
        LABEL_FIRMWARE,
        schema::COLLECTION_RULES,
        path,
        &response,
        report,
    );
    for member in crate::jsonmap::member_ids(&response).unwrap_or_default() {
        failures += match fetch(transport, LABEL_FIRMWARE_COMP, &member, report) {
            Some(component) => schema::validate(
                LABEL_FIRMWARE_COMP,
                schema::FIRMWARE_COMPONENT_RULES,
                &member,
                &component,
                report,
            ),
            None => 1,
        };
    }
    failures
}

/// Runs every resource kind in turn and returns the grand total of failures.
pub fn walk_all<T: Transport + ?Sized>(transport: &T, report: &mut Report) -> u32 {
    check_uris(transport, report)
        + check_chassis(transport, report)
        + check_managers(transport, report)
        + check_event_service(transport, report)
        + check_systems(transport, report)
        + check_update_service(transport, report)
}
