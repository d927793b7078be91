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
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Event types a BMC may deliver. Sent as plain strings.
pub const ALL_EVENT_TYPES: [&str; 5] = [
    "StatusChange",
    "Alert",
    "ResourceUpdated",
    "ResourceAdded",
    "ResourceRemoved",
];

/// First EventService version that dropped EventTypesForSubscription.
pub const REGISTRY_PREFIX_VERSION: &str = "1.3.0";

/// http://redfish.dmtf.org/schemas/v1/EventService.v1_3_0.json
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct EventService {
    #[serde(rename = "@odata.type")]
    pub odata_type: Option<String>,
}

impl EventService {
    /// Schema version from `@odata.type`, e.g. `#EventService.v1_0_8.EventService`
    /// gives `1.0.8`.
    pub fn schema_version(&self) -> Option<String> {
        let odata_type = self.odata_type.as_deref()?;
        let version = odata_type
            .split('.')
            .find(|part| part.starts_with('v') && part.contains('_'))?;
        Some(version.trim_start_matches('v').replace('_', "."))
    }

    /// True if the service predates registry prefix based subscriptions.
    /// A service that does not advertise its version is treated as current.
    pub fn is_legacy(&self) -> bool {
        match self.schema_version() {
            Some(v) => {
                version_compare::compare_to(&v, REGISTRY_PREFIX_VERSION, version_compare::Cmp::Lt)
                    .unwrap_or(false)
            }
            None => false,
        }
    }
}

/// An EventDestination (subscription) as created and listed by this tool.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EventDestination {
    #[serde(rename = "@odata.id")]
    pub odata_id: Option<String>,
    pub context: Option<String>,
    pub destination: Option<String>,
    pub protocol: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub registry_prefixes: Option<Vec<String>>,
}
