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

use serde::Serialize;

/// Vendor / form factor family of a BMC, as told apart by its chassis member URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HardwareClass {
    Gigabyte,
    HpeRiver,
    /// HPE Mountain / Olympus blades
    HpeMountain,
    Intel,
    OpenBmc,
    Cray,
    Unknown,
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareClass::Gigabyte => "Gigabyte",
            HardwareClass::HpeRiver => "HPE River",
            HardwareClass::HpeMountain => "HPE Mountain",
            HardwareClass::Intel => "Intel",
            HardwareClass::OpenBmc => "OpenBMC",
            HardwareClass::Cray => "Cray",
            HardwareClass::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

// Member URI fragments per class. A member matches when it contains any of them.
const GIGABYTE_MEMBERS: &[&str] = &["/Chassis/Self"];
const HPE_RIVER_MEMBERS: &[&str] = &["/Chassis/1"];
const HPE_MOUNTAIN_MEMBERS: &[&str] = &["/Chassis/Node", "/Chassis/Enclosure"];
const INTEL_MEMBERS: &[&str] = &["/Chassis/RackMount"];
const OPENBMC_MEMBERS: &[&str] = &["/Chassis/BMC_0"];

// Order matters: first match wins.
const MEMBER_DISCRIMINATORS: &[(HardwareClass, &[&str])] = &[
    (HardwareClass::Gigabyte, GIGABYTE_MEMBERS),
    (HardwareClass::HpeRiver, HPE_RIVER_MEMBERS),
    (HardwareClass::HpeMountain, HPE_MOUNTAIN_MEMBERS),
    (HardwareClass::Intel, INTEL_MEMBERS),
    (HardwareClass::OpenBmc, OPENBMC_MEMBERS),
];

// Exact chassis member paths used when the whole BMC has to be named once.
const TOPOLOGY_DISCRIMINATORS: &[(HardwareClass, &str)] = &[
    (HardwareClass::Cray, "/redfish/v1/Chassis/Enclosure"),
    (HardwareClass::Gigabyte, "/redfish/v1/Chassis/Self"),
    (HardwareClass::HpeRiver, "/redfish/v1/Chassis/1"),
    (HardwareClass::Intel, "/redfish/v1/Chassis/RackMount"),
    (HardwareClass::OpenBmc, "/redfish/v1/Chassis/BMC_0"),
];

impl HardwareClass {
    /// Whether a chassis member URI belongs to this class. The checks are independent:
    /// one URI may satisfy more than one class.
    pub fn matches_member(&self, odata_id: &str) -> bool {
        MEMBER_DISCRIMINATORS
            .iter()
            .find(|(class, _)| class == self)
            .is_some_and(|(_, fragments)| fragments.iter().any(|f| odata_id.contains(f)))
    }
}

/// Class of a single chassis member. Classification is per member, a multi chassis
/// BMC can have members of different classes.
pub fn classify_chassis_member(odata_id: &str) -> HardwareClass {
    MEMBER_DISCRIMINATORS
        .iter()
        .find(|(_, fragments)| fragments.iter().any(|f| odata_id.contains(f)))
        .map(|(class, _)| *class)
        .unwrap_or(HardwareClass::Unknown)
}

/// Class of a whole BMC from its Chassis collection members: the first member that is
/// exactly one of the well known paths decides.
pub fn classify_topology<S: AsRef<str>>(members: &[S]) -> HardwareClass {
    members
        .iter()
        .find_map(|m| {
            TOPOLOGY_DISCRIMINATORS
                .iter()
                .find(|(_, path)| m.as_ref() == *path)
                .map(|(class, _)| *class)
        })
        .unwrap_or(HardwareClass::Unknown)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XnameForm {
    // x<N>c<0-7>s<N>b<N>, x<N>c<0-7>r<N>b<N>, x<N>c<0-7>b<N>
    Controller,
    // x<N>c<0-7>, x<N>c<0-7>r<N>
    ChassisOrSlot,
}

fn digits(s: &str) -> Option<&str> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    (end > 0).then(|| &s[end..])
}

fn tagged_number(s: &str, tag: char) -> Option<&str> {
    digits(s.strip_prefix(tag)?)
}

// Parses the whole of `s` as one xname form.
fn xname_form(s: &str) -> Option<XnameForm> {
    let rest = tagged_number(s, 'x')?;
    let rest = rest.strip_prefix('c')?;
    let rest = rest.strip_prefix(|c: char| ('0'..='7').contains(&c))?;
    if rest.is_empty() {
        return Some(XnameForm::ChassisOrSlot);
    }
    fn controller(r: &str) -> Option<&str> {
        tagged_number(r, 'b').filter(|r| r.is_empty())
    }
    match rest.chars().next()? {
        's' => controller(tagged_number(rest, 's')?).map(|_| XnameForm::Controller),
        'r' => {
            let after_slot = tagged_number(rest, 'r')?;
            if after_slot.is_empty() {
                Some(XnameForm::ChassisOrSlot)
            } else {
                controller(after_slot).map(|_| XnameForm::Controller)
            }
        }
        'b' => controller(rest).map(|_| XnameForm::Controller),
        _ => None,
    }
}

// Leftmost suffix of `s` that is exactly `form`.
fn find_suffix(s: &str, form: XnameForm) -> Option<&str> {
    s.match_indices('x')
        .map(|(i, _)| &s[i..])
        .find(|suffix| xname_form(suffix) == Some(form))
}

/// Maps a hardware identifier to the host name of its management controller.
///
/// A trailing node/router/chassis BMC xname is returned on its own; a bare chassis or
/// router slot gets the first controller, `b0`. Host names, IP addresses and anything
/// else come back unchanged.
pub fn resolve_controller_name(hardware_id: &str) -> String {
    if let Some(name) = find_suffix(hardware_id, XnameForm::Controller) {
        return name.to_string();
    }
    if let Some(name) = find_suffix(hardware_id, XnameForm::ChassisOrSlot) {
        return format!("{name}b0");
    }
    hardware_id.to_string()
}
