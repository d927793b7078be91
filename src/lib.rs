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
//! Redfish field validation and event subscription smoke tests for the hardware of an
//! HPC cluster.
//!
//! The blocking [`Transport`] is the seam between the checks and a BMC. Validation
//! checks ([`walker`], [`telemetry`]) record [`report::Finding`]s and return a failure
//! count; the end-to-end scenarios ([`power_control`], [`power_cap`],
//! [`telemetry_stream`], [`event_test`]) return a [`report::ScenarioOutcome`].

pub mod auth;
pub mod capmc;
pub mod check;
pub mod classify;
pub mod cluster;
pub mod config;
mod error;
pub mod event_test;
pub mod jsonmap;
pub mod listener;
pub mod model;
pub mod network;
pub mod power_cap;
pub mod power_control;
pub mod report;
pub mod schema;
pub mod subscription;
pub mod telemetry;
pub mod telemetry_stream;
pub mod walker;

#[cfg(test)]
mod testing;

pub use error::HwvalError;
pub use network::{
    CallFailure, CallResult, Endpoint, Payload, RedfishClientPool, RedfishClientPoolBuilder,
    RedfishHttpClient, Scheme, Transport,
};
pub use report::{Finding, Report, ScenarioOutcome, Severity};
