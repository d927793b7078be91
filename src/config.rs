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
use std::{fmt, fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::network::RedfishClientPool;
use crate::HwvalError;

/// Where the event listener binds and where it finds its TLS key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub ip: String,
    pub port: u16,
    /// Directory holding `tls.crt` and `tls.key`
    pub cert_dir: PathBuf,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            ip: "0.0.0.0".to_string(),
            port: 8080,
            cert_dir: PathBuf::from("cert"),
        }
    }
}

/// Waits of the power cycle scenario.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerControlTimings {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub graceful_off_wait: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub transition_wait: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub settle_after_off: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub settle_after_on: Duration,
}

impl Default for PowerControlTimings {
    fn default() -> Self {
        PowerControlTimings {
            graceful_off_wait: Duration::from_secs(300),
            transition_wait: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            poll_attempts: 30,
            settle_after_off: Duration::from_secs(15),
            settle_after_on: Duration::from_secs(30),
        }
    }
}

/// Cluster API gateway used for CAPMC, HSM and token requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub capmc_path: String,
    pub hsm_path: String,
    pub token_path: String,
    pub client_id: String,
    pub client_secret_name: String,
    pub client_secret_namespace: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            base_url: "https://api-gw-service-nmn.local".to_string(),
            capmc_path: "apis/capmc/capmc/v1".to_string(),
            hsm_path: "apis/smd/hsm/v2".to_string(),
            token_path: "keycloak/realms/shasta/protocol/openid-connect/token".to_string(),
            client_id: "admin-client".to_string(),
            client_secret_name: "admin-client-auth".to_string(),
            client_secret_namespace: "default".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn capmc_url(&self, operation: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.capmc_path, operation)
    }

    pub fn hsm_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.hsm_path, path)
    }

    pub fn token_url(&self) -> String {
        format!("{}/{}", self.base_url, self.token_path)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub listener: ListenerConfig,
    pub power_control: PowerControlTimings,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub telemetry_wait: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub test_event_wait: Duration,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
            listener: ListenerConfig::default(),
            power_control: PowerControlTimings::default(),
            telemetry_wait: Duration::from_secs(30),
            test_event_wait: Duration::from_secs(30),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Fields left out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, HwvalError> {
        let text = fs::read_to_string(path)
            .map_err(|e| HwvalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text).map_err(|e| match e {
            HwvalError::Config(msg) => HwvalError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, HwvalError> {
        serde_json::from_str(text).map_err(|e| HwvalError::Config(e.to_string()))
    }

    /// The HTTP connection pool shared by every BMC, CAPMC and token request of a run.
    pub fn client_pool(&self) -> Result<RedfishClientPool, HwvalError> {
        let builder = RedfishClientPool::builder().timeout(self.request_timeout);
        if self.accept_invalid_certs {
            builder.build()
        } else {
            builder.reject_invalid_certs().build()
        }
    }
}

/// BMC login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}
