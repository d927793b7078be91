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
//! Named validation modules and their tests, as selected from the command line.

use tracing::{debug, info};

use crate::auth::{CredentialProvider, KeycloakTokenProvider};
use crate::capmc::{CapmcClient, CapmcSession, CAPMC_CHECKS};
use crate::classify::resolve_controller_name;
use crate::cluster::{
    check_config_maps, check_hms_dependencies, ClusterStatusProvider, LABEL_HMS,
};
use crate::config::{Config, Credentials};
use crate::network::{Endpoint, RedfishClientPool, Transport};
use crate::report::Report;
use crate::telemetry::{self, LABEL_POLL};
use crate::walker;

pub const MODULE_REDFISH: &str = "redfish";
pub const MODULE_CAPMC: &str = "capmc";
pub const MODULE_HMS: &str = "hms";

const HMS_DEPENDENCIES: &str = "validateHmsDependencies";
const HMS_CONFIG_MAPS: &str = "validateConfigMaps";

/// The Redfish checks in run order.
const REDFISH_CHECKS: &[&str] = &[
    walker::LABEL_URIS,
    walker::LABEL_CHASSIS,
    walker::LABEL_MANAGERS,
    walker::LABEL_EVENT_SERVICE,
    walker::LABEL_SYSTEMS,
    walker::LABEL_UPDATE_SERVICE,
    LABEL_POLL,
];

/// What a module needs to run against one target.
pub struct CheckContext<'a> {
    pub xname: &'a str,
    pub config: &'a Config,
    pub pool: &'a RedfishClientPool,
    pub credentials: Option<&'a Credentials>,
    pub cluster: &'a dyn ClusterStatusProvider,
}

/// A group of named checks. `tests` of None runs all of them; unknown names are
/// skipped.
pub trait CheckModule {
    fn name(&self) -> &'static str;

    fn tests(&self) -> Vec<&'static str>;

    fn run(&self, ctx: &CheckContext<'_>, tests: Option<&[String]>, report: &mut Report) -> u32;
}

fn selected(name: &str, tests: Option<&[String]>) -> bool {
    tests.map_or(true, |t| t.iter().any(|s| s == name))
}

fn run_redfish_check<T: Transport + ?Sized>(name: &str, transport: &T, report: &mut Report) -> u32 {
    debug!("Calling: redfish:{name}");
    match name {
        walker::LABEL_URIS => walker::check_uris(transport, report),
        walker::LABEL_CHASSIS => walker::check_chassis(transport, report),
        walker::LABEL_MANAGERS => walker::check_managers(transport, report),
        walker::LABEL_EVENT_SERVICE => walker::check_event_service(transport, report),
        walker::LABEL_SYSTEMS => walker::check_systems(transport, report),
        walker::LABEL_UPDATE_SERVICE => walker::check_update_service(transport, report),
        LABEL_POLL => telemetry::telemetry_poll(transport, report),
        _ => 0,
    }
}

/// Runs the selected Redfish checks against a BMC.
pub fn run_redfish_checks<T: Transport + ?Sized>(
    transport: &T,
    tests: Option<&[String]>,
    report: &mut Report,
) -> u32 {
    REDFISH_CHECKS
        .iter()
        .filter(|name| selected(name, tests))
        .map(|name| run_redfish_check(name, transport, report))
        .sum()
}

pub struct RedfishModule;

impl CheckModule for RedfishModule {
    fn name(&self) -> &'static str {
        MODULE_REDFISH
    }

    fn tests(&self) -> Vec<&'static str> {
        REDFISH_CHECKS.to_vec()
    }

    fn run(&self, ctx: &CheckContext<'_>, tests: Option<&[String]>, report: &mut Report) -> u32 {
        let Some(creds) = ctx.credentials else {
            report.error(MODULE_REDFISH, ctx.xname, "Missing credentials");
            return 1;
        };
        let bmc = resolve_controller_name(ctx.xname);
        info!("Validating Redfish on {bmc}");
        let client = ctx.pool.create_client(Endpoint {
            host: bmc,
            user: Some(creds.user.clone()),
            password: Some(creds.password.clone()),
            ..Default::default()
        });
        run_redfish_checks(&client, tests, report)
    }
}

pub struct CapmcModule;

impl CheckModule for CapmcModule {
    fn name(&self) -> &'static str {
        MODULE_CAPMC
    }

    fn tests(&self) -> Vec<&'static str> {
        CAPMC_CHECKS.to_vec()
    }

    fn run(&self, ctx: &CheckContext<'_>, tests: Option<&[String]>, report: &mut Report) -> u32 {
        let provider = KeycloakTokenProvider::new(
            ctx.cluster,
            ctx.pool.http_client().clone(),
            ctx.config.gateway.clone(),
        );
        let token = provider.token();
        if token.is_empty() {
            report.not_healthy(
                MODULE_CAPMC,
                Some((
                    ctx.xname.to_string(),
                    "Could not get authentication token".to_string(),
                )),
            );
            return 1;
        }
        let client = CapmcClient::new(
            ctx.pool.http_client().clone(),
            ctx.config.gateway.clone(),
            token,
        );
        let mut session = CapmcSession::new(client, ctx.xname);
        CAPMC_CHECKS
            .iter()
            .filter(|name| selected(name, tests))
            .map(|name| {
                debug!("Calling: capmc:{name}");
                session.run(name, report)
            })
            .sum()
    }
}

pub struct HmsModule;

impl CheckModule for HmsModule {
    fn name(&self) -> &'static str {
        MODULE_HMS
    }

    fn tests(&self) -> Vec<&'static str> {
        vec![HMS_DEPENDENCIES, HMS_CONFIG_MAPS]
    }

    fn run(&self, ctx: &CheckContext<'_>, tests: Option<&[String]>, report: &mut Report) -> u32 {
        let mut failures = 0;
        if selected(HMS_DEPENDENCIES, tests) {
            debug!("Calling: {LABEL_HMS}:{HMS_DEPENDENCIES}");
            failures += check_hms_dependencies(ctx.cluster, report);
        }
        if selected(HMS_CONFIG_MAPS, tests) {
            debug!("Calling: {LABEL_HMS}:{HMS_CONFIG_MAPS}");
            failures += check_config_maps(ctx.cluster, report);
        }
        failures
    }
}

/// `module:test[,module:test...]` grouped by module in the order first seen. A bare
/// `module` entry leaves its test list empty, which runs every test of the module.
pub fn parse_test_selection(spec: &str) -> Vec<(String, Vec<String>)> {
    let mut selection: Vec<(String, Vec<String>)> = Vec::new();
    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (module, test) = match pair.split_once(':') {
            Some((m, t)) => (m, Some(t)),
            None => (pair, None),
        };
        let idx = match selection.iter().position(|(m, _)| m == module) {
            Some(i) => i,
            None => {
                selection.push((module.to_string(), Vec::new()));
                selection.len() - 1
            }
        };
        if let Some(t) = test {
            selection[idx].1.push(t.to_string());
        }
    }
    selection
}

pub struct CheckRegistry {
    modules: Vec<Box<dyn CheckModule>>,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        CheckRegistry {
            modules: vec![
                Box::new(RedfishModule),
                Box::new(CapmcModule),
                Box::new(HmsModule),
            ],
        }
    }
}

impl CheckRegistry {
    pub fn new(modules: Vec<Box<dyn CheckModule>>) -> Self {
        CheckRegistry { modules }
    }

    pub fn modules(&self) -> impl Iterator<Item = &dyn CheckModule> {
        self.modules.iter().map(|m| m.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn CheckModule> {
        self.modules().find(|m| m.name() == name)
    }

    /// Runs every module, or only the selected modules and tests. Returns the total
    /// failure count.
    pub fn run(
        &self,
        ctx: &CheckContext<'_>,
        selection: Option<&[(String, Vec<String>)]>,
        report: &mut Report,
    ) -> u32 {
        match selection {
            None => self.modules().map(|m| m.run(ctx, None, report)).sum(),
            Some(selection) => selection
                .iter()
                .filter_map(|(name, tests)| Some((self.get(name)?, tests)))
                .map(|(module, tests)| {
                    let tests = (!tests.is_empty()).then_some(tests.as_slice());
                    module.run(ctx, tests, report)
                })
                .sum(),
        }
    }
}
