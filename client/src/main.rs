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

/* Hardware validation client
 * Validates the Redfish, CAPMC and HMS surface of cluster nodes and runs the
 * end-to-end event scenarios against a single BMC.
 *
 * USAGE: ./hwval -x x1000c0s[0-3]b0 -U TheBMCUsername -P TheBMCPassword
 *        ./hwval -x x1000c0s0b0 -t redfish:checkRedfishChassis,hms:validateHmsDependencies
 *        ./hwval -x x3000c0s1b0 -s power-cap
 *        ./hwval -x x3000c0s1b0 -s sub-create -i 10.252.1.4 -r 9000 --telemetry
 * -l all|top|<module>: list modules and their tests.
 * Credentials default to the REDFISH_USER and REDFISH_PASSWORD environment variables.
 * Run with no params for help.
 * Run with `-v` for more output, `-vv` for everything.
 */

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use hwval::check::{parse_test_selection, CheckContext, CheckRegistry};
use hwval::classify::{classify_topology, resolve_controller_name, HardwareClass};
use hwval::cluster::KubeClusterStatus;
use hwval::config::{Config, Credentials};
use hwval::event_test::RedfishEventTest;
use hwval::jsonmap::member_ids;
use hwval::listener::{EventListener, WaitSignal};
use hwval::power_cap::PowerCapTest;
use hwval::power_control::PowerControlTest;
use hwval::subscription::{
    create_subscription, delete_matching, determine_scheme, list_subscriptions, SubscriptionKind,
};
use hwval::telemetry_stream::StreamingTelemetryTest;
use hwval::{Endpoint, RedfishClientPool, RedfishHttpClient, Report, Transport};
use tracing::{error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;

const SCENARIOS: &[&str] = &[
    "power-control",
    "power-cap",
    "streaming-telemetry",
    "event-test",
    "sub-create",
    "sub-delete",
    "sub-list",
    "sub-listen",
];

fn main() -> Result<ExitCode, anyhow::Error> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = getopts::Options::new();

    opts.optflag("h", "help", "Print this help");
    opts.optflagmulti(
        "v",
        "verbose",
        "Log at DEBUG level, twice for TRACE. Default is INFO",
    );
    opts.optflag("V", "version", "Print the version and exit");
    opts.optopt(
        "l",
        "list",
        "List checks. all: modules and tests, top: modules only, <module>: tests of one module",
        "WHAT",
    );
    opts.optopt(
        "x",
        "xname",
        "Comma separated targets. Numeric ranges expand: x1000c0s[0-3]b0",
        "XNAMES",
    );
    opts.optopt(
        "t",
        "tests",
        "Checks to run, default all",
        "MODULE:TEST[,MODULE:TEST...]",
    );
    opts.optopt("U", "username", "BMC username", "USER");
    opts.optopt("P", "password", "BMC password", "PASS");
    opts.optopt("c", "config", "JSON config file", "FILE");
    opts.optopt(
        "s",
        "scenario",
        "Scenario to run against the first target:
                power-control
                power-cap
                streaming-telemetry
                event-test
                sub-create
                sub-delete
                sub-list
                sub-listen",
        "SCENARIO",
    );
    opts.optopt("i", "ip", "Address the event listener binds to and advertises", "IP");
    opts.optopt("r", "port", "Port of the event listener", "PORT");
    opts.optflag("", "telemetry", "sub-create: also subscribe to CrayTelemetry");

    let args_given = opts.parse(&args[1..])?;
    if args_given.opt_present("h") {
        eprintln!("{}", opts.usage("hwval -x xname [-t module:test] [-s scenario]"));
        return Ok(ExitCode::SUCCESS);
    }
    if args_given.opt_present("V") {
        println!("hwval: {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let log_level = match args_given.opt_count("v") {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("rustls=warn".parse()?);
    tracing_subscriber::registry()
        .with(Layer::default().compact())
        .with(env_filter)
        .init();

    let registry = CheckRegistry::default();

    if let Some(what) = args_given.opt_str("l") {
        for module in registry.modules() {
            if what != "all" && what != "top" && what != module.name() {
                continue;
            }
            println!("{}", module.name());
            if what != "top" {
                for test in module.tests() {
                    println!("     {test}");
                }
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(xnames) = args_given.opt_str("x") else {
        eprintln!("Invalid argument. -x is required");
        return Ok(ExitCode::FAILURE);
    };
    let xnames = expand_xnames(&xnames)?;

    let mut config = match args_given.opt_str("c") {
        Some(path) => Config::from_file(Path::new(&path))?,
        None => Config::default(),
    };
    if let Some(ip) = args_given.opt_str("i") {
        config.listener.ip = ip;
    }
    if let Some(port) = args_given.opt_str("r") {
        config.listener.port = port
            .parse()
            .map_err(|e| anyhow!("Invalid port {port}: {e}"))?;
    }

    let user = args_given
        .opt_str("U")
        .or_else(|| std::env::var("REDFISH_USER").ok());
    let password = args_given
        .opt_str("P")
        .or_else(|| std::env::var("REDFISH_PASSWORD").ok());
    let credentials = match (user, password) {
        (Some(user), Some(password)) => Some(Credentials { user, password }),
        _ => None,
    };

    let pool = config.client_pool()?;

    let failures = match args_given.opt_str("s") {
        Some(scenario) => {
            if !SCENARIOS.contains(&scenario.as_str()) {
                bail!("Unsupported scenario {scenario}");
            }
            let Some(creds) = credentials.as_ref() else {
                bail!("Missing credentials. Use -U/-P or REDFISH_USER/REDFISH_PASSWORD");
            };
            let mut failures = 0;
            for xname in &xnames {
                let client = bmc_client(&pool, xname, creds);
                failures += run_scenario(
                    &scenario,
                    client,
                    &config,
                    args_given.opt_present("telemetry"),
                )?;
            }
            failures
        }
        None => {
            let selection = args_given.opt_str("t").map(|t| parse_test_selection(&t));
            let cluster = KubeClusterStatus::new()?;
            let mut failures = 0;
            let mut has_errors = false;
            for xname in &xnames {
                let ctx = CheckContext {
                    xname,
                    config: &config,
                    pool: &pool,
                    credentials: credentials.as_ref(),
                    cluster: &cluster,
                };
                let mut report = Report::new();
                println!("{xname}:");
                failures += registry.run(&ctx, selection.as_deref(), &mut report);
                for finding in report.findings() {
                    println!("{finding}");
                }
                has_errors |= report.has_errors();
            }
            if failures == 0 {
                println!("All validations PASSED");
            } else {
                println!("{failures} Validations FAILED");
            }
            if failures == 0 && has_errors {
                1
            } else {
                failures
            }
        }
    };

    Ok(ExitCode::from(exit_status(failures)))
}

// Failure counts past 255 saturate.
fn exit_status(failures: u32) -> u8 {
    u8::try_from(failures).unwrap_or(u8::MAX)
}

fn bmc_client(pool: &RedfishClientPool, xname: &str, creds: &Credentials) -> RedfishHttpClient {
    pool.create_client(Endpoint {
        host: resolve_controller_name(xname),
        user: Some(creds.user.clone()),
        password: Some(creds.password.clone()),
        ..Default::default()
    })
}

/// Runs one scenario or subscription command against a BMC. Returns its failure count.
fn run_scenario(
    scenario: &str,
    client: RedfishHttpClient,
    config: &Config,
    telemetry: bool,
) -> Result<u32, anyhow::Error> {
    let listener = config.listener.clone();
    match scenario {
        "power-control" => {
            let outcome =
                PowerControlTest::new(client, listener, config.power_control.clone()).run();
            println!("{outcome}");
            Ok(outcome.tally())
        }
        "power-cap" => {
            let outcome = PowerCapTest::new(client).run();
            println!("{outcome}");
            Ok(outcome.tally())
        }
        "streaming-telemetry" => {
            let outcome =
                StreamingTelemetryTest::new(client, listener, config.telemetry_wait).run();
            println!("{outcome}");
            Ok(outcome.tally())
        }
        "event-test" => {
            let mut report = Report::new();
            let failures =
                RedfishEventTest::new(client, listener, config.test_event_wait).run(&mut report);
            for finding in report.findings() {
                println!("{finding}");
            }
            Ok(failures)
        }
        "sub-create" => {
            let kind = SubscriptionKind::Tool {
                cray: bmc_class(&client) == HardwareClass::Cray,
                telemetry,
            };
            let scheme = determine_scheme(&client);
            let sub = kind.subscription(client.controller(), scheme, &listener.ip, listener.port);
            match create_subscription(&client, &sub) {
                Ok(()) => Ok(0),
                Err(e) => {
                    warn!("Redfish call to create subscription failed. {e}");
                    Ok(1)
                }
            }
        }
        "sub-delete" => {
            let kind = SubscriptionKind::Tool {
                cray: false,
                telemetry,
            };
            let context = kind.context(client.controller());
            let outcome = delete_matching(&client, |sub| {
                sub.context.as_deref() == Some(context.as_str())
            });
            info!("{} subscriptions deleted", outcome.deleted);
            Ok(u32::try_from(outcome.failures.len()).unwrap_or(u32::MAX))
        }
        "sub-list" => match list_subscriptions(&client) {
            Ok(subs) => {
                for sub in subs {
                    println!(
                        "{:<20} {:<40} {:?} {:?}",
                        sub.context.unwrap_or_default(),
                        sub.destination.unwrap_or_default(),
                        sub.event_types.unwrap_or_default(),
                        sub.registry_prefixes.unwrap_or_default(),
                    );
                }
                Ok(0)
            }
            Err(failure) => {
                warn!("Redfish call to list subscriptions failed. {failure}");
                Ok(1)
            }
        },
        "sub-listen" => {
            let scheme = determine_scheme(&client);
            let server = EventListener::start(
                &listener.ip,
                listener.port,
                scheme,
                &listener.cert_dir,
                Arc::new(WaitSignal::new()),
            )?;
            server.join();
            Ok(0)
        }
        _ => {
            error!("Unsupported scenario specified {scenario}");
            Ok(1)
        }
    }
}

fn bmc_class<T: Transport + ?Sized>(transport: &T) -> HardwareClass {
    match transport.get_json("/redfish/v1/Chassis") {
        Ok(chassis) => {
            let members = member_ids(&chassis).unwrap_or_default();
            classify_topology(members.as_slice())
        }
        Err(failure) => {
            warn!("Could not determine BMC type: {failure}");
            HardwareClass::Unknown
        }
    }
}

/// Splits a comma separated target list and expands every `[a-b]` range in it.
fn expand_xnames(list: &str) -> Result<Vec<String>, anyhow::Error> {
    let mut xnames = Vec::new();
    for item in list.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        expand_ranges(item, &mut xnames)?;
    }
    if xnames.is_empty() {
        bail!("No xname given");
    }
    Ok(xnames)
}

// Upper bound on the targets one -x argument may expand to.
const MAX_XNAMES: usize = 4096;

fn expand_ranges(pattern: &str, out: &mut Vec<String>) -> Result<(), anyhow::Error> {
    let Some(open) = pattern.find('[') else {
        if out.len() >= MAX_XNAMES {
            bail!("More than {MAX_XNAMES} xnames given");
        }
        out.push(pattern.to_string());
        return Ok(());
    };
    let close = pattern[open..]
        .find(']')
        .map(|c| open + c)
        .ok_or_else(|| anyhow!("Unclosed range in {pattern}"))?;
    let range = &pattern[open + 1..close];
    let (first, last) = range.split_once('-').unwrap_or((range, range));
    let first: u32 = first
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid range [{range}] in {pattern}: {e}"))?;
    let last: u32 = last
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid range [{range}] in {pattern}: {e}"))?;
    if first > last {
        bail!("Invalid range [{range}] in {pattern}");
    }
    for n in first..=last {
        let expanded = format!("{}{n}{}", &pattern[..open], &pattern[close + 1..]);
        expand_ranges(&expanded, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // test_expand_xnames tests comma lists and range expansion.
    #[test]
    fn test_expand_xnames() {
        assert_eq!(
            expand_xnames("x1000c0s[0-2]b0").unwrap(),
            vec!["x1000c0s0b0", "x1000c0s1b0", "x1000c0s2b0"]
        );
        assert_eq!(
            expand_xnames("x3000c0s1b0, x1000c[1-2]r[3]b0").unwrap(),
            vec!["x3000c0s1b0", "x1000c1r3b0", "x1000c2r3b0"]
        );
        assert!(expand_xnames("x1000c0s[3-1]b0").is_err());
        assert!(expand_xnames("x1000c0s[0-b0").is_err());
        assert!(expand_xnames(",").is_err());
    }

    // test_expand_xnames_limit tests oversized ranges are refused.
    #[test]
    fn test_expand_xnames_limit() {
        let err = expand_xnames("x1000c0s[0-4000000000]b0").unwrap_err();
        assert_eq!(err.to_string(), format!("More than {MAX_XNAMES} xnames given"));
        assert!(expand_xnames("x1000c[0-63]s[0-63]b0").is_ok());
        assert!(expand_xnames("x1000c[0-64]s[0-63]b0").is_err());
    }

    // test_exit_status tests the failure count saturates.
    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(1000), 255);
    }
}
