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
//! Cluster state as reported by the container orchestrator, and the HMS service
//! dependency check built on it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, ListParams, ResourceExt};
use kube::Client;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::report::Report;
use crate::HwvalError;

pub const LABEL_HMS: &str = "hms";

const CONFIG_MAP_NAMESPACE: &str = "services";

/// Config maps the discovery services read at start, with the keys they need.
const REQUIRED_CONFIG_MAPS: &[(&str, &[&str])] = &[
    ("cray-reds-maas-bridge-config", &["reds-maas-bridge-data.json"]),
    ("reds-client-urls", &["REDS_X86_64_INITRD_URL", "REDS_X86_64_KERNEL_URL"]),
    ("reds-init-configmap", &["GATEWAY_IP"]),
    ("reds-mapping-json", &["cray_reds_mapping.json"]),
    ("smd-nid-map-json", &["node_nid_map.json"]),
];

/// Services the hardware management stack depends on.
pub const HMS_SERVICES: &[&str] = &[
    "cray-hms-hmcollector",
    "cray-hms-pmdbd",
    "cray-hms-rts",
    "cray-tokens",
    "cray-vault",
    "cray-sls",
    "cray-smd",
    "cray-smd-init",
    "cray-smd-loader",
    "cray-ars",
    "cray-ipxe",
    "cray-reds",
    "cray-bss",
    "cray-meds",
];

pub fn pod_is_healthy(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    matches!(phase, Some("Running" | "Succeeded"))
}

/// (container, reason) for every init and regular container still waiting.
pub fn waiting_containers(pod: &Pod) -> Vec<(String, String)> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|c| {
            let waiting = c.state.as_ref()?.waiting.as_ref()?;
            Some((c.name.clone(), waiting.reason.clone().unwrap_or_default()))
        })
        .collect()
}

/// Secret values as text. The API already hands them over base64 decoded.
fn secret_strings(secret: Secret) -> BTreeMap<String, String> {
    secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, String::from_utf8_lossy(&value.0).into_owned()))
        .collect()
}

/// Read access to the cluster the tool runs on.
pub trait ClusterStatusProvider {
    /// Pods in all namespaces matching a label selector such as `app=cray-smd`.
    fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, HwvalError>;

    /// Secret data with the values already decoded.
    fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, HwvalError>;

    fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, HwvalError>;
}

/// Talks to the Kubernetes API using the in-cluster config or the local kubeconfig.
///
/// The client is created on first use so that BMC-only runs work on hosts
/// without cluster access.
pub struct KubeClusterStatus {
    runtime: Runtime,
    client: Mutex<Option<Client>>,
}

impl KubeClusterStatus {
    pub fn new() -> Result<Self, HwvalError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HwvalError::Cluster(format!("could not start runtime: {e}")))?;
        Ok(KubeClusterStatus {
            runtime,
            client: Mutex::new(None),
        })
    }

    fn client(&self) -> Result<Client, HwvalError> {
        let mut client = self.client.lock();
        if let Some(c) = client.as_ref() {
            return Ok(c.clone());
        }
        let c = self.runtime.block_on(Client::try_default())?;
        *client = Some(c.clone());
        Ok(c)
    }
}

impl ClusterStatusProvider for KubeClusterStatus {
    fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, HwvalError> {
        let pods: Api<Pod> = Api::all(self.client()?);
        let lp = ListParams::default().labels(label_selector);
        let list = self.runtime.block_on(pods.list(&lp))?;
        Ok(list.items)
    }

    fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, HwvalError> {
        let secrets: Api<Secret> = Api::namespaced(self.client()?, namespace);
        let secret = self.runtime.block_on(secrets.get(name))?;
        Ok(secret_strings(secret))
    }

    fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, HwvalError> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client()?, namespace);
        let map = self.runtime.block_on(maps.get(name))?;
        Ok(map.data.unwrap_or_default())
    }
}

// Pods label themselves in different ways; these are tried in order.
fn pod_selectors(service: &str) -> [String; 3] {
    let app = match service {
        "cray-vault" => "vault",
        other => other,
    };
    [
        format!("app={app}"),
        format!("app.kubernetes.io/name={service}"),
        format!("job-name={service}"),
    ]
}

/// Pods of `service` under the first selector that finds any.
pub fn service_pods<C: ClusterStatusProvider + ?Sized>(
    cluster: &C,
    service: &str,
) -> Result<Vec<Pod>, HwvalError> {
    for selector in pod_selectors(service) {
        debug!("Service: {service} Label: {selector}");
        let pods = cluster.list_pods(&selector)?;
        if !pods.is_empty() {
            return Ok(pods);
        }
    }
    Ok(Vec::new())
}

/// One service: every pod has to be running or completed.
pub fn check_service<C: ClusterStatusProvider + ?Sized>(
    cluster: &C,
    service: &str,
    report: &mut Report,
) -> u32 {
    let pods = match service_pods(cluster, service) {
        Ok(p) => p,
        Err(e) => {
            report.not_healthy(service, Some(("Service".to_string(), e.to_string())));
            return 1;
        }
    };
    if pods.is_empty() {
        report.not_healthy(
            service,
            Some(("Service".to_string(), "Not running on the system".to_string())),
        );
        return 1;
    }
    let mut failures = 0;
    for pod in pods {
        let name = pod.name_any();
        if pod_is_healthy(&pod) {
            report.ok(&name);
            continue;
        }
        failures += 1;
        let waiting = waiting_containers(&pod);
        if waiting.is_empty() {
            report.not_healthy(&name, None);
        }
        for detail in waiting {
            report.not_healthy(&name, Some(detail));
        }
    }
    failures
}

pub fn check_hms_dependencies<C: ClusterStatusProvider + ?Sized>(
    cluster: &C,
    report: &mut Report,
) -> u32 {
    info!("Checking {} HMS services", HMS_SERVICES.len());
    HMS_SERVICES
        .iter()
        .map(|service| check_service(cluster, service, report))
        .sum()
}

/// Every config map must exist and carry a non-empty value for each listed key.
pub fn check_config_maps<C: ClusterStatusProvider + ?Sized>(
    cluster: &C,
    report: &mut Report,
) -> u32 {
    let mut failures = 0;
    for (name, keys) in REQUIRED_CONFIG_MAPS {
        let data = match cluster.read_config_map(CONFIG_MAP_NAMESPACE, name) {
            Ok(d) => d,
            Err(e) => {
                report.not_healthy(name, Some(("Config map".to_string(), e.to_string())));
                failures += 1;
                continue;
            }
        };
        let missing = keys
            .iter()
            .find(|k| data.get(**k).map_or(true, String::is_empty));
        match missing {
            Some(key) => {
                report.not_healthy(
                    name,
                    Some((
                        "Data field".to_string(),
                        format!("Missing required field: {key}"),
                    )),
                );
                failures += 1;
            }
            None => report.ok(name),
        }
    }
    failures
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::report::Severity;

    /// Cluster with fixed pods per selector and fixed secrets.
    #[derive(Default)]
    pub(crate) struct FakeCluster {
        pub pods: HashMap<String, Vec<Pod>>,
        pub secrets: HashMap<(String, String), BTreeMap<String, String>>,
        pub config_maps: HashMap<String, BTreeMap<String, String>>,
    }

    impl ClusterStatusProvider for FakeCluster {
        fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>, HwvalError> {
            Ok(self.pods.get(label_selector).cloned().unwrap_or_default())
        }

        fn read_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<BTreeMap<String, String>, HwvalError> {
            self.secrets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| HwvalError::Cluster(format!("secret {name} not found")))
        }

        fn read_config_map(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<BTreeMap<String, String>, HwvalError> {
            assert_eq!(namespace, CONFIG_MAP_NAMESPACE);
            self.config_maps
                .get(name)
                .cloned()
                .ok_or_else(|| HwvalError::Cluster(format!("configmap {name} not found")))
        }
    }

    fn pod(name: &str, phase: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": "services"},
            "status": {
                "phase": phase,
                "initContainerStatuses": [
                    {"name": "init", "image": "init", "imageID": "", "ready": true,
                     "restartCount": 0, "state": {"terminated": {"exitCode": 0}}}
                ],
                "containerStatuses": [
                    {"name": "smd", "image": "smd", "imageID": "", "ready": false,
                     "restartCount": 4, "state": {"waiting": {"reason": "CrashLoopBackOff"}}}
                ]
            }
        }))
        .unwrap()
    }

    // test_pod_health tests phase and waiting container extraction.
    #[test]
    fn test_pod_health() {
        assert!(pod_is_healthy(&pod("cray-smd-1", "Running")));
        assert!(pod_is_healthy(&pod("cray-smd-init-1", "Succeeded")));
        let pending = pod("cray-smd-2", "Pending");
        assert!(!pod_is_healthy(&pending));
        assert_eq!(
            waiting_containers(&pending),
            [("smd".to_string(), "CrashLoopBackOff".to_string())]
        );
        assert!(!pod_is_healthy(&Pod::default()));
        assert!(waiting_containers(&Pod::default()).is_empty());
    }

    // test_secret_strings tests secret bytes become text.
    #[test]
    fn test_secret_strings() {
        let secret: Secret = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "admin-client-auth"},
            "data": {"client-secret": "czNjcjN0"}
        }))
        .unwrap();
        let data = secret_strings(secret);
        assert_eq!(data["client-secret"], "s3cr3t");
        assert!(secret_strings(Secret::default()).is_empty());
    }

    // test_selector_order tests the fallback selectors and the vault special case.
    #[test]
    fn test_selector_order() {
        assert_eq!(pod_selectors("cray-vault")[0], "app=vault");
        let mut cluster = FakeCluster::default();
        cluster
            .pods
            .insert("job-name=cray-smd-init".to_string(), vec![pod("init-xyz", "Succeeded")]);
        let pods = service_pods(&cluster, "cray-smd-init").unwrap();
        assert_eq!(pods[0].name_any(), "init-xyz");
    }

    // test_check_service tests healthy, unhealthy and missing services.
    #[test]
    fn test_check_service() {
        let mut cluster = FakeCluster::default();
        cluster.pods.insert(
            "app=cray-smd".to_string(),
            vec![pod("cray-smd-a", "Running"), pod("cray-smd-b", "Pending")],
        );
        let mut report = Report::new();
        assert_eq!(check_service(&cluster, "cray-smd", &mut report), 1);
        assert_eq!(report.findings()[0].severity, Severity::Ok);
        let unhealthy = &report.findings()[1];
        assert_eq!(unhealthy.severity, Severity::NotHealthy);
        assert_eq!(unhealthy.label, "cray-smd-b");
        assert_eq!(unhealthy.detail.as_ref().unwrap().message, "CrashLoopBackOff");

        let mut report = Report::new();
        assert_eq!(check_service(&cluster, "cray-bss", &mut report), 1);
        let detail = report.findings()[0].detail.as_ref().unwrap();
        assert_eq!(detail.key, "Service");
        assert_eq!(detail.message, "Not running on the system");
        assert!(report.has_errors());
    }

    // test_check_config_maps tests missing maps and empty required keys.
    #[test]
    fn test_check_config_maps() {
        let mut cluster = FakeCluster::default();
        for (name, keys) in REQUIRED_CONFIG_MAPS {
            let data = keys.iter().map(|k| (k.to_string(), "x".to_string())).collect();
            cluster.config_maps.insert(name.to_string(), data);
        }
        let mut report = Report::new();
        assert_eq!(check_config_maps(&cluster, &mut report), 0);
        assert_eq!(report.count(Severity::Ok), REQUIRED_CONFIG_MAPS.len());

        cluster.config_maps.remove("smd-nid-map-json");
        cluster
            .config_maps
            .get_mut("reds-client-urls")
            .unwrap()
            .insert("REDS_X86_64_KERNEL_URL".to_string(), String::new());
        let mut report = Report::new();
        assert_eq!(check_config_maps(&cluster, &mut report), 2);
        let urls = report
            .findings()
            .iter()
            .find(|f| f.label == "reds-client-urls")
            .unwrap();
        assert_eq!(urls.severity, Severity::NotHealthy);
        assert_eq!(
            urls.detail.as_ref().unwrap().message,
            "Missing required field: REDS_X86_64_KERNEL_URL"
        );
        let nid_map = report.findings().last().unwrap();
        assert_eq!(nid_map.label, "smd-nid-map-json");
        assert_eq!(nid_map.detail.as_ref().unwrap().key, "Config map");
    }
}
