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
//! Bearer tokens for the cluster API gateway.

use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cluster::ClusterStatusProvider;
use crate::config::GatewayConfig;
use crate::HwvalError;

const CLIENT_SECRET_KEY: &str = "client-secret";

/// Supplies the token sent as `Authorization: Bearer`. An empty token means none
/// could be obtained; callers report that instead of failing the run.
pub trait CredentialProvider {
    fn token(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// client_credentials grant against Keycloak, with the client secret read from the
/// cluster.
pub struct KeycloakTokenProvider<'a, C: ClusterStatusProvider + ?Sized> {
    cluster: &'a C,
    http_client: HttpClient,
    gateway: GatewayConfig,
}

impl<'a, C: ClusterStatusProvider + ?Sized> KeycloakTokenProvider<'a, C> {
    pub fn new(cluster: &'a C, http_client: HttpClient, gateway: GatewayConfig) -> Self {
        KeycloakTokenProvider {
            cluster,
            http_client,
            gateway,
        }
    }

    fn client_secret(&self) -> Result<String, HwvalError> {
        let secret = self.cluster.read_secret(
            &self.gateway.client_secret_namespace,
            &self.gateway.client_secret_name,
        )?;
        secret
            .get(CLIENT_SECRET_KEY)
            .cloned()
            .ok_or_else(|| HwvalError::MissingKey {
                key: CLIENT_SECRET_KEY.to_string(),
                url: format!(
                    "secret {}/{}",
                    self.gateway.client_secret_namespace, self.gateway.client_secret_name
                ),
            })
    }

    pub fn fetch_token(&self) -> Result<String, HwvalError> {
        let secret = self.client_secret()?;
        let url = self.gateway.token_url();
        debug!("TX POST {url}");
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.gateway.client_id.as_str()),
                ("client_secret", secret.as_str()),
            ])
            .send()
            .map_err(|e| HwvalError::NetworkError {
                url: url.clone(),
                source: e,
            })?;
        let status_code = response.status();
        if !status_code.is_success() {
            return Err(HwvalError::HTTPErrorCode { url, status_code });
        }
        let body = response.text().map_err(|e| HwvalError::NetworkError {
            url: url.clone(),
            source: e,
        })?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| HwvalError::JsonDeserializeError {
                url,
                body: body.clone(),
                source: e,
            })?;
        if token.access_token.is_empty() {
            return Err(HwvalError::CredentialUnavailable);
        }
        Ok(token.access_token)
    }
}

impl<C: ClusterStatusProvider + ?Sized> CredentialProvider for KeycloakTokenProvider<'_, C> {
    fn token(&self) -> String {
        match self.fetch_token() {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not get an authentication token. {e}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::cluster::tests::FakeCluster;

    fn gateway(base_url: &str) -> GatewayConfig {
        GatewayConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    // test_missing_secret tests a cluster without the client secret yields no token.
    #[test]
    fn test_missing_secret() {
        let cluster = FakeCluster::default();
        let provider = KeycloakTokenProvider::new(
            &cluster,
            HttpClient::new(),
            gateway("http://127.0.0.1:1"),
        );
        assert!(matches!(provider.fetch_token(), Err(HwvalError::Cluster(_))));
        assert_eq!(provider.token(), "");

        let mut cluster = FakeCluster::default();
        cluster.secrets.insert(
            ("default".to_string(), "admin-client-auth".to_string()),
            BTreeMap::from([("other".to_string(), "x".to_string())]),
        );
        let provider = KeycloakTokenProvider::new(
            &cluster,
            HttpClient::new(),
            gateway("http://127.0.0.1:1"),
        );
        assert!(matches!(provider.fetch_token(), Err(HwvalError::MissingKey { .. })));
    }

    // test_gateway_unreachable tests a refused connection yields no token.
    #[test]
    fn test_gateway_unreachable() {
        let mut cluster = FakeCluster::default();
        cluster.secrets.insert(
            ("default".to_string(), "admin-client-auth".to_string()),
            BTreeMap::from([(CLIENT_SECRET_KEY.to_string(), "s3cr3t".to_string())]),
        );
        // nothing listens on port 1
        let provider = KeycloakTokenProvider::new(
            &cluster,
            HttpClient::new(),
            gateway("http://127.0.0.1:1"),
        );
        assert!(matches!(provider.fetch_token(), Err(HwvalError::NetworkError { .. })));
        assert!(provider.token().is_empty());
    }
}
