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
use std::{fmt, time::Duration};

use reqwest::{
    blocking::Client as HttpClient, blocking::ClientBuilder as HttpClientBuilder,
    header::HeaderValue, header::ACCEPT, header::CACHE_CONTROL, header::CONTENT_TYPE,
    header::IF_MATCH, redirect::Policy, Method, StatusCode,
};
use serde_json::Value;
use tracing::{debug, error};

use crate::HwvalError;

pub const SERVICE_REDFISH: &str = "Redfish";
pub const SERVICE_CAPMC: &str = "CAPMC";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
// PATCH targets ending in this marker are bulk updates and take no If-Match.
const DEEP_PATCH_MARKER: &str = ".Deep";

/// Body of a successful call.
///
/// BMCs answer some actions with `204 No Content`. That is still a success, so the
/// status code stands in for the body and callers can tell "empty" from "failed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Body(String),
    NoContent(StatusCode),
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Body(b) => Some(b),
            Payload::NoContent(_) => None,
        }
    }
}

/// The (label, message) pair describing why a call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub label: String,
    pub message: String,
    pub status: Option<StatusCode>,
}

impl CallFailure {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        CallFailure {
            label: label.into(),
            message: message.into(),
            status: None,
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.message)
    }
}

pub type CallResult = Result<Payload, CallFailure>;

/// Maps a non-2xx status to the failure reported for it. `service` names the kind of
/// controller ("Redfish", "CAPMC") and labels server side and redirection failures;
/// client errors are labelled with the URL that was rejected.
pub fn classify_status(service: &str, url: &str, status: StatusCode) -> Option<CallFailure> {
    let code = status.as_u16();
    let (label, message) = if code >= 500 {
        (service.to_string(), format!("Internal {service} Error"))
    } else if code >= 400 {
        (url.to_string(), format!("Bad Request ({code})"))
    } else if code >= 300 {
        (service.to_string(), "URI redirection".to_string())
    } else {
        return None;
    };
    Some(CallFailure {
        label,
        message,
        status: Some(status),
    })
}

/// Request/response access to one management controller.
///
/// Every call is a single attempt. Failures come back as values and never abort the
/// caller, which decides whether the current resource is abandoned.
pub trait Transport {
    /// Host name of the controller, used as the subject of findings
    fn controller(&self) -> &str;

    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> CallResult;

    fn get(&self, path: &str) -> CallResult {
        self.call(Method::GET, path, None)
    }

    fn post(&self, path: &str, body: &Value) -> CallResult {
        self.call(Method::POST, path, Some(body))
    }

    fn patch(&self, path: &str, body: &Value) -> CallResult {
        self.call(Method::PATCH, path, Some(body))
    }

    fn delete(&self, path: &str) -> CallResult {
        self.call(Method::DELETE, path, None)
    }

    // GET and decode. A 2xx without a body or with a body that is not JSON is a failure
    // here since every caller needs a document to look into.
    fn get_json(&self, path: &str) -> Result<Value, CallFailure> {
        match self.get(path)? {
            Payload::Body(body) => serde_json::from_str(&body)
                .map_err(|e| CallFailure::new(path, format!("Malformed JSON response ({e})"))),
            Payload::NoContent(status) => {
                Err(CallFailure::new(path, format!("Empty response ({status})")))
            }
        }
    }

    // Existence check. Failures are expected here and only logged at debug level.
    fn exists(&self, path: &str) -> bool {
        match self.get(path) {
            Ok(_) => true,
            Err(failure) => {
                debug!("GET {path} failed: {failure}");
                false
            }
        }
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn controller(&self) -> &str {
        (**self).controller()
    }

    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> CallResult {
        (**self).call(method, path, body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

#[derive(Debug)]
pub struct RedfishClientPoolBuilder {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl RedfishClientPoolBuilder {
    /// Prevents the client from accepting self signed certificates
    /// and other invalid certificates.
    ///
    /// By default self signed certificates will be accepted, since BMCs usually
    /// use those.
    pub fn reject_invalid_certs(mut self) -> RedfishClientPoolBuilder {
        self.accept_invalid_certs = false;
        self
    }

    /// Overwrites the timeout that will be applied to every request
    pub fn timeout(mut self, timeout: Duration) -> RedfishClientPoolBuilder {
        self.timeout = timeout;
        self
    }

    /// Builds the shared HTTP connection pool
    pub fn build(&self) -> Result<RedfishClientPool, HwvalError> {
        let http_client = HttpClientBuilder::new()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| HwvalError::Config(format!("could not build HTTP client: {e}")))?;
        Ok(RedfishClientPool { http_client })
    }
}

/// The management controller the client connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or IP address of the BMC
    pub host: String,
    /// BMC port. If absent the scheme's default port is used
    pub port: Option<u16>,
    /// BMC username
    pub user: Option<String>,
    /// BMC password
    pub password: Option<String>,
    pub scheme: Scheme,
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: "".to_string(),
            port: None,
            user: None,
            password: None,
            scheme: Scheme::Https,
        }
    }
}

impl Endpoint {
    /// Full URL for an `@odata.id` style path. Absolute URLs are returned as they are.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let sep = if path.starts_with('/') { "" } else { "/" };
        match self.port {
            Some(p) => format!("{}://{}:{}{}{}", self.scheme, self.host, p, sep, path),
            None => format!("{}://{}{}{}", self.scheme, self.host, sep, path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedfishClientPool {
    http_client: HttpClient,
}

impl RedfishClientPool {
    /// Returns Builder for configuring the HTTP connection pool
    pub fn builder() -> RedfishClientPoolBuilder {
        RedfishClientPoolBuilder {
            timeout: DEFAULT_TIMEOUT,
            // BMCs often have a self-signed cert, so usually this has to be true
            accept_invalid_certs: true,
        }
    }

    /// Creates a Redfish client for a certain endpoint. No request is made until the
    /// first call.
    pub fn create_client(&self, endpoint: Endpoint) -> RedfishHttpClient {
        RedfishHttpClient::new(self.http_client.clone(), endpoint)
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }
}

/// A HTTP client which targets a single Redfish endpoint
#[derive(Debug, Clone)]
pub struct RedfishHttpClient {
    endpoint: Endpoint,
    http_client: HttpClient,
}

impl RedfishHttpClient {
    pub fn new(http_client: HttpClient, endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            http_client,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // Current entity tag of the resource, if it reports one.
    fn fetch_etag(&self, url: &str) -> Result<Option<String>, CallFailure> {
        let payload = self.send(Method::GET, url, None, None)?;
        let etag = payload
            .text()
            .and_then(|body| serde_json::from_str::<Value>(body).ok())
            .and_then(|v| v.get("@odata.etag").and_then(Value::as_str).map(str::to_string));
        if etag.is_none() {
            debug!("no @odata.etag at {url}, sending PATCH without precondition");
        }
        Ok(etag)
    }

    // All the HTTP requests happen from here.
    fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        etag: Option<&str>,
    ) -> CallResult {
        let body_enc = body.map(Value::to_string);
        debug!(
            "TX {} {} {}",
            method,
            url,
            body_enc.as_deref().unwrap_or_default()
        );

        let mut req_b = match method {
            Method::GET => self.http_client.get(url),
            Method::POST => self.http_client.post(url),
            Method::PATCH => self.http_client.patch(url),
            Method::DELETE => self.http_client.delete(url),
            other => {
                return Err(CallFailure::new(
                    "Redfish Operation",
                    format!("Bad Request ({other})"),
                ))
            }
        };
        req_b = req_b
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(user) = &self.endpoint.user {
            req_b = req_b.basic_auth(user, self.endpoint.password.as_ref());
        }
        if let Some(tag) = etag {
            req_b = req_b.header(IF_MATCH, tag);
        }
        if let Some(b) = body_enc {
            req_b = req_b.body(b);
        }
        let response = req_b.send().map_err(|e| {
            debug!("TX {method} {url} failed: {e}");
            CallFailure::new(SERVICE_REDFISH, e.to_string())
        })?;
        let status_code = response.status();
        // read the body even if not status 2XX, because BMCs give useful error messages as JSON
        let response_body = response
            .text()
            .map_err(|e| CallFailure::new(SERVICE_REDFISH, e.to_string()))?;
        if response_body.is_empty() {
            debug!("RX {status_code}");
        } else {
            debug!("RX {status_code} {response_body}");
        }

        if let Some(failure) = classify_status(SERVICE_REDFISH, url, status_code) {
            if response_body.contains("LicenseKeyRequired") {
                error!("License key required for power capping at {url}");
            }
            debug!("{method} {url} returned {status_code}");
            return Err(failure);
        }
        if response_body.is_empty() {
            return Ok(Payload::NoContent(status_code));
        }
        Ok(Payload::Body(response_body))
    }
}

impl Transport for RedfishHttpClient {
    fn controller(&self) -> &str {
        &self.endpoint.host
    }

    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> CallResult {
        let url = self.endpoint.url(path);
        let etag = if method == Method::PATCH && !path.contains(DEEP_PATCH_MARKER) {
            self.fetch_etag(&url)?
        } else {
            None
        };
        self.send(method, &url, body, etag.as_deref())
    }
}
