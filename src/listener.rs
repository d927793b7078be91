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
//! Embedded webhook receiver for Redfish event deliveries.

use std::{
    net::{SocketAddr, TcpListener},
    path::Path,
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::network::Scheme;
use crate::HwvalError;

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";

/// Completion flag set by the listener on every delivery.
///
/// `wait` leaves the flag set, so once a delivery has arrived every later `wait`
/// returns immediately. `take` clears the flag when it returns true, so each call
/// needs a delivery of its own.
#[derive(Debug, Default)]
pub struct WaitSignal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    pub fn reset(&self) {
        *self.set.lock() = false;
    }

    /// Blocks until the flag is set or `timeout` runs out. Returns whether it is set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            self.cond.wait_while_for(&mut set, |s| !*s, timeout);
        }
        *set
    }

    /// Like `wait`, but consumes the delivery.
    pub fn take(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if !*set {
            self.cond.wait_while_for(&mut set, |s| !*s, timeout);
        }
        std::mem::replace(&mut *set, false)
    }
}

async fn receive_event(
    State(signal): State<Arc<WaitSignal>>,
    method: Method,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST {
        debug!("ignoring {method} on event listener");
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    info!("{}", String::from_utf8_lossy(&body));
    signal.set();
    StatusCode::OK
}

/// Router answering every POST, on any path, by setting the signal.
pub fn router(signal: Arc<WaitSignal>) -> Router {
    Router::new().fallback(receive_event).with_state(signal)
}

/// HTTP(S) server receiving event deliveries on a background thread.
///
/// The socket is bound before the thread starts, so bind and certificate errors are
/// returned from `start`. The server stops when the listener is dropped.
#[derive(Debug)]
pub struct EventListener {
    address: SocketAddr,
    handle: axum_server::Handle,
    thread: Option<JoinHandle<()>>,
}

impl EventListener {
    pub fn start(
        ip: &str,
        port: u16,
        scheme: Scheme,
        cert_dir: &Path,
        signal: Arc<WaitSignal>,
    ) -> Result<Self, HwvalError> {
        let requested = format!("{ip}:{port}");
        let listener_error = |source| HwvalError::Listener {
            address: requested.clone(),
            source,
        };
        let listener = TcpListener::bind(&requested).map_err(listener_error)?;
        listener.set_nonblocking(true).map_err(listener_error)?;
        let address = listener.local_addr().map_err(listener_error)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(listener_error)?;

        let tls = match scheme {
            Scheme::Https => {
                let cert = cert_dir.join(CERT_FILE);
                let key = cert_dir.join(KEY_FILE);
                debug!("Loading {:?} and {:?}", cert, key);
                let loaded = runtime.block_on(RustlsConfig::from_pem_file(&cert, &key));
                Some(loaded.map_err(|source| HwvalError::Tls { path: cert, source })?)
            }
            Scheme::Http => None,
        };

        let handle = axum_server::Handle::new();
        let server_handle = handle.clone();
        let app = router(signal);
        let thread = std::thread::Builder::new()
            .name("event-listener".to_string())
            .spawn(move || {
                let served = runtime.block_on(async move {
                    match tls {
                        Some(config) => {
                            axum_server::from_tcp_rustls(listener, config)
                                .handle(server_handle)
                                .serve(app.into_make_service())
                                .await
                        }
                        None => {
                            axum_server::from_tcp(listener)
                                .handle(server_handle)
                                .serve(app.into_make_service())
                                .await
                        }
                    }
                });
                if let Err(e) = served {
                    error!("Event listener on {address} stopped: {e}");
                }
            })
            .map_err(listener_error)?;

        info!("Started event listener. scheme: {scheme}, address: {address}");
        Ok(EventListener {
            address,
            handle,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Blocks until the server thread exits. Used when listening in the foreground.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Event listener thread on {} panicked", self.address);
            }
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            debug!("Stopping event listener at {}", self.address);
            self.handle.shutdown();
            let _ = thread.join();
        }
    }
}
