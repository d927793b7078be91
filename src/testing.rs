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
//! Scripted in-memory BMC used by the unit tests.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::network::{classify_status, CallFailure, CallResult, Payload, Transport, SERVICE_REDFISH};

type Hook = Rc<dyn Fn(&MockTransport, Option<&Value>)>;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Serves resources from a path map. GET of an unknown path is a 404, DELETE removes the
/// resource and its collection entry, POST to a `Subscriptions` collection creates a member.
/// Hooks run before the default handling and can change resources, e.g. to flip a power state.
pub struct MockTransport {
    controller: String,
    resources: RefCell<HashMap<String, Value>>,
    failures: RefCell<HashMap<(Method, String), CallFailure>>,
    hooks: RefCell<Vec<(Method, String, Hook)>>,
    calls: RefCell<Vec<RecordedCall>>,
    next_id: Cell<u32>,
}

impl MockTransport {
    pub fn new(controller: &str) -> Self {
        MockTransport {
            controller: controller.to_string(),
            resources: RefCell::new(HashMap::new()),
            failures: RefCell::new(HashMap::new()),
            hooks: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn with(self, path: &str, value: Value) -> Self {
        self.insert(path, value);
        self
    }

    pub fn insert(&self, path: &str, value: Value) {
        self.resources.borrow_mut().insert(path.to_string(), value);
    }

    pub fn resource(&self, path: &str) -> Option<Value> {
        self.resources.borrow().get(path).cloned()
    }

    /// Replaces one field of a stored object.
    pub fn set_field(&self, path: &str, field: &str, value: Value) {
        if let Some(Value::Object(map)) = self.resources.borrow_mut().get_mut(path) {
            map.insert(field.to_string(), value);
        }
    }

    pub fn fail(&self, method: Method, path: &str, status: StatusCode) {
        let failure = classify_status(SERVICE_REDFISH, path, status)
            .unwrap_or_else(|| CallFailure::new(SERVICE_REDFISH, "scripted failure"));
        self.failures
            .borrow_mut()
            .insert((method, path.to_string()), failure);
    }

    pub fn on<F>(&self, method: Method, path: &str, hook: F)
    where
        F: Fn(&MockTransport, Option<&Value>) + 'static,
    {
        self.hooks
            .borrow_mut()
            .push((method, path.to_string(), Rc::new(hook)));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    /// Bodies sent with `method` to `path`, in order.
    pub fn bodies(&self, method: Method, path: &str) -> Vec<Option<Value>> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .map(|c| c.body.clone())
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.bodies(method, path).len()
    }

    fn not_found(path: &str) -> CallFailure {
        classify_status(SERVICE_REDFISH, path, StatusCode::NOT_FOUND)
            .unwrap_or_else(|| CallFailure::new(path, "Bad Request (404)"))
    }

    fn create_member(&self, collection: &str, body: Option<&Value>) -> CallResult {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let member_path = format!("{collection}/{id}");
        let mut created = body.cloned().unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut created {
            map.insert("@odata.id".to_string(), json!(member_path));
            map.insert("Id".to_string(), json!(id.to_string()));
        }
        let mut resources = self.resources.borrow_mut();
        if let Some(Value::Object(coll)) = resources.get_mut(collection) {
            if let Some(Value::Array(members)) = coll.get_mut("Members") {
                members.push(json!({ "@odata.id": member_path }));
            }
        }
        resources.insert(member_path, created.clone());
        Ok(Payload::Body(created.to_string()))
    }

    fn remove(&self, path: &str) -> CallResult {
        let mut resources = self.resources.borrow_mut();
        if resources.remove(path).is_none() {
            return Err(Self::not_found(path));
        }
        for value in resources.values_mut() {
            if let Some(Value::Array(members)) = value.get_mut("Members") {
                members.retain(|m| m.get("@odata.id").and_then(Value::as_str) != Some(path));
            }
        }
        Ok(Payload::NoContent(StatusCode::NO_CONTENT))
    }
}

impl Transport for MockTransport {
    fn controller(&self) -> &str {
        &self.controller
    }

    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> CallResult {
        self.calls.borrow_mut().push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body: body.cloned(),
        });
        if let Some(failure) = self
            .failures
            .borrow()
            .get(&(method.clone(), path.to_string()))
        {
            return Err(failure.clone());
        }
        let hooks: Vec<Hook> = self
            .hooks
            .borrow()
            .iter()
            .filter(|(m, p, _)| *m == method && p == path)
            .map(|(_, _, h)| h.clone())
            .collect();
        for hook in hooks {
            hook(self, body);
        }

        match method {
            Method::GET => self
                .resource(path)
                .map(|v| Payload::Body(v.to_string()))
                .ok_or_else(|| Self::not_found(path)),
            Method::POST if path.ends_with("/Subscriptions") && self.resource(path).is_some() => {
                self.create_member(path, body)
            }
            Method::DELETE => self.remove(path),
            _ => Ok(Payload::NoContent(StatusCode::NO_CONTENT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_subscription_collection() {
        // POST creates a member, DELETE removes it again
        let mock = MockTransport::new("bmc").with(
            "/redfish/v1/EventService/Subscriptions",
            json!({"Members": []}),
        );
        mock.post(
            "/redfish/v1/EventService/Subscriptions",
            &json!({"Context": "c"}),
        )
        .unwrap();
        let sub = mock
            .get_json("/redfish/v1/EventService/Subscriptions/1")
            .unwrap();
        assert_eq!(sub["Context"], "c");
        mock.delete("/redfish/v1/EventService/Subscriptions/1")
            .unwrap();
        let coll = mock.resource("/redfish/v1/EventService/Subscriptions").unwrap();
        assert_eq!(coll["Members"], json!([]));
        assert!(mock.get("/redfish/v1/EventService/Subscriptions/1").is_err());
    }
}
