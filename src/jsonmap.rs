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

// jsonmap.rs
// Helper functions for pulling values out of untyped Redfish and CAPMC documents.
// Errors name the key and the URL the document came from.

use serde_json::Value;

use crate::HwvalError;

fn missing_key_error(key: &str, url: &str) -> HwvalError {
    HwvalError::MissingKey {
        key: key.to_string(),
        url: url.to_string(),
    }
}

fn invalid_type_error(key: &str, expected_type: &str, url: &str) -> HwvalError {
    HwvalError::InvalidKeyType {
        key: key.to_string(),
        expected_type: expected_type.to_string(),
        url: url.to_string(),
    }
}

// get_i64 reads an integer field of a document. Floats and numeric strings are
// rejected.
pub fn get_i64(document: &Value, key: &str, url: &str) -> Result<i64, HwvalError> {
    document
        .get(key)
        .ok_or_else(|| missing_key_error(key, url))?
        .as_i64()
        .ok_or_else(|| invalid_type_error(key, "integer", url))
}

// member_ids lists the @odata.id of every entry of a collection's Members.
// Entries without an id are skipped; None if there is no Members array.
pub fn member_ids(collection: &Value) -> Option<Vec<String>> {
    let members = collection.get("Members")?.as_array()?;
    Some(
        members
            .iter()
            .filter_map(|m| m.get("@odata.id").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}
