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
use std::fmt;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    /// Cluster dependency that is not up
    NotHealthy,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "OK"),
            Severity::NotHealthy => write!(f, "Not Healthy"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    pub key: String,
    pub message: String,
}

/// One emitted record: a headline naming the check and, except for OK, the subject
/// and reason underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub label: String,
    pub detail: Option<Detail>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<50}\t{}", self.label, self.severity)?;
        if let Some(d) = &self.detail {
            write!(f, "\n{:>50}\t{}", d.key, d.message)?;
        }
        Ok(())
    }
}

/// Findings of a validation run in emission order.
///
/// The failure count travels as the return value of each check. The report only keeps
/// what was said, and whether anything Error level was said, for the exit status.
#[derive(Debug, Default)]
pub struct Report {
    findings: Vec<Finding>,
    errors: usize,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(&mut self, label: &str) {
        self.push(Severity::Ok, label, None);
    }

    pub fn info(&mut self, label: &str, key: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, label, Some((key.into(), message.into())));
    }

    pub fn warning(&mut self, label: &str, key: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, label, Some((key.into(), message.into())));
    }

    pub fn error(&mut self, label: &str, key: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, label, Some((key.into(), message.into())));
    }

    /// An unhealthy dependency, optionally with the reason underneath.
    pub fn not_healthy(&mut self, label: &str, detail: Option<(String, String)>) {
        self.push(Severity::NotHealthy, label, detail);
    }

    fn push(&mut self, severity: Severity, label: &str, detail: Option<(String, String)>) {
        debug!("{severity} {label} {detail:?}");
        if matches!(severity, Severity::Error | Severity::NotHealthy) {
            self.errors += 1;
        }
        self.findings.push(Finding {
            severity,
            label: label.to_string(),
            detail: detail.map(|(key, message)| Detail { key, message }),
        });
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Removes and returns everything emitted so far. The error tally is kept.
    pub fn take_findings(&mut self) -> Vec<Finding> {
        std::mem::take(&mut self.findings)
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Verdict of an end-to-end scenario.
///
/// `failures` counts the failed checks. `aborted` is set when a step failed in a way
/// that made the remaining steps pointless; the scenario then fails even with zero
/// counted failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub failures: u32,
    pub aborted: bool,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.failures == 0 && !self.aborted
    }

    pub fn fail(&mut self) {
        self.failures += 1;
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Failure count as it enters the overall tally; an abort counts at least once.
    pub fn tally(&self) -> u32 {
        if self.aborted {
            self.failures.max(1)
        } else {
            self.failures
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.passed(), self.failures) {
            (true, _) => write!(f, "PASS"),
            (false, 0) => write!(f, "FAIL"),
            (false, 1) => write!(f, "FAIL: There was 1 test failure."),
            (false, n) => write!(f, "FAIL: There were {n} test failures."),
        }
    }
}
