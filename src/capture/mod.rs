//! Capture contract.
//!
//! Every platform agent exposes one operation:
//!
//! ```text
//! createSnapshot(scopes) -> { zipPaths: {scope: devicePath}, appData, timestamp }
//! ```
//!
//! Agents attempt every scope and every app data category independently, so
//! a response may legitimately be partial. This module turns whatever the
//! agent returned into a validated `CaptureResult`:
//! - only requested scopes survive (the subset invariant)
//! - each app data category is parsed on its own; bad ones are dropped
//! - preference values are coerced into the shared value model
//!
//! Anything dropped is reported as a diagnostic, never as an error.

pub mod app_data;
pub mod archive;
pub mod value;

use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::bridge::Connection;
use crate::error::{Error, Result};
pub use app_data::{AppData, Category};

pub const CREATE_SNAPSHOT: &str = "createSnapshot";
pub const ZIP_DIRECTORY: &str = "zipDirectory";
pub const REMOVE_FILE: &str = "removeFile";

/// A scope archive waiting on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeArchive {
    pub scope: String,
    pub device_path: String,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// Materialized scopes, in request order.
    pub archives: Vec<ScopeArchive>,
    /// Requested scopes the agent could not archive.
    pub omitted_scopes: Vec<String>,
    pub app_data: AppData,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub diagnostics: Vec<String>,
}

impl CaptureResult {
    pub fn captured_scopes(&self) -> Vec<String> {
        self.archives.iter().map(|a| a.scope.clone()).collect()
    }
}

/// Keep the value of a sub-capture, or record why it was dropped.
pub fn best_effort<T, E: Display>(what: &str, result: std::result::Result<T, E>, diagnostics: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(category = what, error = %e, "sub-capture dropped");
            diagnostics.push(format!("{what}: {e}"));
            None
        }
    }
}

/// Run `createSnapshot` through the connection and validate the response.
pub async fn capture(conn: &Connection, scopes: &[String]) -> Result<CaptureResult> {
    let response = conn.call(CREATE_SNAPSHOT, vec![json!(scopes)]).await?;
    parse_response(response, scopes)
}

pub fn parse_response(response: Value, requested: &[String]) -> Result<CaptureResult> {
    let Value::Object(mut response) = response else {
        return Err(Error::InvalidCapture("response is not an object".to_string()));
    };

    let mut diagnostics = Vec::new();
    let requested = dedup(requested);

    let zip_paths = match response.remove("zipPaths") {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Default::default(),
        Some(_) => return Err(Error::InvalidCapture("zipPaths is not an object".to_string())),
    };

    for scope in zip_paths.keys() {
        if !requested.contains(scope) {
            diagnostics.push(format!("agent returned unrequested scope '{scope}', ignored"));
        }
    }

    let mut archives = Vec::new();
    let mut omitted_scopes = Vec::new();
    for scope in &requested {
        match zip_paths.get(scope) {
            Some(Value::String(path)) if !path.is_empty() => archives.push(ScopeArchive {
                scope: scope.clone(),
                device_path: path.clone(),
            }),
            Some(Value::Null) | None => omitted_scopes.push(scope.clone()),
            Some(other) => {
                diagnostics.push(format!("scope '{scope}': archive path is not a string ({other})"));
                omitted_scopes.push(scope.clone());
            }
        }
    }
    for scope in &omitted_scopes {
        tracing::warn!(scope = %scope, "scope not captured");
    }

    let app_data = AppData::from_capture(response.remove("appData").unwrap_or(Value::Null), &mut diagnostics);

    let timestamp = match response.get("timestamp").and_then(Value::as_str) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true),
            Err(e) => {
                diagnostics.push(format!("timestamp '{raw}' unparsable ({e}), using host time"));
                now()
            }
        },
        None => {
            diagnostics.push("timestamp missing, using host time".to_string());
            now()
        }
    };

    Ok(CaptureResult {
        archives,
        omitted_scopes,
        app_data,
        timestamp,
        diagnostics,
    })
}

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Scope names as a user typed them: trimmed, blanks dropped, first
/// occurrence kept.
pub fn normalize_scopes(scopes: &[String]) -> Vec<String> {
    let trimmed: Vec<String> = scopes
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    dedup(&trimmed)
}

fn dedup(scopes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        if !out.contains(scope) {
            out.push(scope.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn user_scopes_are_trimmed_and_deduplicated() {
        assert_eq!(
            normalize_scopes(&scopes(&["files", " cache", "files ", "  ", ""])),
            scopes(&["files", "cache"])
        );
    }

    fn scopes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_response_is_degraded_not_failed() {
        let response = json!({
            "zipPaths": {"files": "/data/tmp/a.zip"},
            "appData": {"databases": ["app.db"]},
            "timestamp": "2024-05-01T10:00:00+02:00"
        });

        let result = parse_response(response, &scopes(&["files", "cache"])).unwrap();
        assert_eq!(result.captured_scopes(), vec!["files"]);
        assert_eq!(result.omitted_scopes, vec!["cache"]);
        assert_eq!(result.timestamp, "2024-05-01T08:00:00.000Z");
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn unrequested_scopes_are_dropped() {
        let response = json!({
            "zipPaths": {"files": "/a.zip", "secret": "/b.zip"},
            "timestamp": "2024-05-01T10:00:00Z"
        });

        let result = parse_response(response, &scopes(&["files"])).unwrap();
        assert_eq!(result.captured_scopes(), vec!["files"]);
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].contains("secret"));
    }

    #[test]
    fn bad_timestamp_falls_back_to_host_time() {
        let result = parse_response(json!({"zipPaths": {}, "timestamp": "yesterday"}), &[]).unwrap();
        assert!(DateTime::parse_from_rfc3339(&result.timestamp).is_ok());
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn non_object_response_is_invalid() {
        assert!(matches!(
            parse_response(json!("nope"), &[]),
            Err(Error::InvalidCapture(_))
        ));
        assert!(matches!(
            parse_response(json!({"zipPaths": []}), &[]),
            Err(Error::InvalidCapture(_))
        ));
    }

    #[test]
    fn archives_follow_request_order() {
        let response = json!({
            "zipPaths": {"b": "/b.zip", "a": "/a.zip"},
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let result = parse_response(response, &scopes(&["a", "b", "a"])).unwrap();
        assert_eq!(result.captured_scopes(), vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn captured_scopes_are_a_subset_of_requested(
            requested in proptest::collection::vec("[a-z]{1,6}", 0..6),
            returned in proptest::collection::vec("[a-z]{1,6}", 0..8),
        ) {
            let zip_paths: serde_json::Map<String, Value> = returned
                .iter()
                .map(|s| (s.clone(), json!(format!("/tmp/{s}.zip"))))
                .collect();
            let response = json!({"zipPaths": zip_paths, "timestamp": "2024-01-01T00:00:00Z"});

            let result = parse_response(response, &requested).unwrap();
            for scope in result.captured_scopes() {
                prop_assert!(requested.contains(&scope));
                prop_assert!(returned.contains(&scope));
            }
            prop_assert_eq!(
                result.archives.len() + result.omitted_scopes.len(),
                dedup(&requested).len()
            );
        }
    }
}
