//! App data encodings.
//!
//! The encoding is chosen when a snapshot is created and never changes:
//! - json: `appdata.json`, full fidelity
//! - yaml: `appdata.yaml`, full fidelity
//! - text: one flattened file per category; nested values are inlined as
//!   JSON text and cannot be diffed structurally

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capture::app_data::{Cookie, KeychainEntry, PasteboardItem};
use crate::capture::{AppData, Category};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    /// File holding the whole app data record, if this encoding has one.
    pub fn structured_file(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Text => None,
            OutputFormat::Json => Some(JSON_FILE),
            OutputFormat::Yaml => Some(YAML_FILE),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        })
    }
}

pub const JSON_FILE: &str = "appdata.json";
pub const YAML_FILE: &str = "appdata.yaml";

/// Encode app data as `(file name, contents)` pairs for the given format.
pub fn encode(app_data: &AppData, format: OutputFormat) -> Result<Vec<(&'static str, String)>> {
    Ok(match format {
        OutputFormat::Json => vec![(JSON_FILE, serde_json::to_string_pretty(app_data)?)],
        OutputFormat::Yaml => vec![(YAML_FILE, serde_yaml::to_string(app_data)?)],
        OutputFormat::Text => encode_text(app_data),
    })
}

pub fn decode_json(raw: &str) -> Result<AppData> {
    Ok(serde_json::from_str(raw)?)
}

pub fn decode_yaml(raw: &str) -> Result<AppData> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Flattened text rendering, one file per present category.
pub fn encode_text(app_data: &AppData) -> Vec<(&'static str, String)> {
    let mut files = Vec::new();

    if let Some(prefs) = &app_data.user_defaults {
        files.push((Category::UserDefaults.text_file(), key_values(prefs)));
    }
    if let Some(prefs) = &app_data.shared_preferences {
        files.push((Category::SharedPreferences.text_file(), preference_sections(prefs)));
    }
    if let Some(cookies) = &app_data.cookies {
        files.push((Category::Cookies.text_file(), cookie_csv(cookies)));
    }
    if let Some(entries) = &app_data.keychain {
        files.push((Category::Keychain.text_file(), keychain_sections(entries)));
    }
    if let Some(items) = &app_data.pasteboard {
        files.push((Category::Pasteboard.text_file(), pasteboard_lines(items)));
    }
    if let Some(names) = &app_data.databases {
        files.push((Category::Databases.text_file(), lines(names.iter().map(String::as_str))));
    }

    files
}

fn key_values(map: &Map<String, Value>) -> String {
    lines(map.iter().map(|(k, v)| format!("{k}={v}")))
}

fn preference_sections(files: &Map<String, Value>) -> String {
    let sections: Vec<String> = files
        .iter()
        .map(|(file, prefs)| match prefs {
            Value::Object(map) => format!("[{file}]\n{}", key_values(map)),
            other => format!("[{file}]\n{other}\n"),
        })
        .collect();
    sections.join("\n")
}

fn cookie_csv(cookies: &[Cookie]) -> String {
    let mut out = String::from("name,domain,path,value,expires,secure,httponly\n");
    for cookie in cookies {
        let row = [
            csv_field(&cookie.name),
            csv_field(&cookie.domain),
            csv_field(&cookie.path),
            csv_field(&cookie.value),
            csv_field(cookie.expires_date.as_deref().unwrap_or("")),
            cookie.is_secure.to_string(),
            cookie.is_http_only.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn keychain_sections(entries: &[KeychainEntry]) -> String {
    let sections: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let fields = [
                ("type", Some(entry.kind.as_str())),
                ("account", entry.account.as_deref()),
                ("service", entry.service.as_deref()),
                ("label", entry.label.as_deref()),
                ("accessGroup", entry.access_group.as_deref()),
                ("creationDate", entry.creation_date.as_deref()),
                ("modificationDate", entry.modification_date.as_deref()),
            ];
            let body = lines(
                fields
                    .iter()
                    .filter_map(|&(name, value)| value.filter(|v| !v.is_empty()).map(|v| format!("{name}: {v}"))),
            );
            format!("[Entry {}]\n{body}", i + 1)
        })
        .collect();
    sections.join("\n")
}

fn pasteboard_lines(items: &[PasteboardItem]) -> String {
    lines(items.iter().map(|item| format!("{}: {}", item.kind, item.content)))
}

fn lines<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for item in items {
        out.push_str(item.as_ref());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> AppData {
        AppData {
            user_defaults: Some(json!({"flag": true, "list": [1, 2], "nested": {"a": null}}).as_object().unwrap().clone()),
            shared_preferences: Some(json!({"prefs.xml": {"token": "abc"}}).as_object().unwrap().clone()),
            cookies: Some(vec![Cookie {
                name: "sid".to_string(),
                value: "a,b".to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                expires_date: None,
                is_secure: true,
                is_http_only: false,
            }]),
            keychain: Some(vec![KeychainEntry {
                account: Some("alice".to_string()),
                service: Some("api".to_string()),
                label: None,
                access_group: Some(String::new()),
                creation_date: None,
                modification_date: None,
                kind: "genericPassword".to_string(),
            }]),
            pasteboard: Some(vec![PasteboardItem {
                kind: "public.utf8-plain-text".to_string(),
                content: "hello".to_string(),
            }]),
            databases: Some(vec!["app.db".to_string()]),
        }
    }

    #[test]
    fn text_files_follow_category_layout() {
        let files: std::collections::BTreeMap<_, _> = encode_text(&sample()).into_iter().collect();

        assert_eq!(files["userdefaults.txt"], "flag=true\nlist=[1,2]\nnested={\"a\":null}\n");
        assert_eq!(files["sharedpreferences.txt"], "[prefs.xml]\ntoken=\"abc\"\n");
        assert_eq!(
            files["cookies.txt"],
            "name,domain,path,value,expires,secure,httponly\nsid,.example.com,/,\"a,b\",,true,false\n"
        );
        assert_eq!(files["keychain.txt"], "[Entry 1]\ntype: genericPassword\naccount: alice\nservice: api\n");
        assert_eq!(files["pasteboard.txt"], "public.utf8-plain-text: hello\n");
        assert_eq!(files["databases.txt"], "app.db\n");
    }

    #[test]
    fn absent_categories_write_nothing() {
        let data = AppData {
            databases: Some(vec![]),
            ..Default::default()
        };
        let files = encode_text(&data);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0], ("databases.txt", String::new()));
    }

    #[test]
    fn structured_encodings_decode_to_equal_data() {
        let data = sample();

        let json = encode(&data, OutputFormat::Json).unwrap();
        assert_eq!(json[0].0, JSON_FILE);
        assert_eq!(decode_json(&json[0].1).unwrap(), data);

        let yaml = encode(&data, OutputFormat::Yaml).unwrap();
        assert_eq!(yaml[0].0, YAML_FILE);
        assert_eq!(decode_yaml(&yaml[0].1).unwrap(), data);
    }
}
