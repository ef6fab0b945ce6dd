use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::best_effort;
use super::value::{coerce, coerce_map};

/// Structured, non-file-tree application state.
///
/// Every category is optional: a category is absent when the platform does
/// not have it or when its sub-capture failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defaults: Option<Map<String, Value>>,
    /// Preference file name -> key/value map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_preferences: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keychain: Option<Vec<KeychainEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pasteboard: Option<Vec<PasteboardItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub databases: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(rename = "expiresDate", default, skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<String>,
    #[serde(rename = "isSecure", default)]
    pub is_secure: bool,
    #[serde(rename = "isHTTPOnly", default)]
    pub is_http_only: bool,
}

/// Credential store entry. Metadata only, never secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeychainEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteboardItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// App data categories in schema order. Diff output follows this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    UserDefaults,
    SharedPreferences,
    Cookies,
    Keychain,
    Pasteboard,
    Databases,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::UserDefaults,
        Category::SharedPreferences,
        Category::Cookies,
        Category::Keychain,
        Category::Pasteboard,
        Category::Databases,
    ];

    /// Key used in the capture response and in `appdata.json`.
    pub fn key(&self) -> &'static str {
        match self {
            Category::UserDefaults => "userDefaults",
            Category::SharedPreferences => "sharedPreferences",
            Category::Cookies => "cookies",
            Category::Keychain => "keychain",
            Category::Pasteboard => "pasteboard",
            Category::Databases => "databases",
        }
    }

    /// File written for this category by the flattened text encoding.
    pub fn text_file(&self) -> &'static str {
        match self {
            Category::UserDefaults => "userdefaults.txt",
            Category::SharedPreferences => "sharedpreferences.txt",
            Category::Cookies => "cookies.txt",
            Category::Keychain => "keychain.txt",
            Category::Pasteboard => "pasteboard.txt",
            Category::Databases => "databases.txt",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl AppData {
    pub fn has(&self, category: Category) -> bool {
        match category {
            Category::UserDefaults => self.user_defaults.is_some(),
            Category::SharedPreferences => self.shared_preferences.is_some(),
            Category::Cookies => self.cookies.is_some(),
            Category::Keychain => self.keychain.is_some(),
            Category::Pasteboard => self.pasteboard.is_some(),
            Category::Databases => self.databases.is_some(),
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        Category::ALL.into_iter().filter(|c| self.has(*c)).collect()
    }

    /// Build app data from a raw capture response, one category at a time.
    ///
    /// A category that does not have the expected shape is dropped and
    /// reported in `diagnostics`; the others are kept.
    pub fn from_capture(raw: Value, diagnostics: &mut Vec<String>) -> AppData {
        let mut raw = match raw {
            Value::Object(map) => map,
            Value::Null => return AppData::default(),
            other => {
                diagnostics.push(format!("appData: expected an object, got {}", kind_name(&other)));
                return AppData::default();
            }
        };

        let mut take = |category: Category| match raw.remove(category.key()) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        };

        let user_defaults = take(Category::UserDefaults);
        let shared_preferences = take(Category::SharedPreferences);
        let cookies = take(Category::Cookies);
        let keychain = take(Category::Keychain);
        let pasteboard = take(Category::Pasteboard);
        let databases = take(Category::Databases);

        AppData {
            user_defaults: user_defaults
                .and_then(|v| best_effort("userDefaults", preference_map(v), diagnostics)),
            shared_preferences: shared_preferences
                .and_then(|v| best_effort("sharedPreferences", preference_files(v), diagnostics)),
            cookies: cookies.and_then(|v| best_effort("cookies", serde_json::from_value(v), diagnostics)),
            keychain: keychain.and_then(|v| best_effort("keychain", serde_json::from_value(v), diagnostics)),
            pasteboard: pasteboard.and_then(|v| best_effort("pasteboard", serde_json::from_value(v), diagnostics)),
            databases: databases.and_then(|v| best_effort("databases", serde_json::from_value(v), diagnostics)),
        }
    }
}

fn preference_map(value: Value) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(coerce_map(map)),
        other => Err(format!("expected a key/value map, got {}", kind_name(&other))),
    }
}

fn preference_files(value: Value) -> Result<Map<String, Value>, String> {
    let Value::Object(files) = value else {
        return Err(format!("expected a map of preference files, got {}", kind_name(&value)));
    };

    files
        .into_iter()
        .map(|(file, prefs)| match prefs {
            Value::Object(map) => Ok((file, Value::Object(coerce_map(map)))),
            other => Ok((file, coerce(other))),
        })
        .collect()
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
