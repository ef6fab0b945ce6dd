use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bridge::{DeviceInfo, ProcessInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    /// Scopes captured when the caller does not name any.
    pub fn default_scopes(&self) -> Vec<String> {
        let scopes: &[&str] = match self {
            Platform::Ios => &["Documents", "Library", "tmp", "Bundle"],
            Platform::Android => &["files", "cache", "databases", "shared_prefs"],
        };
        scopes.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform '{other}' (expected ios or android)")),
        }
    }
}

const IOS_SYSTEM_PROCESSES: &[&str] = &["launchd", "SpringBoard"];
const ANDROID_SYSTEM_PROCESSES: &[&str] = &["system_server", "zygote", "zygote64"];

/// Classify a device from what the bridge reports about it.
///
/// The reported OS wins, then well-known system processes, then the device
/// name. Anything left over is treated as iOS.
pub fn detect(device: &DeviceInfo, processes: &[ProcessInfo]) -> Platform {
    if let Some(os) = device.os.as_deref() {
        let os = os.to_ascii_lowercase();
        if os.contains("android") {
            return Platform::Android;
        }
        if os.contains("ios") || os.contains("iphone") {
            return Platform::Ios;
        }
    }

    if has_process(processes, IOS_SYSTEM_PROCESSES) {
        return Platform::Ios;
    }
    if has_process(processes, ANDROID_SYSTEM_PROCESSES) {
        return Platform::Android;
    }

    if device.name.to_ascii_lowercase().contains("android") {
        return Platform::Android;
    }

    Platform::Ios
}

/// Returns true when system processes are visible to the bridge, which on
/// iOS only happens on a jailbroken device with a root shell available.
pub fn has_elevated_access(platform: Platform, processes: &[ProcessInfo]) -> bool {
    match platform {
        Platform::Ios => has_process(processes, IOS_SYSTEM_PROCESSES),
        Platform::Android => false,
    }
}

fn has_process(processes: &[ProcessInfo], names: &[&str]) -> bool {
    processes.iter().any(|p| names.contains(&p.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, os: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            id: "dev".into(),
            name: name.into(),
            kind: "usb".into(),
            os: os.map(str::to_string),
        }
    }

    fn procs(names: &[&str]) -> Vec<ProcessInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| ProcessInfo { pid: i as u32 + 1, name: n.to_string() })
            .collect()
    }

    #[test]
    fn reported_os_wins() {
        let p = detect(&device("iPhone", Some("Android 14")), &procs(&["launchd"]));
        assert_eq!(p, Platform::Android);
    }

    #[test]
    fn system_processes_identify_platform() {
        assert_eq!(detect(&device("x", None), &procs(&["SpringBoard"])), Platform::Ios);
        assert_eq!(detect(&device("x", None), &procs(&["zygote"])), Platform::Android);
    }

    #[test]
    fn falls_back_to_name_then_ios() {
        assert_eq!(detect(&device("Android Emulator", None), &[]), Platform::Android);
        assert_eq!(detect(&device("Pixel", None), &[]), Platform::Ios);
    }

    #[test]
    fn elevated_access_only_detected_on_ios() {
        assert!(has_elevated_access(Platform::Ios, &procs(&["launchd"])));
        assert!(!has_elevated_access(Platform::Ios, &procs(&["MobileSafari"])));
        assert!(!has_elevated_access(Platform::Android, &procs(&["launchd"])));
    }

    #[test]
    fn default_scopes_per_platform() {
        assert_eq!(Platform::Android.default_scopes()[0], "files");
        assert!(Platform::Ios.default_scopes().contains(&"Documents".to_string()));
    }
}
