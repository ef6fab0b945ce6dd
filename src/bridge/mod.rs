//! Instrumentation bridge contract.
//!
//! The bridge owns everything device-specific: enumerating devices and
//! processes, attaching to (or spawning) the target app, loading the capture
//! agent, and executing RPCs inside the app. This crate only consumes it.
//!
//! Two implementations ship with the crate:
//! - `process`: a helper process speaking JSON lines on stdin/stdout
//! - `local`: a directory-backed device for emulator dumps and simulators

pub mod local;
pub mod process;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, ConnectionError};
use crate::platform::{self, Platform};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub os: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptHandle(pub String);

#[async_trait]
pub trait Bridge: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError>;

    async fn enumerate_processes(&self, device: &str) -> Result<Vec<ProcessInfo>, BridgeError>;

    async fn attach(&self, device: &str, bundle: &str) -> Result<SessionHandle, BridgeError>;

    async fn load_agent(
        &self,
        session: &SessionHandle,
        platform: Platform,
    ) -> Result<ScriptHandle, BridgeError>;

    async fn call(
        &self,
        script: &ScriptHandle,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, BridgeError>;

    /// Read up to `max_len` bytes of a device file. An empty chunk means end
    /// of file.
    async fn read_chunk(
        &self,
        script: &ScriptHandle,
        path: &str,
        offset: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, BridgeError>;

    async fn unload(&self, script: ScriptHandle) -> Result<(), BridgeError>;

    async fn detach(&self, session: SessionHandle) -> Result<(), BridgeError>;
}

/// What the bridge knows about a device before anything is attached.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: DeviceInfo,
    pub platform: Platform,
    pub elevated: bool,
}

pub async fn find_device(bridge: &dyn Bridge, device_id: &str) -> Result<DeviceInfo, ConnectionError> {
    bridge
        .enumerate_devices()
        .await?
        .into_iter()
        .find(|d| d.id == device_id)
        .ok_or_else(|| ConnectionError::DeviceNotFound(device_id.to_string()))
}

/// Resolve a device and classify it. Process enumeration is allowed to fail
/// (non-jailbroken devices often refuse it); detection then relies on the
/// device record alone.
pub async fn profile_device(bridge: &dyn Bridge, device_id: &str) -> Result<DeviceProfile, ConnectionError> {
    let device = find_device(bridge, device_id).await?;

    let processes = match bridge.enumerate_processes(device_id).await {
        Ok(processes) => processes,
        Err(e) => {
            tracing::debug!(device = device_id, error = %e, "process enumeration failed");
            Vec::new()
        }
    };

    let platform = platform::detect(&device, &processes);
    let elevated = platform::has_elevated_access(platform, &processes);

    Ok(DeviceProfile { device, platform, elevated })
}

/// Every device the bridge can see, classified.
pub async fn list_devices(bridge: &dyn Bridge) -> Result<Vec<DeviceProfile>, ConnectionError> {
    let mut profiles = Vec::new();
    for device in bridge.enumerate_devices().await? {
        let processes = bridge.enumerate_processes(&device.id).await.unwrap_or_default();
        let platform = platform::detect(&device, &processes);
        let elevated = platform::has_elevated_access(platform, &processes);
        profiles.push(DeviceProfile { device, platform, elevated });
    }
    Ok(profiles)
}

/// An attached session with a loaded agent.
///
/// Always finish with `close`; it releases the script and session and never
/// fails.
pub struct Connection {
    bridge: Arc<dyn Bridge>,
    device: String,
    session: Option<SessionHandle>,
    script: Option<ScriptHandle>,
}

/// Attach to `bundle` on `device_id` and load the platform agent.
///
/// On failure every resource acquired so far is released before the error is
/// returned; release errors are logged and dropped.
pub async fn connect(
    bridge: Arc<dyn Bridge>,
    device_id: &str,
    bundle: &str,
    platform: Platform,
) -> Result<Connection, ConnectionError> {
    find_device(bridge.as_ref(), device_id).await?;

    let session = bridge
        .attach(device_id, bundle)
        .await
        .map_err(|e| attach_error(bundle, e))?;
    tracing::debug!(device = device_id, bundle, session = %session.0, "attached");

    match bridge.load_agent(&session, platform).await {
        Ok(script) => {
            tracing::debug!(script = %script.0, %platform, "agent loaded");
            Ok(Connection {
                bridge,
                device: device_id.to_string(),
                session: Some(session),
                script: Some(script),
            })
        }
        Err(e) => {
            if let Err(release) = bridge.detach(session).await {
                tracing::debug!(error = %release, "detach after failed agent load");
            }
            Err(ConnectionError::AgentLoad(e))
        }
    }
}

fn attach_error(bundle: &str, error: BridgeError) -> ConnectionError {
    match &error {
        BridgeError::Rpc { message, .. } if message.contains("not running") => {
            ConnectionError::AppNotRunning(bundle.to_string())
        }
        _ => ConnectionError::AttachFailed {
            bundle: bundle.to_string(),
            source: error,
        },
    }
}

impl Connection {
    pub fn device(&self) -> &str {
        &self.device
    }

    fn script(&self) -> Result<&ScriptHandle, BridgeError> {
        self.script
            .as_ref()
            .ok_or_else(|| BridgeError::Protocol("not connected".to_string()))
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let script = self.script()?;
        self.bridge.call(script, method, args).await
    }

    pub async fn read_chunk(&self, path: &str, offset: u64, max_len: usize) -> Result<Vec<u8>, BridgeError> {
        let script = self.script()?;
        self.bridge.read_chunk(script, path, offset, max_len).await
    }

    pub async fn close(mut self) {
        if let Some(script) = self.script.take() {
            if let Err(e) = self.bridge.unload(script).await {
                tracing::debug!(error = %e, "unload failed during close");
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = self.bridge.detach(session).await {
                tracing::debug!(error = %e, "detach failed during close");
            }
        }
    }
}
