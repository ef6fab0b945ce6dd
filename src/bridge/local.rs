//! Directory-backed devices.
//!
//! A local device is a directory on this machine laid out as
//! `<root>/<bundle>/<scope>/...`, e.g. a simulator's app containers or an
//! emulator data dump. Its agent implements the capture contract directly on
//! the filesystem:
//! - each scope directory is archived into a scratch zip
//! - databases are listed from the platform's usual locations
//! - other app data categories come from optional fixture files at
//!   `<root>/<bundle>/.appdata/<category>.json`
//!
//! Every scope and category is captured independently; failures only drop
//! the affected part of the result.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use walkdir::WalkDir;

use super::{Bridge, DeviceInfo, ProcessInfo, ScriptHandle, SessionHandle};
use crate::capture::archive::zip_directory;
use crate::capture::{self, Category};
use crate::config::LocalDevice;
use crate::error::BridgeError;
use crate::platform::Platform;

pub const FIXTURE_DIR: &str = ".appdata";

pub struct LocalBridge {
    devices: Vec<LocalDevice>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    sessions: HashMap<String, AppTarget>,
    agents: HashMap<String, Agent>,
}

#[derive(Debug, Clone)]
struct AppTarget {
    root: PathBuf,
    platform: Platform,
}

struct Agent {
    target: AppTarget,
    scratch: Arc<TempDir>,
}

impl LocalBridge {
    pub fn new(devices: Vec<LocalDevice>) -> Self {
        LocalBridge {
            devices,
            state: Mutex::new(State::default()),
        }
    }

    fn device(&self, id: &str) -> Option<&LocalDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn agent(&self, script: &ScriptHandle, method: &str) -> Result<(AppTarget, Arc<TempDir>, u64), BridgeError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let seq = state.next_id;
        let agent = state
            .agents
            .get(&script.0)
            .ok_or_else(|| BridgeError::rpc(method, format!("script {} not loaded", script.0)))?;
        Ok((agent.target.clone(), Arc::clone(&agent.scratch), seq))
    }
}

#[async_trait]
impl Bridge for LocalBridge {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        Ok(self
            .devices
            .iter()
            .map(|d| DeviceInfo {
                id: d.id.clone(),
                name: d.name.clone().unwrap_or_else(|| d.id.clone()),
                kind: "local".to_string(),
                os: Some(d.platform.to_string()),
            })
            .collect())
    }

    async fn enumerate_processes(&self, _device: &str) -> Result<Vec<ProcessInfo>, BridgeError> {
        Ok(Vec::new())
    }

    async fn attach(&self, device: &str, bundle: &str) -> Result<SessionHandle, BridgeError> {
        let local = self
            .device(device)
            .ok_or_else(|| BridgeError::rpc("attach", format!("device {device} not found")))?;

        if !is_plain_name(bundle) {
            return Err(BridgeError::rpc("attach", format!("invalid bundle id {bundle:?}")));
        }
        let root = local.root.join(bundle);
        if !root.is_dir() {
            return Err(BridgeError::rpc("attach", format!("app {bundle} not running")));
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("session-{}", state.next_id);
        state.sessions.insert(
            id.clone(),
            AppTarget {
                root,
                platform: local.platform,
            },
        );
        Ok(SessionHandle(id))
    }

    async fn load_agent(&self, session: &SessionHandle, platform: Platform) -> Result<ScriptHandle, BridgeError> {
        let scratch = tempfile::Builder::new().prefix("mobile-diff-agent-").tempdir()?;

        let mut state = self.state.lock();
        let mut target = state
            .sessions
            .get(&session.0)
            .cloned()
            .ok_or_else(|| BridgeError::rpc("loadAgent", format!("session {} not attached", session.0)))?;
        target.platform = platform;

        state.next_id += 1;
        let id = format!("script-{}", state.next_id);
        state.agents.insert(
            id.clone(),
            Agent {
                target,
                scratch: Arc::new(scratch),
            },
        );
        Ok(ScriptHandle(id))
    }

    async fn call(&self, script: &ScriptHandle, method: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let (target, scratch, seq) = self.agent(script, method)?;
        let method_name = method.to_string();

        tokio::task::spawn_blocking(move || dispatch(&target, scratch.path(), seq, &method_name, args))
            .await
            .map_err(|e| BridgeError::rpc(method, format!("agent task failed: {e}")))?
    }

    async fn read_chunk(
        &self,
        script: &ScriptHandle,
        path: &str,
        offset: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, BridgeError> {
        self.agent(script, "readFile")?;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(max_len);
        (&mut file).take(max_len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn unload(&self, script: ScriptHandle) -> Result<(), BridgeError> {
        // dropping the agent removes its scratch directory
        self.state
            .lock()
            .agents
            .remove(&script.0)
            .map(|_| ())
            .ok_or_else(|| BridgeError::rpc("unload", format!("script {} not loaded", script.0)))
    }

    async fn detach(&self, session: SessionHandle) -> Result<(), BridgeError> {
        self.state
            .lock()
            .sessions
            .remove(&session.0)
            .map(|_| ())
            .ok_or_else(|| BridgeError::rpc("detach", format!("session {} not attached", session.0)))
    }
}

fn dispatch(target: &AppTarget, scratch: &Path, seq: u64, method: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
    let first_arg = || args.first().cloned().unwrap_or(Value::Null);

    match method {
        capture::CREATE_SNAPSHOT => {
            let scopes: Vec<String> = serde_json::from_value(first_arg())
                .map_err(|e| BridgeError::rpc(method, format!("bad scopes argument: {e}")))?;
            let out = scratch.join(format!("capture-{seq}"));
            std::fs::create_dir_all(&out)?;
            Ok(create_snapshot(target, &out, &scopes))
        }
        capture::ZIP_DIRECTORY => {
            let path = string_arg(method, first_arg())?;
            let dest = scratch.join(format!("zip-{seq}.zip"));
            Ok(zip_scope(Path::new(&path), &dest)
                .map(|p| Value::String(p.to_string_lossy().into_owned()))
                .unwrap_or(Value::Null))
        }
        capture::REMOVE_FILE => {
            let path = string_arg(method, first_arg())?;
            std::fs::remove_file(path)?;
            Ok(Value::Null)
        }
        other => Err(BridgeError::rpc(other, "unknown method")),
    }
}

fn string_arg(method: &str, value: Value) -> Result<String, BridgeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BridgeError::rpc(method, format!("expected a path argument, got {other}"))),
    }
}

fn create_snapshot(target: &AppTarget, out: &Path, scopes: &[String]) -> Value {
    let mut zip_paths = Map::new();
    for (i, scope) in scopes.iter().enumerate() {
        if !is_relative_scope(scope) {
            tracing::warn!(scope = %scope, "scope escapes the app directory, skipped");
            continue;
        }
        let dest = out.join(format!("scope-{i}.zip"));
        if let Some(path) = zip_scope(&target.root.join(scope), &dest) {
            zip_paths.insert(scope.clone(), Value::String(path.to_string_lossy().into_owned()));
        }
    }

    let mut app_data = Map::new();
    for category in Category::ALL {
        let captured = match category {
            Category::Databases => list_databases(target).map(Some),
            _ => read_fixture(&target.root, category),
        };
        match captured {
            Ok(Some(value)) => {
                app_data.insert(category.key().to_string(), value);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%category, error = %e, "local capture failed"),
        }
    }

    serde_json::json!({
        "zipPaths": zip_paths,
        "appData": app_data,
        "timestamp": capture::now(),
    })
}

fn zip_scope(source: &Path, dest: &Path) -> Option<PathBuf> {
    if !source.is_dir() {
        return None;
    }
    match zip_directory(source, dest) {
        Ok(_) => Some(dest.to_path_buf()),
        Err(e) => {
            tracing::warn!(path = %source.display(), error = %e, "failed to zip directory");
            let _ = std::fs::remove_file(dest);
            None
        }
    }
}

fn read_fixture(app_root: &Path, category: Category) -> Result<Option<Value>, String> {
    let path = app_root.join(FIXTURE_DIR).join(format!("{}.json", category.key()));
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn list_databases(target: &AppTarget) -> Result<Value, String> {
    let mut names = Vec::new();

    match target.platform {
        Platform::Android => {
            let dir = target.root.join("databases");
            if dir.is_dir() {
                let mut entries: Vec<String> = std::fs::read_dir(&dir)
                    .map_err(|e| e.to_string())?
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| !name.ends_with("-journal"))
                    .collect();
                entries.sort();
                names.extend(entries);
            }
        }
        Platform::Ios => {
            for scope in ["Documents", "Library"] {
                let dir = target.root.join(scope);
                for entry in WalkDir::new(&dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                    let is_db = entry.file_type().is_file()
                        && matches!(
                            entry.path().extension().and_then(|e| e.to_str()),
                            Some("sqlite" | "sqlite3" | "db")
                        );
                    if let (true, Some(name)) = (is_db, capture::archive::entry_name(&target.root, entry.path())) {
                        names.push(name);
                    }
                }
            }
        }
    }

    Ok(Value::Array(names.into_iter().map(Value::String).collect()))
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).components().all(|c| matches!(c, Component::Normal(_))) && !name.contains('/')
}

fn is_relative_scope(scope: &str) -> bool {
    !scope.is_empty() && Path::new(scope).components().all(|c| matches!(c, Component::Normal(_)))
}
