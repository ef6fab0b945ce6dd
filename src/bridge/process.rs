//! Bridge backed by a helper process.
//!
//! The helper (typically a small script around the instrumentation toolkit's
//! own bindings) is spawned lazily on the first request and speaks one JSON
//! object per line:
//!
//! ```text
//! -> {"id": 1, "method": "attach", "params": {"device": "...", "bundle": "..."}}
//! <- {"id": 1, "result": {"session": "s1"}}
//! <- {"id": 2, "error": "app com.example not running"}
//! ```
//!
//! Requests are serialized; there is never more than one in flight. Lines on
//! stdout that are not JSON objects are treated as helper chatter and logged.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{Bridge, DeviceInfo, ProcessInfo, ScriptHandle, SessionHandle};
use crate::error::BridgeError;
use crate::platform::Platform;

pub struct ProcessBridge {
    command: Vec<String>,
    next_id: AtomicU64,
    helper: Mutex<Option<Helper>>,
}

struct Helper {
    // held so kill_on_drop fires when the bridge goes away
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct SessionReply {
    session: String,
}

#[derive(Deserialize)]
struct ScriptReply {
    script: String,
}

#[derive(Deserialize)]
struct ChunkReply {
    data: String,
}

impl ProcessBridge {
    pub fn new(command: Vec<String>) -> Self {
        ProcessBridge {
            command,
            next_id: AtomicU64::new(1),
            helper: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<Helper, BridgeError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BridgeError::Protocol("empty bridge command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Protocol("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Protocol("helper stdout unavailable".to_string()))?;

        tracing::debug!(program = %program, "spawned bridge helper");

        Ok(Helper {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let mut guard = self.helper.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let Some(helper) = guard.as_mut() else {
            return Err(BridgeError::Closed);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "id": id, "method": method, "params": params }))
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        line.push('\n');

        let outcome = exchange(helper, id, method, line.as_bytes()).await;
        if matches!(outcome, Err(BridgeError::Closed) | Err(BridgeError::Io(_))) {
            // a dead helper is respawned on the next request
            *guard = None;
        }
        outcome
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BridgeError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("{method}: unexpected reply: {e}")))
    }
}

async fn exchange(helper: &mut Helper, id: u64, method: &str, line: &[u8]) -> Result<Value, BridgeError> {
    helper.stdin.write_all(line).await?;
    helper.stdin.flush().await?;

    loop {
        let Some(reply) = helper.stdout.next_line().await? else {
            return Err(BridgeError::Closed);
        };

        let response: Response = match serde_json::from_str(&reply) {
            Ok(response) => response,
            Err(_) => {
                tracing::debug!(line = %reply, "bridge helper output");
                continue;
            }
        };

        if response.id != id {
            return Err(BridgeError::Protocol(format!(
                "expected reply {id}, got {}",
                response.id
            )));
        }

        return match response.error {
            Some(message) => Err(BridgeError::rpc(method, message)),
            None => Ok(response.result),
        };
    }
}

#[async_trait]
impl Bridge for ProcessBridge {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        self.request_as("enumerateDevices", json!({})).await
    }

    async fn enumerate_processes(&self, device: &str) -> Result<Vec<ProcessInfo>, BridgeError> {
        self.request_as("enumerateProcesses", json!({ "device": device })).await
    }

    async fn attach(&self, device: &str, bundle: &str) -> Result<SessionHandle, BridgeError> {
        let reply: SessionReply = self
            .request_as("attach", json!({ "device": device, "bundle": bundle }))
            .await?;
        Ok(SessionHandle(reply.session))
    }

    async fn load_agent(&self, session: &SessionHandle, platform: Platform) -> Result<ScriptHandle, BridgeError> {
        let reply: ScriptReply = self
            .request_as("loadAgent", json!({ "session": session, "platform": platform }))
            .await?;
        Ok(ScriptHandle(reply.script))
    }

    async fn call(&self, script: &ScriptHandle, method: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.request("call", json!({ "script": script, "method": method, "args": args }))
            .await
    }

    async fn read_chunk(
        &self,
        script: &ScriptHandle,
        path: &str,
        offset: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, BridgeError> {
        let reply: ChunkReply = self
            .request_as(
                "readFile",
                json!({ "script": script, "path": path, "offset": offset, "length": max_len }),
            )
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(reply.data.as_bytes())
            .map_err(|e| BridgeError::Protocol(format!("readFile: bad chunk encoding: {e}")))
    }

    async fn unload(&self, script: ScriptHandle) -> Result<(), BridgeError> {
        self.request("unload", json!({ "script": script })).await.map(|_| ())
    }

    async fn detach(&self, session: SessionHandle) -> Result<(), BridgeError> {
        self.request("detach", json!({ "session": session })).await.map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessBridge {
        ProcessBridge::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn parses_replies_and_skips_chatter() {
        let bridge = sh(r#"read line; echo "helper ready"; echo '{"id":1,"result":[{"id":"usb1","name":"iPhone","type":"usb"}]}'"#);

        let devices = bridge.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "usb1");
        assert_eq!(devices[0].os, None);
    }

    #[tokio::test]
    async fn rpc_errors_carry_the_method() {
        let bridge = sh(r#"read line; echo '{"id":1,"error":"app com.example not running"}'"#);

        let err = bridge.attach("usb1", "com.example").await.unwrap_err();
        assert!(matches!(err, BridgeError::Rpc { ref method, .. } if method == "attach"));
    }

    #[tokio::test]
    async fn exited_helper_reports_closed() {
        let bridge = sh("exit 0");
        let err = bridge.enumerate_devices().await.unwrap_err();
        assert!(matches!(err, BridgeError::Closed | BridgeError::Io(_)));
    }

    #[tokio::test]
    async fn chunks_are_base64_decoded() {
        let bridge = sh(r#"read line; echo '{"id":1,"result":{"data":"aGVsbG8="}}'"#);
        let chunk = bridge
            .read_chunk(&ScriptHandle("s".into()), "/tmp/x.zip", 0, 16)
            .await
            .unwrap();
        assert_eq!(chunk, b"hello");
    }
}
