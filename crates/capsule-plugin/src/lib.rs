//! # capsule-plugin
//!
//! The executor-side view of a plugin: an executable that reads one JSON
//! request from stdin and writes one JSON response to stdout, or, in
//! transcript mode, writes a `transcript.jsonl` file into a directory it
//! was told about. Each invocation is a short-lived subprocess spawned over
//! stdio (`std::process::Command`), not a long-lived framed connection to
//! a daemon.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use capsule_support::log_plugin_debug;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse plugin message: {0}")]
    Parse(String),

    #[error("plugin reported an error: {0}")]
    Plugin(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;

impl capsule_support::ClassifyError for PluginError {
    fn kind(&self) -> capsule_support::ErrorKind {
        use capsule_support::ErrorKind;
        match self {
            PluginError::Io(_) => ErrorKind::Io,
            PluginError::Parse(_) => ErrorKind::Parse,
            PluginError::Plugin(_) => ErrorKind::Plugin,
        }
    }
}

/// The two declared plugin kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Format,
    Tool,
}

/// A format plugin's declared IR support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrSupport {
    pub can_extract: bool,
    pub can_emit: bool,
    pub loss_class: String,
    pub formats: Vec<String>,
}

/// Static description of a plugin, supplied by the caller rather than
/// read from the plugin itself — plugin internals are out of scope here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub executable: PathBuf,
    pub kind: PluginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_support: Option<IrSupport>,
}

/// Request sent to a plugin on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    pub command: String,
    pub args: serde_json::Value,
}

impl PluginRequest {
    pub fn extract_ir(path: &str, output_dir: &str) -> Self {
        Self {
            command: "extract-ir".to_string(),
            args: serde_json::json!({"path": path, "output_dir": output_dir}),
        }
    }

    pub fn emit_native(ir_path: &str, output_dir: &str) -> Self {
        Self {
            command: "emit-native".to_string(),
            args: serde_json::json!({"ir_path": ir_path, "output_dir": output_dir}),
        }
    }

    pub fn run_tool(output_dir: &str, profile: &str, inputs_dir: &str) -> Self {
        Self {
            command: "run-tool".to_string(),
            args: serde_json::json!({
                "output_dir": output_dir,
                "profile": profile,
                "inputs": inputs_dir,
            }),
        }
    }
}

/// Response read from a plugin's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub const TRANSCRIPT_FILE_NAME: &str = "transcript.jsonl";

/// Spawn `descriptor`'s executable, write `request` as JSON to its stdin,
/// read back exactly one JSON response from stdout, and return it. Returns
/// `Plugin` if the process exits non-zero even when a response was parsed.
pub fn invoke(descriptor: &PluginDescriptor, request: &PluginRequest) -> Result<PluginResponse> {
    log_plugin_debug!("invoking plugin", id = %descriptor.id, command = %request.command);

    let mut child = Command::new(&descriptor.executable)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let request_bytes = serde_json::to_vec(request)
        .map_err(|e| PluginError::Parse(format!("request not serializable: {e}")))?;
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(&request_bytes)?;

    let output = child.wait_with_output()?;
    let response: PluginResponse = serde_json::from_slice(&output.stdout)
        .map_err(|e| PluginError::Parse(format!("malformed plugin response: {e}")))?;

    if !output.status.success() && response.status != "ok" {
        let detail = response
            .error
            .clone()
            .unwrap_or_else(|| format!("plugin exited with status {:?}", output.status.code()));
        return Err(PluginError::Plugin(detail));
    }

    if response.status == "error" {
        return Err(PluginError::Plugin(
            response.error.clone().unwrap_or_else(|| "plugin reported an error".to_string()),
        ));
    }

    Ok(response)
}

/// Path to the transcript file a tool plugin is expected to have written
/// into `output_dir`, if it exists.
pub fn transcript_path_in(output_dir: &Path) -> Option<PathBuf> {
    let path = output_dir.join(TRANSCRIPT_FILE_NAME);
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_fake_plugin(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake_plugin.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[test]
    fn invoke_parses_ok_response() {
        let dir = TempDir::new().unwrap();
        let script = write_fake_plugin(
            &dir,
            r#"cat > /dev/null; echo '{"status":"ok","result":{"ir_path":"/tmp/x.ir.json","loss_class":"L0"}}'"#,
        );
        let descriptor = PluginDescriptor {
            id: "fake".to_string(),
            executable: script,
            kind: PluginKind::Format,
            ir_support: None,
        };
        let response = invoke(&descriptor, &PluginRequest::extract_ir("/tmp/in.txt", "/tmp/out")).unwrap();
        assert!(response.is_ok());
        assert_eq!(
            response.result.unwrap()["loss_class"],
            serde_json::json!("L0")
        );
    }

    #[test]
    fn invoke_surfaces_plugin_reported_error() {
        let dir = TempDir::new().unwrap();
        let script = write_fake_plugin(
            &dir,
            r#"cat > /dev/null; echo '{"status":"error","error":"unsupported format"}'"#,
        );
        let descriptor = PluginDescriptor {
            id: "fake".to_string(),
            executable: script,
            kind: PluginKind::Format,
            ir_support: None,
        };
        let err = invoke(&descriptor, &PluginRequest::extract_ir("/tmp/in.txt", "/tmp/out")).unwrap_err();
        assert!(matches!(err, PluginError::Plugin(_)));
    }

    #[test]
    fn invoke_fails_on_malformed_output() {
        let dir = TempDir::new().unwrap();
        let script = write_fake_plugin(&dir, "cat > /dev/null; echo 'not json'");
        let descriptor = PluginDescriptor {
            id: "fake".to_string(),
            executable: script,
            kind: PluginKind::Tool,
            ir_support: None,
        };
        let err = invoke(&descriptor, &PluginRequest::run_tool("/tmp/out", "default", "/tmp/in")).unwrap_err();
        assert!(matches!(err, PluginError::Parse(_)));
    }

    #[test]
    fn transcript_path_in_reports_presence() {
        let dir = TempDir::new().unwrap();
        assert!(transcript_path_in(dir.path()).is_none());
        fs::write(dir.path().join(TRANSCRIPT_FILE_NAME), "{}\n").unwrap();
        assert!(transcript_path_in(dir.path()).is_some());
    }
}
