//! # capsule-executor
//!
//! Interprets a declarative [`Plan`] of steps and checks against a
//! [`Capsule`], producing a [`Report`]. Steps and checks are a closed
//! tagged enum interpreted by a small dispatch loop rather than ad-hoc
//! string matching scattered through a runner. Each `execute()` call gets
//! its own disposable `tempfile::TempDir` scratch directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;

use capsule_core::{Capsule, CapsuleError, ExportMode};
use capsule_plugin::{invoke, transcript_path_in, PluginDescriptor, PluginKind, PluginRequest};
use capsule_support::log_executor_info;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Capsule(#[from] CapsuleError),

    #[error(transparent)]
    Plugin(#[from] capsule_plugin::PluginError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

impl capsule_support::ClassifyError for ExecutorError {
    fn kind(&self) -> capsule_support::ErrorKind {
        use capsule_support::ErrorKind;
        match self {
            ExecutorError::Io(_) => ErrorKind::Io,
            ExecutorError::Capsule(e) => e.kind(),
            ExecutorError::Plugin(e) => e.kind(),
            ExecutorError::NotFound(_) => ErrorKind::NotFound,
            ExecutorError::Invalid(_) => ErrorKind::Invalid,
            ExecutorError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Fidelity tag for format transformations. Declaration order is the
/// fidelity order (`L0` best), so the derived `Ord` gives `L0 < L1 < L2 < L3`
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LossClass {
    L0,
    L1,
    L2,
    L3,
}

impl Default for LossClass {
    fn default() -> Self {
        LossClass::L0
    }
}

impl FromStr for LossClass {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "L0" => Ok(LossClass::L0),
            "L1" => Ok(LossClass::L1),
            "L2" => Ok(LossClass::L2),
            "L3" => Ok(LossClass::L3),
            _ => Err(()),
        }
    }
}

/// One step of a [`Plan`], tagged by `type` in its JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "EXPORT")]
    Export {
        artifact_id: String,
        output_key: String,
        #[serde(default)]
        mode: ExportMode,
    },
    #[serde(rename = "RUN_TOOL")]
    RunTool {
        tool_plugin_id: String,
        #[serde(default)]
        inputs: Vec<String>,
        profile: String,
        output_key: String,
    },
    #[serde(rename = "EXTRACT_IR")]
    ExtractIr {
        source_artifact_id: String,
        #[serde(default)]
        plugin_id: Option<String>,
        output_key: String,
    },
    #[serde(rename = "EMIT_NATIVE")]
    EmitNative {
        ir_input_key: String,
        #[serde(default)]
        plugin_id: Option<String>,
        output_key: String,
    },
    #[serde(rename = "COMPARE_IR")]
    CompareIr {
        ir_a_key: String,
        ir_b_key: String,
        output_key: String,
    },
    #[serde(other)]
    Unknown,
}

/// One check of a [`Plan`], tagged by `type` in its JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Check {
    #[serde(rename = "BYTE_EQUAL")]
    ByteEqual {
        artifact_a: String,
        artifact_b: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "TRANSCRIPT_EQUAL")]
    TranscriptEqual {
        run_a: String,
        run_b: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "IR_STRUCTURE_EQUAL")]
    IrStructureEqual {
        ir_a: String,
        ir_b: String,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "IR_FIDELITY")]
    IrFidelity {
        ir_key: String,
        max_loss_class: LossClass,
        #[serde(default)]
        loss_budget: Option<Value>,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "IR_ROUNDTRIP")]
    IrRoundtrip {
        target_format: String,
        max_loss_class: LossClass,
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Check {
    fn type_tag(&self) -> &'static str {
        match self {
            Check::ByteEqual { .. } => "BYTE_EQUAL",
            Check::TranscriptEqual { .. } => "TRANSCRIPT_EQUAL",
            Check::IrStructureEqual { .. } => "IR_STRUCTURE_EQUAL",
            Check::IrFidelity { .. } => "IR_FIDELITY",
            Check::IrRoundtrip { .. } => "IR_ROUNDTRIP",
            Check::Unknown => "UNKNOWN",
        }
    }

    fn label(&self) -> String {
        let explicit = match self {
            Check::ByteEqual { label, .. }
            | Check::TranscriptEqual { label, .. }
            | Check::IrStructureEqual { label, .. }
            | Check::IrFidelity { label, .. }
            | Check::IrRoundtrip { label, .. } => label.clone(),
            Check::Unknown => None,
        };
        explicit.unwrap_or_else(|| self.type_tag().to_string())
    }
}

/// A declarative recipe of steps and checks interpreted against a capsule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// One check's outcome within a [`Report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_type: String,
    pub label: String,
    pub pass: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The result of interpreting a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_version: String,
    pub created_at: DateTime<Utc>,
    pub plan_id: String,
    pub status: String,
    pub results: Vec<CheckResult>,
}

pub const REPORT_VERSION: &str = "1";

impl Report {
    /// A deterministic digest over the report's content, independent of
    /// `created_at`: two reports with identical `plan_id`/`status`/`results`
    /// always hash the same regardless of when they were produced.
    pub fn digest(&self) -> String {
        let mut canonical = self.clone();
        canonical.created_at = DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid");
        let bytes = serde_json::to_vec(&canonical).expect("Report is always serializable");
        capsule_hash::hash(&bytes)
    }
}

/// Registry of plugins available to a plan execution, keyed by plugin id.
pub type PluginRegistry = HashMap<String, PluginDescriptor>;

/// Interprets plans against a capsule and a fixed set of plugins.
pub struct Executor<'a> {
    capsule: &'a Capsule,
    plugins: &'a PluginRegistry,
}

impl<'a> Executor<'a> {
    pub fn new(capsule: &'a Capsule, plugins: &'a PluginRegistry) -> Self {
        Self { capsule, plugins }
    }

    /// Execute `plan` end to end: a fresh scratch directory is created,
    /// every step runs in order, and — only if every step succeeds — every
    /// check is evaluated. The scratch directory is removed when this
    /// returns, success or failure.
    pub fn execute(&self, plan: &Plan) -> Result<Report> {
        let scratch = TempDir::new()?;
        let mut bindings: HashMap<String, PathBuf> = HashMap::new();

        for step in &plan.steps {
            self.execute_step(step, scratch.path(), &mut bindings)?;
        }

        let mut results = Vec::with_capacity(plan.checks.len());
        for check in &plan.checks {
            results.push(self.evaluate_check(check, &bindings)?);
        }

        let status = if results.iter().all(|r| r.pass) { "pass" } else { "fail" };
        log_executor_info!("executed plan", plan_id = %plan.id, status = status);

        Ok(Report {
            report_version: REPORT_VERSION.to_string(),
            created_at: Utc::now(),
            plan_id: plan.id.clone(),
            status: status.to_string(),
            results,
        })
    }

    fn execute_step(
        &self,
        step: &Step,
        scratch: &Path,
        bindings: &mut HashMap<String, PathBuf>,
    ) -> Result<()> {
        match step {
            Step::Export {
                artifact_id,
                output_key,
                mode,
            } => {
                if *mode == ExportMode::Derived {
                    return Err(ExecutorError::Unsupported(
                        "DERIVED export mode is not implemented".to_string(),
                    ));
                }
                let bytes = self.capsule.export_to_bytes(artifact_id, ExportMode::Identity)?;
                let path = scratch.join(output_key);
                fs::write(&path, bytes)?;
                bindings.insert(output_key.clone(), path);
                Ok(())
            }

            Step::RunTool {
                tool_plugin_id,
                inputs,
                profile,
                output_key,
            } => {
                let descriptor = self
                    .plugins
                    .get(tool_plugin_id)
                    .ok_or_else(|| ExecutorError::NotFound(format!("plugin '{tool_plugin_id}'")))?;
                if descriptor.kind != PluginKind::Tool {
                    return Err(ExecutorError::Invalid(format!(
                        "plugin '{tool_plugin_id}' is not a tool plugin"
                    )));
                }

                let inputs_dir = scratch.join(format!("{output_key}_inputs"));
                fs::create_dir_all(&inputs_dir)?;
                for name in inputs {
                    self.materialize_input(name, &inputs_dir, bindings)?;
                }

                let outputs_dir = scratch.join(format!("{output_key}_outputs"));
                fs::create_dir_all(&outputs_dir)?;

                let request = PluginRequest::run_tool(
                    &outputs_dir.to_string_lossy(),
                    profile,
                    &inputs_dir.to_string_lossy(),
                );
                invoke(descriptor, &request)?;

                bindings.insert(output_key.clone(), outputs_dir.clone());
                if let Some(transcript) = transcript_path_in(&outputs_dir) {
                    bindings.insert(format!("{output_key}_transcript"), transcript);
                }
                Ok(())
            }

            Step::ExtractIr {
                source_artifact_id,
                plugin_id,
                output_key,
            } => {
                let source_bytes = self
                    .capsule
                    .export_to_bytes(source_artifact_id, ExportMode::Identity)?;
                let source_path = scratch.join(format!("{output_key}.src"));
                fs::write(&source_path, &source_bytes)?;

                let ir_dir = scratch.join(format!("{output_key}_ir"));
                fs::create_dir_all(&ir_dir)?;

                let capable_descriptor = self.resolve_capable_plugin(plugin_id, |d| {
                    d.ir_support.as_ref().is_some_and(|s| s.can_extract)
                })?;

                let ir_path = if let Some(descriptor) = capable_descriptor {
                    let request = PluginRequest::extract_ir(
                        &source_path.to_string_lossy(),
                        &ir_dir.to_string_lossy(),
                    );
                    let response = invoke(descriptor, &request)?;
                    let reported = response
                        .result
                        .as_ref()
                        .and_then(|r| r.get("ir_path"))
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            ExecutorError::Invalid("plugin response missing 'ir_path'".to_string())
                        })?;
                    PathBuf::from(reported)
                } else {
                    let placeholder = serde_json::json!({
                        "loss_class": "L0",
                        "source": source_artifact_id,
                    });
                    let path = ir_dir.join(format!("{output_key}.ir.json"));
                    fs::write(&path, serde_json::to_vec(&placeholder).expect("json"))?;
                    path
                };

                bindings.insert(output_key.clone(), ir_path);
                Ok(())
            }

            Step::EmitNative {
                ir_input_key,
                plugin_id,
                output_key,
            } => {
                let ir_path = bindings
                    .get(ir_input_key)
                    .cloned()
                    .ok_or_else(|| ExecutorError::NotFound(format!("output key '{ir_input_key}'")))?;

                let native_dir = scratch.join(format!("{output_key}_native"));
                fs::create_dir_all(&native_dir)?;

                let capable_descriptor = self.resolve_capable_plugin(plugin_id, |d| {
                    d.ir_support.as_ref().is_some_and(|s| s.can_emit)
                })?;

                let output_path = if let Some(descriptor) = capable_descriptor {
                    let request = PluginRequest::emit_native(
                        &ir_path.to_string_lossy(),
                        &native_dir.to_string_lossy(),
                    );
                    let response = invoke(descriptor, &request)?;
                    let reported = response
                        .result
                        .as_ref()
                        .and_then(|r| r.get("output_path"))
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            ExecutorError::Invalid(
                                "plugin response missing 'output_path'".to_string(),
                            )
                        })?;
                    PathBuf::from(reported)
                } else {
                    let bytes = fs::read(&ir_path)?;
                    let path = native_dir.join(output_key);
                    fs::write(&path, bytes)?;
                    path
                };

                bindings.insert(output_key.clone(), output_path);
                Ok(())
            }

            Step::CompareIr {
                ir_a_key,
                ir_b_key,
                output_key,
            } => {
                let path_a = bindings
                    .get(ir_a_key)
                    .cloned()
                    .ok_or_else(|| ExecutorError::NotFound(format!("output key '{ir_a_key}'")))?;
                let path_b = bindings
                    .get(ir_b_key)
                    .cloned()
                    .ok_or_else(|| ExecutorError::NotFound(format!("output key '{ir_b_key}'")))?;

                let bytes_a = fs::read(&path_a)?;
                let bytes_b = fs::read(&path_b)?;
                let record = serde_json::json!({
                    "equal": bytes_a == bytes_b,
                    "size_a": bytes_a.len(),
                    "size_b": bytes_b.len(),
                });

                let path = scratch.join(format!("{output_key}.json"));
                fs::write(&path, serde_json::to_vec(&record).expect("json"))?;
                bindings.insert(output_key.clone(), path);
                Ok(())
            }

            Step::Unknown => Err(ExecutorError::Unsupported("unknown step type".to_string())),
        }
    }

    fn materialize_input(
        &self,
        name: &str,
        inputs_dir: &Path,
        bindings: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        if let Some(artifact) = self.capsule.manifest().artifacts.get(name) {
            let bytes = self.capsule.export_to_bytes(name, ExportMode::Identity)?;
            let filename = if artifact.original_name.is_empty() {
                artifact.id.clone()
            } else {
                artifact.original_name.clone()
            };
            fs::write(inputs_dir.join(filename), bytes)?;
            return Ok(());
        }
        if let Some(path) = bindings.get(name) {
            let filename = path
                .file_name()
                .ok_or_else(|| ExecutorError::Invalid(format!("bound path for '{name}' has no file name")))?;
            if path.is_dir() {
                copy_dir_recursive(path, &inputs_dir.join(filename))?;
            } else {
                fs::copy(path, inputs_dir.join(filename))?;
            }
            return Ok(());
        }
        Err(ExecutorError::NotFound(format!("input '{name}'")))
    }

    fn resolve_capable_plugin(
        &self,
        plugin_id: &Option<String>,
        capable: impl Fn(&PluginDescriptor) -> bool,
    ) -> Result<Option<&'a PluginDescriptor>> {
        match plugin_id {
            None => Ok(None),
            Some(id) => {
                let descriptor = self
                    .plugins
                    .get(id)
                    .ok_or_else(|| ExecutorError::NotFound(format!("plugin '{id}'")))?;
                if descriptor.kind == PluginKind::Format && capable(descriptor) {
                    Ok(Some(descriptor))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn evaluate_check(&self, check: &Check, bindings: &HashMap<String, PathBuf>) -> Result<CheckResult> {
        let check_type = check.type_tag().to_string();
        let label = check.label();

        match check {
            Check::ByteEqual { artifact_a, artifact_b, .. } => {
                let result = (|| -> std::result::Result<bool, String> {
                    let a = self.resolve_bytes(artifact_a, bindings)?;
                    let b = self.resolve_bytes(artifact_b, bindings)?;
                    Ok(a == b)
                })();
                Ok(self.finish_bool_check(check_type, label, result))
            }

            Check::TranscriptEqual { run_a, run_b, .. } => {
                let result = (|| -> std::result::Result<bool, String> {
                    let a = self.resolve_transcript(run_a, bindings)?;
                    let b = self.resolve_transcript(run_b, bindings)?;
                    Ok(a == b)
                })();
                Ok(self.finish_bool_check(check_type, label, result))
            }

            Check::IrStructureEqual { ir_a, ir_b, .. } => {
                let result = (|| -> std::result::Result<bool, String> {
                    let path_a = bindings.get(ir_a).ok_or_else(|| format!("'{ir_a}' is not bound"))?;
                    let path_b = bindings.get(ir_b).ok_or_else(|| format!("'{ir_b}' is not bound"))?;
                    let value_a: Value = serde_json::from_slice(&fs::read(path_a).map_err(|e| e.to_string())?)
                        .map_err(|e| e.to_string())?;
                    let value_b: Value = serde_json::from_slice(&fs::read(path_b).map_err(|e| e.to_string())?)
                        .map_err(|e| e.to_string())?;
                    Ok(value_a == value_b)
                })();
                Ok(self.finish_bool_check(check_type, label, result))
            }

            Check::IrFidelity {
                ir_key,
                max_loss_class,
                loss_budget,
                ..
            } => {
                let outcome = (|| -> std::result::Result<LossClass, String> {
                    let path = bindings.get(ir_key).ok_or_else(|| format!("'{ir_key}' is not bound"))?;
                    let value: Value = serde_json::from_slice(&fs::read(path).map_err(|e| e.to_string())?)
                        .map_err(|e| e.to_string())?;
                    let tag = value
                        .get("loss_class")
                        .and_then(|v| v.as_str())
                        .unwrap_or("L0");
                    LossClass::from_str(tag).map_err(|_| format!("unrecognized loss class '{tag}'"))
                })();

                let (pass, details) = match outcome {
                    Ok(observed) => (
                        observed <= *max_loss_class,
                        Some(serde_json::json!({
                            "observed_loss_class": format!("{:?}", observed),
                            "max_loss_class": format!("{:?}", max_loss_class),
                            "loss_budget": loss_budget,
                        })),
                    ),
                    Err(e) => (false, Some(serde_json::json!({ "error": e }))),
                };

                Ok(CheckResult {
                    check_type,
                    label,
                    pass,
                    details,
                })
            }

            Check::IrRoundtrip {
                target_format,
                max_loss_class,
                ..
            } => Ok(CheckResult {
                check_type,
                label,
                pass: true,
                details: Some(serde_json::json!({
                    "target_format": target_format,
                    "max_loss_class": format!("{:?}", max_loss_class),
                })),
            }),

            Check::Unknown => Err(ExecutorError::Unsupported("unknown check type".to_string())),
        }
    }

    fn finish_bool_check(
        &self,
        check_type: String,
        label: String,
        result: std::result::Result<bool, String>,
    ) -> CheckResult {
        match result {
            Ok(pass) => CheckResult {
                check_type,
                label,
                pass,
                details: None,
            },
            Err(e) => CheckResult {
                check_type,
                label,
                pass: false,
                details: Some(serde_json::json!({ "error": e })),
            },
        }
    }

    /// Name-resolution precedence for byte-valued names: manifest artifact,
    /// then bound output key, else fail.
    fn resolve_bytes(&self, name: &str, bindings: &HashMap<String, PathBuf>) -> std::result::Result<Vec<u8>, String> {
        if self.capsule.manifest().artifacts.contains_key(name) {
            return self
                .capsule
                .export_to_bytes(name, ExportMode::Identity)
                .map_err(|e| e.to_string());
        }
        if let Some(path) = bindings.get(name) {
            return fs::read(path).map_err(|e| e.to_string());
        }
        Err(format!("'{name}' resolves to neither an artifact nor a bound key"))
    }

    /// Name-resolution precedence for transcripts: manifest run, then bound
    /// output key, else fail.
    fn resolve_transcript(&self, name: &str, bindings: &HashMap<String, PathBuf>) -> std::result::Result<Vec<u8>, String> {
        if let Ok(bytes) = self.capsule.get_transcript(name) {
            return Ok(bytes);
        }
        if let Some(path) = bindings.get(name) {
            return fs::read(path).map_err(|e| e.to_string());
        }
        Err(format!("'{name}' resolves to neither a run nor a bound key"))
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::Capsule;
    use tempfile::TempDir as TestTempDir;

    fn new_capsule() -> (TestTempDir, Capsule) {
        let dir = TestTempDir::new().unwrap();
        let capsule = Capsule::new(dir.path()).unwrap();
        (dir, capsule)
    }

    #[test]
    fn export_step_binds_output_key() {
        let (dir, mut capsule) = new_capsule();
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, "hello").unwrap();
        let artifact = capsule.ingest_file(&file_path).unwrap();

        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![Step::Export {
                artifact_id: artifact.id.clone(),
                output_key: "out".to_string(),
                mode: ExportMode::Identity,
            }],
            checks: vec![Check::ByteEqual {
                artifact_a: artifact.id.clone(),
                artifact_b: "out".to_string(),
                label: None,
            }],
        };

        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report = executor.execute(&plan).unwrap();
        assert_eq!(report.status, "pass");
        assert!(report.results[0].pass);
    }

    #[test]
    fn derived_export_step_fails_the_plan() {
        let (dir, mut capsule) = new_capsule();
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, "hello").unwrap();
        let artifact = capsule.ingest_file(&file_path).unwrap();

        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![Step::Export {
                artifact_id: artifact.id,
                output_key: "out".to_string(),
                mode: ExportMode::Derived,
            }],
            checks: vec![],
        };

        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let err = executor.execute(&plan).unwrap_err();
        assert!(matches!(err, ExecutorError::Unsupported(_)));
    }

    #[test]
    fn unknown_step_fails_the_plan() {
        let (_dir, capsule) = new_capsule();
        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![Step::Unknown],
            checks: vec![],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        assert!(executor.execute(&plan).is_err());
    }

    #[test]
    fn extract_ir_without_plugin_writes_placeholder() {
        let (dir, mut capsule) = new_capsule();
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, "hello").unwrap();
        let artifact = capsule.ingest_file(&file_path).unwrap();

        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![Step::ExtractIr {
                source_artifact_id: artifact.id.clone(),
                plugin_id: None,
                output_key: "ir".to_string(),
            }],
            checks: vec![Check::IrFidelity {
                ir_key: "ir".to_string(),
                max_loss_class: LossClass::L1,
                loss_budget: None,
                label: None,
            }],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report = executor.execute(&plan).unwrap();
        assert_eq!(report.status, "pass");
    }

    #[test]
    fn ir_fidelity_fails_on_malformed_json() {
        let (dir, mut capsule) = new_capsule();
        let file_path = dir.path().join("a.txt");
        fs::write(&file_path, "hello").unwrap();
        let artifact = capsule.ingest_file(&file_path).unwrap();

        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![Step::Export {
                artifact_id: artifact.id,
                output_key: "ir".to_string(),
                mode: ExportMode::Identity,
            }],
            checks: vec![Check::IrFidelity {
                ir_key: "ir".to_string(),
                max_loss_class: LossClass::L3,
                loss_budget: None,
                label: None,
            }],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report = executor.execute(&plan).unwrap();
        assert_eq!(report.status, "fail");
    }

    #[test]
    fn ir_roundtrip_always_passes() {
        let (_dir, capsule) = new_capsule();
        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![],
            checks: vec![Check::IrRoundtrip {
                target_format: "pdb".to_string(),
                max_loss_class: LossClass::L1,
                label: None,
            }],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report = executor.execute(&plan).unwrap();
        assert_eq!(report.status, "pass");
    }

    #[test]
    fn report_digest_ignores_created_at() {
        let (_dir, capsule) = new_capsule();
        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![],
            checks: vec![],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report_1 = executor.execute(&plan).unwrap();
        let report_2 = executor.execute(&plan).unwrap();
        assert_eq!(report_1.digest(), report_2.digest());
    }

    #[test]
    fn loss_class_ordering_is_l0_best() {
        assert!(LossClass::L0 < LossClass::L1);
        assert!(LossClass::L1 < LossClass::L2);
        assert!(LossClass::L2 < LossClass::L3);
    }

    #[test]
    fn unresolvable_byte_equal_check_fails_without_erroring_plan() {
        let (_dir, capsule) = new_capsule();
        let plan = Plan {
            id: "p1".to_string(),
            description: String::new(),
            steps: vec![],
            checks: vec![Check::ByteEqual {
                artifact_a: "nope-a".to_string(),
                artifact_b: "nope-b".to_string(),
                label: None,
            }],
        };
        let plugins = PluginRegistry::new();
        let executor = Executor::new(&capsule, &plugins);
        let report = executor.execute(&plan).unwrap();
        assert_eq!(report.status, "fail");
        assert!(!report.results[0].pass);
    }
}
