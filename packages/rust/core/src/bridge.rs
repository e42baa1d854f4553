//! Generative services behind a subprocess bridge.
//!
//! Spawns the model bridge script and talks to it with a JSON-lines
//! protocol over stdin/stdout. The process is started on first use, so a
//! run that never needs a model never spawns anything.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use grove_shared::{BridgeConfig, GroveError, PageRecord, Result};

use crate::classify::PageClassifier;
use crate::construct::{TreeConstructor, strip_code_fences};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Work sent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum BridgeTask {
    ClassifyPage {
        page_id: String,
        content: String,
        model: String,
    },
    BuildTree {
        manifest_json: String,
        model: String,
    },
}

/// Parent → bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage {
    Invoke { id: String, task: BridgeTask },
    Shutdown,
}

/// Bridge → parent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, result: BridgeResult },
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

/// Raw model output plus accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResult {
    pub text: String,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub latency_ms: u64,
}

/// Accumulated usage across a bridge's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// A running bridge process.
struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    fn spawn(config: &BridgeConfig, service: &'static str) -> Result<Self> {
        info!(cmd = %config.command, script = %config.script, service, "spawning model bridge");

        let mut child = Command::new(&config.command)
            .arg("run")
            .arg(&config.script)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                GroveError::service(
                    service,
                    format!("failed to spawn bridge: {e}. Is `{}` installed?", config.command),
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GroveError::service(service, "failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GroveError::service(service, "failed to capture bridge stdout"))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };

        match handle.read_message(service)? {
            ResponseMessage::Ready => {
                info!(service, "bridge is ready");
                Ok(handle)
            }
            other => Err(GroveError::service(
                service,
                format!("expected ready message, got {other:?}"),
            )),
        }
    }

    fn read_message(&mut self, service: &'static str) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| GroveError::service(service, format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(GroveError::service(service, "bridge closed stdout unexpectedly"));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            let preview: String = line.chars().take(200).collect();
            GroveError::service(service, format!("invalid bridge message: {e} (got: {preview})"))
        })
    }

    fn invoke(&mut self, service: &'static str, task: BridgeTask) -> Result<BridgeResult> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let json = serde_json::to_string(&RequestMessage::Invoke {
            id: id.clone(),
            task,
        })
        .map_err(|e| GroveError::service(service, format!("failed to serialize request: {e}")))?;

        writeln!(self.stdin, "{json}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| GroveError::service(service, format!("failed to write to bridge: {e}")))?;

        match self.read_message(service)? {
            ResponseMessage::Result {
                id: resp_id,
                result,
            } => {
                if resp_id != id {
                    warn!(expected = %id, got = %resp_id, "bridge answered with another request id");
                }
                Ok(result)
            }
            ResponseMessage::Error { id: _, error } => Err(GroveError::service(service, error)),
            ResponseMessage::Ready => Err(GroveError::service(
                service,
                "unexpected ready message during request",
            )),
        }
    }

    fn shutdown(mut self) {
        if let Ok(json) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = writeln!(self.stdin, "{json}");
            let _ = self.stdin.flush();
        }
        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Public service
// ---------------------------------------------------------------------------

/// A lazily-spawned bridge serving one generative service.
pub struct ServiceBridge {
    config: BridgeConfig,
    service: &'static str,
    handle: Option<BridgeHandle>,
    usage: TokenUsage,
}

impl ServiceBridge {
    /// Bridge for phase-1 page classification.
    pub fn classifier(config: &BridgeConfig) -> Self {
        Self::new(config, "classification")
    }

    /// Bridge for phase-2 tree construction.
    pub fn tree_constructor(config: &BridgeConfig) -> Self {
        Self::new(config, "tree-construction")
    }

    fn new(config: &BridgeConfig, service: &'static str) -> Self {
        Self {
            config: config.clone(),
            service,
            handle: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Whether the bridge process has been started.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Send one task, spawning the bridge on first use.
    pub fn invoke(&mut self, task: BridgeTask) -> Result<BridgeResult> {
        let handle = match &mut self.handle {
            Some(handle) => handle,
            empty => empty.insert(BridgeHandle::spawn(&self.config, self.service)?),
        };

        let result = handle.invoke(self.service, task)?;
        self.usage.calls += 1;
        self.usage.tokens_in += result.tokens_in;
        self.usage.tokens_out += result.tokens_out;
        debug!(
            service = self.service,
            model = %result.model,
            tokens_in = result.tokens_in,
            tokens_out = result.tokens_out,
            latency_ms = result.latency_ms,
            "bridge call complete"
        );
        Ok(result)
    }

    /// Stop the bridge process if it is running.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(
                service = self.service,
                calls = self.usage.calls,
                tokens_in = self.usage.tokens_in,
                tokens_out = self.usage.tokens_out,
                "shutting down model bridge"
            );
            handle.shutdown();
        }
    }
}

impl Drop for ServiceBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PageClassifier for ServiceBridge {
    fn classify(&mut self, page_id: &str, content: &str) -> Result<PageRecord> {
        let result = self.invoke(BridgeTask::ClassifyPage {
            page_id: page_id.to_string(),
            content: content.to_string(),
            model: self.config.classifier_model.clone(),
        })?;
        parse_page_record(&result.text)
    }
}

impl TreeConstructor for ServiceBridge {
    fn construct(&mut self, manifest_json: &str) -> Result<String> {
        let result = self.invoke(BridgeTask::BuildTree {
            manifest_json: manifest_json.to_string(),
            model: self.config.tree_model.clone(),
        })?;
        Ok(result.text)
    }
}

/// Parse a classification response, tolerating a Markdown code fence.
pub fn parse_page_record(text: &str) -> Result<PageRecord> {
    serde_json::from_str(strip_code_fences(text)).map_err(|e| {
        GroveError::service("classification", format!("unparseable page record: {e}"))
    })
}
