use crate::error::KernelError;
use serde::Deserialize;
use serde_json::{json, Value};

pub const TIMEOUT_NOTICE: &str = "\nExecution timed out.";

/// An `execute_request` on the shell channel, tagged with `msg_id`.
pub fn execute_request(msg_id: &str, session: &str, code: &str) -> Value {
    json!({
        "header": {
            "msg_id": msg_id,
            "msg_type": "execute_request",
            "username": "user",
            "session": session,
            "date": "",
            "version": "5.3",
        },
        "parent_header": {},
        "metadata": {},
        "content": {
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        },
        "channel": "shell",
    })
}

/// The parts of a reply message the exchange looks at.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyMessage {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    header: Value,
    #[serde(default)]
    parent_header: Value,
    #[serde(default)]
    content: Value,
}

impl ReplyMessage {
    pub fn parse(text: &str) -> Result<Self, KernelError> {
        serde_json::from_str(text).map_err(|err| KernelError::Protocol {
            message: format!("undecodable reply: {}", err),
        })
    }

    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.get("msg_id").and_then(Value::as_str)
    }

    /// Top-level `msg_type`, falling back to the header's.
    pub fn kind(&self) -> Option<&str> {
        self.msg_type
            .as_deref()
            .or_else(|| self.header.get("msg_type").and_then(Value::as_str))
    }

    fn content_str(&self, field: &str) -> Result<&str, KernelError> {
        self.content
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> KernelError {
        KernelError::Protocol {
            message: format!(
                "'{}' reply without content.{}",
                self.kind().unwrap_or("unknown"),
                field
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Idle,
}

/// Output accumulated over one request/reply exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellOutput {
    pub stdout: String,
    pub stderr: String,
    pub results: Vec<String>,
    pub errored: bool,
    pub timed_out: bool,
}

impl CellOutput {
    /// Folds one correlated reply into the output.
    pub fn absorb(&mut self, reply: &ReplyMessage) -> Result<Step, KernelError> {
        match reply.kind() {
            Some("stream") => {
                let text = reply.content_str("text")?;
                match reply.content_str("name")? {
                    "stdout" => self.stdout.push_str(text),
                    "stderr" => self.stderr.push_str(text),
                    _ => {}
                }
            }
            Some("execute_result") | Some("display_data") => {
                let data = reply
                    .content
                    .get("data")
                    .ok_or_else(|| reply.missing("data"))?;
                if let Some(png) = data.get("image/png").and_then(Value::as_str) {
                    self.results.push(format!("data:image/png;base64,{}", png));
                } else if let Some(text) = data.get("text/plain").and_then(Value::as_str) {
                    self.results.push(text.to_string());
                }
            }
            Some("error") => {
                let traceback = reply
                    .content
                    .get("traceback")
                    .and_then(Value::as_array)
                    .ok_or_else(|| reply.missing("traceback"))?;
                let lines: Vec<&str> = traceback.iter().filter_map(Value::as_str).collect();
                self.stderr.push_str(&lines.join("\n"));
                self.errored = true;
            }
            Some("status") => {
                if reply.content_str("execution_state")? == "idle" {
                    return Ok(Step::Idle);
                }
            }
            _ => {}
        }
        Ok(Step::Continue)
    }

    pub fn mark_timed_out(&mut self) {
        self.stderr.push_str(TIMEOUT_NOTICE);
        self.timed_out = true;
    }

    /// Trims both streams once the exchange has ended.
    pub fn finish(mut self) -> Self {
        self.stdout = self.stdout.trim().to_string();
        self.stderr = self.stderr.trim().to_string();
        self
    }

    pub fn joined_result(&self) -> String {
        self.results.join("\n").trim().to_string()
    }
}
