//! Kernel backend: runs code on a fresh Jupyter kernel and recovers the
//! files it writes to the scratch directory.
//!
//! One [`KernelExecutor`] drives one kernel over one websocket. The run is
//! sign in, create kernel, open channel, then three exchanges (setup, user
//! code, collect). Teardown closes the channel and deletes the kernel on
//! every path.

mod error;
mod message;
mod recovery;
mod session;

pub use error::KernelError;
pub use message::{execute_request, CellOutput, ReplyMessage, Step, TIMEOUT_NOTICE};
pub use recovery::{
    collect_cell, parse_file_output, FILES_MARKER_END, FILES_MARKER_START, SCRATCH_DIR,
    SETUP_CELL,
};
pub use session::{channel_url, normalize_base_url, KernelSession, DEFAULT_REQUEST_TIMEOUT};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use outcome::{KernelResult, KERNEL_DEFAULT_TIMEOUT};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type Channel = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub password: Option<String>,
    /// Bound on each reply wait, each HTTP call and the channel handshake.
    pub timeout: Duration,
}

impl KernelConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            password: None,
            timeout: KERNEL_DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct KernelExecutor {
    config: KernelConfig,
    code: String,
}

impl KernelExecutor {
    pub fn new(config: KernelConfig, code: impl Into<String>) -> Self {
        Self {
            config,
            code: code.into(),
        }
    }

    /// Runs the code. Failures end up in the returned result as
    /// `stderr = "Error: <details>"`.
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    pub async fn run(&self) -> KernelResult {
        let mut result = KernelResult::default();

        if self.config.timeout.is_zero() {
            let err = KernelError::InvalidRequest {
                message: "timeout must be positive".to_string(),
            };
            error!(code = err.code(), "execute code rejected, {}", err);
            return KernelResult::failure(err);
        }

        let mut session = match KernelSession::with_request_timeout(
            &self.config.base_url,
            self.config.token.as_deref(),
            self.config.password.as_deref(),
            self.config.timeout,
        ) {
            Ok(session) => session,
            Err(err) => {
                error!(code = err.code(), "execute code failed, {}", err);
                return KernelResult::failure(err);
            }
        };

        let mut channel = None;
        if let Err(err) = self.drive(&mut session, &mut channel, &mut result).await {
            error!(code = err.code(), "execute code failed, {}", err);
            result.success = false;
            result.stderr = format!("Error: {}", err);
        }

        if let Some(mut channel) = channel {
            match tokio::time::timeout(self.config.timeout, channel.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!("channel close failed, {}", err),
                Err(_) => debug!("channel close timed out"),
            }
        }
        if let Err(err) = session.delete_kernel().await {
            warn!("close kernel failed, {}", err);
        }

        result
    }

    async fn drive(
        &self,
        session: &mut KernelSession,
        channel: &mut Option<Channel>,
        result: &mut KernelResult,
    ) -> Result<(), KernelError> {
        session.sign_in().await?;
        session.init_kernel().await?;

        let request = session.channel_request()?;
        let (ws, _) = tokio::time::timeout(self.config.timeout, connect_async(request))
            .await
            .map_err(|_| KernelError::Channel {
                message: format!(
                    "websocket handshake timed out after {}s",
                    self.config.timeout.as_secs_f64()
                ),
            })?
            .map_err(|err| KernelError::Channel {
                message: format!("websocket connect failed: {}", err),
            })?;
        let ws = channel.insert(ws);

        self.execute_cells(ws, result).await
    }

    async fn execute_cells<S>(&self, ws: &mut S, result: &mut KernelResult) -> Result<(), KernelError>
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
    {
        let session = Uuid::new_v4().simple().to_string();
        let timeout = self.config.timeout;

        let setup = exchange(ws, &session, SETUP_CELL, timeout).await?;
        if setup.timed_out || setup.errored {
            warn!(stderr = %setup.stderr, "scratch directory setup did not complete");
        }

        let main = exchange(ws, &session, &self.code, timeout).await?;
        result.success = !(main.errored || main.timed_out);
        result.result = main.joined_result();
        result.stdout = main.stdout;
        result.stderr = main.stderr;

        let collected = exchange(ws, &session, &collect_cell(), timeout).await?;
        if let Some(files) = parse_file_output(&collected.stdout).filter(|f| !f.is_empty()) {
            info!(
                count = files.len(),
                names = ?files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
                "collected files from code execution"
            );
            result.files = Some(files);
        }
        Ok(())
    }
}

/// Sends one `execute_request` and collects the correlated replies until the
/// kernel reports idle or a single receive exceeds `timeout`.
pub async fn exchange<S>(
    ws: &mut S,
    session: &str,
    code: &str,
    timeout: Duration,
) -> Result<CellOutput, KernelError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let msg_id = Uuid::new_v4().simple().to_string();
    let request = execute_request(&msg_id, session, code);
    ws.send(Message::text(request.to_string()))
        .await
        .map_err(|err| KernelError::Channel {
            message: format!("send failed: {}", err),
        })?;

    let mut output = CellOutput::default();
    loop {
        let frame = match tokio::time::timeout(timeout, ws.next()).await {
            Err(_) => {
                warn!(msg_id = %msg_id, ?timeout, "no reply within timeout");
                output.mark_timed_out();
                break;
            }
            Ok(None) => {
                return Err(KernelError::Channel {
                    message: "channel ended during execution".to_string(),
                })
            }
            Ok(Some(Err(err))) => {
                return Err(KernelError::Channel {
                    message: format!("receive failed: {}", err),
                })
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Skipping non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload))
                    .await
                    .map_err(|err| KernelError::Channel {
                        message: format!("pong failed: {}", err),
                    })?;
                continue;
            }
            Message::Close(_) => {
                return Err(KernelError::Channel {
                    message: "channel closed during execution".to_string(),
                })
            }
            _ => continue,
        };

        let reply = match ReplyMessage::parse(&text) {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Skipping reply: {}", err);
                continue;
            }
        };
        if reply.parent_msg_id() != Some(msg_id.as_str()) {
            continue;
        }

        match output.absorb(&reply) {
            Ok(Step::Idle) => break,
            Ok(Step::Continue) => {}
            Err(err) => warn!("Skipping reply: {}", err),
        }
    }

    Ok(output.finish())
}

/// Runs `code` on a fresh kernel at `base_url`. Empty credentials count as
/// unset.
pub async fn execute_code_jupyter(
    base_url: &str,
    code: &str,
    token: &str,
    password: &str,
    timeout: Duration,
) -> KernelResult {
    let mut config = KernelConfig::new(base_url).with_timeout(timeout);
    if !token.is_empty() {
        config = config.with_token(token);
    }
    if !password.is_empty() {
        config = config.with_password(password);
    }
    KernelExecutor::new(config, code).run().await
}
