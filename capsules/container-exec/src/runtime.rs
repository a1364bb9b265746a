use crate::error::ExecError;
use crate::logs::merge_timestamped;
use outcome::limits;
use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Memory and CPU caps applied to every container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpu_quota: i64,
    pub cpu_period: i64,
}

impl Default for ResourceLimits {
    /// 512 MiB and half of one core.
    fn default() -> Self {
        Self {
            memory: "512m".to_string(),
            cpu_quota: 50_000,
            cpu_period: 100_000,
        }
    }
}

impl ResourceLimits {
    /// Rejects limits looser than 512 MiB or half of one core.
    pub fn check(&self) -> Result<(), ExecError> {
        if !limits::memory_within_cap(&self.memory) {
            return Err(ExecError::InvalidRequest {
                message: format!("memory limit '{}' exceeds 512m", self.memory),
            });
        }
        if !limits::cpu_within_cap(self.cpu_quota, self.cpu_period) {
            return Err(ExecError::InvalidRequest {
                message: format!(
                    "cpu quota {}/{} exceeds half of one core",
                    self.cpu_quota, self.cpu_period
                ),
            });
        }
        Ok(())
    }
}

/// Everything needed to start one execution container.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image: String,
    pub code: String,
    pub workspace: PathBuf,
    pub mount_path: String,
    pub user: String,
    pub limits: ResourceLimits,
}

impl LaunchSpec {
    /// Runtime CLI arguments for a detached, network-less run.
    pub fn run_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--pull".to_string(),
            "never".to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            self.limits.memory.clone(),
            "--cpu-quota".to_string(),
            self.limits.cpu_quota.to_string(),
            "--cpu-period".to_string(),
            self.limits.cpu_period.to_string(),
            "--user".to_string(),
            self.user.clone(),
            "--mount".to_string(),
            format!(
                "type=bind,source={},target={},readonly=false",
                self.workspace.display(),
                self.mount_path
            ),
            "--workdir".to_string(),
            self.mount_path.clone(),
            "--entrypoint".to_string(),
            String::new(),
            self.image.clone(),
            "python".to_string(),
            "-c".to_string(),
            self.code.clone(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i64),
    TimedOut,
}

/// The operations the executor needs from a container runtime.
pub trait ContainerRuntime: Send + Sync {
    fn image_exists(&self, image: &str) -> Result<bool, ExecError>;
    fn pull_image(&self, image: &str) -> Result<(), ExecError>;
    /// Starts a container without auto-removal and returns its id.
    fn launch(&self, spec: &LaunchSpec) -> Result<String, ExecError>;
    fn wait(&self, container_id: &str, timeout: Duration) -> Result<WaitOutcome, ExecError>;
    /// Combined stdout and stderr in container order.
    fn logs(&self, container_id: &str) -> Result<String, ExecError>;
    /// Force-removes a container. Removing one that is already gone succeeds.
    fn remove(&self, container_id: &str) -> Result<(), ExecError>;
    fn close(&mut self) -> Result<(), ExecError>;
}

/// [`ContainerRuntime`] backed by the docker (or compatible) command line.
#[derive(Debug)]
pub struct DockerCli {
    binary: String,
    closed: bool,
}

impl DockerCli {
    /// Pings the runtime with `version` before handing out a handle.
    pub fn connect(binary: impl Into<String>) -> Result<Self, ExecError> {
        let runtime = Self {
            binary: binary.into(),
            closed: false,
        };
        let output = runtime.run("version", &["version", "--format", "{{.Server.Version}}"])?;
        if !output.status.success() {
            return Err(failure("version", &output));
        }
        debug!(
            runtime = %runtime.binary,
            server_version = %String::from_utf8_lossy(&output.stdout).trim(),
            "connected to container runtime"
        );
        Ok(runtime)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn run(&self, op: &'static str, args: &[&str]) -> Result<Output, ExecError> {
        if self.closed {
            return Err(ExecError::runtime(op, "runtime client is closed"));
        }
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecError::RuntimeSpawn {
                runtime: self.binary.clone(),
                source,
            })
    }
}

impl ContainerRuntime for DockerCli {
    fn image_exists(&self, image: &str) -> Result<bool, ExecError> {
        let output = self.run("image inspect", &["image", "inspect", "--format", "{{.Id}}", image])?;
        if output.status.success() {
            return Ok(true);
        }
        if stderr_of(&output).to_ascii_lowercase().contains("no such") {
            return Ok(false);
        }
        Err(failure("image inspect", &output))
    }

    fn pull_image(&self, image: &str) -> Result<(), ExecError> {
        let output = self.run("pull", &["pull", image])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure("pull", &output))
        }
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<String, ExecError> {
        let args = spec.run_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run("run", &args)?;

        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_missing_image(&stderr) {
                return Err(ExecError::ImageNotFound {
                    image: spec.image.clone(),
                });
            }
            return Err(failure("run", &output));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(ExecError::runtime("run", "runtime returned no container id"));
        }
        Ok(container_id)
    }

    fn wait(&self, container_id: &str, timeout: Duration) -> Result<WaitOutcome, ExecError> {
        if self.closed {
            return Err(ExecError::runtime("wait", "runtime client is closed"));
        }
        let mut child = Command::new(&self.binary)
            .args(["wait", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::RuntimeSpawn {
                runtime: self.binary.clone(),
                source,
            })?;

        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                if let Err(err) = child.kill() {
                    warn!(container_id, "failed to stop runtime wait: {}", err);
                }
                let _ = child.wait();
                return Ok(WaitOutcome::TimedOut);
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::runtime("wait", err.to_string()));
            }
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            let _ = pipe.read_to_string(&mut stdout);
        }
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }

        if !status.success() {
            return Err(ExecError::Runtime {
                op: "wait",
                message: stderr.trim().to_string(),
                exit_status: status.code().map(i64::from),
            });
        }

        let code = stdout.trim().lines().last().unwrap_or_default().trim();
        code.parse::<i64>()
            .map(WaitOutcome::Exited)
            .map_err(|_| ExecError::runtime("wait", format!("unexpected exit status '{}'", code)))
    }

    fn logs(&self, container_id: &str) -> Result<String, ExecError> {
        let output = self.run("logs", &["logs", "--timestamps", container_id])?;
        if !output.status.success() {
            return Err(failure("logs", &output));
        }
        Ok(merge_timestamped(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn remove(&self, container_id: &str) -> Result<(), ExecError> {
        let output = self.run("rm", &["rm", "-f", container_id])?;
        if output.status.success() || stderr_of(&output).contains("No such container") {
            return Ok(());
        }
        Err(failure("rm", &output))
    }

    fn close(&mut self) -> Result<(), ExecError> {
        if !self.closed {
            self.closed = true;
            debug!(runtime = %self.binary, "closed container runtime client");
        }
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn failure(op: &'static str, output: &Output) -> ExecError {
    let stderr = stderr_of(output);
    ExecError::Runtime {
        op,
        message: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        },
        exit_status: output.status.code().map(i64::from),
    }
}

fn is_missing_image(stderr: &str) -> bool {
    stderr.contains("No such image")
        || stderr.contains("Unable to find image")
        || stderr.contains("pull access denied")
}

/// User the container runs as: `SANDBOX_CONTAINER_USER`, else the host uid:gid.
pub fn container_user() -> String {
    if let Ok(value) = env::var("SANDBOX_CONTAINER_USER") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    #[cfg(unix)]
    {
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        format!("{}:{}", uid, gid)
    }
    #[cfg(not(unix))]
    {
        "65534:65534".to_string()
    }
}
