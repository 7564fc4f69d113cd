use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::error::{DeployError, Result};

/// Exit status ssh uses for its own failures (unreachable, auth, host key).
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Where and how to log in for one session.
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub address: String,
    pub label: String,
    /// Decrypted password; `None` means key-based login.
    pub password: Option<String>,
}

/// Runs one command on one host and returns its combined output.
///
/// Implementations own the connection for the duration of the call and
/// must close it when the returned future completes or is dropped.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    async fn run(&self, target: &SessionTarget, command: &str) -> Result<String>;
}

/// Remote shell backed by the system `ssh` client.
///
/// Password logins go through `sshpass -e` so the secret never appears on
/// the command line. Unknown host keys are accepted on first use and
/// verified afterwards.
#[derive(Debug, Clone)]
pub struct SshShell {
    user: String,
    port: u16,
    connect_timeout_secs: u64,
}

impl SshShell {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            user: config.ssh_user.clone(),
            port: config.ssh_port,
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    fn build_ssh_args(&self, target: &SessionTarget, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        if target.password.is_some() {
            args.extend([
                "-o".to_string(),
                "PubkeyAuthentication=no".to_string(),
                "-o".to_string(),
                "NumberOfPasswordPrompts=1".to_string(),
            ]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        args.push(format!("{}@{}", self.user, target.address));
        args.push(command.to_string());
        args
    }

    fn command(&self, target: &SessionTarget, command: &str) -> Command {
        let args = self.build_ssh_args(target, command);

        let mut cmd = match &target.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            None => Command::new("ssh"),
        };

        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, target: &SessionTarget, command: &str) -> Result<String> {
        tracing::info!(host = %target.label, address = %target.address, "Opening ssh session");

        let output = self
            .command(target, command)
            .output()
            .await
            .map_err(|e| DeployError::Connection {
                host: target.label.clone(),
                reason: format!("failed to start ssh: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);
        let exit_code = output.status.code();

        if output.status.success() {
            tracing::info!(host = %target.label, "Remote command succeeded");
            return Ok(combined);
        }

        if exit_code == Some(SSH_CONNECTION_FAILURE) {
            tracing::warn!(host = %target.label, stderr = %stderr.trim(), "ssh connection failed");
            return Err(DeployError::Connection {
                host: target.label.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        tracing::warn!(host = %target.label, exit_code = ?exit_code, "Remote command failed");
        Err(DeployError::Command {
            host: target.label.clone(),
            exit_code,
            output: combined,
        })
    }
}
