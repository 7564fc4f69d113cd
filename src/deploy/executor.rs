use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ExecutorConfig;
use crate::deploy::cipher::SecretCipher;
use crate::deploy::session::{RemoteShell, SessionTarget};
use crate::error::{DeployError, Result};
use crate::hub::HubHandle;
use crate::notify::{Notify, Severity};
use crate::queue::{Job, JobRunner, JobStatus, JobTarget};
use crate::store::{Host, HostStore, PipelineStore, StatusStore};

/// Why a host did not finish its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    Command,
    Timeout,
    Decrypt,
    Other,
}

impl From<&DeployError> for FailureKind {
    fn from(err: &DeployError) -> Self {
        match err {
            DeployError::Connection { .. } => FailureKind::Connection,
            DeployError::Command { .. } => FailureKind::Command,
            DeployError::Timeout { .. } => FailureKind::Timeout,
            DeployError::Decrypt(_) => FailureKind::Decrypt,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub label: String,
    pub reason: String,
    pub kind: FailureKind,
}

/// Aggregate outcome of a pipeline rollout.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub hosts: usize,
    pub failures: Vec<HostFailure>,
}

impl ExecutionResult {
    fn from_failures(hosts: usize, failures: Vec<HostFailure>) -> Self {
        Self {
            succeeded: failures.is_empty(),
            hosts,
            failures,
        }
    }

    /// Multi-line summary naming every failed host.
    pub fn summary(&self, pipeline: &str) -> String {
        let mut msg = if self.succeeded {
            format!("Deployment finished on pipeline: *{}*", pipeline)
        } else {
            format!(
                "Deployment finished with errors on pipeline: *{}* ({}/{} hosts failed)",
                pipeline,
                self.failures.len(),
                self.hosts
            )
        };

        if !self.failures.is_empty() {
            msg.push_str("\n\nErrors found on hosts:\n");
            for failure in &self.failures {
                let _ = writeln!(msg, "```*{}* - {}```", failure.label, failure.reason);
            }
        }

        msg
    }
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// Decrypts a host's secret and runs its command under a deadline.
///
/// The deadline covers decryption, login and the command. When it fires the
/// session future is dropped, which tears down the ssh process.
#[derive(Clone)]
struct HostWorker {
    cipher: Arc<dyn SecretCipher>,
    shell: Arc<dyn RemoteShell>,
    timeout: Duration,
}

impl HostWorker {
    async fn run(self, host: Host, variant: Option<String>) -> Result<String> {
        let label = host.label.clone();
        let secs = self.timeout.as_secs();

        match tokio::time::timeout(self.timeout, self.execute(host, variant)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(host = %label, timeout_secs = secs, "Host deadline reached");
                Err(DeployError::Timeout { host: label, secs })
            }
        }
    }

    async fn execute(&self, host: Host, variant: Option<String>) -> Result<String> {
        let password = if host.secret.is_empty() {
            None
        } else {
            Some(self.cipher.decrypt(&host.secret).map_err(|e| {
                tracing::error!(host = %host.label, error = %e, "Failed to decrypt host secret");
                e
            })?)
        };

        let target = SessionTarget {
            address: host.address.clone(),
            label: host.label.clone(),
            password,
        };
        let command = host.command_for(variant.as_deref());

        self.shell.run(&target, command).await
    }
}

/// Runs deployment jobs: one host, or every active host of a pipeline.
pub struct Deployer {
    statuses: Arc<dyn StatusStore>,
    hosts: Arc<dyn HostStore>,
    pipelines: Arc<dyn PipelineStore>,
    notifier: Arc<dyn Notify>,
    hub: HubHandle,
    worker: HostWorker,
    output_tail_chars: usize,
}

impl Deployer {
    pub fn new<S>(
        store: Arc<S>,
        cipher: Arc<dyn SecretCipher>,
        shell: Arc<dyn RemoteShell>,
        notifier: Arc<dyn Notify>,
        hub: HubHandle,
        config: &ExecutorConfig,
    ) -> Self
    where
        S: StatusStore + HostStore + PipelineStore + 'static,
    {
        Self {
            statuses: store.clone(),
            hosts: store.clone(),
            pipelines: store,
            notifier,
            hub,
            worker: HostWorker {
                cipher,
                shell,
                timeout: config.host_timeout,
            },
            output_tail_chars: config.output_tail_chars,
        }
    }

    /// Update one host and record the outcome on status record `job_id`.
    ///
    /// The stored message is the tail of the command output (or the error
    /// when no output was captured).
    pub async fn run_single_host(
        &self,
        job_id: i64,
        host_id: i64,
        variant: Option<&str>,
    ) -> Result<()> {
        let host = match self.hosts.get_host(host_id).await {
            Ok(host) => host,
            Err(e) => {
                tracing::error!(job_id, host_id, error = %e, "Failed to load host");
                self.set_status(job_id, JobStatus::Error, &e.to_string()).await;
                self.hub.broadcast(format!("Update {} failed: {}", job_id, e));
                return Err(e);
            }
        };
        let label = host.label.clone();

        tracing::info!(job_id, host = %label, variant = ?variant, "Updating host");
        self.set_status(job_id, JobStatus::Running, &format!("Updating {}", label))
            .await;
        self.hub.broadcast(format!("Updating {}", label));

        let result = self
            .worker
            .clone()
            .run(host, variant.map(str::to_string))
            .await;

        match result {
            Ok(output) => {
                let message = tail(&output, self.output_tail_chars);
                self.set_status(job_id, JobStatus::Success, message).await;
                self.hub.broadcast(format!("Update finished on {}", label));
                tracing::info!(job_id, host = %label, "Host updated");
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    DeployError::Command { output, .. } if !output.is_empty() => {
                        tail(output, self.output_tail_chars).to_string()
                    }
                    other => other.to_string(),
                };
                self.set_status(job_id, JobStatus::Error, &message).await;
                self.hub.broadcast(format!("Update failed on {}", label));
                tracing::error!(job_id, host = %label, error = %e, "Host update failed");
                Err(e)
            }
        }
    }

    /// Update every active host of a pipeline concurrently.
    ///
    /// Each host runs on its own task with its own deadline. The call returns
    /// once every task has finished or hit its deadline. The owner is
    /// notified before any host starts and again with the aggregate result.
    pub async fn run_pipeline(
        &self,
        job_id: i64,
        pipeline_id: i64,
        owner_id: i64,
    ) -> Result<ExecutionResult> {
        let loaded = async {
            let pipeline = self.pipelines.get_pipeline(pipeline_id, owner_id).await?;
            let hosts = self.hosts.list_active_hosts(pipeline_id).await?;
            Ok::<_, DeployError>((pipeline, hosts))
        };
        let (pipeline, hosts) = match loaded.await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(job_id, pipeline_id, error = %e, "Failed to load pipeline");
                self.set_status(job_id, JobStatus::Error, &e.to_string()).await;
                self.hub.broadcast(format!("Update {} failed: {}", job_id, e));
                return Err(e);
            }
        };

        tracing::info!(job_id, pipeline = %pipeline.name, hosts = hosts.len(), "Starting pipeline rollout");
        self.notify(
            &format!("Deployment started on pipeline: *{}*", pipeline.name),
            owner_id,
            Severity::InProgress,
        )
        .await;
        self.set_status(
            job_id,
            JobStatus::Running,
            &format!("Deploying pipeline {} to {} hosts", pipeline.name, hosts.len()),
        )
        .await;
        self.hub
            .broadcast(format!("Deployment started on pipeline {}", pipeline.name));

        let host_count = hosts.len();
        let handles: Vec<_> = hosts
            .into_iter()
            .map(|host| {
                let label = host.label.clone();
                let worker = self.worker.clone();
                (label, tokio::spawn(worker.run(host, None)))
            })
            .collect();

        let mut failures = Vec::new();
        for (label, handle) in handles {
            let failure = match handle.await {
                Ok(Ok(_)) => {
                    tracing::info!(job_id, host = %label, "Host updated");
                    None
                }
                Ok(Err(e)) => {
                    tracing::warn!(job_id, host = %label, error = %e, "Host update failed");
                    Some(HostFailure {
                        kind: FailureKind::from(&e),
                        reason: self.failure_reason(&e),
                        label,
                    })
                }
                Err(e) => {
                    tracing::error!(job_id, host = %label, error = %e, "Host worker aborted");
                    Some(HostFailure {
                        label,
                        reason: e.to_string(),
                        kind: FailureKind::Other,
                    })
                }
            };
            failures.extend(failure);
        }

        let result = ExecutionResult::from_failures(host_count, failures);
        let summary = result.summary(&pipeline.name);

        if result.succeeded {
            self.set_status(job_id, JobStatus::Success, &summary).await;
            self.hub
                .broadcast(format!("Deployment finished on pipeline {}", pipeline.name));
            self.notify(&summary, owner_id, Severity::Success).await;
        } else {
            self.set_status(job_id, JobStatus::Error, &summary).await;
            self.hub.broadcast(format!(
                "Deployment on pipeline {} failed on {} hosts",
                pipeline.name,
                result.failures.len()
            ));
            self.notify(&summary, owner_id, Severity::Failure).await;
        }

        tracing::info!(
            job_id,
            pipeline = %pipeline.name,
            hosts = result.hosts,
            failed = result.failures.len(),
            "Pipeline rollout finished"
        );

        Ok(result)
    }

    fn failure_reason(&self, err: &DeployError) -> String {
        match err {
            DeployError::Command { output, .. } if !output.trim().is_empty() => {
                tail(output.trim(), self.output_tail_chars).to_string()
            }
            other => other.to_string(),
        }
    }

    async fn set_status(&self, job_id: i64, status: JobStatus, message: &str) {
        if let Err(e) = self.statuses.update_status(job_id, status, message).await {
            tracing::error!(job_id, status = %status, error = %e, "Failed to update job status");
        }
    }

    async fn notify(&self, message: &str, owner_id: i64, severity: Severity) {
        if let Err(e) = self.notifier.send_all(message, owner_id, severity).await {
            tracing::warn!(owner_id, error = %e, "Failed to send notifications");
        }
    }
}

#[async_trait]
impl JobRunner for Deployer {
    async fn run(&self, job: Job) -> Result<()> {
        match job.target {
            JobTarget::Host { host_id, variant } => {
                self.run_single_host(job.id, host_id, variant.as_deref())
                    .await
            }
            JobTarget::Pipeline {
                pipeline_id,
                owner_id,
            } => {
                let result = self.run_pipeline(job.id, pipeline_id, owner_id).await?;
                if !result.succeeded {
                    tracing::warn!(
                        job_id = job.id,
                        failed = result.failures.len(),
                        "Pipeline finished with failures"
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_text() {
        assert_eq!(tail("abc", 300), "abc");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn tail_cuts_from_the_front() {
        assert_eq!(tail("0123456789", 4), "6789");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("ãéîõü", 2), "õü");
    }

    #[test]
    fn failure_kind_mapping() {
        let timeout = DeployError::Timeout {
            host: "a".to_string(),
            secs: 1,
        };
        assert_eq!(FailureKind::from(&timeout), FailureKind::Timeout);
        let decrypt = DeployError::Decrypt("bad".to_string());
        assert_eq!(FailureKind::from(&decrypt), FailureKind::Decrypt);
        assert_eq!(
            FailureKind::from(&DeployError::QueueFull),
            FailureKind::Other
        );
    }

    #[test]
    fn summary_lists_failures() {
        let result = ExecutionResult::from_failures(
            3,
            vec![HostFailure {
                label: "db".to_string(),
                reason: "exit 1".to_string(),
                kind: FailureKind::Command,
            }],
        );
        assert!(!result.succeeded);

        let summary = result.summary("prod");
        assert!(summary.contains("(1/3 hosts failed)"));
        assert!(summary.contains("```*db* - exit 1```"));
    }

    #[test]
    fn summary_without_failures() {
        let result = ExecutionResult::from_failures(2, Vec::new());
        assert!(result.succeeded);
        assert_eq!(
            result.summary("prod"),
            "Deployment finished on pipeline: *prod*"
        );
    }
}
