
use std::time::Duration;

use autodeploy::deploy::FailureKind;
use autodeploy::error::DeployError;
use autodeploy::notify::Severity;
use autodeploy::queue::{Job, JobRunner, JobStatus};
use autodeploy::store::{HostStore, StatusStore};
use test_harness::{cipher, host, Fixture, Script};

const HOST_TIMEOUT: Duration = Duration::from_secs(500);

async fn new_status(fx: &Fixture) -> i64 {
    fx.store
        .create_status("tester", "dev", JobStatus::Pending, "in queue")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_pipeline_all_hosts_succeed() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2, 3]).await;
    let id = new_status(&fx).await;

    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    assert!(result.succeeded);
    assert_eq!(result.hosts, 3);
    assert!(result.failures.is_empty());
    assert_eq!(fx.shell.calls().len(), 3);

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.message, "Deployment finished on pipeline: *web*");
}

#[tokio::test]
async fn test_pipeline_partial_failure_lists_failed_hosts() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2, 3, 4]).await;
    fx.shell.script(
        "10.0.0.2",
        Script::Fail {
            exit_code: 1,
            output: "npm ERR! missing script".to_string(),
        },
    );
    fx.shell.script("10.0.0.4", Script::Unreachable);
    let id = new_status(&fx).await;

    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    assert!(!result.succeeded);
    let labels: Vec<_> = result.failures.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["host-2", "host-4"]);
    assert_eq!(result.failures[0].kind, FailureKind::Command);
    assert_eq!(result.failures[1].kind, FailureKind::Connection);

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.message.contains("(2/4 hosts failed)"));
    assert!(record.message.contains("*host-2* -"));
    assert!(record.message.contains("missing script```"));
    assert!(record.message.contains("*host-4*"));
    assert!(!record.message.contains("*host-1*"));
}

#[tokio::test]
async fn test_pipeline_many_failures_are_all_recorded() {
    let fx = Fixture::new(HOST_TIMEOUT);
    let ids: Vec<i64> = (1..=200).collect();
    fx.seed_pipeline(1, 7, &ids).await;
    for id in ids.iter().filter(|id| *id % 3 == 0) {
        fx.shell.script(
            &format!("10.0.0.{}", id),
            Script::Fail {
                exit_code: 2,
                output: format!("boom {}", id),
            },
        );
    }
    let status = new_status(&fx).await;

    let result = fx.deployer.run_pipeline(status, 1, 7).await.unwrap();

    assert_eq!(result.hosts, 200);
    assert_eq!(result.failures.len(), 66);
    assert!(result
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::Command));
}

#[tokio::test]
async fn test_decrypt_failure_is_one_entry_and_siblings_run() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2, 3]).await;

    let mut bad = host(2, Some(1));
    bad.secret = "definitely-not-ciphertext!".to_string();
    fx.store.update_host(bad).await.unwrap();

    let mut good = host(3, Some(1));
    good.secret = cipher().encrypt("hunter2").unwrap();
    fx.store.update_host(good).await.unwrap();

    let id = new_status(&fx).await;
    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].label, "host-2");
    assert_eq!(result.failures[0].kind, FailureKind::Decrypt);

    let calls = fx.shell.calls();
    let addresses: Vec<_> = calls.iter().map(|c| c.address.as_str()).collect();
    assert!(addresses.contains(&"10.0.0.1"));
    assert!(addresses.contains(&"10.0.0.3"));
    assert!(!addresses.contains(&"10.0.0.2"));

    let with_password = calls.iter().find(|c| c.address == "10.0.0.3").unwrap();
    assert_eq!(with_password.password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_pipeline_notifies_before_and_after() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2]).await;
    let id = new_status(&fx).await;

    fx.deployer.run_pipeline(id, 1, 7).await.unwrap();
    assert_eq!(
        fx.notifier.severities(),
        vec![Severity::InProgress, Severity::Success]
    );
    let sent = fx.notifier.sent();
    assert!(sent.iter().all(|(_, owner, _)| *owner == 7));
    assert!(sent[0].0.contains("started"));

    fx.shell.script("10.0.0.1", Script::Unreachable);
    let id = new_status(&fx).await;
    fx.deployer.run_pipeline(id, 1, 7).await.unwrap();
    assert_eq!(
        fx.notifier.severities()[2..],
        [Severity::InProgress, Severity::Failure]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_fail_and_hung_hosts() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2, 3]).await;
    fx.shell.script("10.0.0.1", Script::Slow(Duration::from_secs(1)));
    fx.shell.script(
        "10.0.0.2",
        Script::Fail {
            exit_code: 1,
            output: "permission denied".to_string(),
        },
    );
    fx.shell.script("10.0.0.3", Script::Hang);
    let id = new_status(&fx).await;

    let started = tokio::time::Instant::now();
    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    // The hung host is waited on until its own deadline, then abandoned.
    assert!(started.elapsed() >= HOST_TIMEOUT);
    assert!(started.elapsed() < HOST_TIMEOUT + Duration::from_secs(2));
    assert!(!result.succeeded);

    let by_label: Vec<_> = result
        .failures
        .iter()
        .map(|f| (f.label.as_str(), f.kind))
        .collect();
    assert_eq!(
        by_label,
        vec![
            ("host-2", FailureKind::Command),
            ("host-3", FailureKind::Timeout)
        ]
    );
    assert_eq!(result.failures[0].reason, "permission denied");
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_hosts_run_concurrently() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2, 3]).await;
    for id in 1..=3 {
        fx.shell
            .script(&format!("10.0.0.{id}"), Script::Slow(Duration::from_secs(10)));
    }
    let id = new_status(&fx).await;

    let started = tokio::time::Instant::now();
    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(result.succeeded);
    assert_eq!(result.hosts, 3);
    assert_eq!(fx.shell.calls().len(), 3);
}

#[tokio::test]
async fn test_empty_pipeline_succeeds() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[]).await;
    let id = new_status(&fx).await;

    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();
    assert!(result.succeeded);
    assert_eq!(result.hosts, 0);
    assert!(fx.shell.calls().is_empty());
}

#[tokio::test]
async fn test_inactive_hosts_are_skipped() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2]).await;
    let mut retired = host(2, Some(1));
    retired.active = false;
    fx.store.update_host(retired).await.unwrap();

    let id = new_status(&fx).await;
    let result = fx.deployer.run_pipeline(id, 1, 7).await.unwrap();

    assert_eq!(result.hosts, 1);
    assert_eq!(fx.shell.calls().len(), 1);
}

#[tokio::test]
async fn test_pipeline_of_other_owner_is_not_found() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1]).await;
    let id = new_status(&fx).await;

    let err = fx.deployer.run_pipeline(id, 1, 8).await.unwrap_err();
    assert!(matches!(err, DeployError::NotFound { .. }));
    assert!(fx.shell.calls().is_empty());
    assert!(fx.notifier.sent().is_empty());

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
}

#[tokio::test]
async fn test_single_host_success_stores_output_tail() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.store.insert_host(host(5, None)).await;
    fx.shell.script(
        "10.0.0.5",
        Script::Succeed("building...\ncompiled in 12s\nrestarted".to_string()),
    );
    let id = new_status(&fx).await;

    fx.deployer.run_single_host(id, 5, None).await.unwrap();

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Success);
    assert_eq!(record.message.chars().count(), 20);
    assert!(record.message.ends_with("restarted"));
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_single_host_uses_variant_script() {
    let fx = Fixture::new(HOST_TIMEOUT);
    let mut h = host(5, None);
    h.variants
        .insert("staging".to_string(), "./deploy-staging.sh".to_string());
    fx.store.insert_host(h).await;
    let first = new_status(&fx).await;
    let second = new_status(&fx).await;

    fx.deployer
        .run_single_host(first, 5, Some("staging"))
        .await
        .unwrap();
    // Unknown variants fall back to the default script.
    fx.deployer
        .run_single_host(second, 5, Some("dev"))
        .await
        .unwrap();
    let commands: Vec<_> = fx.shell.calls().into_iter().map(|c| c.command).collect();
    assert_eq!(commands, vec!["./deploy-staging.sh", "./deploy-5.sh"]);
}

#[tokio::test]
async fn test_single_host_failure_records_error() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.store.insert_host(host(5, None)).await;
    fx.shell.script(
        "10.0.0.5",
        Script::Fail {
            exit_code: 127,
            output: "sh: deploy-5.sh: not found".to_string(),
        },
    );
    let id = new_status(&fx).await;

    let err = fx.deployer.run_single_host(id, 5, None).await.unwrap_err();
    assert!(matches!(err, DeployError::Command { exit_code: Some(127), .. }));

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.message.ends_with("5.sh: not found"));
    assert_eq!(record.message.chars().count(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_single_host_timeout() {
    let fx = Fixture::new(Duration::from_secs(30));
    fx.store.insert_host(host(5, None)).await;
    fx.shell.script("10.0.0.5", Script::Hang);
    let id = new_status(&fx).await;

    let err = fx.deployer.run_single_host(id, 5, None).await.unwrap_err();
    assert!(matches!(err, DeployError::Timeout { secs: 30, .. }));

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
}

#[tokio::test]
async fn test_missing_host_marks_error() {
    let fx = Fixture::new(HOST_TIMEOUT);
    let id = new_status(&fx).await;

    let err = fx.deployer.run_single_host(id, 99, None).await.unwrap_err();
    assert!(matches!(err, DeployError::NotFound { .. }));
    assert!(fx.shell.calls().is_empty());

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
}

#[tokio::test]
async fn test_runner_swallows_partial_failure() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.seed_pipeline(1, 7, &[1, 2]).await;
    fx.shell.script("10.0.0.2", Script::Unreachable);
    let id = new_status(&fx).await;

    fx.deployer.run(Job::pipeline(id, 1, 7)).await.unwrap();

    let record = fx.store.get_status(id).await.unwrap();
    assert_eq!(record.status, JobStatus::Error);
}

#[tokio::test]
async fn test_runner_dispatches_host_jobs() {
    let fx = Fixture::new(HOST_TIMEOUT);
    fx.store.insert_host(host(5, None)).await;
    let id = new_status(&fx).await;

    fx.deployer.run(Job::host(id, 5)).await.unwrap();
    assert_eq!(fx.shell.calls().len(), 1);
    assert_eq!(
        fx.store.get_status(id).await.unwrap().status,
        JobStatus::Success
    );
}
