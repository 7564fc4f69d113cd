//! GitHub push webhook.
//!
//! Pushes to the tracked branches enqueue a host job for the configured
//! webhook host, using the branch name as the script variant.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{submit_job, DashboardState, TriggerResponse};
use crate::queue::JobTarget;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Branches whose pushes trigger a deployment.
pub const TRACKED_BRANCHES: &[&str] = &["dev", "staging"];

const MERGE_COMMIT_PREFIX: &str = "Merge pull request #";

#[derive(Debug, Default, Deserialize)]
pub struct PushEvent {
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub pusher: Pusher,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub message: String,
}

impl PushEvent {
    /// Branch name for a `refs/heads/*` ref.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Branch to deploy, if this push should trigger one.
    ///
    /// Merge commits are skipped; the individual pushes that were merged
    /// already triggered their own runs.
    pub fn deploy_branch(&self) -> Option<&str> {
        let branch = self.branch()?;
        if !TRACKED_BRANCHES.contains(&branch) {
            return None;
        }
        let is_merge = self
            .head_commit
            .as_ref()
            .is_some_and(|c| c.message.contains(MERGE_COMMIT_PREFIX));
        (!is_merge).then_some(branch)
    }
}

/// `sha256=<hex>` signature of `body`, as GitHub sends it.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", encode_hex(&digest))
}

/// Constant-time check of an `X-Hub-Signature-256` header value.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(expected) = header
        .and_then(|h| h.strip_prefix("sha256="))
        .and_then(decode_hex)
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

pub(crate) async fn github_webhook_handler(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.triggers.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            tracing::warn!("Rejected webhook with invalid signature");
            return TriggerResponse::rejected(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed webhook payload");
            return TriggerResponse::rejected(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };

    let Some(branch) = event.deploy_branch() else {
        tracing::debug!(git_ref = %event.git_ref, "Ignoring push");
        return (
            StatusCode::OK,
            Json(TriggerResponse {
                success: true,
                job_id: None,
                error: None,
            }),
        );
    };

    let Some(host_id) = state.triggers.webhook_host_id else {
        tracing::warn!(branch, "Push received but no webhook host is configured");
        return TriggerResponse::rejected(
            StatusCode::SERVICE_UNAVAILABLE,
            "webhook host not configured",
        );
    };

    tracing::info!(branch, pusher = %event.pusher.name, "Push received, queueing update");
    let target = JobTarget::Host {
        host_id,
        variant: Some(branch.to_string()),
    };
    submit_job(&state, &event.pusher.name, branch, target).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(git_ref: &str, message: &str) -> PushEvent {
        PushEvent {
            git_ref: git_ref.to_string(),
            pusher: Pusher {
                name: "octocat".to_string(),
            },
            head_commit: Some(HeadCommit {
                message: message.to_string(),
            }),
        }
    }

    #[test]
    fn tracked_branches_deploy() {
        assert_eq!(push("refs/heads/dev", "fix").deploy_branch(), Some("dev"));
        assert_eq!(
            push("refs/heads/staging", "fix").deploy_branch(),
            Some("staging")
        );
    }

    #[test]
    fn other_refs_are_ignored() {
        assert_eq!(push("refs/heads/master", "fix").deploy_branch(), None);
        assert_eq!(push("refs/tags/dev", "fix").deploy_branch(), None);
        assert_eq!(push("", "fix").deploy_branch(), None);
    }

    #[test]
    fn merge_commits_are_ignored() {
        let event = push("refs/heads/dev", "Merge pull request #42 from x/y");
        assert_eq!(event.deploy_branch(), None);
    }

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"ref":"refs/heads/dev"}"#;
        let sig = sign_payload("topsecret", body);
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature("topsecret", body, Some(&sig)));
        assert!(!verify_signature("other", body, Some(&sig)));
        assert!(!verify_signature("topsecret", b"tampered", Some(&sig)));
    }

    #[test]
    fn malformed_signature_header() {
        assert!(!verify_signature("k", b"x", None));
        assert!(!verify_signature("k", b"x", Some("sha1=abcd")));
        assert!(!verify_signature("k", b"x", Some("sha256=zz")));
        assert!(!verify_signature("k", b"x", Some("sha256=abc")));
    }

    #[test]
    fn hex_decoding() {
        assert_eq!(decode_hex("00ff10"), Some(vec![0x00, 0xff, 0x10]));
        assert_eq!(encode_hex(&[0xde, 0xad]), "dead");
    }
}
