//! Deployment execution on remote hosts.
//!
//! This module turns dequeued jobs into remote script runs:
//! - **Sessions**: one ssh login per host, running one command
//! - **Secrets**: host passwords are stored encrypted and decrypted just before login
//! - **Fan-out**: pipeline jobs update all of their hosts concurrently
//!
//! # Components
//!
//! - [`Deployer`]: loads hosts, drives sessions, records status, notifies
//! - [`RemoteShell`]: the session seam; [`SshShell`] shells out to `ssh`
//! - [`SecretCipher`]: decrypts stored secrets; [`AesCfbCipher`] is the default
//!
//! # Execution Flow
//!
//! 1. The queue worker hands a [`Job`](crate::queue::Job) to [`Deployer`]
//! 2. Hosts are loaded fresh from the store so edits since enqueue apply
//! 3. Each host gets its own task and deadline; a missed deadline drops the session
//! 4. Results are joined into an [`ExecutionResult`] and written to the status record

pub mod cipher;
pub mod executor;
pub mod session;

pub use cipher::{AesCfbCipher, MissingKeyCipher, SecretCipher};
pub use executor::{tail, Deployer, ExecutionResult, FailureKind, HostFailure};
pub use session::{RemoteShell, SessionTarget, SshShell};
