// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The contract the container runtime uses to give a container SSH access
//! back to the host. The SSH server itself is a collaborator that lives
//! elsewhere; this module issues and revokes the per-invocation credentials
//! it honours.

use std::collections::HashSet;
use std::env;
use std::sync::Mutex;

use snafu::Snafu;
use uuid::Uuid;

#[derive(Clone)]
pub struct ConnectionInfo {
    // The address as reachable from inside the container, i.e. the engine's
    // host-gateway name.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub token: String,
}

pub trait TokenIssuer: Send + Sync {
    // `issue` returns connection credentials unique to one invocation.
    fn issue(&self, execution_id: &str, host: &str)
        -> Result<ConnectionInfo, IssueConnectionError>;

    // `revoke` invalidates a previously-issued token; revoking an unknown
    // token is a no-op.
    fn revoke(&self, token: &str);
}

#[derive(Debug, Snafu)]
pub enum IssueConnectionError {
    #[snafu(display("The host SSH server isn't running"))]
    ServerUnavailable,
}

// `LocalTokenIssuer` issues tokens for an SSH server listening on the host.
pub struct LocalTokenIssuer {
    port: u16,
    user: String,
    active_tokens: Mutex<HashSet<String>>,
}

impl LocalTokenIssuer {
    pub fn new(port: u16) -> Self {
        let user = env::var("USER")
            .unwrap_or_else(|_| "invowk".to_string());

        LocalTokenIssuer{
            port,
            user,
            active_tokens: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_active(&self, token: &str) -> bool {
        self.active_tokens
            .lock()
            .map(|tokens| tokens.contains(token))
            .unwrap_or(false)
    }
}

impl TokenIssuer for LocalTokenIssuer {
    fn issue(&self, _execution_id: &str, host: &str)
        -> Result<ConnectionInfo, IssueConnectionError>
    {
        let token = Uuid::new_v4().to_string();

        if let Ok(mut tokens) = self.active_tokens.lock() {
            tokens.insert(token.clone());
        }

        Ok(ConnectionInfo{
            host: host.to_string(),
            port: self.port,
            user: self.user.clone(),
            token,
        })
    }

    fn revoke(&self, token: &str) {
        if let Ok(mut tokens) = self.active_tokens.lock() {
            tokens.remove(token);
        }
    }
}
