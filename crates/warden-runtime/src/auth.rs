use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// API operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    Evaluate,
    Trace,
    SessionLifecycle,
    ManageApprovals,
    ManageSessions,
    ManageAgents,
    ManagePolicies,
    KillSwitch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Evaluate, trace and session lifecycle only.
    Agent,
    /// Agent permissions plus approvals, sessions and agents management.
    Operator,
    /// Everything.
    Admin,
}

impl Role {
    pub fn permits(&self, op: ApiOperation) -> bool {
        match self {
            Role::Admin => true,
            Role::Operator => !matches!(op, ApiOperation::ManagePolicies | ApiOperation::KillSwitch),
            Role::Agent => matches!(
                op,
                ApiOperation::Evaluate | ApiOperation::Trace | ApiOperation::SessionLifecycle
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    role: Role,
    expires_at: DateTime<Utc>,
    /// When set, the token only works for this agent's requests.
    agent_binding: Option<String>,
    /// When set, the token only works from this source address.
    ip_binding: Option<String>,
}

/// Bearer-token store with TTL, optional agent and source-IP binding.
/// Disabled stores authorize everything.
pub struct TokenStore {
    enabled: bool,
    default_ttl: Duration,
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl TokenStore {
    pub fn new(enabled: bool, default_ttl_seconds: u64) -> Self {
        Self {
            enabled,
            default_ttl: Duration::seconds(default_ttl_seconds as i64),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn issue(
        &self,
        role: Role,
        ttl: Option<Duration>,
        agent_binding: Option<String>,
        ip_binding: Option<String>,
    ) -> IssuedToken {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = format!("wdn_{}", hex::encode(bytes));
        let expires_at = Utc::now() + ttl.unwrap_or(self.default_ttl);

        self.tokens.write().insert(
            token.clone(),
            TokenRecord {
                role,
                expires_at,
                agent_binding,
                ip_binding,
            },
        );
        IssuedToken {
            token,
            role,
            expires_at,
        }
    }

    /// Check a bearer token against an operation and its request context.
    pub fn authorize(
        &self,
        token: Option<&str>,
        op: ApiOperation,
        agent_id: Option<&str>,
        source_ip: Option<&str>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let token = token.ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?;

        let tokens = self.tokens.read();
        let record = tokens
            .get(token)
            .ok_or_else(|| Error::Unauthorized("unknown token".into()))?;

        if record.expires_at <= Utc::now() {
            return Err(Error::Unauthorized("token expired".into()));
        }
        if !record.role.permits(op) {
            return Err(Error::Unauthorized("insufficient role".into()));
        }
        if let Some(bound_agent) = &record.agent_binding
            && agent_id != Some(bound_agent.as_str())
        {
            return Err(Error::Unauthorized("token bound to another agent".into()));
        }
        if let Some(bound_ip) = &record.ip_binding
            && source_ip != Some(bound_ip.as_str())
        {
            return Err(Error::Unauthorized("token bound to another address".into()));
        }
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Drop expired tokens. Called periodically by the background sweeper.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, record| record.expires_at > now);
        before - tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_store_allows_everything() {
        let store = TokenStore::new(false, 3600);
        assert!(store
            .authorize(None, ApiOperation::KillSwitch, None, None)
            .is_ok());
    }

    #[test]
    fn test_role_matrix() {
        assert!(Role::Agent.permits(ApiOperation::Evaluate));
        assert!(Role::Agent.permits(ApiOperation::SessionLifecycle));
        assert!(!Role::Agent.permits(ApiOperation::ManageApprovals));
        assert!(!Role::Agent.permits(ApiOperation::KillSwitch));

        assert!(Role::Operator.permits(ApiOperation::ManageApprovals));
        assert!(Role::Operator.permits(ApiOperation::ManageAgents));
        assert!(!Role::Operator.permits(ApiOperation::ManagePolicies));

        assert!(Role::Admin.permits(ApiOperation::ManagePolicies));
        assert!(Role::Admin.permits(ApiOperation::KillSwitch));
    }

    #[test]
    fn test_token_roundtrip_and_revoke() {
        let store = TokenStore::new(true, 3600);
        let issued = store.issue(Role::Operator, None, None, None);
        assert!(issued.token.starts_with("wdn_"));

        assert!(store
            .authorize(
                Some(&issued.token),
                ApiOperation::ManageApprovals,
                None,
                None
            )
            .is_ok());
        assert!(store
            .authorize(Some(&issued.token), ApiOperation::KillSwitch, None, None)
            .is_err());

        assert!(store.revoke(&issued.token));
        assert!(store
            .authorize(Some(&issued.token), ApiOperation::Evaluate, None, None)
            .is_err());
    }

    #[test]
    fn test_expired_tokens_rejected_and_cleaned() {
        let store = TokenStore::new(true, 3600);
        let issued = store.issue(Role::Agent, Some(Duration::seconds(-1)), None, None);

        let err = store
            .authorize(Some(&issued.token), ApiOperation::Evaluate, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        assert_eq!(store.cleanup_expired(), 1);
    }

    #[test]
    fn test_agent_and_ip_bindings() {
        let store = TokenStore::new(true, 3600);
        let issued = store.issue(
            Role::Agent,
            None,
            Some("billing-agent".to_string()),
            Some("10.0.0.8".to_string()),
        );

        assert!(store
            .authorize(
                Some(&issued.token),
                ApiOperation::Evaluate,
                Some("billing-agent"),
                Some("10.0.0.8")
            )
            .is_ok());
        assert!(store
            .authorize(
                Some(&issued.token),
                ApiOperation::Evaluate,
                Some("other-agent"),
                Some("10.0.0.8")
            )
            .is_err());
        assert!(store
            .authorize(
                Some(&issued.token),
                ApiOperation::Evaluate,
                Some("billing-agent"),
                Some("10.9.9.9")
            )
            .is_err());
    }
}
