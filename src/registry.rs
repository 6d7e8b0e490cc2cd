//! Session registry and single-admin bootstrap.
//!
//! The first connection that presents a non-empty admin secret binds it for
//! the life of the process. Later claims must match it exactly; a mismatch
//! leaves the session connected as a viewer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::Role;
use crate::protocol::ServerEvent;

pub type SessionId = String;
pub type SessionSender = mpsc::Sender<Arc<ServerEvent>>;

/// Messages a session may have queued before it counts as stalled and is
/// disconnected.
pub const SESSION_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub client_id: String,
    pub role: Role,
    pub addr: String,
    sender: SessionSender,
    seq: u64,
}

impl Session {
    pub fn sender(&self) -> &SessionSender {
        &self.sender
    }
}

/// outcome of presenting (or not presenting) an admin secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminClaim {
    /// no secret presented
    NotClaimed,
    /// first secret seen; it is now the bound secret
    Bootstrapped,
    Accepted,
    Rejected,
}

impl AdminClaim {
    pub fn role(self) -> Role {
        match self {
            AdminClaim::Bootstrapped | AdminClaim::Accepted => Role::Admin,
            AdminClaim::NotClaimed | AdminClaim::Rejected => Role::Viewer,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    admin_secret: Option<String>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-once: binds the secret on the first non-empty claim.
    pub fn claim_admin(&mut self, secret: Option<&str>) -> AdminClaim {
        let secret = match secret {
            Some(s) if !s.is_empty() => s,
            _ => return AdminClaim::NotClaimed,
        };
        match &self.admin_secret {
            None => {
                self.admin_secret = Some(secret.to_string());
                AdminClaim::Bootstrapped
            }
            Some(bound) if bound == secret => AdminClaim::Accepted,
            Some(_) => AdminClaim::Rejected,
        }
    }

    pub fn has_admin_secret(&self) -> bool {
        self.admin_secret.is_some()
    }

    pub fn insert(&mut self, id: SessionId, client_id: String, role: Role, addr: String, sender: SessionSender) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sessions.insert(id.clone(), Session { id, client_id, role, addr, sender, seq });
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// admin-set membership, checked at every admin-only entry point
    pub fn is_admin(&self, id: &str) -> bool {
        matches!(self.sessions.get(id), Some(s) if s.role == Role::Admin)
    }

    /// in connection order
    pub fn sessions(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub fn admins(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.role == Role::Admin)
    }

    pub fn viewers(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.role == Role::Viewer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_secret_binds() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.has_admin_secret());
        assert_eq!(registry.claim_admin(Some("s3cret")), AdminClaim::Bootstrapped);
        assert_eq!(registry.claim_admin(Some("other")), AdminClaim::Rejected);
        assert_eq!(registry.claim_admin(Some("s3cret")), AdminClaim::Accepted);
    }

    #[test]
    fn test_empty_secret_is_no_claim() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.claim_admin(Some("")), AdminClaim::NotClaimed);
        assert_eq!(registry.claim_admin(None), AdminClaim::NotClaimed);
        assert!(!registry.has_admin_secret());
    }

    #[test]
    fn test_admin_membership_ends_on_remove() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        registry.insert("s1".into(), "ADMIN_1".into(), Role::Admin, "127.0.0.1".into(), tx.clone());
        registry.insert("s2".into(), "viewer".into(), Role::Viewer, "127.0.0.1".into(), tx);

        assert!(registry.is_admin("s1"));
        assert!(!registry.is_admin("s2"));
        let ids: Vec<&str> = registry.sessions().into_iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);

        registry.remove("s1");
        assert!(!registry.is_admin("s1"));
        assert_eq!(registry.len(), 1);
    }
}
