use crate::error::{CoreError, CryptoFailure};
use crate::ids::{ClientId, GroupId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Addresses one pairwise session: the sending device of one user.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub user_id: UserId,
    pub client_id: ClientId,
}

impl SessionId {
    pub fn new(user_id: UserId, client_id: ClientId) -> Self {
        Self { user_id, client_id }
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}_{}",
            self.user_id.value, self.user_id.domain, self.client_id
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prekey {
    pub id: u32,
    pub key: Vec<u8>,
}

/// Pairwise end-to-end encryption capability.
///
/// Sessions are keyed by [`SessionId`]. Decrypting from an unknown peer
/// creates the session lazily; encrypting requires one to exist already,
/// which is what drives the prekey fetch in the sender pipeline.
#[async_trait]
pub trait PairwiseCryptoProvider: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8], session: &SessionId) -> Result<Vec<u8>, CoreError>;
    async fn decrypt(&self, ciphertext: &[u8], session: &SessionId) -> Result<Vec<u8>, CoreError>;
    async fn establish_session(
        &self,
        session: &SessionId,
        prekey: &Prekey,
    ) -> Result<(), CoreError>;
    async fn has_session(&self, session: &SessionId) -> Result<bool, CoreError>;
}

/// Group end-to-end encryption capability with epoch-based group state.
///
/// Membership changes queue proposals; committing them advances the epoch.
/// A `None` plaintext from `decrypt_message` means the ciphertext was a
/// handshake-only message carrying no user content.
#[async_trait]
pub trait GroupCryptoProvider: Send + Sync {
    async fn create_group(&self, group: &GroupId) -> Result<(), CoreError>;
    async fn join_from_welcome(&self, welcome: &[u8]) -> Result<GroupId, CoreError>;
    async fn add_members(&self, group: &GroupId, members: &[UserId]) -> Result<(), CoreError>;
    async fn remove_members(&self, group: &GroupId, members: &[UserId]) -> Result<(), CoreError>;
    async fn encrypt_message(
        &self,
        group: &GroupId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CoreError>;
    async fn decrypt_message(
        &self,
        group: &GroupId,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>, CoreError>;
    async fn commit_pending_proposals(&self, group: &GroupId) -> Result<(), CoreError>;
    async fn epoch(&self, group: &GroupId) -> Result<u64, CoreError>;
}

const PAIRWISE_PREFIX: &[u8] = b"pairwise:";
const GROUP_PREFIX: &[u8] = b"group:";
const GROUP_HANDSHAKE: &[u8] = b"group-handshake";

/// Deterministic stand-in for a real pairwise protocol implementation.
///
/// Mimics the contract the pipeline depends on: lazy session creation on
/// decrypt, `SessionNotFound` on encrypt without a session, and
/// `DuplicateMessage` on replay.
#[derive(Clone, Default)]
pub struct InMemoryPairwiseProvider {
    sessions: Arc<Mutex<HashSet<String>>>,
    seen: Arc<Mutex<HashSet<(String, Vec<u8>)>>>,
}

impl InMemoryPairwiseProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PairwiseCryptoProvider for InMemoryPairwiseProvider {
    async fn encrypt(&self, plaintext: &[u8], session: &SessionId) -> Result<Vec<u8>, CoreError> {
        let sessions = self.sessions.lock().await;
        if !sessions.contains(&session.to_string()) {
            return Err(CryptoFailure::SessionNotFound.into());
        }
        let mut out = PAIRWISE_PREFIX.to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8], session: &SessionId) -> Result<Vec<u8>, CoreError> {
        self.sessions.lock().await.insert(session.to_string());
        let mut seen = self.seen.lock().await;
        if !seen.insert((session.to_string(), ciphertext.to_vec())) {
            return Err(CryptoFailure::DuplicateMessage.into());
        }
        ciphertext
            .strip_prefix(PAIRWISE_PREFIX)
            .map(|p| p.to_vec())
            .ok_or_else(|| CryptoFailure::Provider("malformed ciphertext".to_string()).into())
    }

    async fn establish_session(
        &self,
        session: &SessionId,
        _prekey: &Prekey,
    ) -> Result<(), CoreError> {
        self.sessions.lock().await.insert(session.to_string());
        Ok(())
    }

    async fn has_session(&self, session: &SessionId) -> Result<bool, CoreError> {
        Ok(self.sessions.lock().await.contains(&session.to_string()))
    }
}

/// Deterministic stand-in for a real group protocol implementation, tracking
/// one epoch counter per group.
#[derive(Clone, Default)]
pub struct InMemoryGroupProvider {
    groups: Arc<Mutex<HashMap<String, u64>>>,
    pending_proposals: Arc<Mutex<HashMap<String, usize>>>,
    seen: Arc<Mutex<HashSet<(String, Vec<u8>)>>>,
}

impl InMemoryGroupProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Welcome payload accepted by [`GroupCryptoProvider::join_from_welcome`].
    pub fn welcome_for(group: &GroupId) -> Vec<u8> {
        format!("welcome:{}", group).into_bytes()
    }

    /// A ciphertext that decrypts to no user content.
    pub fn handshake_message() -> Vec<u8> {
        GROUP_HANDSHAKE.to_vec()
    }
}

#[async_trait]
impl GroupCryptoProvider for InMemoryGroupProvider {
    async fn create_group(&self, group: &GroupId) -> Result<(), CoreError> {
        self.groups.lock().await.insert(group.value.clone(), 0);
        Ok(())
    }

    async fn join_from_welcome(&self, welcome: &[u8]) -> Result<GroupId, CoreError> {
        let raw = std::str::from_utf8(welcome)
            .map_err(|_| CryptoFailure::Provider("malformed welcome".to_string()))?;
        let value = raw
            .strip_prefix("welcome:")
            .ok_or_else(|| CryptoFailure::Provider("malformed welcome".to_string()))?;
        let group = GroupId::new(value);
        self.groups.lock().await.insert(group.value.clone(), 1);
        Ok(group)
    }

    async fn encrypt_message(
        &self,
        group: &GroupId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        let groups = self.groups.lock().await;
        if !groups.contains_key(&group.value) {
            return Err(CryptoFailure::SessionNotFound.into());
        }
        let mut out = GROUP_PREFIX.to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    async fn decrypt_message(
        &self,
        group: &GroupId,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>, CoreError> {
        let groups = self.groups.lock().await;
        if !groups.contains_key(&group.value) {
            return Err(CryptoFailure::SessionNotFound.into());
        }
        drop(groups);
        if ciphertext == GROUP_HANDSHAKE {
            return Ok(None);
        }
        let mut seen = self.seen.lock().await;
        if !seen.insert((group.value.clone(), ciphertext.to_vec())) {
            return Err(CryptoFailure::DuplicateMessage.into());
        }
        ciphertext
            .strip_prefix(GROUP_PREFIX)
            .map(|p| Some(p.to_vec()))
            .ok_or_else(|| CryptoFailure::Provider("malformed ciphertext".to_string()).into())
    }

    async fn add_members(&self, group: &GroupId, members: &[UserId]) -> Result<(), CoreError> {
        let groups = self.groups.lock().await;
        if !groups.contains_key(&group.value) {
            return Err(CryptoFailure::SessionNotFound.into());
        }
        drop(groups);
        *self
            .pending_proposals
            .lock()
            .await
            .entry(group.value.clone())
            .or_insert(0) += members.len();
        Ok(())
    }

    async fn remove_members(&self, group: &GroupId, members: &[UserId]) -> Result<(), CoreError> {
        let groups = self.groups.lock().await;
        if !groups.contains_key(&group.value) {
            return Err(CryptoFailure::SessionNotFound.into());
        }
        drop(groups);
        *self
            .pending_proposals
            .lock()
            .await
            .entry(group.value.clone())
            .or_insert(0) += members.len();
        Ok(())
    }

    /// Applies queued membership proposals; a no-op when none are pending,
    /// otherwise the epoch advances by one.
    async fn commit_pending_proposals(&self, group: &GroupId) -> Result<(), CoreError> {
        let pending = self
            .pending_proposals
            .lock()
            .await
            .remove(&group.value)
            .unwrap_or(0);
        if pending == 0 {
            return Ok(());
        }
        let mut groups = self.groups.lock().await;
        let epoch = groups
            .get_mut(&group.value)
            .ok_or(CryptoFailure::SessionNotFound)?;
        *epoch += 1;
        Ok(())
    }

    async fn epoch(&self, group: &GroupId) -> Result<u64, CoreError> {
        let groups = self.groups.lock().await;
        groups
            .get(&group.value)
            .copied()
            .ok_or(CryptoFailure::SessionNotFound.into())
    }
}
