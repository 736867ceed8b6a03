use crate::error::{CoreError, StorageFailure};
use crate::ids::UserId;
use crate::network::NetworkGateway;
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub handle: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub user_id: UserId,
    pub status: ConnectionStatus,
}

/// Profiles and connections, with on-demand resolution of users we have not
/// seen yet. Event handlers go through this repository instead of talking to
/// the network gateway themselves.
#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn StateStore>,
    gateway: Arc<dyn NetworkGateway>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn StateStore>, gateway: Arc<dyn NetworkGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn get(&self, id: &UserId) -> Result<Option<UserProfile>, CoreError> {
        match self.store.get(&Self::user_key(id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    pub fn persist_profiles(&self, profiles: &[UserProfile]) -> Result<(), CoreError> {
        for profile in profiles {
            let bytes = serde_json::to_vec(profile)
                .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
            self.store.put(&Self::user_key(&profile.id), &bytes)?;
        }
        Ok(())
    }

    /// Resolves the given users from the backend if they are not locally
    /// known yet. Already-known users are not re-fetched.
    pub async fn fetch_users_if_unknown(&self, ids: &[UserId]) -> Result<(), CoreError> {
        let mut missing = Vec::new();
        for id in ids {
            if self.get(id)?.is_none() {
                missing.push(id.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let profiles = self.gateway.fetch_users(&missing).await?;
        self.persist_profiles(&profiles)
    }

    pub fn persist_connections(&self, connections: &[Connection]) -> Result<(), CoreError> {
        for connection in connections {
            let bytes = serde_json::to_vec(connection)
                .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
            self.store
                .put(&Self::connection_key(&connection.user_id), &bytes)?;
        }
        Ok(())
    }

    pub fn connection(&self, id: &UserId) -> Result<Option<Connection>, CoreError> {
        match self.store.get(&Self::connection_key(id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    fn user_key(id: &UserId) -> String {
        format!("user:{}", id)
    }

    fn connection_key(id: &UserId) -> String {
        format!("connection:{}", id)
    }
}
