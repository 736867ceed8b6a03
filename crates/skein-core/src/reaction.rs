use crate::config::CoreConfig;
use crate::error::{CoreError, StorageFailure};
use crate::ids::{ConversationId, UserId};
use crate::message::{Message, MessageContent, SignalingMessage};
use crate::sender::MessageSender;
use crate::store::StateStore;
use crate::sync::SyncRepository;
use crate::time::now_ms;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Per-(message, user) reaction sets.
#[derive(Clone)]
pub struct ReactionRepository {
    store: Arc<dyn StateStore>,
}

impl ReactionRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn reactions_of(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        user_id: &UserId,
    ) -> Result<BTreeSet<String>, CoreError> {
        match self
            .store
            .get(&Self::key(conversation_id, message_id, user_id))?
        {
            None => Ok(BTreeSet::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    pub fn persist_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<(), CoreError> {
        let mut set = self.reactions_of(conversation_id, message_id, user_id)?;
        set.insert(emoji.to_string());
        self.write(conversation_id, message_id, user_id, &set)
    }

    pub fn delete_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<(), CoreError> {
        let mut set = self.reactions_of(conversation_id, message_id, user_id)?;
        set.remove(emoji);
        self.write(conversation_id, message_id, user_id, &set)
    }

    /// Replaces a user's whole reaction set, as carried by inbound reaction
    /// signaling.
    pub fn set_reactions(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        user_id: &UserId,
        set: &BTreeSet<String>,
    ) -> Result<(), CoreError> {
        self.write(conversation_id, message_id, user_id, set)
    }

    fn write(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        user_id: &UserId,
        set: &BTreeSet<String>,
    ) -> Result<(), CoreError> {
        let key = Self::key(conversation_id, message_id, user_id);
        if set.is_empty() {
            return self.store.delete(&key);
        }
        let bytes =
            serde_json::to_vec(set).map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store.put(&key, &bytes)
    }

    fn key(conversation_id: &ConversationId, message_id: &str, user_id: &UserId) -> String {
        format!("reactions:{}:{}:{}", conversation_id, message_id, user_id)
    }
}

/// Adds the reaction if absent, removes it if present.
///
/// The local mutation happens strictly before the network send; if the send
/// fails, the inverse mutation restores the previous state. That ordering is
/// what keeps local and remote state from diverging silently and must not be
/// flipped.
#[derive(Clone)]
pub struct ToggleReaction {
    config: CoreConfig,
    reactions: ReactionRepository,
    sync: SyncRepository,
    sender: MessageSender,
}

impl ToggleReaction {
    pub fn new(
        config: CoreConfig,
        reactions: ReactionRepository,
        sync: SyncRepository,
        sender: MessageSender,
    ) -> Self {
        Self {
            config,
            reactions,
            sync,
            sender,
        }
    }

    pub async fn toggle(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), CoreError> {
        self.sync.wait_until_slow_sync_complete().await?;
        let self_user = &self.config.self_user_id;
        let current = self
            .reactions
            .reactions_of(conversation_id, message_id, self_user)?;
        if current.contains(emoji) {
            self.remove(conversation_id, message_id, emoji, current).await
        } else {
            self.add(conversation_id, message_id, emoji, current).await
        }
    }

    async fn add(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji: &str,
        current: BTreeSet<String>,
    ) -> Result<(), CoreError> {
        let self_user = self.config.self_user_id.clone();
        self.reactions
            .persist_reaction(conversation_id, message_id, &self_user, emoji)?;
        let mut emoji_set = current;
        emoji_set.insert(emoji.to_string());
        match self.send_reaction(conversation_id, message_id, emoji_set).await {
            Ok(()) => Ok(()),
            Err(error) => {
                if let Err(rollback) =
                    self.reactions
                        .delete_reaction(conversation_id, message_id, &self_user, emoji)
                {
                    warn!(%rollback, "failed to roll back optimistic reaction");
                }
                Err(error)
            }
        }
    }

    async fn remove(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji: &str,
        current: BTreeSet<String>,
    ) -> Result<(), CoreError> {
        let self_user = self.config.self_user_id.clone();
        self.reactions
            .delete_reaction(conversation_id, message_id, &self_user, emoji)?;
        let mut emoji_set = current;
        emoji_set.remove(emoji);
        match self.send_reaction(conversation_id, message_id, emoji_set).await {
            Ok(()) => Ok(()),
            Err(error) => {
                if let Err(rollback) =
                    self.reactions
                        .persist_reaction(conversation_id, message_id, &self_user, emoji)
                {
                    warn!(%rollback, "failed to roll back optimistic reaction removal");
                }
                Err(error)
            }
        }
    }

    async fn send_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji_set: BTreeSet<String>,
    ) -> Result<(), CoreError> {
        let signaling = SignalingMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            sender_user_id: self.config.self_user_id.clone(),
            sender_client_id: Some(self.config.self_client_id.clone()),
            timestamp_ms: now_ms(),
            content: MessageContent::Reaction {
                message_id: message_id.to_string(),
                emoji_set,
            },
        };
        self.sender.send_message(Message::Signaling(signaling)).await
    }
}
