pub mod codec;
pub mod config;
pub mod conversation;
pub mod crypto;
pub mod error;
pub mod event;
pub mod handlers;
pub mod ids;
pub mod message;
pub mod network;
pub mod reaction;
pub mod read_receipts;
pub mod sender;
pub mod store;
pub mod sync;
pub mod time;
pub mod unpack;
pub mod users;

use crate::config::CoreConfig;
use crate::conversation::ConversationRepository;
use crate::crypto::{GroupCryptoProvider, PairwiseCryptoProvider};
use crate::error::CoreError;
use crate::event::{CoreEventReceiver, EventBus};
use crate::handlers::EventProcessor;
use crate::ids::ConversationId;
use crate::message::{
    EditStatus, Message, MessageContent, MessageRepository, MessageStatus, RegularMessage,
};
use crate::network::NetworkGateway;
use crate::reaction::{ReactionRepository, ToggleReaction};
use crate::read_receipts::{SendConfirmation, UpdateConversationReadDate};
use crate::sender::MessageSender;
use crate::store::{MetadataRepository, StateStore};
use crate::sync::incremental::IncrementalSyncManager;
use crate::sync::slow::{SlowSyncManager, SlowSyncWorker};
use crate::sync::{IncrementalSyncStatus, SlowSyncStatus, SyncCriteria, SyncRepository};
use crate::time::now_ms;
use crate::unpack::MessageUnpacker;
use crate::users::UserRepository;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The assembled client core: repositories over the persistence gateway,
/// the sync managers, and the outgoing pipeline, wired once at startup.
pub struct Core {
    config: CoreConfig,
    criteria: watch::Receiver<SyncCriteria>,
    conversations: ConversationRepository,
    messages: MessageRepository,
    users: UserRepository,
    reactions: ReactionRepository,
    sync: SyncRepository,
    sender: MessageSender,
    toggle_reaction: ToggleReaction,
    update_read_date: UpdateConversationReadDate,
    processor: Arc<EventProcessor>,
    gateway: Arc<dyn NetworkGateway>,
    events: EventBus,
    tasks: Vec<JoinHandle<()>>,
}

impl Core {
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn NetworkGateway>,
        pairwise: Arc<dyn PairwiseCryptoProvider>,
        group: Arc<dyn GroupCryptoProvider>,
        criteria: watch::Receiver<SyncCriteria>,
    ) -> Result<Self, CoreError> {
        let metadata = MetadataRepository::new(store.clone());
        let conversations = ConversationRepository::new(store.clone());
        let messages = MessageRepository::new(store.clone());
        let users = UserRepository::new(store.clone(), gateway.clone());
        let reactions = ReactionRepository::new(store);
        let sync = SyncRepository::new(metadata)?;
        let events = EventBus::new(config.event_channel_capacity);
        let unpacker = MessageUnpacker::new(
            conversations.clone(),
            pairwise.clone(),
            group.clone(),
            config.self_user_id.clone(),
        );
        let processor = Arc::new(EventProcessor::new(
            conversations.clone(),
            users.clone(),
            messages.clone(),
            reactions.clone(),
            group.clone(),
            unpacker,
            events.clone(),
            config.self_user_id.clone(),
        ));
        let sender = MessageSender::new(
            config.clone(),
            conversations.clone(),
            messages.clone(),
            sync.clone(),
            gateway.clone(),
            pairwise,
            group,
        );
        let toggle_reaction = ToggleReaction::new(
            config.clone(),
            reactions.clone(),
            sync.clone(),
            sender.clone(),
        );
        let confirmations = SendConfirmation::new(
            config.clone(),
            conversations.clone(),
            messages.clone(),
            sender.clone(),
        );
        let update_read_date = UpdateConversationReadDate::new(
            config.clone(),
            conversations.clone(),
            sender.clone(),
            confirmations,
            sync.clone(),
        );
        Ok(Self {
            config,
            criteria,
            conversations,
            messages,
            users,
            reactions,
            sync,
            sender,
            toggle_reaction,
            update_read_date,
            processor,
            gateway,
            events,
            tasks: Vec::new(),
        })
    }

    /// Spawns both sync managers. Each runs on its own task and processes at
    /// most one cycle at a time.
    pub fn start_sync(&mut self) {
        let worker = SlowSyncWorker::new(
            self.gateway.clone(),
            self.users.clone(),
            self.conversations.clone(),
            self.metadata(),
        );
        self.tasks.push(SlowSyncManager::start(
            self.criteria.clone(),
            self.sync.clone(),
            worker,
            self.config.clone(),
        ));
        self.tasks.push(IncrementalSyncManager::start(
            self.sync.clone(),
            self.gateway.clone(),
            self.processor.clone(),
            self.config.slow_sync_retry_delay_ms,
        ));
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    pub async fn send_text_message(
        &self,
        conversation_id: &ConversationId,
        text: impl Into<String>,
    ) -> Result<String, CoreError> {
        self.send_regular(
            conversation_id,
            MessageContent::Text {
                content: text.into(),
            },
        )
        .await
    }

    pub async fn send_knock(
        &self,
        conversation_id: &ConversationId,
        hot_knock: bool,
    ) -> Result<String, CoreError> {
        self.send_regular(conversation_id, MessageContent::Knock { hot_knock })
            .await
    }

    async fn send_regular(
        &self,
        conversation_id: &ConversationId,
        content: MessageContent,
    ) -> Result<String, CoreError> {
        self.sync.wait_until_slow_sync_complete().await?;
        let id = Uuid::new_v4().to_string();
        let message = RegularMessage {
            id: id.clone(),
            conversation_id: conversation_id.clone(),
            sender_user_id: self.config.self_user_id.clone(),
            sender_client_id: Some(self.config.self_client_id.clone()),
            timestamp_ms: now_ms(),
            status: MessageStatus::Pending,
            edit_status: EditStatus::NotEdited,
            content,
        };
        self.sender.send_message(Message::Regular(message)).await?;
        Ok(id)
    }

    pub async fn toggle_reaction(
        &self,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), CoreError> {
        self.toggle_reaction
            .toggle(conversation_id, message_id, emoji)
            .await
    }

    pub async fn update_conversation_read_date(
        &self,
        conversation_id: &ConversationId,
        time_ms: u64,
    ) -> Result<(), CoreError> {
        self.update_read_date.update(conversation_id, time_ms).await
    }

    pub fn observe_slow_sync_status(&self) -> watch::Receiver<SlowSyncStatus> {
        self.sync.observe_slow_sync_status()
    }

    pub fn observe_incremental_sync_status(&self) -> watch::Receiver<IncrementalSyncStatus> {
        self.sync.observe_incremental_sync_status()
    }

    pub fn subscribe(&self) -> CoreEventReceiver {
        self.events.subscribe()
    }

    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn reactions(&self) -> &ReactionRepository {
        &self.reactions
    }

    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    fn metadata(&self) -> MetadataRepository {
        // The sync repository owns the canonical handle; workers get their
        // own view over the same store.
        self.sync.metadata()
    }
}

#[cfg(test)]
mod tests;
