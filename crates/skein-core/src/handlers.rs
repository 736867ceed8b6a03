use crate::codec::ProtoContent;
use crate::conversation::{
    ConversationRepository, ConversationSnapshot, ConversationType, Member, MemberSnapshot,
    ProtocolInfo, ReceiptMode,
};
use crate::crypto::GroupCryptoProvider;
use crate::error::CoreError;
use crate::event::{
    CoreEvent, Event, EventBus, EventPayload, NewGroupMessageEvent, NewMessageEvent,
};
use crate::ids::{ConversationId, GroupId, UserId};
use crate::message::{
    EditStatus, MemberChangeKind, MessageContent, MessageRepository, MessageStatus, ReceiptKind,
    RegularMessage,
};
use crate::reaction::ReactionRepository;
use crate::time::now_ms;
use crate::unpack::{ApplicationMessage, MessageUnpacker, MessageUnpackResult};
use crate::users::UserRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies one backend event to local state.
///
/// Handlers are keyed by event kind and are the only writers for their
/// entities. All of them tolerate redelivery: persistence-level upserts and
/// event-id-derived system message ids make a re-run a no-op.
pub struct EventProcessor {
    conversations: ConversationRepository,
    users: UserRepository,
    messages: MessageRepository,
    reactions: ReactionRepository,
    group_provider: Arc<dyn GroupCryptoProvider>,
    unpacker: MessageUnpacker,
    bus: EventBus,
    self_user_id: UserId,
}

impl EventProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: ConversationRepository,
        users: UserRepository,
        messages: MessageRepository,
        reactions: ReactionRepository,
        group_provider: Arc<dyn GroupCryptoProvider>,
        unpacker: MessageUnpacker,
        bus: EventBus,
        self_user_id: UserId,
    ) -> Self {
        Self {
            conversations,
            users,
            messages,
            reactions,
            group_provider,
            unpacker,
            bus,
            self_user_id,
        }
    }

    pub async fn process(&self, event: &Event) -> Result<(), CoreError> {
        match &event.payload {
            EventPayload::NewConversation {
                conversation,
                timestamp_ms,
            } => {
                self.on_new_conversation(&event.id, conversation, *timestamp_ms)
                    .await
            }
            EventPayload::MemberJoin {
                conversation_id,
                from,
                members,
                timestamp_ms,
            } => {
                self.on_member_join(&event.id, conversation_id, from, members, *timestamp_ms)
                    .await
            }
            EventPayload::MemberLeave {
                conversation_id,
                from,
                user_ids,
                timestamp_ms,
            } => {
                self.on_member_leave(&event.id, conversation_id, from, user_ids, *timestamp_ms)
                    .await
            }
            EventPayload::ReceiptModeUpdate {
                conversation_id,
                from,
                receipt_mode,
            } => self.on_receipt_mode_update(&event.id, conversation_id, from, *receipt_mode),
            EventPayload::NewMessage(message_event) => self.on_new_message(message_event).await,
            EventPayload::NewGroupMessage(message_event) => {
                self.on_new_group_message(message_event).await
            }
            EventPayload::GroupWelcome {
                conversation_id,
                group_id,
                welcome,
            } => self.on_group_welcome(conversation_id, group_id, welcome).await,
        }
    }

    async fn on_new_conversation(
        &self,
        event_id: &str,
        snapshot: &ConversationSnapshot,
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        let newly_inserted = self.conversations.persist_snapshot(snapshot)?;
        let member_ids: Vec<UserId> = snapshot.members.iter().map(|m| m.user_id.clone()).collect();
        self.users.fetch_users_if_unknown(&member_ids).await?;
        self.conversations
            .update_modified_date(&snapshot.id, now_ms())?;
        if newly_inserted
            && snapshot.conversation_type == ConversationType::Group
            && snapshot.receipt_mode == ReceiptMode::Enabled
        {
            let sender = snapshot
                .creator_id
                .clone()
                .unwrap_or_else(|| self.self_user_id.clone());
            self.persist_system_message(
                format!("{}-receipt-mode", event_id),
                &snapshot.id,
                sender,
                timestamp_ms,
                MessageContent::ReceiptModeChanged { enabled: true },
            )?;
        }
        self.bus
            .publish(CoreEvent::ConversationUpserted(snapshot.id.clone()));
        info!(conversation = %snapshot.id, "new conversation persisted");
        Ok(())
    }

    async fn on_member_join(
        &self,
        event_id: &str,
        conversation_id: &ConversationId,
        from: &UserId,
        members: &[MemberSnapshot],
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        let member_ids: Vec<UserId> = members.iter().map(|m| m.user_id.clone()).collect();
        self.users.fetch_users_if_unknown(&member_ids).await?;
        let conversation = self.conversations.require(conversation_id)?;
        self.conversations.merge_members(
            conversation_id,
            members
                .iter()
                .map(|m| Member {
                    user_id: m.user_id.clone(),
                    role: m.role,
                    clients: Vec::new(),
                })
                .collect(),
        )?;
        // Group-protocol conversations additionally queue the change as a
        // proposal; the next outgoing message commits it.
        if let Some(group_id) = conversation.protocol.group_id() {
            self.group_provider.add_members(group_id, &member_ids).await?;
        }
        self.conversations
            .update_modified_date(conversation_id, now_ms())?;
        self.persist_system_message(
            format!("{}-member-join", event_id),
            conversation_id,
            from.clone(),
            timestamp_ms,
            MessageContent::MemberChange {
                kind: MemberChangeKind::Joined,
                members: member_ids,
            },
        )?;
        Ok(())
    }

    async fn on_member_leave(
        &self,
        event_id: &str,
        conversation_id: &ConversationId,
        from: &UserId,
        user_ids: &[UserId],
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        let conversation = self.conversations.require(conversation_id)?;
        self.conversations.remove_members(conversation_id, user_ids)?;
        if let Some(group_id) = conversation.protocol.group_id() {
            self.group_provider.remove_members(group_id, user_ids).await?;
        }
        self.conversations
            .update_modified_date(conversation_id, now_ms())?;
        self.persist_system_message(
            format!("{}-member-leave", event_id),
            conversation_id,
            from.clone(),
            timestamp_ms,
            MessageContent::MemberChange {
                kind: MemberChangeKind::Left,
                members: user_ids.to_vec(),
            },
        )?;
        Ok(())
    }

    fn on_receipt_mode_update(
        &self,
        event_id: &str,
        conversation_id: &ConversationId,
        from: &UserId,
        receipt_mode: ReceiptMode,
    ) -> Result<(), CoreError> {
        self.conversations
            .update_receipt_mode(conversation_id, receipt_mode)?;
        // The system message records the *new* mode so history shows the
        // change itself.
        self.persist_system_message(
            format!("{}-receipt-mode", event_id),
            conversation_id,
            from.clone(),
            now_ms(),
            MessageContent::ReceiptModeChanged {
                enabled: receipt_mode == ReceiptMode::Enabled,
            },
        )?;
        Ok(())
    }

    async fn on_new_message(&self, event: &NewMessageEvent) -> Result<(), CoreError> {
        let result = self.unpacker.unpack_pairwise_message(event).await?;
        self.apply_unpacked(result)
    }

    async fn on_new_group_message(&self, event: &NewGroupMessageEvent) -> Result<(), CoreError> {
        match self.unpacker.unpack_group_message(event).await? {
            MessageUnpackResult::HandshakeOnly => Ok(()),
            result => self.apply_unpacked(result),
        }
    }

    async fn on_group_welcome(
        &self,
        conversation_id: &ConversationId,
        group_id: &GroupId,
        welcome: &[u8],
    ) -> Result<(), CoreError> {
        let established = self.group_provider.join_from_welcome(welcome).await?;
        if &established != group_id {
            warn!(
                conversation = %conversation_id,
                "welcome established a different group than announced"
            );
        }
        let conversation = self.conversations.require(conversation_id)?;
        let epoch = self.group_provider.epoch(&established).await?;
        let cipher_suite = match &conversation.protocol {
            ProtocolInfo::Mixed { cipher_suite, .. } | ProtocolInfo::Mls { cipher_suite, .. } => {
                *cipher_suite
            }
            ProtocolInfo::Proteus => 1,
        };
        self.conversations.update_protocol(
            conversation_id,
            ProtocolInfo::Mls {
                group_id: established,
                epoch,
                cipher_suite,
            },
        )?;
        Ok(())
    }

    fn apply_unpacked(&self, result: MessageUnpackResult) -> Result<(), CoreError> {
        let application = match result {
            MessageUnpackResult::HandshakeOnly => return Ok(()),
            MessageUnpackResult::Application(application) => application,
        };
        let (message_id, content) = match &application.content {
            ProtoContent::Readable {
                message_id,
                content,
                ..
            } => (message_id.clone(), content.clone()),
            ProtoContent::ExternalInstructions { .. } => {
                return Err(CoreError::Unknown(
                    "unresolved external instructions reached the event handler".to_string(),
                ));
            }
        };
        if content.is_signaling() {
            return self.apply_signaling(&application, content);
        }
        let message = RegularMessage {
            id: message_id,
            conversation_id: application.conversation_id.clone(),
            sender_user_id: application.sender_user_id.clone(),
            sender_client_id: Some(application.sender_client_id.clone()),
            timestamp_ms: application.timestamp_ms,
            status: MessageStatus::Sent,
            edit_status: EditStatus::NotEdited,
            content,
        };
        if self.messages.insert(&message)? {
            self.bus.publish(CoreEvent::MessageReceived(message));
        } else {
            debug!(
                conversation = %application.conversation_id,
                "dropping duplicate message insert"
            );
        }
        Ok(())
    }

    fn apply_signaling(
        &self,
        application: &ApplicationMessage,
        content: MessageContent,
    ) -> Result<(), CoreError> {
        match content {
            MessageContent::Reaction {
                message_id,
                emoji_set,
            } => {
                self.reactions.set_reactions(
                    &application.conversation_id,
                    &message_id,
                    &application.sender_user_id,
                    &emoji_set,
                )?;
                self.bus.publish(CoreEvent::ReactionsUpdated {
                    conversation_id: application.conversation_id.clone(),
                    message_id,
                });
                Ok(())
            }
            MessageContent::LastRead {
                conversation_id,
                time_ms,
            } => {
                // Read markers only count when they come from our own other
                // clients, through the self conversation.
                if application.sender_user_id == self.self_user_id {
                    self.conversations.update_read_date(&conversation_id, time_ms)?;
                }
                Ok(())
            }
            MessageContent::Receipt { kind, message_ids } => {
                let status = match kind {
                    ReceiptKind::Delivered => MessageStatus::Delivered,
                    ReceiptKind::Read => MessageStatus::Read,
                };
                for id in message_ids {
                    if let Err(error) = self.messages.promote_status(
                        &application.conversation_id,
                        &id,
                        status,
                    ) {
                        debug!(message = %id, %error, "receipt for unknown message");
                    }
                }
                Ok(())
            }
            other => Err(CoreError::Unknown(format!(
                "content routed as signaling but not signaling: {:?}",
                other
            ))),
        }
    }

    fn persist_system_message(
        &self,
        id: String,
        conversation_id: &ConversationId,
        sender_user_id: UserId,
        timestamp_ms: u64,
        content: MessageContent,
    ) -> Result<(), CoreError> {
        let message = RegularMessage {
            id,
            conversation_id: conversation_id.clone(),
            sender_user_id,
            sender_client_id: None,
            timestamp_ms,
            status: MessageStatus::Sent,
            edit_status: EditStatus::NotEdited,
            content,
        };
        if self.messages.insert(&message)? {
            self.bus.publish(CoreEvent::MessageReceived(message));
        }
        Ok(())
    }
}
