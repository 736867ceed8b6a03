use crate::error::{CoreError, StorageFailure};
use crate::ids::{ClientId, ConversationId, GroupId, UserId};
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationType {
    SelfConversation,
    OneOnOne,
    Group,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    InviteOnly,
    Code,
    Link,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessRole {
    TeamMember,
    NonTeamMember,
    Guest,
    Service,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutedStatus {
    AllAllowed,
    OnlyMentionsAllowed,
    AllMuted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptMode {
    Enabled,
    Disabled,
}

/// Which messaging protocol the conversation currently runs.
///
/// Migration is one-way: `Proteus` -> `Mixed` -> `Mls`. A conversation never
/// moves back, and the repository rejects regressing updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolInfo {
    Proteus,
    Mixed {
        group_id: GroupId,
        epoch: u64,
        cipher_suite: u16,
    },
    Mls {
        group_id: GroupId,
        epoch: u64,
        cipher_suite: u16,
    },
}

impl ProtocolInfo {
    fn migration_rank(&self) -> u8 {
        match self {
            ProtocolInfo::Proteus => 0,
            ProtocolInfo::Mixed { .. } => 1,
            ProtocolInfo::Mls { .. } => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolInfo::Proteus => "proteus",
            ProtocolInfo::Mixed { .. } => "mixed",
            ProtocolInfo::Mls { .. } => "mls",
        }
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            ProtocolInfo::Proteus => None,
            ProtocolInfo::Mixed { group_id, .. } | ProtocolInfo::Mls { group_id, .. } => {
                Some(group_id)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    pub conversation_type: ConversationType,
    pub team_id: Option<String>,
    pub muted_status: MutedStatus,
    pub protocol: ProtocolInfo,
    pub access: Vec<Access>,
    pub access_roles: Vec<AccessRole>,
    pub receipt_mode: ReceiptMode,
    pub creator_id: Option<UserId>,
    pub last_read_ms: u64,
    pub last_modified_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Admin,
    Member,
}

/// Membership plus the member's known clients, as needed to address
/// pairwise-encrypted payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub role: MemberRole,
    pub clients: Vec<ClientId>,
}

/// Addressing view of a member used by the sender pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: UserId,
    pub clients: Vec<ClientId>,
}

/// Backend representation of a conversation, as delivered by slow sync pages
/// and `NewConversation` events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub name: Option<String>,
    pub conversation_type: ConversationType,
    pub team_id: Option<String>,
    pub protocol: ProtocolInfo,
    pub access: Vec<Access>,
    pub access_roles: Vec<AccessRole>,
    pub receipt_mode: ReceiptMode,
    pub creator_id: Option<UserId>,
    pub members: Vec<MemberSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub role: MemberRole,
}

#[derive(Clone)]
pub struct ConversationRepository {
    store: Arc<dyn StateStore>,
}

impl ConversationRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Upserts a backend snapshot. Local-only fields (read date, modified
    /// date) survive a re-sync, and protocol info never regresses.
    /// Returns whether the conversation was newly inserted.
    pub fn persist_snapshot(&self, snapshot: &ConversationSnapshot) -> Result<bool, CoreError> {
        let existing = self.get(&snapshot.id)?;
        let newly_inserted = existing.is_none();
        let (last_read_ms, last_modified_ms, protocol) = match &existing {
            Some(current) => {
                let protocol =
                    if snapshot.protocol.migration_rank() < current.protocol.migration_rank() {
                        warn!(
                            conversation = %snapshot.id,
                            stored = current.protocol.name(),
                            incoming = snapshot.protocol.name(),
                            "ignoring protocol regression in conversation snapshot"
                        );
                        current.protocol.clone()
                    } else {
                        snapshot.protocol.clone()
                    };
                (current.last_read_ms, current.last_modified_ms, protocol)
            }
            None => (0, 0, snapshot.protocol.clone()),
        };
        let conversation = Conversation {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            conversation_type: snapshot.conversation_type,
            team_id: snapshot.team_id.clone(),
            muted_status: existing
                .map(|c| c.muted_status)
                .unwrap_or(MutedStatus::AllAllowed),
            protocol,
            access: snapshot.access.clone(),
            access_roles: snapshot.access_roles.clone(),
            receipt_mode: snapshot.receipt_mode,
            creator_id: snapshot.creator_id.clone(),
            last_read_ms,
            last_modified_ms,
        };
        self.write(&conversation)?;
        let members = snapshot
            .members
            .iter()
            .map(|m| Member {
                user_id: m.user_id.clone(),
                role: m.role,
                clients: Vec::new(),
            })
            .collect::<Vec<_>>();
        self.merge_members(&snapshot.id, members)?;
        Ok(newly_inserted)
    }

    pub fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, CoreError> {
        match self.store.get(&Self::conversation_key(id))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    pub fn require(&self, id: &ConversationId) -> Result<Conversation, CoreError> {
        self.get(id)?.ok_or(StorageFailure::NotFound.into())
    }

    pub fn all(&self) -> Result<Vec<Conversation>, CoreError> {
        let mut out = Vec::new();
        for key in self.store.keys_with_prefix("conv:")? {
            if let Some(bytes) = self.store.get(&key)? {
                let conversation: Conversation = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
                out.push(conversation);
            }
        }
        Ok(out)
    }

    pub fn self_conversation_ids(&self) -> Result<Vec<ConversationId>, CoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|c| c.conversation_type == ConversationType::SelfConversation)
            .map(|c| c.id)
            .collect())
    }

    pub fn update_modified_date(&self, id: &ConversationId, at_ms: u64) -> Result<(), CoreError> {
        let mut conversation = self.require(id)?;
        conversation.last_modified_ms = at_ms;
        self.write(&conversation)
    }

    /// Advances the read marker; an older timestamp is a no-op so concurrent
    /// clients cannot move it backwards.
    pub fn update_read_date(&self, id: &ConversationId, at_ms: u64) -> Result<(), CoreError> {
        let mut conversation = self.require(id)?;
        if at_ms <= conversation.last_read_ms {
            return Ok(());
        }
        conversation.last_read_ms = at_ms;
        self.write(&conversation)
    }

    pub fn update_receipt_mode(
        &self,
        id: &ConversationId,
        receipt_mode: ReceiptMode,
    ) -> Result<(), CoreError> {
        let mut conversation = self.require(id)?;
        conversation.receipt_mode = receipt_mode;
        self.write(&conversation)
    }

    /// Applies a protocol transition, ignoring regressions.
    pub fn update_protocol(
        &self,
        id: &ConversationId,
        protocol: ProtocolInfo,
    ) -> Result<bool, CoreError> {
        let mut conversation = self.require(id)?;
        if protocol.migration_rank() < conversation.protocol.migration_rank() {
            warn!(
                conversation = %id,
                stored = conversation.protocol.name(),
                incoming = protocol.name(),
                "refusing protocol regression"
            );
            return Ok(false);
        }
        conversation.protocol = protocol;
        self.write(&conversation)?;
        Ok(true)
    }

    pub fn members(&self, id: &ConversationId) -> Result<Vec<Member>, CoreError> {
        match self.store.get(&Self::members_key(id))? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageFailure::Underlying(e.to_string()).into()),
        }
    }

    /// Adds members, keeping the known clients of the ones already present.
    pub fn merge_members(
        &self,
        id: &ConversationId,
        incoming: Vec<Member>,
    ) -> Result<(), CoreError> {
        let mut members = self.members(id)?;
        for member in incoming {
            match members.iter_mut().find(|m| m.user_id == member.user_id) {
                Some(existing) => existing.role = member.role,
                None => members.push(member),
            }
        }
        self.write_members(id, &members)
    }

    pub fn remove_members(
        &self,
        id: &ConversationId,
        user_ids: &[UserId],
    ) -> Result<(), CoreError> {
        let mut members = self.members(id)?;
        members.retain(|m| !user_ids.contains(&m.user_id));
        self.write_members(id, &members)
    }

    pub fn set_member_clients(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        clients: Vec<ClientId>,
    ) -> Result<(), CoreError> {
        let mut members = self.members(id)?;
        if let Some(member) = members.iter_mut().find(|m| &m.user_id == user_id) {
            member.clients = clients;
            self.write_members(id, &members)?;
        }
        Ok(())
    }

    pub fn recipients(&self, id: &ConversationId) -> Result<Vec<Recipient>, CoreError> {
        Ok(self
            .members(id)?
            .into_iter()
            .map(|m| Recipient {
                user_id: m.user_id,
                clients: m.clients,
            })
            .collect())
    }

    fn write(&self, conversation: &Conversation) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(conversation)
            .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store.put(&Self::conversation_key(&conversation.id), &bytes)
    }

    fn write_members(&self, id: &ConversationId, members: &[Member]) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(members)
            .map_err(|e| StorageFailure::Underlying(e.to_string()))?;
        self.store.put(&Self::members_key(id), &bytes)
    }

    fn conversation_key(id: &ConversationId) -> String {
        format!("conv:{}", id)
    }

    fn members_key(id: &ConversationId) -> String {
        format!("members:{}", id)
    }
}
