//! Message persistence, history reads and soft delete.

use chrono::Utc;

use studyhall_core::{
    ChatMessage, GroupError, GroupId, GroupMessage, GroupResult, MessageId, Permission, ReplyRef,
    Viewer,
};
use studyhall_store::StoreBatch;

use crate::service::GroupService;

/// History page size when the caller gives none (or zero).
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest history page served.
pub const MAX_HISTORY_LIMIT: usize = 200;

pub fn clamp_history_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_HISTORY_LIMIT,
        Some(n) => n.min(MAX_HISTORY_LIMIT),
    }
}

impl GroupService {
    /// Persist a message from a current member.
    ///
    /// Returns once the write is durable; broadcasting is the caller's job.
    pub fn post_message(
        &self,
        group_id: GroupId,
        viewer: &Viewer,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> GroupResult<ChatMessage> {
        let group = self.get_group(group_id)?;
        self.require_member(group.id, viewer.id)?;
        let body = GroupMessage::normalize_body(body)?;

        let parent = match reply_to {
            Some(id) => Some(
                self.store
                    .get_message(group.id, id)?
                    .ok_or(GroupError::NotFound("message"))?,
            ),
            None => None,
        };

        let message = GroupMessage {
            id: self.store.next_message_id(),
            group: group.id,
            sender: viewer.id,
            sender_name: viewer.name.clone(),
            body,
            created_at: Utc::now(),
            reply_to,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
        };
        let mut batch = StoreBatch::new();
        batch.put_message(message.clone());
        self.store.write(batch)?;

        log::debug!(
            "Message {} stored in group {} from user {}",
            message.id,
            group.id,
            viewer.id
        );
        Ok(ChatMessage::from_message(
            &message,
            parent.as_ref().map(GroupMessage::as_reply_ref),
        ))
    }

    /// The latest non-deleted messages, oldest first.
    pub fn history(
        &self,
        group_id: GroupId,
        viewer: &Viewer,
        limit: Option<usize>,
    ) -> GroupResult<Vec<ChatMessage>> {
        let group = self.get_group(group_id)?;
        self.require_member(group.id, viewer.id)?;

        let messages = self
            .store
            .recent_messages(group.id, clamp_history_limit(limit))?;
        messages
            .iter()
            .map(|m| Ok(ChatMessage::from_message(m, self.resolve_reply(m)?)))
            .collect()
    }

    /// One message by id. A deleted message comes back with an empty body.
    pub fn get_message(
        &self,
        group_id: GroupId,
        id: MessageId,
        viewer: &Viewer,
    ) -> GroupResult<GroupMessage> {
        let group = self.get_group(group_id)?;
        self.require_member(group.id, viewer.id)?;

        let mut message = self
            .store
            .get_message(group.id, id)?
            .ok_or(GroupError::NotFound("message"))?;
        if message.deleted {
            message.body.clear();
        }
        Ok(message)
    }

    /// Soft-delete a message. Allowed for its sender and for anyone holding
    /// [`Permission::DeleteMessages`] on the group.
    ///
    /// Returns `false` when the message was already deleted.
    pub fn delete_message(
        &self,
        group_id: GroupId,
        id: MessageId,
        viewer: &Viewer,
    ) -> GroupResult<bool> {
        let group = self.get_group(group_id)?;
        let mut message = self
            .store
            .get_message(group.id, id)?
            .ok_or(GroupError::NotFound("message"))?;

        if message.sender != viewer.id
            && !self.can_manage(&group, viewer, Permission::DeleteMessages)?
        {
            return Err(GroupError::Forbidden);
        }
        if !message.soft_delete(viewer.id) {
            return Ok(false);
        }

        let mut batch = StoreBatch::new();
        batch.put_message(message);
        self.store.write(batch)?;
        log::info!("Message {id} in group {} deleted by {}", group.id, viewer.id);
        Ok(true)
    }

    fn resolve_reply(&self, message: &GroupMessage) -> GroupResult<Option<ReplyRef>> {
        let Some(parent) = message.reply_to else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_message(message.group, parent)?
            .map(|p| p.as_reply_ref()))
    }
}
