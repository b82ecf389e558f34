//! Persist-then-broadcast path shared by the gateway and the HTTP surface.

use std::sync::Arc;

use studyhall_core::{
    ChatMessage, GroupError, GroupId, GroupResult, Membership, MessageId, ServerFrame, UserId, Viewer,
};
use studyhall_groups::GroupService;

use crate::broker::ConnectionId;
use crate::hub::RoomHub;

/// Chat delivery for one deployment.
///
/// A message is broadcast only after its write returned, so history read
/// right after receiving it always contains it. A failed write broadcasts
/// nothing.
pub struct Messenger {
    groups: Arc<GroupService>,
    hub: RoomHub,
}

impl Messenger {
    pub fn new(groups: Arc<GroupService>, hub: RoomHub) -> Self {
        Self { groups, hub }
    }

    pub fn groups(&self) -> &Arc<GroupService> {
        &self.groups
    }

    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }

    /// Store a chat message and deliver it to the whole room, sender included.
    pub async fn send_chat(
        &self,
        room: GroupId,
        viewer: &Viewer,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> GroupResult<ChatMessage> {
        let message = self.groups.post_message(room, viewer, body, reply_to)?;
        let delivered = self
            .hub
            .publish(room, None, &ServerFrame::Chat(message.clone()))
            .await;
        log::trace!("Message {} delivered to {delivered} receivers", message.id);
        Ok(message)
    }

    /// Soft-delete and tell the room. Repeated deletes stay quiet.
    pub async fn delete_message(
        &self,
        room: GroupId,
        id: MessageId,
        viewer: &Viewer,
    ) -> GroupResult<bool> {
        let deleted = self.groups.delete_message(room, id, viewer)?;
        if deleted {
            self.hub
                .publish(room, None, &ServerFrame::MessageDeleted { id })
                .await;
        }
        Ok(deleted)
    }

    /// Broadcast a typing indicator to everyone but its origin connection.
    ///
    /// Only members may type; anyone else gets `Forbidden` and nothing is
    /// sent.
    pub async fn typing(
        &self,
        room: GroupId,
        origin: ConnectionId,
        viewer: &Viewer,
        is_typing: bool,
    ) -> GroupResult<()> {
        if !self.groups.is_member(room, viewer.id)? {
            return Err(GroupError::Forbidden);
        }
        let frame = ServerFrame::Typing {
            user: viewer.as_member(),
            is_typing,
        };
        self.hub.publish(room, Some(origin), &frame).await;
        Ok(())
    }

    /// Leave a group and close the caller's open room connections.
    pub async fn leave(&self, room: GroupId, viewer: &Viewer) -> GroupResult<Membership> {
        let removed = self.groups.leave(room, viewer).await?;
        self.hub.evict(room, viewer.id).await;
        Ok(removed)
    }

    /// Remove `target` and close their open room connections.
    pub async fn remove_member(
        &self,
        room: GroupId,
        target: UserId,
        viewer: &Viewer,
    ) -> GroupResult<Membership> {
        let removed = self.groups.remove_member(room, target, viewer).await?;
        self.hub.evict(room, target).await;
        Ok(removed)
    }
}
