use std::sync::Arc;

use chrono::{DateTime, Utc};
use interfaces::{ChatId, ChatPlatform, MessageId, Store, TrackedMessage};
use tracing::{debug, info, instrument, warn};

use crate::context::SyncContext;
use crate::types::Result;

/// What a single lifecycle step did to a chat's digest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new message was sent, replacing `evicted` when there was one.
    Sent {
        message_id: MessageId,
        pinned: bool,
        evicted: Option<MessageId>,
    },
    Edited { message_id: MessageId },
    /// The platform reported identical content.
    Unchanged { message_id: MessageId },
}

impl Transition {
    pub fn message_id(&self) -> MessageId {
        match *self {
            Transition::Sent { message_id, .. }
            | Transition::Edited { message_id }
            | Transition::Unchanged { message_id } => message_id,
        }
    }
}

/// Keeps one active digest message per chat: edits it while it is fresh,
/// replaces it once it is stale or can no longer be edited.
pub struct ChatMessageLifecycle {
    store: Arc<dyn Store>,
    platform: Arc<dyn ChatPlatform>,
}

impl ChatMessageLifecycle {
    pub fn new(store: Arc<dyn Store>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { store, platform }
    }

    /// Brings the chat's active message to `text`, based on the latest
    /// tracked message in the store.
    #[instrument(skip(self, ctx, text))]
    pub async fn apply(&self, ctx: &SyncContext, chat_id: ChatId, text: &str) -> Result<Transition> {
        let latest = ctx.guard(self.store.latest_tracked_message(chat_id)).await??;
        self.transition(ctx, chat_id, text, latest, Utc::now()).await
    }

    pub async fn transition(
        &self,
        ctx: &SyncContext,
        chat_id: ChatId,
        text: &str,
        latest: Option<TrackedMessage>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let Some(active) = latest else {
            return self.send_new(ctx, chat_id, text, None).await;
        };
        let message_id = active.message_id();

        if active.is_stale(now) {
            info!(
                chat_id,
                message_id,
                age_days = active.age(now).num_days(),
                "Evicting stale digest message"
            );
            ctx.guard(self.store.delete_tracked_message(chat_id, message_id)).await??;
            return self.send_new(ctx, chat_id, text, Some(message_id)).await;
        }

        match ctx.guard(self.platform.edit_message(chat_id, message_id, text)).await? {
            Ok(()) => {
                ctx.guard(self.store.touch_tracked_message(chat_id, message_id)).await??;
                debug!(chat_id, message_id, "Edited digest message");
                Ok(Transition::Edited { message_id })
            }
            Err(e) if e.is_not_modified() => {
                ctx.guard(self.store.touch_tracked_message(chat_id, message_id)).await??;
                debug!(chat_id, message_id, "Digest message unchanged");
                Ok(Transition::Unchanged { message_id })
            }
            Err(e) => {
                warn!(chat_id, message_id, "Editing digest message failed, replacing it: {}", e);
                ctx.guard(self.store.delete_tracked_message(chat_id, message_id)).await??;
                self.send_new(ctx, chat_id, text, Some(message_id)).await
            }
        }
    }

    async fn send_new(
        &self,
        ctx: &SyncContext,
        chat_id: ChatId,
        text: &str,
        evicted: Option<MessageId>,
    ) -> Result<Transition> {
        let message_id = ctx.guard(self.platform.send_message(chat_id, text)).await??;

        let pinned = match ctx.guard(self.platform.pin_message(chat_id, message_id)).await? {
            Ok(()) => true,
            Err(e) => {
                warn!(chat_id, message_id, "Pinning digest message failed: {}", e);
                false
            }
        };

        ctx.guard(self.store.add_tracked_message(chat_id, message_id, pinned)).await??;
        info!(chat_id, message_id, pinned, "Sent digest message");

        Ok(Transition::Sent {
            message_id,
            pinned,
            evicted,
        })
    }
}
