use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use interfaces::{CalendarFeedDescriptor, ChatId, ChatPlatform, Store};
use tracing::{debug, error, info, instrument, warn};

use crate::aggregators::Markup;
use crate::config::Config;
use crate::context::SyncContext;
use crate::sync::SyncOrchestrator;
use crate::telegram::{IncomingMessage, TelegramClient};
use crate::types::{KnowseeError, Result};

pub const UNAUTHORIZED_REPLY: &str = "Sorry, this chat is not allowed to use this bot.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Id,
    Attach(Option<String>),
    Detach(Option<String>),
    Calendars,
    Sync,
    Unknown(String),
}

impl Command {
    /// Parses `/name[@bot] [argument]`.
    ///
    /// Returns `None` for plain text and for commands addressed to a
    /// different bot.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Command> {
        let rest = text.trim().strip_prefix('/')?;
        let (head, argument) = match rest.split_once(char::is_whitespace) {
            Some((head, argument)) => (head, argument.trim()),
            None => (rest, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if let (Some(target), Some(me)) = (target, bot_username) {
            if !target.eq_ignore_ascii_case(me) {
                return None;
            }
        }

        let argument = (!argument.is_empty()).then(|| argument.to_string());
        Some(match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "id" => Command::Id,
            "attach" => Command::Attach(argument),
            "detach" => Command::Detach(argument),
            "calendars" => Command::Calendars,
            "sync" => Command::Sync,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// What to do in response to a command.
struct Response {
    reply: Option<String>,
    sync: bool,
}

impl Response {
    fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            sync: false,
        }
    }

    fn and_sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// Routes chat commands; only authorized chats are served.
pub struct CommandBot {
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn Store>,
    orchestrator: Arc<SyncOrchestrator>,
    groups: BTreeMap<String, Vec<CalendarFeedDescriptor>>,
    authorized: HashSet<ChatId>,
    welcome_message: String,
    username: Option<String>,
}

impl CommandBot {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn Store>,
        orchestrator: Arc<SyncOrchestrator>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            platform,
            store,
            orchestrator,
            groups: config.calendar_groups.clone(),
            authorized: config.telegram.authorized_chats()?.into_iter().collect(),
            welcome_message: config.telegram.welcome_message().to_string(),
            username: None,
        })
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn is_authorized(&self, chat_id: ChatId) -> bool {
        self.authorized.contains(&chat_id)
    }

    /// Handles one incoming message and returns the reply that was sent.
    #[instrument(skip(self, ctx, text))]
    pub async fn handle(&self, ctx: &SyncContext, chat_id: ChatId, text: &str) -> Result<Option<String>> {
        let Some(command) = Command::parse(text, self.username.as_deref()) else {
            return Ok(None);
        };
        debug!(?command, "Received command");

        let response = if !self.is_authorized(chat_id) {
            warn!(chat_id, ?command, "Command from unauthorized chat");
            Response::text(UNAUTHORIZED_REPLY)
        } else {
            self.respond(ctx, chat_id, command).await?
        };

        if let Some(reply) = &response.reply {
            ctx.guard(self.platform.send_message(chat_id, reply)).await??;
        }

        if response.sync {
            match self.orchestrator.sync_chat(ctx, chat_id).await {
                Ok(_) => {}
                Err(KnowseeError::Cancelled) => return Err(KnowseeError::Cancelled),
                Err(e) => error!(chat_id, "Command-triggered sync failed: {}", e),
            }
        }

        Ok(response.reply)
    }

    async fn respond(&self, ctx: &SyncContext, chat_id: ChatId, command: Command) -> Result<Response> {
        let html = Markup::Html;

        Ok(match command {
            Command::Start | Command::Help => Response::text(self.welcome_message.clone()),
            Command::Id => Response::text(format!("Chat id: <code>{chat_id}</code>")),
            Command::Attach(None) => Response::text(format!(
                "Usage: /attach GROUP\nAvailable groups: {}",
                self.group_names()
            )),
            Command::Attach(Some(group)) => return self.attach(ctx, chat_id, &group).await,
            Command::Detach(Some(name)) => {
                if ctx.guard(self.store.remove_calendar(chat_id, &name)).await?? {
                    info!(chat_id, calendar = %name, "Calendar detached");
                    Response::text(format!("Detached {}.", html.bold(&html.escape(&name)))).and_sync()
                } else {
                    Response::text(format!("No calendar named {} is attached.", html.bold(&html.escape(&name))))
                }
            }
            Command::Detach(None) => {
                let removed = ctx.guard(self.store.clear_calendars(chat_id)).await??;
                info!(chat_id, removed, "Calendars cleared");
                Response::text(format!("Detached {removed} calendar(s).")).and_sync()
            }
            Command::Calendars => {
                let calendars = ctx.guard(self.store.calendars_for_chat(chat_id)).await??;
                if calendars.is_empty() {
                    Response::text("No calendars attached. Use /attach GROUP.")
                } else {
                    let lines: Vec<String> = calendars
                        .iter()
                        .map(|c| format!("• {} ({})", html.bold(&html.escape(c.name())), html.escape(c.color())))
                        .collect();
                    Response::text(lines.join("\n"))
                }
            }
            Command::Sync => {
                let calendars = ctx.guard(self.store.calendars_for_chat(chat_id)).await??;
                if calendars.is_empty() {
                    Response::text("No calendars attached. Use /attach GROUP.")
                } else {
                    Response {
                        reply: None,
                        sync: true,
                    }
                }
            }
            Command::Unknown(name) => Response::text(format!(
                "Unknown command /{}. Try /help.",
                html.escape(&name)
            )),
        })
    }

    async fn attach(&self, ctx: &SyncContext, chat_id: ChatId, group: &str) -> Result<Response> {
        let html = Markup::Html;
        let Some(calendars) = self.groups.get(group) else {
            return Ok(Response::text(format!(
                "Unknown calendar group {}. Available groups: {}",
                html.bold(&html.escape(group)),
                self.group_names()
            )));
        };

        ctx.guard(self.store.touch_chat(chat_id)).await??;

        let mut added = 0;
        for calendar in calendars {
            if ctx.guard(self.store.add_calendar(chat_id, calendar)).await?? {
                added += 1;
            } else {
                debug!(chat_id, calendar = calendar.name(), "Calendar already attached");
            }
        }
        info!(chat_id, group, added, "Calendar group attached");

        Ok(Response::text(format!(
            "Attached {} of {} calendar(s) from {}.",
            added,
            calendars.len(),
            html.bold(&html.escape(group))
        ))
        .and_sync())
    }

    fn group_names(&self) -> String {
        if self.groups.is_empty() {
            return "none".to_string();
        }
        self.groups
            .keys()
            .map(|name| Markup::Html.escape(name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Long-polls for messages until `ctx` is cancelled; each message is
    /// handled in its own task.
    pub async fn run(self: Arc<Self>, client: Arc<TelegramClient>, ctx: SyncContext) {
        info!(
            authorized = self.authorized.len(),
            groups = self.groups.len(),
            "Command polling started"
        );

        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut offset: Option<i64> = None;

        loop {
            let polled = tokio::select! {
                _ = ctx.token().cancelled() => break,
                polled = client.get_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let Some(IncomingMessage { chat, text: Some(text), .. }) = update.message else {
                            continue;
                        };

                        let bot = Arc::clone(&self);
                        let task_ctx = ctx.clone();
                        ctx.spawn(async move {
                            match bot.handle(&task_ctx, chat.id, &text).await {
                                Ok(_) | Err(KnowseeError::Cancelled) => {}
                                Err(e) => error!(chat_id = chat.id, "Handling command failed: {}", e),
                            }
                        });
                    }
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    warn!("Polling for updates failed, retrying in {:?}: {}", delay, e);
                    tokio::select! {
                        _ = ctx.token().cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Command polling stopped");
    }
}
