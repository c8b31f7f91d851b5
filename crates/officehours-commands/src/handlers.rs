//! Built-in commands, buttons and form submissions.

use std::sync::Arc;

use officehours_core::config::roles;
use officehours_core::{AutoClearPolicy, Helper, QueueError, Server};
use tracing::info;

use crate::errors::CommandError;
use crate::request::{InteractionKind, Reply};
use crate::route::{CommandHandler, HandlerContext, HandlerSet, Route};

/// Role groups attached to built-in routes.
pub mod access {
    use super::roles;

    pub const ADMIN: &[&str] = &[roles::BOT_ADMIN];
    pub const HELPER: &[&str] = &[roles::BOT_ADMIN, roles::STAFF];
    pub const MEMBER: &[&str] = &[roles::VERIFIED];
}

/// Form shown when `set_after_session_msg` has no message option.
pub const AFTER_SESSION_MESSAGE_FORM: &str = "after_session_message_modal";
/// Form shown when `set_queue_auto_clear` has no hours option.
pub const AUTO_CLEAR_FORM: &str = "queue_auto_clear_modal";

/// Every built-in route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinCommand {
    QueueAdd,
    QueueRemove,
    Start,
    Stop,
    Enqueue,
    Next,
    Leave,
    Clear,
    ClearAll,
    Notify,
    Unnotify,
    Announce,
    ListHelpers,
    Position,
    SetAfterSessionMessage,
    SetQueueAutoClear,
    SetLoggingChannel,
    StopLogging,
    JoinButton,
    LeaveButton,
    NotifyButton,
    UnnotifyButton,
    AfterSessionMessageForm,
    AutoClearForm,
}

impl BuiltinCommand {
    pub const ALL: [BuiltinCommand; 24] = [
        BuiltinCommand::QueueAdd,
        BuiltinCommand::QueueRemove,
        BuiltinCommand::Start,
        BuiltinCommand::Stop,
        BuiltinCommand::Enqueue,
        BuiltinCommand::Next,
        BuiltinCommand::Leave,
        BuiltinCommand::Clear,
        BuiltinCommand::ClearAll,
        BuiltinCommand::Notify,
        BuiltinCommand::Unnotify,
        BuiltinCommand::Announce,
        BuiltinCommand::ListHelpers,
        BuiltinCommand::Position,
        BuiltinCommand::SetAfterSessionMessage,
        BuiltinCommand::SetQueueAutoClear,
        BuiltinCommand::SetLoggingChannel,
        BuiltinCommand::StopLogging,
        BuiltinCommand::JoinButton,
        BuiltinCommand::LeaveButton,
        BuiltinCommand::NotifyButton,
        BuiltinCommand::UnnotifyButton,
        BuiltinCommand::AfterSessionMessageForm,
        BuiltinCommand::AutoClearForm,
    ];

    /// Interaction id the route is registered under.
    pub fn id(&self) -> &'static str {
        match self {
            BuiltinCommand::QueueAdd => "queue_add",
            BuiltinCommand::QueueRemove => "queue_remove",
            BuiltinCommand::Start => "start",
            BuiltinCommand::Stop => "stop",
            BuiltinCommand::Enqueue => "enqueue",
            BuiltinCommand::Next => "next",
            BuiltinCommand::Leave => "leave",
            BuiltinCommand::Clear => "clear",
            BuiltinCommand::ClearAll => "clear_all",
            BuiltinCommand::Notify => "notify",
            BuiltinCommand::Unnotify => "unnotify",
            BuiltinCommand::Announce => "announce",
            BuiltinCommand::ListHelpers => "list_helpers",
            BuiltinCommand::Position => "position",
            BuiltinCommand::SetAfterSessionMessage => "set_after_session_msg",
            BuiltinCommand::SetQueueAutoClear => "set_queue_auto_clear",
            BuiltinCommand::SetLoggingChannel => "set_logging_channel",
            BuiltinCommand::StopLogging => "stop_logging",
            BuiltinCommand::JoinButton => "join",
            BuiltinCommand::LeaveButton => "leave",
            BuiltinCommand::NotifyButton => "notif",
            BuiltinCommand::UnnotifyButton => "removeN",
            BuiltinCommand::AfterSessionMessageForm => AFTER_SESSION_MESSAGE_FORM,
            BuiltinCommand::AutoClearForm => AUTO_CLEAR_FORM,
        }
    }

    pub fn kind(&self) -> InteractionKind {
        match self {
            BuiltinCommand::JoinButton
            | BuiltinCommand::LeaveButton
            | BuiltinCommand::NotifyButton
            | BuiltinCommand::UnnotifyButton => InteractionKind::Button,
            BuiltinCommand::AfterSessionMessageForm | BuiltinCommand::AutoClearForm => {
                InteractionKind::Modal
            }
            _ => InteractionKind::Command,
        }
    }

    pub fn required_roles(&self) -> &'static [&'static str] {
        match self {
            BuiltinCommand::QueueAdd
            | BuiltinCommand::QueueRemove
            | BuiltinCommand::ClearAll
            | BuiltinCommand::SetAfterSessionMessage
            | BuiltinCommand::SetQueueAutoClear
            | BuiltinCommand::SetLoggingChannel
            | BuiltinCommand::StopLogging
            | BuiltinCommand::AfterSessionMessageForm
            | BuiltinCommand::AutoClearForm => access::ADMIN,
            BuiltinCommand::Start
            | BuiltinCommand::Stop
            | BuiltinCommand::Next
            | BuiltinCommand::Clear
            | BuiltinCommand::Announce => access::HELPER,
            BuiltinCommand::Enqueue
            | BuiltinCommand::Leave
            | BuiltinCommand::Notify
            | BuiltinCommand::Unnotify
            | BuiltinCommand::ListHelpers
            | BuiltinCommand::Position
            | BuiltinCommand::JoinButton
            | BuiltinCommand::LeaveButton
            | BuiltinCommand::NotifyButton
            | BuiltinCommand::UnnotifyButton => access::MEMBER,
        }
    }

    /// Routes that may answer with a form instead of a message.
    pub fn skips_placeholder(&self) -> bool {
        matches!(
            self,
            BuiltinCommand::SetAfterSessionMessage | BuiltinCommand::SetQueueAutoClear
        )
    }
}

/// The base handler tables: every built-in route, and an empty menu table.
pub fn builtin_handlers() -> HandlerSet {
    let mut set = HandlerSet::default();
    for command in BuiltinCommand::ALL {
        let route = Route::new(command.id(), command.required_roles(), Arc::new(command));
        let table = match command.kind() {
            InteractionKind::Command => &mut set.commands,
            InteractionKind::Button => &mut set.buttons,
            InteractionKind::Menu => &mut set.menus,
            InteractionKind::Modal => &mut set.modals,
        };
        let mut updated = std::mem::take(table).with_route(route);
        if command.skips_placeholder() {
            updated = updated.skipping_placeholder(command.id());
        }
        *table = updated;
    }
    set
}

#[async_trait::async_trait]
impl CommandHandler for BuiltinCommand {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<Option<String>, CommandError> {
        let server = ctx.server.as_ref();
        let requester = &ctx.requester.id;
        let request = ctx.request;

        let message = match self {
            BuiltinCommand::QueueAdd => {
                let name = request.require_option("name")?;
                server.create_queue(name).await?;
                format!("Successfully created `{}`.", name)
            }
            BuiltinCommand::QueueRemove => {
                let name = request.require_option("name")?;
                if request.channel_queue.as_deref() == Some(name) {
                    return Err(CommandError::parse(format!(
                        "Please use `queue_remove` outside of the `{}` channel.",
                        name
                    )));
                }
                server.delete_queue(name)?;
                format!("Successfully deleted `{}`.", name)
            }
            BuiltinCommand::Start => {
                let notify = !request.flag("mute_notif", false)?;
                let opened = server.open_all_sessions(requester, notify).await?;
                if opened.is_empty() {
                    "You are already helping all of your queues.".to_string()
                } else {
                    format!("You started helping! Now open: {}.", quote_all(&opened))
                }
            }
            BuiltinCommand::Stop => {
                let closed = server.close_all_sessions(requester).await?;
                format!(
                    "You helped for {} minutes. See you later!",
                    longest_session_minutes(&closed)
                )
            }
            BuiltinCommand::Enqueue | BuiltinCommand::JoinButton => {
                let queue = request.target_queue()?;
                server.enqueue(queue, requester).await?;
                format!("Successfully joined `{}`.", queue)
            }
            BuiltinCommand::Leave | BuiltinCommand::LeaveButton => {
                let queue = request.target_queue()?;
                server.leave(queue, requester).await?;
                format!("You have successfully left `{}`.", queue)
            }
            BuiltinCommand::Next => {
                let helpee = server.dequeue(request.option("queue"), requester).await?;
                format!(
                    "Next up: {}. They waited since {}.",
                    helpee.member.display_name,
                    helpee.wait_start.format("%H:%M UTC")
                )
            }
            BuiltinCommand::Clear => {
                let queue = request.target_queue()?;
                if !ctx.requester.has_any_role(&[roles::BOT_ADMIN, queue]) {
                    return Err(CommandError::Authorization {
                        command: self.id().to_string(),
                        required: vec![roles::BOT_ADMIN.to_string(), queue.to_string()],
                    });
                }
                let removed = server.queue(queue)?.clear().await;
                format!("Cleared {} member(s) from `{}`.", removed.len(), queue)
            }
            BuiltinCommand::ClearAll => {
                let mut total = 0;
                let queues = server.queues();
                for queue in &queues {
                    total += queue.clear().await.len();
                }
                format!("Cleared {} member(s) from {} queue(s).", total, queues.len())
            }
            BuiltinCommand::Notify | BuiltinCommand::NotifyButton => {
                let queue = request.target_queue()?;
                server.queue(queue)?.subscribe(requester.clone()).await?;
                format!("You will be notified when `{}` opens.", queue)
            }
            BuiltinCommand::Unnotify | BuiltinCommand::UnnotifyButton => {
                let queue = request.target_queue()?;
                server.queue(queue)?.unsubscribe(requester).await?;
                format!("You will no longer be notified about `{}`.", queue)
            }
            BuiltinCommand::Announce => {
                let message = request.require_option("message")?;
                let report = server.announce(requester, message).await?;
                format!(
                    "Announcement sent to {} member(s) ({} failed).",
                    report.delivered, report.failed
                )
            }
            BuiltinCommand::ListHelpers => list_helpers(server).await,
            BuiltinCommand::Position => {
                let queue = request.target_queue()?;
                match server.queue(queue)?.position_of(requester).await {
                    Some(position) => format!("You are number {} in `{}`.", position, queue),
                    None => {
                        return Err(QueueError::NotInQueue {
                            queue: queue.to_string(),
                        }
                        .into());
                    }
                }
            }
            BuiltinCommand::SetAfterSessionMessage => {
                let Some(message) = request.option("message") else {
                    reply(ctx, Reply::Form(AFTER_SESSION_MESSAGE_FORM.to_string())).await?;
                    return Ok(None);
                };
                set_after_session_message(server, message)
            }
            BuiltinCommand::AfterSessionMessageForm => {
                set_after_session_message(server, request.option("message").unwrap_or_default())
            }
            BuiltinCommand::SetQueueAutoClear => {
                let enable = request.flag("enable", true)?;
                if enable && request.option("hours").is_none() {
                    reply(ctx, Reply::Form(AUTO_CLEAR_FORM.to_string())).await?;
                    return Ok(None);
                }
                set_auto_clear(ctx, enable).await?
            }
            BuiltinCommand::AutoClearForm => {
                let enable = request.flag("enable", true)?;
                set_auto_clear(ctx, enable).await?
            }
            BuiltinCommand::SetLoggingChannel => {
                let channel = request.require_option("channel")?;
                server.set_log_target(Some(channel.to_string()));
                format!("Logging to `{}`.", channel)
            }
            BuiltinCommand::StopLogging => {
                server.set_log_target(None);
                "Logging stopped.".to_string()
            }
        };

        info!(
            server = %server.name(),
            command = self.id(),
            requester = %requester,
            "Command completed"
        );
        Ok(Some(message))
    }
}

async fn reply(ctx: &HandlerContext<'_>, reply: Reply) -> Result<(), CommandError> {
    ctx.responder
        .reply(reply)
        .await
        .map_err(|e| CommandError::Internal(e.to_string()))
}

fn set_after_session_message(server: &Server, message: &str) -> String {
    server.set_after_session_message(Some(message.to_string()));
    match server.settings().after_session_message {
        Some(_) => "After-session message updated.".to_string(),
        None => "After-session message cleared.".to_string(),
    }
}

async fn set_auto_clear(ctx: &HandlerContext<'_>, enable: bool) -> Result<String, CommandError> {
    let policy = if enable {
        let hours = ctx.request.require_option("hours")?;
        let hours: u32 = hours
            .trim()
            .parse()
            .map_err(|_| CommandError::parse("`hours` must be a whole number of hours."))?;
        AutoClearPolicy::AfterHours(hours)
    } else {
        AutoClearPolicy::Disabled
    };
    ctx.server.set_auto_clear(policy).await;
    Ok(format!("Queue auto-clear is now {}.", policy))
}

async fn list_helpers(server: &Server) -> String {
    let active = server.active_helpers().await;
    if active.is_empty() {
        return "No one is helping right now.".to_string();
    }
    let lines: Vec<String> = active
        .iter()
        .map(|helper| {
            format!(
                "{}: {} (since {})",
                helper.member.display_name,
                quote_all(&helper.queues),
                helper.help_start.format("%H:%M UTC")
            )
        })
        .collect();
    format!("Active helpers:\n{}", lines.join("\n"))
}

fn quote_all(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("`{}`", name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn longest_session_minutes(closed: &[Helper]) -> i64 {
    closed
        .iter()
        .filter_map(Helper::elapsed)
        .map(|elapsed| elapsed.num_minutes())
        .max()
        .unwrap_or(0)
}
