pub mod downloads;
pub mod formats;
pub mod help;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::platforms::telegram::models::{CallbackQuery, Message, Update};
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Download,
    Formats,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub arg: Option<String>,
}

/// Splits `/name[@bot] arg...`. Anything not starting with `/` is not a
/// command.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, tail) = match rest.split_once(char::is_whitespace) {
        Some((h, t)) => (h, t.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or("").to_lowercase();
    if name.is_empty() {
        return None;
    }

    let command = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "download" | "dl" => Command::Download,
        "formats" => Command::Formats,
        other => Command::Unknown(other.to_string()),
    };
    let arg = (!tail.is_empty()).then(|| tail.to_string());
    Some(ParsedCommand { command, arg })
}

/// Long-polls for updates until `cancel` fires. Each update is handled on
/// its own task so a slow format listing never holds up the loop.
pub async fn run_polling(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<()> {
    let poll_timeout = state.settings.telegram.poll_timeout_secs;
    let mut offset: i64 = 0;
    tracing::info!("polling for updates");

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            r = state.api.get_updates(offset, poll_timeout) => r,
        };

        match polled {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_update(&state, update).await {
                            tracing::warn!("update handling failed: {:#}", e);
                        }
                    });
                }
            }
            Err(e) => {
                tracing::warn!("getUpdates failed: {:#}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
            }
        }
    }

    tracing::info!("polling stopped");
    Ok(())
}

async fn handle_update(state: &Arc<AppState>, update: Update) -> anyhow::Result<()> {
    if let Some(query) = update.callback_query {
        return handle_callback(state, query).await;
    }
    if let Some(message) = update.message {
        return handle_message(state, message).await;
    }
    Ok(())
}

async fn handle_message(state: &Arc<AppState>, message: Message) -> anyhow::Result<()> {
    let Some(parsed) = message.text.as_deref().and_then(parse_command) else {
        return Ok(());
    };
    let chat_id = message.chat.id;
    tracing::debug!("chat {}: {:?}", chat_id, parsed.command);

    match parsed.command {
        Command::Start | Command::Help => help::handle_help(state, chat_id).await,
        Command::Download => downloads::handle_download(state, chat_id, parsed.arg.as_deref()).await,
        Command::Formats => formats::handle_formats(state, chat_id, parsed.arg.as_deref()).await,
        Command::Unknown(name) => {
            tracing::debug!("ignoring unknown command /{}", name);
            Ok(())
        }
    }
}

async fn handle_callback(state: &Arc<AppState>, query: CallbackQuery) -> anyhow::Result<()> {
    let data = query.data.as_deref().unwrap_or("");
    let Some(message) = query.message.as_ref() else {
        state.api.answer_callback_query(&query.id, None).await?;
        return Ok(());
    };

    match downloads::parse_callback_data(data) {
        Some((pending_id, request)) => {
            downloads::handle_choice(state, &query.id, message, pending_id, request).await
        }
        None => {
            tracing::debug!("unrecognized callback data {:?}", data);
            state.api.answer_callback_query(&query.id, None).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_arg() {
        let p = parse_command("/download https://youtu.be/abc").unwrap();
        assert_eq!(p.command, Command::Download);
        assert_eq!(p.arg.as_deref(), Some("https://youtu.be/abc"));
    }

    #[test]
    fn strips_bot_suffix() {
        let p = parse_command("/formats@tgfetch_bot  https://x.test/v ").unwrap();
        assert_eq!(p.command, Command::Formats);
        assert_eq!(p.arg.as_deref(), Some("https://x.test/v"));
    }

    #[test]
    fn start_and_help_without_args() {
        assert_eq!(parse_command("/start").unwrap().command, Command::Start);
        let p = parse_command("/HELP").unwrap();
        assert_eq!(p.command, Command::Help);
        assert_eq!(p.arg, None);
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello /download"), None);
        assert_eq!(parse_command("/"), None);
        assert_eq!(
            parse_command("/foo bar").unwrap().command,
            Command::Unknown("foo".into())
        );
    }
}
