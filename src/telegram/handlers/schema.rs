//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::callbacks::handle_callback;
use super::commands::{handle_cancel, handle_check, handle_id, handle_start, handle_upgrade};
use super::documents::{handle_document, handle_options_reply};
use super::types::{report_failure, HandlerDeps, HandlerError};
use crate::core::error::AppResult;
use crate::telegram::bot::{is_private_chat, Command};
use crate::telegram::texts;
use crate::telegram::Bot;

/// Creates the main dispatcher schema for the Telegram bot.
///
/// Every endpoint delegates to a plain async function over [`HandlerDeps`], so
/// tests drive the same code with a recording transport.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_documents = deps.clone();
    let deps_text = deps.clone();
    let deps_callback = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        .branch(document_handler(deps_documents))
        .branch(text_handler(deps_text))
        .branch(callback_handler(deps_callback))
}

fn username(msg: &Message) -> Option<String> {
    msg.from.as_ref().and_then(|u| u.username.clone())
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| is_private_chat(&msg))
        .branch(dptree::entry().filter_command::<Command>().endpoint(
            move |msg: Message, cmd: Command| {
                let deps = deps.clone();
                async move {
                    let chat_id = msg.chat.id.0;
                    let username = username(&msg);
                    log::info!("🎯 Received command: {:?} from chat {}", cmd, chat_id);

                    let result: AppResult<()> = match cmd {
                        Command::Start => handle_start(&deps, chat_id, username.as_deref()).await,
                        Command::Check => handle_check(&deps, chat_id, username.as_deref()).await,
                        Command::Id => handle_id(&deps, chat_id, username.as_deref()).await,
                        Command::Upgrade => handle_upgrade(&deps, chat_id).await,
                        Command::Cancel => handle_cancel(&deps, chat_id).await,
                    };
                    report_failure(&deps, chat_id, &format!("{:?}", cmd), result).await;
                    Ok(())
                }
            },
        ))
}

fn document_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| is_private_chat(&msg) && msg.document().is_some())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let chat_id = msg.chat.id.0;
                let Some(doc) = msg.document() else {
                    return Ok(());
                };
                let filename = doc.file_name.clone().unwrap_or_default();
                let file_id = doc.file.id.0.clone();

                let result = handle_document(&deps, chat_id, username(&msg).as_deref(), &filename, &file_id).await;
                report_failure(&deps, chat_id, "document upload", result).await;
                Ok(())
            }
        })
}

fn text_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| is_private_chat(&msg) && msg.text().is_some())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let chat_id = msg.chat.id.0;
                let text = msg.text().unwrap_or_default();

                let result = match handle_options_reply(&deps, chat_id, text).await {
                    Ok(true) => Ok(()),
                    Ok(false) => deps.transport.send_text(chat_id, texts::CHECK_PROMPT).await,
                    Err(e) => Err(e),
                };
                report_failure(&deps, chat_id, "options reply", result).await;
                Ok(())
            }
        })
}

fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
                log::warn!("Failed to answer callback query: {}", e);
            }

            let Ok(user_id) = i64::try_from(q.from.id.0) else {
                return Ok(());
            };
            let data = q.data.clone().unwrap_or_default();
            log::info!("🔘 Callback {:?} from {}", data, user_id);

            let result = handle_callback(&deps, user_id, &data).await;
            report_failure(&deps, user_id, "callback", result).await;
            Ok(())
        }
    })
}
