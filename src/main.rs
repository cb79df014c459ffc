mod config;
mod controller;
mod database;
mod dispenser;
mod messages;
mod normalize;

use config::Config;
use controller::{Button, Controller, Link, Reply};
use database::Database;
use teloxide::adaptors::throttle::{Limits, Throttle};
use teloxide::dispatching::UpdateHandler;
use teloxide::utils::command::BotCommands;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileMeta, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, ReplyParameters,
};
use teloxide::{DownloadError, RequestError};
use thiserror::Error;

pub type Bot = Throttle<teloxide::Bot>;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "show the welcome message.")]
    Start,
    #[command(description = "show this text.")]
    Help,
    #[command(description = "upload or paste numbers.")]
    Gen,
    #[command(description = "start handing out numbers.")]
    Get,
    #[command(description = "show how many numbers are left.")]
    Count,
}

#[derive(Error, Debug)]
enum FetchError {
    #[error("{0}")]
    Request(#[from] RequestError),
    #[error("{0}")]
    Download(#[from] DownloadError),
}

fn keyboard(buttons: &[Button], link: Option<&Link>) -> InlineKeyboardMarkup {
    let mut markup = InlineKeyboardMarkup::default();
    if !buttons.is_empty() {
        markup = markup.append_row(
            buttons
                .iter()
                .map(|b| InlineKeyboardButton::callback(b.label(), b.callback_data())),
        );
    }
    if let Some(link) = link {
        markup = markup.append_row([InlineKeyboardButton::url(&link.label, link.url.clone())]);
    }
    markup
}

async fn send_reply(bot: &Bot, reply: Reply, reply_to: Option<MessageId>) {
    let chat_id = reply.chat_id;
    let mut request = bot
        .send_message(chat_id, reply.text.into_string())
        .parse_mode(ParseMode::MarkdownV2);

    if !reply.buttons.is_empty() || reply.link.is_some() {
        request = request.reply_markup(keyboard(&reply.buttons, reply.link.as_ref()));
    }

    if let Some(reply_to) = reply_to {
        request = request.reply_parameters(ReplyParameters::new(reply_to));
    }

    if let Err(e) = request.await {
        log::warn!("Couldn't send message to {chat_id}: {e}")
    }
}

/// Sends the replies, quoting `origin` in replies that go to its chat.
async fn respond(
    bot: &Bot,
    chat_id: ChatId,
    origin: Option<MessageId>,
    result: Result<Vec<Reply>, controller::Error>,
) {
    let replies = match result {
        Ok(replies) => replies,
        Err(e) => {
            log::error!("{e}");
            vec![Reply::new(chat_id, messages::internal_error())]
        }
    };

    for reply in replies {
        let reply_to = origin.filter(|_| reply.chat_id == chat_id);
        send_reply(bot, reply, reply_to).await;
    }
}

async fn download(bot: Bot, file: FileMeta) -> Result<Vec<u8>, FetchError> {
    let file = bot.get_file(file.id).await?;
    let mut content = Vec::new();
    bot.inner().download_file(&file.path, &mut content).await?;
    Ok(content)
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    controller: Controller,
) -> ResponseResult<()> {
    log::info!("{:?}", cmd);
    let chat_id = msg.chat.id;
    let Some(user_id) = msg.from.as_ref().map(|user| user.id) else {
        return Ok(());
    };

    let result = match cmd {
        Command::Start => Ok(vec![controller.welcome(chat_id)]),
        Command::Help => Ok(vec![Reply::new(chat_id, messages::help())]),
        Command::Gen => controller.begin_ingestion(user_id, chat_id).await.map(|r| vec![r]),
        Command::Get => controller.begin_dispensing(user_id, chat_id).await.map(|r| vec![r]),
        Command::Count => controller.count(chat_id).await.map(|r| vec![r]),
    };

    respond(&bot, chat_id, Some(msg.id), result).await;
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, controller: Controller) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let Some(user_id) = msg.from.as_ref().map(|user| user.id) else {
        return Ok(());
    };

    let result = if let Some(document) = msg.document() {
        log::debug!("{user_id} sent a file to {chat_id}");
        let fetch = download(bot.clone(), document.file.clone());
        controller
            .handle_file(user_id, chat_id, document.file.size, fetch)
            .await
    } else if let Some(text) = msg.text() {
        controller.handle_text(user_id, chat_id, text).await
    } else {
        return Ok(());
    };

    respond(&bot, chat_id, Some(msg.id), result).await;
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, controller: Controller) -> ResponseResult<()> {
    let user_id = q.from.id;
    let Some(message) = q.message.as_ref() else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let chat_id = message.chat().id;

    let result = match q.data.as_deref().and_then(Button::from_callback_data) {
        Some(Button::Get) => {
            bot.answer_callback_query(q.id.clone()).await?;
            controller.begin_dispensing(user_id, chat_id).await.map(|r| vec![r])
        }
        Some(Button::Next) => {
            bot.answer_callback_query(q.id.clone()).await?;
            controller.next(user_id).await
        }
        Some(Button::Stop) => {
            bot.answer_callback_query(q.id.clone())
                .text("Stopped.")
                .await?;
            if let Err(e) = bot.edit_message_reply_markup(chat_id, message.id()).await {
                log::debug!("Couldn't remove buttons in {chat_id}: {e}");
            }
            controller.stop(user_id, chat_id).await.map(|r| vec![r])
        }
        None => {
            bot.answer_callback_query(q.id.clone())
                .text("Unknown action.")
                .await?;
            return Ok(());
        }
    };

    respond(&bot, chat_id, None, result).await;
    Ok(())
}

fn schema() -> UpdateHandler<RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();
    log::info!("Starting bot...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let database =
        match Database::new(&config.database_url, config.database_name.as_deref()).await {
            Ok(database) => database,
            Err(e) => {
                log::error!("Cannot open database: {e}");
                std::process::exit(1);
            }
        };

    log::info!("Ingest policy: {:?}", config.ingest_policy);
    let mut controller = Controller::new(database, config.ingest_policy);
    if let Some((label, url)) = config.owner {
        controller = controller.with_owner(Link { label, url });
    }
    let bot = teloxide::Bot::new(config.bot_token).throttle(Limits::default());

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Couldn't register command list: {e}");
    }

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![controller])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}
