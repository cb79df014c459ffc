use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;

use teloxide::types::{ChatId, UserId};
use thiserror::Error;
use url::Url;

use crate::config::IngestPolicy;
use crate::database::{self, Database, Flow, Session};
use crate::dispenser::dispense_one;
use crate::messages::{self, MarkdownString};
use crate::normalize::extract_candidate_lines;

/// Uploads above this size are rejected without downloading them.
pub const MAX_FILE_SIZE: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] database::Error),
}

/// Inline buttons the bot attaches to its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Get,
    Next,
    Stop,
}

impl Button {
    pub fn label(self) -> &'static str {
        match self {
            Button::Get => "▶️ Get",
            Button::Next => "➡️ Next",
            Button::Stop => "⛔ Stop",
        }
    }

    pub fn callback_data(self) -> &'static str {
        match self {
            Button::Get => "start_get",
            Button::Next => "next_number",
            Button::Stop => "stop_giving",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        [Button::Get, Button::Next, Button::Stop]
            .into_iter()
            .find(|button| button.callback_data() == data)
    }
}

/// A button that opens a URL instead of calling back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub label: String,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: ChatId,
    pub text: MarkdownString,
    pub buttons: Vec<Button>,
    pub link: Option<Link>,
}

impl Reply {
    pub fn new(chat_id: ChatId, text: MarkdownString) -> Self {
        Self {
            chat_id,
            text,
            buttons: Vec::new(),
            link: None,
        }
    }

    fn with_buttons(mut self, buttons: &[Button]) -> Self {
        self.buttons.extend_from_slice(buttons);
        self
    }
}

/// Where numbers being ingested come from.
pub enum IngestSource {
    Text(String),
    File(Vec<u8>),
}

impl IngestSource {
    fn text(&self) -> Cow<'_, str> {
        match self {
            IngestSource::Text(text) => Cow::Borrowed(text),
            // invalid bytes are dropped rather than replaced
            IngestSource::File(bytes) => match String::from_utf8_lossy(bytes) {
                Cow::Owned(text) => Cow::Owned(
                    text.chars()
                        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
                        .collect(),
                ),
                valid => valid,
            },
        }
    }

    fn nothing_found(&self) -> MarkdownString {
        match self {
            IngestSource::Text(_) => messages::no_numbers_in_message(),
            IngestSource::File(_) => messages::no_numbers_in_file(),
        }
    }
}

/// Drives the conversation: decides from the user's session what an incoming
/// message means and returns the replies to send.
#[derive(Clone)]
pub struct Controller {
    database: Database,
    policy: IngestPolicy,
    owner: Option<Link>,
}

impl Controller {
    pub fn new(database: Database, policy: IngestPolicy) -> Self {
        Self {
            database,
            policy,
            owner: None,
        }
    }

    /// Attaches a link to the bot's owner to the welcome message.
    pub fn with_owner(mut self, owner: Link) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn welcome(&self, chat_id: ChatId) -> Reply {
        Reply {
            link: self.owner.clone(),
            ..Reply::new(chat_id, messages::welcome())
        }
    }

    pub async fn begin_ingestion(&self, user_id: UserId, chat_id: ChatId) -> Result<Reply, Error> {
        self.database
            .begin_session(user_id, chat_id, &Flow::AwaitingNumbers)
            .await?;
        log::debug!("{user_id} in {chat_id}: awaiting numbers");
        Ok(Reply::new(chat_id, messages::gen_prompt()))
    }

    pub async fn begin_dispensing(&self, user_id: UserId, chat_id: ChatId) -> Result<Reply, Error> {
        self.database
            .begin_session(user_id, chat_id, &Flow::AwaitingCountryCode)
            .await?;
        log::debug!("{user_id} in {chat_id}: awaiting country code");
        Ok(Reply::new(chat_id, messages::country_code_prompt()))
    }

    pub async fn handle_text(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        text: &str,
    ) -> Result<Vec<Reply>, Error> {
        let session = self.database.get_session(user_id).await?;

        match session.map(|s| (s.chat_id, s.flow)) {
            Some((_, Flow::AwaitingNumbers)) => {
                self.ingest(user_id, chat_id, IngestSource::Text(text.to_string()))
                    .await
            }
            Some((origin, Flow::AwaitingCountryCode)) => {
                let country_code: String = text.chars().filter(char::is_ascii_digit).collect();
                if country_code.is_empty() {
                    return Ok(vec![Reply::new(chat_id, messages::invalid_country_code())]);
                }

                let flow = Flow::Dispensing {
                    country_code: country_code.clone(),
                };
                self.database.begin_session(user_id, origin, &flow).await?;
                log::debug!("{user_id} in {origin}: dispensing with country code {country_code}");

                let mut replies = vec![Reply::new(
                    chat_id,
                    messages::country_code_set(&country_code),
                )];
                replies.extend(self.dispense(user_id).await?);
                Ok(replies)
            }
            _ => Ok(vec![Reply::new(chat_id, messages::usage())]),
        }
    }

    /// Handles an uploaded file of `size` bytes. `fetch` downloads it and is
    /// only awaited if the user is about to send numbers.
    pub async fn handle_file<F, E>(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        size: u32,
        fetch: F,
    ) -> Result<Vec<Reply>, Error>
    where
        F: Future<Output = Result<Vec<u8>, E>>,
        E: Display,
    {
        let session = self.database.get_session(user_id).await?;
        if !matches!(
            session,
            Some(Session {
                flow: Flow::AwaitingNumbers,
                ..
            })
        ) {
            return Ok(Vec::new());
        }

        if size > MAX_FILE_SIZE {
            self.database.clear_session(user_id).await?;
            return Ok(vec![Reply::new(
                chat_id,
                messages::file_too_large(MAX_FILE_SIZE),
            )]);
        }

        let bytes = match fetch.await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Couldn't download file sent to {chat_id}: {e}");
                self.database.clear_session(user_id).await?;
                return Ok(vec![Reply::new(chat_id, messages::file_unreadable())]);
            }
        };

        self.ingest(user_id, chat_id, IngestSource::File(bytes))
            .await
    }

    async fn ingest(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        source: IngestSource,
    ) -> Result<Vec<Reply>, Error> {
        let numbers = extract_candidate_lines(&source.text());
        self.database.clear_session(user_id).await?;

        if numbers.is_empty() {
            if self.policy == IngestPolicy::Replace {
                self.database.replace_numbers(chat_id, &[]).await?;
            }
            log::info!("{chat_id}: no numbers found in upload by {user_id}");
            return Ok(vec![Reply::new(chat_id, source.nothing_found())]);
        }

        let text = match self.policy {
            IngestPolicy::Append => {
                let (total, added) = self.database.add_numbers(chat_id, &numbers).await?;
                log::info!("{chat_id}: added {added} numbers, {total} in list");
                messages::numbers_added(total, added)
            }
            IngestPolicy::Replace => {
                let count = self.database.replace_numbers(chat_id, &numbers).await?;
                log::info!("{chat_id}: list replaced with {count} numbers");
                messages::numbers_replaced(count)
            }
        };

        Ok(vec![Reply::new(chat_id, text).with_buttons(&[Button::Get])])
    }

    /// Hands out the next number if the user is dispensing, otherwise does nothing.
    pub async fn next(&self, user_id: UserId) -> Result<Vec<Reply>, Error> {
        self.dispense(user_id).await
    }

    async fn dispense(&self, user_id: UserId) -> Result<Vec<Reply>, Error> {
        let Some(Session {
            chat_id,
            flow: Flow::Dispensing { country_code },
        }) = self.database.get_session(user_id).await?
        else {
            return Ok(Vec::new());
        };

        match dispense_one(&self.database, chat_id, user_id, &country_code).await? {
            Some(dispensed) => {
                log::debug!(
                    "{chat_id}: handed out {} to {:?}",
                    dispensed.entry.normalized,
                    dispensed.entry.handed_to()
                );
                let text = messages::dispensed(&dispensed.display, &dispensed.entry.normalized);
                Ok(vec![
                    Reply::new(chat_id, text).with_buttons(&[Button::Next, Button::Stop])
                ])
            }
            None => {
                log::info!("{chat_id}: list exhausted");
                self.database.clear_session(user_id).await?;
                Ok(vec![Reply::new(chat_id, messages::list_exhausted())])
            }
        }
    }

    pub async fn stop(&self, user_id: UserId, chat_id: ChatId) -> Result<Reply, Error> {
        self.database.clear_session(user_id).await?;
        Ok(Reply::new(chat_id, messages::stopped()))
    }

    pub async fn count(&self, chat_id: ChatId) -> Result<Reply, Error> {
        let text = match self.database.list_stats(chat_id).await? {
            Some(stats) => messages::list_stats(&stats),
            None => messages::no_list(),
        };
        Ok(Reply::new(chat_id, text))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::future::ready;

    use super::*;
    use crate::database::ListStats;

    const USER: UserId = UserId(100);
    const CHAT: ChatId = ChatId(-500);

    async fn controller(policy: IngestPolicy) -> (Controller, Database) {
        let database = Database::in_memory().await.unwrap();
        (Controller::new(database.clone(), policy), database)
    }

    fn file(content: &str) -> impl Future<Output = Result<Vec<u8>, String>> {
        ready(Ok(content.as_bytes().to_vec()))
    }

    async fn flow(database: &Database) -> Option<Flow> {
        database.get_session(USER).await.unwrap().map(|s| s.flow)
    }

    async fn ingest_text(controller: &Controller, text: &str) -> Vec<Reply> {
        controller.begin_ingestion(USER, CHAT).await.unwrap();
        controller.handle_text(USER, CHAT, text).await.unwrap()
    }

    #[tokio::test]
    async fn pasted_numbers_are_added() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        let reply = controller.begin_ingestion(USER, CHAT).await.unwrap();
        assert_eq!(reply.chat_id, CHAT);
        assert_eq!(flow(&database).await, Some(Flow::AwaitingNumbers));

        let replies = controller
            .handle_text(USER, CHAT, "+91 98123 45678\n919812345678\n0044 20 7946 0000")
            .await
            .unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, messages::numbers_added(2, 2));
        assert_eq!(replies[0].buttons, vec![Button::Get]);
        assert_eq!(flow(&database).await, None);
        assert_eq!(database.list_unused(CHAT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_without_numbers_keeps_appended_list() {
        let (controller, database) = controller(IngestPolicy::Append).await;
        ingest_text(&controller, "111\n222").await;

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let replies = controller
            .handle_file(USER, CHAT, 10, file("hello\nworld\n"))
            .await
            .unwrap();

        assert_eq!(replies, vec![Reply::new(CHAT, messages::no_numbers_in_file())]);
        assert_eq!(flow(&database).await, None);
        assert_eq!(database.list_entries(CHAT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_without_numbers_empties_replaced_list() {
        let (controller, database) = controller(IngestPolicy::Replace).await;
        ingest_text(&controller, "111\n222").await;

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let replies = controller
            .handle_file(USER, CHAT, 10, file("hello\n"))
            .await
            .unwrap();

        assert_eq!(replies, vec![Reply::new(CHAT, messages::no_numbers_in_file())]);
        assert_eq!(flow(&database).await, None);
        assert!(database.list_entries(CHAT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_policy_starts_over() {
        let (controller, database) = controller(IngestPolicy::Replace).await;
        ingest_text(&controller, "111\n222\n333").await;

        let replies = ingest_text(&controller, "444\n444\n555").await;
        assert_eq!(replies[0].text, messages::numbers_replaced(2));

        let stored: HashSet<_> = database
            .list_entries(CHAT)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.normalized)
            .collect();
        assert_eq!(stored, HashSet::from(["444".to_string(), "555".to_string()]));
    }

    #[tokio::test]
    async fn files_are_ignored_outside_ingestion() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        let replies = controller
            .handle_file(
                USER,
                CHAT,
                10,
                async { Err::<Vec<u8>, _>("must not be fetched") },
            )
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert_eq!(database.list_stats(CHAT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreadable_and_large_files_end_the_flow() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let replies = controller
            .handle_file(USER, CHAT, 10, ready(Err::<Vec<u8>, _>("timeout")))
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::new(CHAT, messages::file_unreadable())]);
        assert_eq!(flow(&database).await, None);

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let replies = controller
            .handle_file(USER, CHAT, MAX_FILE_SIZE + 1, file("111"))
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![Reply::new(CHAT, messages::file_too_large(MAX_FILE_SIZE))]
        );
        assert_eq!(flow(&database).await, None);
    }

    #[tokio::test]
    async fn file_upload_is_ingested() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let replies = controller
            .handle_file(USER, CHAT, 40, file("918093256780\r\n+919876543210\r\n"))
            .await
            .unwrap();

        assert_eq!(replies[0].text, messages::numbers_added(2, 2));
        assert_eq!(database.list_unused(CHAT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_bytes_in_files_are_skipped() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        controller.begin_ingestion(USER, CHAT).await.unwrap();
        let bytes = b"91\xff9812345678\n\xfe\xfd\n".to_vec();
        controller
            .handle_file(USER, CHAT, bytes.len() as u32, ready(Ok::<_, String>(bytes)))
            .await
            .unwrap();

        let stored: Vec<_> = database
            .list_unused(CHAT)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.normalized)
            .collect();
        assert_eq!(stored, vec!["919812345678"]);
    }

    #[tokio::test]
    async fn dispensing_flow() {
        let (controller, database) = controller(IngestPolicy::Append).await;
        ingest_text(&controller, "919812345671\n919812345672").await;

        controller.begin_dispensing(USER, CHAT).await.unwrap();
        assert_eq!(flow(&database).await, Some(Flow::AwaitingCountryCode));

        // no digits: reprompt and stay
        let replies = controller.handle_text(USER, CHAT, "India").await.unwrap();
        assert_eq!(replies, vec![Reply::new(CHAT, messages::invalid_country_code())]);
        assert_eq!(flow(&database).await, Some(Flow::AwaitingCountryCode));

        let replies = controller.handle_text(USER, CHAT, "+91").await.unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].text, messages::country_code_set("91"));
        assert_eq!(replies[1].buttons, vec![Button::Next, Button::Stop]);
        assert!(replies[1].text.to_string().contains("*981234567"));
        assert_eq!(
            flow(&database).await,
            Some(Flow::Dispensing {
                country_code: "91".to_string()
            })
        );

        let replies = controller.next(USER).await.unwrap();
        assert_eq!(replies[0].buttons, vec![Button::Next, Button::Stop]);

        let replies = controller.next(USER).await.unwrap();
        assert_eq!(replies, vec![Reply::new(CHAT, messages::list_exhausted())]);
        assert_eq!(flow(&database).await, None);

        // nothing happens once the flow is over
        assert!(controller.next(USER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn numbers_go_to_the_originating_chat() {
        let (controller, _) = controller(IngestPolicy::Append).await;
        ingest_text(&controller, "919812345671").await;

        controller.begin_dispensing(USER, CHAT).await.unwrap();
        let private = ChatId(USER.0 as i64);
        let replies = controller.handle_text(USER, private, "91").await.unwrap();

        assert_eq!(replies[0].chat_id, private);
        assert_eq!(replies[1].chat_id, CHAT);
    }

    #[tokio::test]
    async fn stop_ends_dispensing() {
        let (controller, database) = controller(IngestPolicy::Append).await;
        ingest_text(&controller, "111\n222\n333").await;
        controller.begin_dispensing(USER, CHAT).await.unwrap();
        controller.handle_text(USER, CHAT, "1").await.unwrap();

        let reply = controller.stop(USER, CHAT).await.unwrap();
        assert_eq!(reply.text, messages::stopped());
        assert_eq!(flow(&database).await, None);
        assert!(controller.next(USER).await.unwrap().is_empty());
        assert_eq!(database.list_unused(CHAT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn idle_text_gets_usage() {
        let (controller, database) = controller(IngestPolicy::Append).await;

        let replies = controller.handle_text(USER, CHAT, "hi").await.unwrap();
        assert_eq!(replies, vec![Reply::new(CHAT, messages::usage())]);

        // dispensing doesn't take text either
        ingest_text(&controller, "111").await;
        controller.begin_dispensing(USER, CHAT).await.unwrap();
        controller.handle_text(USER, CHAT, "1").await.unwrap();
        let replies = controller.handle_text(USER, CHAT, "2").await.unwrap();
        assert_eq!(replies, vec![Reply::new(CHAT, messages::usage())]);
        assert!(matches!(flow(&database).await, Some(Flow::Dispensing { .. })));
    }

    #[tokio::test]
    async fn count_after_dispensing() {
        let (controller, _) = controller(IngestPolicy::Append).await;

        assert_eq!(
            controller.count(CHAT).await.unwrap().text,
            messages::no_list()
        );

        ingest_text(&controller, "1111111111\n2222222222\n3333333333\n4444444444\n5555555555")
            .await;
        controller.begin_dispensing(USER, CHAT).await.unwrap();
        controller.handle_text(USER, CHAT, "1").await.unwrap();
        controller.next(USER).await.unwrap();

        let reply = controller.count(CHAT).await.unwrap();
        assert_eq!(
            reply.text,
            messages::list_stats(&ListStats {
                total: 5,
                unused: 3,
                used: 2
            })
        );
    }

    #[tokio::test]
    async fn repeats_are_counted_once() {
        let (controller, database) = controller(IngestPolicy::Append).await;
        ingest_text(&controller, "+91 11111 11111\n00911111111111\n911111111111\n222").await;
        ingest_text(&controller, "222\n333").await;

        assert_eq!(database.list_unused(CHAT).await.unwrap().len(), 3);
    }

    #[test]
    fn buttons_round_trip_through_callback_data() {
        for button in [Button::Get, Button::Next, Button::Stop] {
            assert_eq!(Button::from_callback_data(button.callback_data()), Some(button));
        }
        assert_eq!(Button::from_callback_data("something"), None);
    }

    #[tokio::test]
    async fn welcome_links_the_owner_when_configured() {
        let (controller, _) = controller(IngestPolicy::Append).await;
        let reply = controller.welcome(CHAT);
        assert_eq!(reply.text, messages::welcome());
        assert_eq!(reply.link, None);

        let owner = Link {
            label: "👑 Owner".to_string(),
            url: Url::parse("https://t.me/example_owner").unwrap(),
        };
        let reply = controller.with_owner(owner.clone()).welcome(CHAT);
        assert_eq!(reply.link, Some(owner));
        assert!(reply.buttons.is_empty());
    }
}
