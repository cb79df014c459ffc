use chrono::Utc;
use rand::seq::SliceRandom;
use teloxide::types::{ChatId, UserId};

use crate::database::{Database, Error, NumberEntry};

const FALLBACK_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispensed {
    pub entry: NumberEntry,
    pub display: String,
}

fn last_digits(number: &str) -> &str {
    let len = number.chars().count();
    if len <= FALLBACK_DIGITS {
        return number;
    }
    match number.char_indices().nth(len - FALLBACK_DIGITS) {
        Some((start, _)) => &number[start..],
        None => number,
    }
}

/// Removes the country code `cc` from the front of `full` for display.
///
/// Without a code, or if `full` doesn't start with it, the last ten digits
/// are shown instead.
pub fn strip_country_code(full: &str, cc: &str) -> String {
    if cc.is_empty() {
        return last_digits(full).to_string();
    }

    let cc = cc.trim_start_matches('+').trim_start_matches('0');
    match full.strip_prefix(cc) {
        Some("") => full.to_string(),
        Some(rest) => rest.to_string(),
        None => last_digits(full).to_string(),
    }
}

pub async fn pick_random_unused(
    database: &Database,
    chat_id: ChatId,
) -> Result<Option<NumberEntry>, Error> {
    let unused = database.list_unused(chat_id).await?;
    Ok(unused.choose(&mut rand::thread_rng()).cloned())
}

/// Hands out one unused number of the chat to `user_id`.
///
/// A number is only ever returned once, even when several users dispense
/// from the same chat at the same time. `None` means the list is used up.
pub async fn dispense_one(
    database: &Database,
    chat_id: ChatId,
    user_id: UserId,
    country_code: &str,
) -> Result<Option<Dispensed>, Error> {
    loop {
        let Some(mut entry) = pick_random_unused(database, chat_id).await? else {
            return Ok(None);
        };

        let used_at = Utc::now();
        if !database
            .mark_used(chat_id, &entry.normalized, user_id, used_at)
            .await?
        {
            log::debug!("{chat_id}: {} was taken meanwhile, picking again", entry.normalized);
            continue;
        }

        entry.used = true;
        entry.used_by = Some(user_id.0 as i64);
        entry.used_at = Some(used_at);

        let display = strip_country_code(&entry.normalized, country_code);
        return Ok(Some(Dispensed { entry, display }));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn strips_matching_code() {
        assert_eq!(strip_country_code("919812345678", "91"), "9812345678");
        assert_eq!(strip_country_code("919812345678", "+91"), "9812345678");
        assert_eq!(strip_country_code("919812345678", "0091"), "9812345678");
        assert_eq!(strip_country_code("15551234567", "1"), "5551234567");
    }

    #[test]
    fn falls_back_to_last_ten() {
        assert_eq!(strip_country_code("919812345678", ""), "9812345678");
        assert_eq!(strip_country_code("5551234567", "91"), "5551234567");
        assert_eq!(strip_country_code("4915112345678", "91"), "5112345678");
        assert_eq!(strip_country_code("12345", ""), "12345");
        assert_eq!(strip_country_code("12345", "44"), "12345");
    }

    #[test]
    fn code_equal_to_number_keeps_number() {
        assert_eq!(strip_country_code("91", "91"), "91");
    }

    #[test]
    fn zero_code_keeps_full_number() {
        assert_eq!(strip_country_code("919812345678", "0"), "919812345678");
    }

    async fn chat_with(database: &Database, chat_id: ChatId, count: usize) -> HashSet<String> {
        let numbers: Vec<String> = (0..count).map(|i| format!("91981234{i:04}")).collect();
        database.add_numbers(chat_id, &numbers).await.unwrap();
        numbers.into_iter().collect()
    }

    #[tokio::test]
    async fn every_number_once_then_none() {
        let database = Database::in_memory().await.unwrap();
        let chat = ChatId(5);
        let mut expected = chat_with(&database, chat, 8).await;

        for _ in 0..8 {
            let dispensed = dispense_one(&database, chat, UserId(1), "91")
                .await
                .unwrap()
                .unwrap();
            assert!(expected.remove(&dispensed.entry.normalized));
            assert!(dispensed.entry.used);
            assert_eq!(dispensed.entry.handed_to(), Some(UserId(1)));
            assert_eq!(dispensed.display, &dispensed.entry.normalized[2..]);
        }

        assert!(expected.is_empty());
        assert_eq!(dispense_one(&database, chat, UserId(1), "91").await.unwrap(), None);
        assert_eq!(pick_random_unused(&database, chat).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_chat_has_nothing() {
        let database = Database::in_memory().await.unwrap();
        assert_eq!(
            dispense_one(&database, ChatId(404), UserId(1), "").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn concurrent_dispenses_never_repeat() {
        let database = Database::in_memory().await.unwrap();
        let chat = ChatId(6);
        chat_with(&database, chat, 20).await;

        let tasks: Vec<_> = (0..25)
            .map(|user| {
                let database = database.clone();
                tokio::spawn(async move {
                    dispense_one(&database, chat, UserId(user), "")
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut empty = 0;
        for task in tasks {
            match task.await.unwrap() {
                Some(dispensed) => assert!(seen.insert(dispensed.entry.normalized)),
                None => empty += 1,
            }
        }

        assert_eq!(seen.len(), 20);
        assert_eq!(empty, 5);
    }
}
