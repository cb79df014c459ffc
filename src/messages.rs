mod markdown_string;

pub use markdown_string::MarkdownString;

use crate::database::ListStats;

pub fn welcome() -> MarkdownString {
    MarkdownString::from("✨ Welcome to the Number Gen Bot ✨").bold()
        + "\n\n📌 I hand out random numbers from a list you upload or paste.\n\
           🔒 A number that has been given out is never given out again.\n\n\
           Use /gen to upload numbers or paste them."
}

pub fn help() -> MarkdownString {
    MarkdownString::from(
        "Supported commands:
/gen - upload a .txt file or paste numbers, one per line
/get - start handing out numbers from this chat's list
/count - show how many numbers are left
/start - show the welcome message
/help - show this text",
    )
}

pub fn gen_prompt() -> MarkdownString {
    let mut result = MarkdownString::from(
        "Send a .txt file containing numbers OR paste numbers (one per line).\n\nExamples accepted:",
    );
    for example in ["918093256780", "+919876543210", "00919876543210", "8093256780"] {
        result += "\n";
        result += MarkdownString::code_inline(example);
    }
    result + "\n\n(After upload I'll show the total count and a Get button.)"
}

pub fn numbers_added(total: u64, added: u64) -> MarkdownString {
    MarkdownString::from(&*format!(
        "✅ Numbers processed.\nTotal in list: {total}\nNewly added: {added}"
    ))
}

pub fn numbers_replaced(count: u64) -> MarkdownString {
    MarkdownString::from(&*format!(
        "✅ Numbers processed.\nThe list was replaced and now holds {count} numbers."
    ))
}

pub fn no_numbers_in_message() -> MarkdownString {
    MarkdownString::from(
        "No valid numbers found in your message. Send one-per-line numbers or upload a .txt file.",
    )
}

pub fn no_numbers_in_file() -> MarkdownString {
    MarkdownString::from("No valid numbers found in the file.")
}

pub fn file_unreadable() -> MarkdownString {
    MarkdownString::from("Error reading file. Make sure it's a text file.")
}

pub fn file_too_large(limit_bytes: u32) -> MarkdownString {
    MarkdownString::from(&*format!(
        "The file is too large, the limit is {} MiB.",
        limit_bytes / (1024 * 1024)
    ))
}

pub fn country_code_prompt() -> MarkdownString {
    MarkdownString::from("Send the country code to remove from numbers (e.g. ")
        + MarkdownString::code_inline("91")
        + ")."
}

pub fn invalid_country_code() -> MarkdownString {
    MarkdownString::from("Please send a valid country code like ")
        + MarkdownString::code_inline("91")
        + " or "
        + MarkdownString::code_inline("1")
        + " (digits only)."
}

pub fn country_code_set(country_code: &str) -> MarkdownString {
    MarkdownString::from("Country code set to ")
        + MarkdownString::from(country_code).bold()
        + ". I'll now send random numbers from the list (country code removed)."
}

pub fn dispensed(display: &str, normalized: &str) -> MarkdownString {
    MarkdownString::from("📲 Here is a number:\n")
        + MarkdownString::from(display).bold()
        + "\n\n(Original stored: "
        + MarkdownString::code_inline(normalized)
        + ")"
}

pub fn list_exhausted() -> MarkdownString {
    MarkdownString::from("⚠️ No unused numbers left in the list.")
}

pub fn stopped() -> MarkdownString {
    MarkdownString::from("Stopped giving numbers. Use /gen again when needed.")
}

pub fn usage() -> MarkdownString {
    MarkdownString::from("Use /gen to upload numbers or /start to see the welcome message.")
}

pub fn no_list() -> MarkdownString {
    MarkdownString::from("No list exists for this chat. Use /gen to add numbers.")
}

pub fn list_stats(stats: &ListStats) -> MarkdownString {
    MarkdownString::from(&*format!(
        "📄 Total: {}\n✅ Unused: {}\n❌ Used: {}",
        stats.total, stats.unused, stats.used
    ))
}

pub fn internal_error() -> MarkdownString {
    MarkdownString::from("Sorry, an internal error occurred :((")
}
