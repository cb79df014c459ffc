use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CANDIDATE_REGEX: Regex = Regex::new(r"[0-9+\s]+").unwrap();
}

/// Characters that end a line, `\r\n` included as `\r` followed by `\n`.
const LINE_BREAKS: &[char] = &[
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Turns a phone number as typed by a human into its digit-only form.
///
/// Whitespace is dropped, then one leading `+` and one leading `00`, then every
/// non-digit. An empty result means the input was not a number.
pub fn normalize(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let rest = compact.strip_prefix('+').unwrap_or(&compact);
    let rest = rest.strip_prefix("00").unwrap_or(rest);
    rest.chars().filter(char::is_ascii_digit).collect()
}

/// Extracts one normalized number per line of `text`.
///
/// Any Unicode line break ends a line, not just `\n`. Only the first run of
/// digits, `+` and whitespace in a line is considered. Lines yielding nothing
/// are skipped.
pub fn extract_candidate_lines(text: &str) -> Vec<String> {
    text.split(LINE_BREAKS)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| CANDIDATE_REGEX.find(line))
        .map(|run| normalize(run.as_str()))
        .filter(|number| !number.is_empty())
        .collect()
}
