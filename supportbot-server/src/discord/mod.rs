pub mod runtime;
pub mod sink;
pub mod transcripts;

pub use runtime::{DiscordHandler, run_gateway};
pub use sink::DiscordSink;
pub use transcripts::DiscordTranscripts;

use twilight_model::id::Id;

use supportbot_core::Error;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_THREAD_NAME_CHARS: usize = 100;

pub fn parse_id<T>(raw: &str) -> Result<Id<T>, Error> {
    raw.parse::<u64>()
        .ok()
        .and_then(Id::new_checked)
        .ok_or_else(|| Error::Platform(format!("Invalid Discord id: {raw}")))
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Drops `<@id>` / `<@!id>` mentions of the bot from message content.
pub fn strip_bot_mention(content: &str, bot_id: &str) -> String {
    content
        .replace(&format!("<@{bot_id}>"), "")
        .replace(&format!("<@!{bot_id}>"), "")
        .trim()
        .to_string()
}

/// `!status extra words` with prefix `!` gives `Some("status")`.
pub fn parse_command<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let rest = content.trim_start().strip_prefix(prefix)?;
    rest.split_whitespace().next().filter(|name| !name.is_empty())
}
