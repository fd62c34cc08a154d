/// Inbound notification from the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: Option<String>,
    pub sender: Option<Sender>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A bot command extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandText<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

impl IncomingMessage {
    pub fn text_message(chat_id: i64, message_id: i32, text: &str) -> Self {
        IncomingMessage {
            chat_id,
            message_id,
            text: Some(text.to_string()),
            sender: None,
        }
    }

    /// Telegram-style command parsing: `/name[@bot] args`.
    ///
    /// A command addressed to a different bot is not ours and yields `None`.
    /// With `bot_username` unknown, any `@` suffix is accepted.
    pub fn command(&self, bot_username: Option<&str>) -> Option<CommandText<'_>> {
        let text = self.text.as_deref()?;
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(target), Some(me)) = (target, bot_username) {
            if !target.eq_ignore_ascii_case(me) {
                return None;
            }
        }
        Some(CommandText { name, args })
    }
}
