/// A command is a message that starts with a slash and has a name.
///
/// Examples: `/start`, `/help@MyBot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// The name of the command.
    ///
    /// `/start` -> `start`
    pub name: &'a str,
    /// The bot that the command was sent to.
    ///
    /// `/help@MyBot` -> `MyBot`
    pub via: Option<&'a str>,
}

impl Command<'_> {
    /// Whether the command may be handled by the bot with the given username.
    ///
    /// Commands addressed to another bot are never handled. In groups a bare
    /// `/start` is ignored too, since several bots may listen for it there.
    pub fn is_for(&self, username: Option<&str>, in_group: bool) -> bool {
        match self.via {
            Some(via) => username.is_some_and(|name| name.eq_ignore_ascii_case(via)),
            None => !(in_group && self.name == "start"),
        }
    }
}

/// Parse a command from the given text.
///
/// Anything after the command name is ignored.
pub fn parse_command(text: &str) -> Option<Command<'_>> {
    // Commands must start with a slash
    let text = text.strip_prefix('/')?;

    // Drop the arguments (e.g. `/help hello world` -> `help`)
    let name = text.split(char::is_whitespace).next().unwrap_or_default();

    // Split the command name and bot name
    // (e.g. `/help@MyBot` -> `/help` and `MyBot`)
    let (name, via) = match name.split_once('@') {
        Some((name, via)) => (name, Some(via)),
        None => (name, None),
    };
    if name.is_empty() {
        return None;
    }

    Some(Command { name, via })
}
