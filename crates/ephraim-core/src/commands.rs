//! Slash-command parsing.
//!
//! Input beginning with `/` is a command: the first whitespace-delimited
//! token is the case-folded name, the rest is the argument string.
//! Built-ins are handled by the loop; anything else is tried as a skill.

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: String,
    pub raw: String,
}

/// Parse a slash command. Returns `None` for plain task input.
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let name = parts.next()?.trim_start_matches('/').to_lowercase();
    let args = parts.next().unwrap_or("").trim().to_string();

    Some(Command {
        name,
        args,
        raw: input.to_string(),
    })
}

/// Built-in command names, for `/help`.
pub const BUILTINS: &[(&str, &str)] = &[
    ("help", "Show commands and skills"),
    ("clear", "Clear conversation memory"),
    ("status", "Show current state"),
    ("tasks", "List background tasks"),
    ("background", "Start a background shell command"),
    ("compact", "Truncate the action log to the last five entries"),
    ("reset", "Reset Context.md to its default template"),
    ("quit", "Exit Ephraim"),
];
