/// Local commands understood by the client. Anything else typed is chat.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Rename(String),
    Exit,
    Say(String),
    /// A known command used with missing arguments.
    Usage(&'static str),
}

/// Command syntax and description, in the order `/help` lists them.
pub const COMMANDS: [(&str, &str); 3] = [
    ("/help", "list available commands"),
    ("/username <name>", "change your display name"),
    ("/exit", "leave the chat"),
];

/// Parse one line of user input. Blank lines produce nothing.
pub fn parse(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = match words.next() {
        Some("/help") => Command::Help,
        Some("/exit") => Command::Exit,
        Some("/username") => match words.next() {
            Some(name) => Command::Rename(name.to_string()),
            None => Command::Usage(COMMANDS[1].0),
        },
        _ => Command::Say(line.trim_end().to_string()),
    };
    Some(command)
}

pub fn help_text() -> String {
    COMMANDS
        .iter()
        .map(|(syntax, description)| format!("  {syntax:<18} {description}"))
        .collect::<Vec<_>>()
        .join("\n")
}
