use colored::*;
use events::payload::PayloadTransform;
use events::Event;

pub fn info(message: &str) -> String {
    format!("{} {}", "[INFO]".bright_blue(), message.bright_blue())
}

pub fn warn(message: &str) -> String {
    format!("{} {}", "[WARNING]".bright_yellow(), message.bright_yellow())
}

pub fn error(message: &str) -> String {
    format!("{} {}", "[ERROR]".bright_red(), message.bright_red())
}

pub fn chat(display_name: &str, message: &str) -> String {
    format!("{} {}", format!("<{display_name}>").bright_white().bold(), message)
}

/// Turn a relayed event into a line for the terminal.
///
/// Events this client does not understand render as nothing.
pub fn render(event: &Event, payload: &dyn PayloadTransform) -> Option<String> {
    let line = match event {
        Event::Chat { display_name, data } => match payload.open(data) {
            Ok(text) => chat(display_name, &text),
            Err(e) => {
                log::debug!("Failed to open payload from {display_name}: {e}");
                warn(&format!("{display_name} sent a message this client cannot read"))
            }
        },
        Event::Connect { display_name } => info(&format!("{display_name} joined the chat!")),
        Event::Disconnect { display_name } => info(&format!("{display_name} left the chat!")),
        Event::RenameRequest {
            display_name,
            new_display_name,
        } => info(&format!(
            "{display_name} changed username to {new_display_name}!"
        )),
        Event::ConnectRejected { display_name } => {
            warn(&format!("Username {display_name} is already used"))
        }
        Event::RenameRejected { conflicting_name } => format!(
            "{}\n{}",
            warn(&format!("Username {conflicting_name} is already used")),
            info("Change username using command /username")
        ),
        Event::Unknown(_) => return None,
    };
    Some(line)
}
