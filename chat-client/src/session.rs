use crate::commands::{self, Command};
use crate::display;
use anyhow::{Context, Result};
use events::payload::PayloadTransform;
use events::Event;
use log::*;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

const NAME_PROMPT: &str = "Choose a username:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No name has been sent yet, or the last one was rejected.
    ChoosingName,
    Chatting,
}

#[derive(Debug, PartialEq)]
pub enum Action {
    Send(Event),
    Print(String),
    Exit,
}

/// Client-side view of the conversation, independent of any socket.
///
/// Every input produces a list of actions for the caller to perform. The
/// relay never acknowledges a successful connect or rename, so names are
/// assumed accepted until a rejection arrives.
pub struct Session {
    phase: Phase,
    display_name: Option<String>,
    /// Renames sent but not yet known to have failed, oldest first.
    pending_renames: VecDeque<PendingRename>,
    payload: Box<dyn PayloadTransform>,
}

#[derive(Debug)]
struct PendingRename {
    /// The name the relay holds for us if this request is rejected.
    previous: String,
    requested: String,
}

impl Session {
    pub fn new(display_name: Option<String>, payload: Box<dyn PayloadTransform>) -> Self {
        Self {
            phase: Phase::ChoosingName,
            display_name: display_name.filter(|name| !name.trim().is_empty()),
            pending_renames: VecDeque::new(),
            payload,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn start(&mut self) -> Vec<Action> {
        match self.display_name.take() {
            Some(name) => self.join(name),
            None => vec![Action::Print(NAME_PROMPT.to_string())],
        }
    }

    pub fn on_input(&mut self, line: &str) -> Vec<Action> {
        match self.phase {
            Phase::ChoosingName => self.choose_name(line),
            Phase::Chatting => match commands::parse(line) {
                None => Vec::new(),
                Some(Command::Help) => vec![Action::Print(commands::help_text())],
                Some(Command::Rename(new_name)) => self.rename(new_name),
                Some(Command::Exit) => self.exit(),
                Some(Command::Say(text)) => self.say(&text),
                Some(Command::Usage(usage)) => {
                    vec![Action::Print(display::warn(&format!("Usage: {usage}")))]
                }
            },
        }
    }

    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        match &event {
            Event::ConnectRejected { .. } => {
                self.phase = Phase::ChoosingName;
                self.display_name = None;
                self.pending_renames.clear();
            }
            Event::RenameRejected { conflicting_name } => self.rename_rejected(conflicting_name),
            _ => {}
        }

        if let Some(line) = display::render(&event, self.payload.as_ref()) {
            actions.push(Action::Print(line));
        } else {
            debug!("Ignoring event: {event:?}");
        }

        if self.phase == Phase::ChoosingName {
            actions.push(Action::Print(NAME_PROMPT.to_string()));
        }
        actions
    }

    /// Leave the chat, announcing it when a name was claimed.
    pub fn exit(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let (Phase::Chatting, Some(name)) = (self.phase, self.display_name.clone()) {
            actions.push(Action::Send(Event::Disconnect { display_name: name }));
        }
        actions.push(Action::Print(display::info("Goodbye!")));
        actions.push(Action::Exit);
        actions
    }

    fn choose_name(&mut self, line: &str) -> Vec<Action> {
        match commands::parse(line) {
            Some(Command::Exit) => self.exit(),
            Some(Command::Help) => vec![
                Action::Print(commands::help_text()),
                Action::Print(NAME_PROMPT.to_string()),
            ],
            Some(Command::Rename(name)) => self.join(name),
            Some(Command::Usage(usage)) => vec![
                Action::Print(display::warn(&format!("Usage: {usage}"))),
                Action::Print(NAME_PROMPT.to_string()),
            ],
            _ => match line.split_whitespace().next() {
                Some(name) => self.join(name.to_string()),
                None => vec![Action::Print(NAME_PROMPT.to_string())],
            },
        }
    }

    fn join(&mut self, name: String) -> Vec<Action> {
        self.phase = Phase::Chatting;
        self.pending_renames.clear();
        self.display_name = Some(name.clone());
        vec![
            Action::Send(Event::Connect {
                display_name: name.clone(),
            }),
            Action::Print(display::info(&format!(
                "Joined as {name}. Type /help for commands."
            ))),
        ]
    }

    fn rename(&mut self, new_name: String) -> Vec<Action> {
        let current = self.display_name.clone().unwrap_or_default();
        if current == new_name {
            return vec![Action::Print(display::info(&format!(
                "You are already {new_name}"
            )))];
        }

        self.pending_renames.push_back(PendingRename {
            previous: current.clone(),
            requested: new_name.clone(),
        });
        self.display_name = Some(new_name.clone());
        vec![
            Action::Send(Event::RenameRequest {
                display_name: current,
                new_display_name: new_name.clone(),
            }),
            Action::Print(display::info(&format!("Username changed to {new_name}"))),
        ]
    }

    /// The relay answers renames in order and only reports failures, so every
    /// request sent before the rejected one has taken effect.
    fn rename_rejected(&mut self, conflicting_name: &str) {
        let Some(index) = self
            .pending_renames
            .iter()
            .position(|pending| pending.requested == conflicting_name)
        else {
            return;
        };
        self.pending_renames.drain(..index);

        if let Some(rejected) = self.pending_renames.pop_front() {
            match self.pending_renames.front_mut() {
                Some(next) => next.previous = rejected.previous,
                None => self.display_name = Some(rejected.previous),
            }
        }
    }

    fn say(&self, text: &str) -> Vec<Action> {
        vec![Action::Send(Event::Chat {
            display_name: self.display_name.clone().unwrap_or_default(),
            data: self.payload.seal(text),
        })]
    }
}

/// Connect to the relay and pump stdin and server events through `session`
/// until the user exits or the server goes away.
pub async fn run(addr: &str, mut session: Session) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;
    info!("Connected to {addr}");

    let (read_half, mut writer) = stream.into_split();
    let mut server = BufReader::new(read_half).lines();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    if perform(session.start(), &mut writer).await? {
        return Ok(());
    }

    loop {
        let actions = tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => session.on_input(&line),
                None => session.exit(),
            },
            line = server.next_line() => match line? {
                Some(line) => match events::decode(line.as_bytes()) {
                    Ok(event) => session.on_event(event),
                    Err(e) => {
                        debug!("Dropping undecodable frame: {e}");
                        continue;
                    }
                },
                None => {
                    debug!(
                        "Server closed the connection in phase {:?} as {:?}",
                        session.phase(),
                        session.display_name()
                    );
                    println!("{}", display::error("Server closed the connection"));
                    return Ok(());
                }
            },
        };

        if perform(actions, &mut writer).await? {
            break;
        }
    }

    writer.shutdown().await?;
    Ok(())
}

/// Returns true once an `Action::Exit` has been performed.
async fn perform(actions: Vec<Action>, writer: &mut OwnedWriteHalf) -> Result<bool> {
    for action in actions {
        match action {
            Action::Send(event) => {
                let frame = events::encode(&event)?;
                writer
                    .write_all(frame.as_bytes())
                    .await
                    .context("Failed to send to server")?;
            }
            Action::Print(line) => println!("{line}"),
            Action::Exit => return Ok(true),
        }
    }
    Ok(false)
}
