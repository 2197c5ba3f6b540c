//! Interactive prompt state machine.
//!
//! Input arrives one line at a time. Multi-step commands (`broadcast`,
//! `send`) move through intermediate states until they produce an
//! [`Action`]; nothing here performs I/O.
//!
//! ```text
//! AwaitingCommand ──broadcast──► AwaitingBroadcastText ──text──► Broadcast
//!        │
//!        └──send──► AwaitingRecipient ──id──► AwaitingMessage ──text──►
//!                   AwaitingEncryptChoice ──y/n──► Send   (c: cancel)
//! ```

use rendezvous_types::ClientId;

/// Where the prompt is in a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    /// Waiting for a command word.
    AwaitingCommand,
    /// `broadcast` entered, waiting for the text.
    AwaitingBroadcastText,
    /// `send` entered, waiting for the destination id.
    AwaitingRecipient,
    /// Destination known, waiting for the text.
    AwaitingMessage {
        /// Destination.
        to: ClientId,
    },
    /// Waiting for y/n/c.
    AwaitingEncryptChoice {
        /// Destination.
        to: ClientId,
        /// Text to send.
        text: String,
    },
}

/// What the caller should do after a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing; show the next prompt.
    None,
    /// Request the client list.
    Discover,
    /// Broadcast text.
    Broadcast(String),
    /// Send a direct message.
    Send {
        /// Destination.
        to: ClientId,
        /// Message text.
        text: String,
        /// Encrypt with the shared key.
        encrypt: bool,
    },
    /// Print our id.
    WhoAmI,
    /// Print the command list.
    Help,
    /// Leave.
    Exit,
    /// Print a line to the user.
    Notice(String),
}

/// Help text for `help`.
pub const HELP: &str = "\
Commands:
exit - Close the connection
broadcast - Send a message to all clients
discover - Discover all connected clients and exchange keys
send - Send a message to a specific client
whoami - Show your client id
help - Show this list";

/// Line-driven prompt.
#[derive(Debug)]
pub struct Prompt {
    state: PromptState,
}

impl Default for Prompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt {
    /// Start at [`PromptState::AwaitingCommand`].
    pub fn new() -> Self {
        Self {
            state: PromptState::AwaitingCommand,
        }
    }

    /// Current state.
    pub fn state(&self) -> &PromptState {
        &self.state
    }

    /// Prompt to print before reading the next line.
    pub fn text(&self) -> &'static str {
        match self.state {
            PromptState::AwaitingCommand => "> ",
            PromptState::AwaitingBroadcastText | PromptState::AwaitingMessage { .. } => {
                "Message: "
            }
            PromptState::AwaitingRecipient => "Destination ID: ",
            PromptState::AwaitingEncryptChoice { .. } => "Encrypt? (y)es / (n)o / (c)ancel: ",
        }
    }

    /// Feed one line of input.
    pub fn handle(&mut self, line: &str) -> Action {
        let state = std::mem::replace(&mut self.state, PromptState::AwaitingCommand);
        let (next, action) = step(state, line);
        self.state = next;
        action
    }
}

fn step(state: PromptState, line: &str) -> (PromptState, Action) {
    use PromptState::*;

    match state {
        AwaitingCommand => command(line.trim()),
        AwaitingBroadcastText => (AwaitingCommand, Action::Broadcast(line.to_string())),
        AwaitingRecipient => match line.trim().parse::<ClientId>() {
            Ok(to) => (AwaitingMessage { to }, Action::None),
            Err(_) => (
                AwaitingCommand,
                Action::Notice(format!("Invalid client id: {}", line.trim())),
            ),
        },
        AwaitingMessage { to } => (
            AwaitingEncryptChoice {
                to,
                text: line.to_string(),
            },
            Action::None,
        ),
        AwaitingEncryptChoice { to, text } => match line.trim() {
            "y" => (
                AwaitingCommand,
                Action::Send {
                    to,
                    text,
                    encrypt: true,
                },
            ),
            "n" => (
                AwaitingCommand,
                Action::Send {
                    to,
                    text,
                    encrypt: false,
                },
            ),
            "c" => (AwaitingCommand, Action::None),
            // Ask again.
            _ => (AwaitingEncryptChoice { to, text }, Action::None),
        },
    }
}

fn command(word: &str) -> (PromptState, Action) {
    use PromptState::*;

    match word {
        "" => (AwaitingCommand, Action::None),
        "exit" => (AwaitingCommand, Action::Exit),
        "discover" => (AwaitingCommand, Action::Discover),
        "whoami" => (AwaitingCommand, Action::WhoAmI),
        "help" => (AwaitingCommand, Action::Help),
        "broadcast" => (AwaitingBroadcastText, Action::None),
        "send" => (AwaitingRecipient, Action::None),
        other => (
            AwaitingCommand,
            Action::Notice(format!(
                "Unknown command: {}\nType 'help' for a list of commands.",
                other
            )),
        ),
    }
}
