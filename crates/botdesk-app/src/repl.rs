//! Line-oriented front end over the conversation controller.
//!
//! Plain lines are sent to the active chat; lines starting with `/` are
//! commands. Turns run as background tasks, so other chats stay usable
//! while one is awaiting a reply.

use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use botdesk_chat::{ChatError, ConversationController, TurnOutcome};
use botdesk_core::types::{format_file_size, Attachment, Role, DEFAULT_BOT_ID, GENERIC_BOT_LABEL};

pub const HELP: &str = "\
Commands:
  <text>                send a message to the active chat
  /new                  start a chat with the selected bot
  /chats                list chats (newest first, * = active)
  /switch <chat-id>     make a chat active
  /delete <chat-id>     delete a chat
  /bots                 list bots (* = selected)
  /addbot <name> <key>  add a bot and select it
  /delbot <bot-id>      delete a bot
  /select <bot-id>      select a bot and start a chat with it
  /regen [index]        regenerate the answer at or after message <index>
                        (default: the last answer)
  /attach <path>        attach file metadata to the next message
  /history              show the active chat
  /log                  show the request/response log
  /help                 show this help
  /quit                 wait for pending replies and exit";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    New,
    Chats,
    Switch(String),
    Delete(String),
    Bots,
    AddBot { name: String, key: String },
    DelBot(String),
    Select(String),
    Regen(Option<usize>),
    Attach(PathBuf),
    History,
    Log,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let Some(rest) = line.trim_start().strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest.trim(), ""),
        };
        let required = |what: &str| {
            if arg.is_empty() {
                Err(format!("usage: /{} <{}>", name, what))
            } else {
                Ok(arg.to_string())
            }
        };

        match name {
            "new" => Ok(Command::New),
            "chats" => Ok(Command::Chats),
            "switch" => required("chat-id").map(Command::Switch),
            "delete" => required("chat-id").map(Command::Delete),
            "bots" => Ok(Command::Bots),
            "addbot" => match arg.rsplit_once(char::is_whitespace) {
                Some((bot_name, key)) if !bot_name.trim().is_empty() => Ok(Command::AddBot {
                    name: bot_name.trim().to_string(),
                    key: key.to_string(),
                }),
                _ => Err("usage: /addbot <name> <key>".to_string()),
            },
            "delbot" => required("bot-id").map(Command::DelBot),
            "select" => required("bot-id").map(Command::Select),
            "regen" if arg.is_empty() => Ok(Command::Regen(None)),
            "regen" => arg
                .parse()
                .map(|i| Command::Regen(Some(i)))
                .map_err(|_| "usage: /regen [index]".to_string()),
            "attach" => required("path").map(|p| Command::Attach(PathBuf::from(p))),
            "history" => Ok(Command::History),
            "log" => Ok(Command::Log),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command /{}, try /help", other)),
        }
    }
}

/// Whether the loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Repl<W> {
    controller: Arc<ConversationController>,
    out: Arc<Mutex<W>>,
    pending_files: Vec<Attachment>,
    turns: Vec<JoinHandle<()>>,
}

impl<W: Write + Send + 'static> Repl<W> {
    pub fn new(controller: Arc<ConversationController>, out: W) -> Self {
        Self {
            controller,
            out: Arc::new(Mutex::new(out)),
            pending_files: Vec::new(),
            turns: Vec::new(),
        }
    }

    pub fn output(&self) -> Arc<Mutex<W>> {
        Arc::clone(&self.out)
    }

    /// Read lines until EOF or `/quit`, then wait for pending turns.
    pub async fn run<R>(&mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if self.handle_line(&line) == Flow::Quit {
                break;
            }
        }
        self.settle().await;
        Ok(())
    }

    /// Wait until every background turn has finished.
    pub async fn settle(&mut self) {
        for turn in self.turns.drain(..) {
            if let Err(e) = turn.await {
                warn!(error = %e, "Turn task failed");
            }
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Flow {
        self.turns.retain(|t| !t.is_finished());

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(usage) => {
                self.say(usage);
                return Flow::Continue;
            }
        };
        debug!(command = ?command, "Handling input");

        if command == Command::Quit {
            return Flow::Quit;
        }
        if let Err(e) = self.execute(command) {
            self.say(format!("error: {}", e));
        }
        Flow::Continue
    }

    fn execute(&mut self, command: Command) -> Result<(), ChatError> {
        match command {
            Command::Say(text) => self.send(text)?,
            Command::New => {
                let chat = self.controller.new_chat()?;
                self.say(format!("New chat {}", chat.id));
            }
            Command::Chats => self.show_chats()?,
            Command::Switch(id) => {
                self.controller.set_active_chat(&id)?;
                self.show_history()?;
            }
            Command::Delete(id) => {
                if self.controller.delete_chat(&id)? {
                    self.say(format!("Deleted chat {}", id));
                } else {
                    self.say(format!("No chat {}", id));
                }
            }
            Command::Bots => self.show_bots()?,
            Command::AddBot { name, key } => {
                let bot = self.controller.add_bot(&name, &key)?;
                self.say(format!("Added bot {} ({}), now selected", bot.name, bot.id));
            }
            Command::DelBot(id) => {
                if id == DEFAULT_BOT_ID {
                    self.say("The default bot cannot be deleted");
                } else if self.controller.delete_bot(&id)? {
                    self.say(format!("Deleted bot {}", id));
                } else {
                    self.say(format!("No bot {}", id));
                }
            }
            Command::Select(id) => {
                let chat = self.controller.select_bot(&id)?;
                let label = self.controller.bot_label(&chat)?;
                self.say(format!("Selected {}, new chat {}", label, chat.id));
            }
            Command::Regen(index) => self.regenerate(index)?,
            Command::Attach(path) => match describe_file(&path) {
                Ok(attachment) => {
                    self.say(format!(
                        "Attached {} ({})",
                        attachment.name,
                        format_file_size(attachment.size)
                    ));
                    self.pending_files.push(attachment);
                }
                Err(e) => self.say(format!("cannot attach {}: {}", path.display(), e)),
            },
            Command::History => self.show_history()?,
            Command::Log => {
                for entry in self.controller.logs() {
                    self.say(entry.render());
                }
            }
            Command::Help => self.say(HELP),
            Command::Quit => {}
        }
        Ok(())
    }

    fn send(&mut self, text: String) -> Result<(), ChatError> {
        if text.trim().is_empty() && self.pending_files.is_empty() {
            return Ok(());
        }
        let chat_id = match self.controller.active_chat_id()? {
            Some(id) => id,
            None => self.controller.new_chat()?.id,
        };
        if self.controller.is_busy(&chat_id) {
            self.say("This chat is still awaiting a reply");
            return Ok(());
        }

        let files = std::mem::take(&mut self.pending_files);
        let controller = Arc::clone(&self.controller);
        let out = Arc::clone(&self.out);
        self.turns.push(tokio::spawn(async move {
            let result = controller.send_message(&chat_id, &text, files).await;
            report(&controller, &out, &chat_id, result);
        }));
        Ok(())
    }

    fn regenerate(&mut self, index: Option<usize>) -> Result<(), ChatError> {
        let Some(chat_id) = self.controller.active_chat_id()? else {
            self.say("No active chat");
            return Ok(());
        };
        let chat = self
            .controller
            .get_chat(&chat_id)?
            .ok_or_else(|| ChatError::ChatNotFound(chat_id.clone()))?;

        // An assistant index means "regenerate this answer".
        let from_index = match index {
            Some(i) => match chat.messages.get(i) {
                Some(m) if m.role == Role::Assistant && i > 0 => i - 1,
                _ => i,
            },
            None => match chat.messages.iter().rposition(|m| m.role == Role::User) {
                Some(i) => i,
                None => {
                    self.say("Nothing to regenerate");
                    return Ok(());
                }
            },
        };

        let controller = Arc::clone(&self.controller);
        let out = Arc::clone(&self.out);
        self.turns.push(tokio::spawn(async move {
            let result = controller.regenerate_response(&chat_id, from_index).await;
            report(&controller, &out, &chat_id, result);
        }));
        Ok(())
    }

    fn show_chats(&self) -> Result<(), ChatError> {
        let active = self.controller.active_chat_id()?;
        for chat in self.controller.list_chats()? {
            let marker = if active.as_deref() == Some(chat.id.as_str()) { "*" } else { " " };
            let busy = if self.controller.is_busy(&chat.id) { " (awaiting reply)" } else { "" };
            let label = self.controller.bot_label(&chat)?;
            self.say(format!("{} {}  {}  [{}]{}", marker, chat.id, chat.title, label, busy));
        }
        Ok(())
    }

    fn show_bots(&self) -> Result<(), ChatError> {
        let selected = self.controller.selected_bot_id()?;
        for bot in self.controller.list_bots()? {
            let marker = if bot.id == selected { "*" } else { " " };
            self.say(format!("{} {}  {}", marker, bot.id, bot.name));
        }
        Ok(())
    }

    fn show_history(&self) -> Result<(), ChatError> {
        let Some(chat_id) = self.controller.active_chat_id()? else {
            self.say("No active chat");
            return Ok(());
        };
        let Some(chat) = self.controller.get_chat(&chat_id)? else {
            return Err(ChatError::ChatNotFound(chat_id));
        };
        let label = self.controller.bot_label(&chat)?;
        self.say(format!("== {} [{}]", chat.title, label));
        for (i, message) in chat.messages.iter().enumerate() {
            let author = match message.role {
                Role::User => "you",
                Role::Assistant => label.as_str(),
            };
            self.say(format!("[{}] {}: {}", i, author, message.content));
            for file in &message.attachments {
                self.say(format!("      + {} ({})", file.name, format_file_size(file.size)));
            }
        }
        Ok(())
    }

    fn say(&self, text: impl Display) {
        emit(&self.out, text);
    }
}

fn emit<W: Write>(out: &Mutex<W>, text: impl Display) {
    let mut out = out.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = writeln!(out, "{}", text).and_then(|_| out.flush()) {
        warn!(error = %e, "Failed to write output");
    }
}

fn report<W: Write>(
    controller: &ConversationController,
    out: &Mutex<W>,
    chat_id: &str,
    result: Result<TurnOutcome, ChatError>,
) {
    let label = controller
        .get_chat(chat_id)
        .ok()
        .flatten()
        .and_then(|chat| controller.bot_label(&chat).ok())
        .unwrap_or_else(|| GENERIC_BOT_LABEL.to_string());
    match result {
        Ok(TurnOutcome::Skipped) => {}
        Ok(TurnOutcome::Answered(message)) | Ok(TurnOutcome::Failed { reply: message, .. }) => {
            emit(out, format!("{}: {}", label, message.content));
        }
        Err(ChatError::Busy(_)) => emit(out, "This chat is still awaiting a reply"),
        Err(e) => emit(out, format!("error: {}", e)),
    }
}

/// Attachment metadata for a local file. Contents are not read.
fn describe_file(path: &Path) -> std::io::Result<Attachment> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(Attachment {
        name,
        size: metadata.len(),
        mime_type,
    })
}
