//! Terminal chat front end: load a CSV, preview it, and talk to the crew about it.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::facade::{ChatTurnResult, Facade};
use crate::status::StatusPanel;

pub const PREVIEW_LINES: usize = 5;

const NO_FILE_REPLY: &str =
    "I need a CSV file to analyze. Please load one with /load <path> first.";

const HELP: &str = "Commands:
  /load <path>   load a CSV file and preview it
  /status        show LLM and tool adapter status
  /history       replay this conversation
  /pipeline      run the full analysis pipeline on the loaded file
  exit           quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(PathBuf),
    Status,
    History,
    Pipeline,
    Help,
    Exit,
    Chat(String),
    Empty,
    Unknown(String),
}

pub fn parse_command(input: &str) -> Command {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return Command::Exit;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Chat(trimmed.to_string());
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    match name.to_lowercase().as_str() {
        "load" if !argument.is_empty() => Command::Load(PathBuf::from(argument)),
        "status" => Command::Status,
        "history" => Command::History,
        "pipeline" => Command::Pipeline,
        "help" => Command::Help,
        _ => Command::Unknown(trimmed.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "You"),
            Speaker::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub name: String,
    pub preview: String,
}

/// First `lines` lines of a text file.
pub fn preview_file(path: &Path, lines: usize) -> anyhow::Result<String> {
    let file =
        File::open(path).with_context(|| format!("Error reading file {}", path.display()))?;
    let preview = BufReader::new(file)
        .lines()
        .take(lines)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Error reading file {}", path.display()))?;
    Ok(preview.join("\n"))
}

pub enum Flow {
    Continue(Option<String>),
    Exit,
}

/// Per-terminal state: the loaded file and the turn history.
#[derive(Debug, Default)]
pub struct ChatSession {
    history: Vec<Turn>,
    file: Option<LoadedFile>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn loaded_file(&self) -> Option<&LoadedFile> {
        self.file.as_ref()
    }

    pub fn load_file(&mut self, path: &Path) -> anyhow::Result<&LoadedFile> {
        let preview = preview_file(path, PREVIEW_LINES)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        info!(file = %path.display(), "Loaded data file");
        Ok(&*self.file.insert(LoadedFile {
            path: path.to_path_buf(),
            name,
            preview,
        }))
    }

    fn record(&mut self, speaker: Speaker, content: impl Into<String>) {
        self.history.push(Turn {
            speaker,
            content: content.into(),
            at: Utc::now(),
        });
    }

    /// One chat turn. Without a loaded file the crew is not contacted.
    pub async fn handle_turn(&mut self, facade: &Facade, prompt: &str) -> String {
        self.record(Speaker::User, prompt);

        let reply = match &self.file {
            None => NO_FILE_REPLY.to_string(),
            Some(file) => {
                let message = format!("{prompt}\n\nFile: {}", file.path.display());
                match facade.chat(&message).await {
                    ChatTurnResult::Success { results } => results,
                    ChatTurnResult::Error { error, .. } => format!("✖ Error: {error}"),
                }
            }
        };

        self.record(Speaker::Assistant, reply.clone());
        reply
    }

    pub async fn run_pipeline(&mut self, facade: &Facade) -> String {
        let reply = match &self.file {
            None => NO_FILE_REPLY.to_string(),
            Some(file) => {
                let path = file.path.display().to_string();
                match facade.run_pipeline(&path).await {
                    Ok(output) => output.into_text(),
                    Err(err) => format!("✖ Error processing request: {err:#}"),
                }
            }
        };

        self.record(Speaker::Assistant, reply.clone());
        reply
    }

    pub fn render_history(&self) -> String {
        if self.history.is_empty() {
            return String::from("(no turns yet)");
        }
        self.history
            .iter()
            .map(|turn| {
                format!(
                    "[{}] {}: {}",
                    turn.at.format("%H:%M:%S"),
                    turn.speaker,
                    turn.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn execute(
        &mut self,
        command: Command,
        facade: &Facade,
        panel: &StatusPanel,
    ) -> Flow {
        let output = match command {
            Command::Exit => return Flow::Exit,
            Command::Empty => None,
            Command::Help => Some(HELP.to_string()),
            Command::Unknown(input) => Some(format!("Unknown command '{input}'.\n{HELP}")),
            Command::Status => Some(panel.render(facade).await),
            Command::History => Some(self.render_history()),
            Command::Load(path) => Some(match self.load_file(&path) {
                Ok(file) => format!(
                    "✔ File loaded: {}\nData preview:\n{}\n(showing first {PREVIEW_LINES} lines of {})",
                    file.name, file.preview, file.name
                ),
                Err(err) => format!("✖ {err:#}"),
            }),
            Command::Pipeline => Some(self.run_pipeline(facade).await),
            Command::Chat(prompt) => Some(self.handle_turn(facade, &prompt).await),
        };
        Flow::Continue(output)
    }
}

pub async fn run_repl(
    facade: &Facade,
    panel: &StatusPanel,
    initial_file: Option<&Path>,
) -> anyhow::Result<()> {
    println!(
        "DataFlow chat ready. Load a CSV with /load <path>, /help lists commands, 'exit' quits.\n"
    );
    let stdin = io::stdin();
    let mut session = ChatSession::new();

    if let Some(path) = initial_file {
        if let Flow::Continue(Some(output)) = session
            .execute(Command::Load(path.to_path_buf()), facade, panel)
            .await
        {
            println!("{output}\n");
        }
    }

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        match session.execute(parse_command(&buffer), facade, panel).await {
            Flow::Exit => {
                info!("User exited chat");
                break;
            }
            Flow::Continue(Some(output)) => println!("\n{output}\n"),
            Flow::Continue(None) => {}
        }
    }

    Ok(())
}
