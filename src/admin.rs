//! Admin Console
//!
//! Operator commands read line by line from stdin. Match commands take an
//! optional trailing match id and otherwise go to the first listed match.
//!
//! ```text
//! help | matches | sessions | quit
//! create red|blue <vine> <y> [match]
//! fruit add <vine> <y> <points> [match]
//! fruit del <vine> <y> [match]
//! list | pause | resume | stats [match]
//! ```

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::game::state::CrocodileKind;
use crate::network::session::SessionRegistry;
use crate::room::{MatchCommand, MatchId, RoomManager};

const HELP: &str = "\
commands:
  help                                  this text
  matches                               list matches
  sessions                              list connected sessions
  create red|blue <vine> <y> [match]    spawn a crocodile
  fruit add <vine> <y> <points> [match] hang a fruit
  fruit del <vine> <y> [match]          remove the fruit nearest to y
  list [match]                          crocodiles and fruits
  pause [match] / resume [match]        freeze or unfreeze a match
  stats [match]                         crocodile counts and tick timing
  quit                                  shut the server down";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    /// Print usage
    Help,
    /// List matches
    Matches,
    /// List sessions
    Sessions,
    /// Stop the server
    Quit,
    /// Print a match's telemetry
    Stats {
        /// Match to report on, or the first listed one
        target: Option<MatchId>,
    },
    /// Run a command inside a match
    Match {
        /// What to do
        command: MatchCommand,
        /// Match to address, or the first listed one
        target: Option<MatchId>,
    },
}

/// Console input that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// First word is not a command.
    #[error("unknown command '{0}'")]
    Unknown(String),

    /// Wrong number or shape of arguments.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// An argument is not a valid number.
    #[error("invalid {field} '{value}'")]
    Invalid {
        /// Argument name
        field: &'static str,
        /// Text given
        value: String,
    },
}

/// How the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// `quit` was entered
    Quit,
    /// stdin closed
    Eof,
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<AdminCommand>, CommandError> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }

    let target = match words.last().and_then(|w| MatchId::parse(w)) {
        Some(id) if words.len() > 1 => {
            words.pop();
            Some(id)
        }
        _ => None,
    };
    let in_match = |command: MatchCommand| -> Result<Option<AdminCommand>, CommandError> {
        Ok(Some(AdminCommand::Match { command, target }))
    };

    match words.as_slice() {
        ["help"] | ["?"] => Ok(Some(AdminCommand::Help)),
        ["matches"] => Ok(Some(AdminCommand::Matches)),
        ["sessions"] => Ok(Some(AdminCommand::Sessions)),
        ["quit"] | ["exit"] => Ok(Some(AdminCommand::Quit)),
        ["stats"] => Ok(Some(AdminCommand::Stats { target })),
        ["list"] => in_match(MatchCommand::ListEntities),
        ["pause"] => in_match(MatchCommand::Pause),
        ["resume"] => in_match(MatchCommand::Resume),
        ["create", kind, vine, y] => {
            let kind = CrocodileKind::parse(kind).ok_or_else(|| CommandError::Invalid {
                field: "crocodile kind",
                value: kind.to_string(),
            })?;
            in_match(MatchCommand::SpawnCrocodile { kind, vine: parse_vine(vine)?, y: parse_y(y)? })
        }
        ["create", ..] => Err(CommandError::Usage("create red|blue <vine> <y> [match]")),
        ["fruit", "add", vine, y, points] => {
            let points = points.parse::<u32>().map_err(|_| CommandError::Invalid {
                field: "points",
                value: points.to_string(),
            })?;
            in_match(MatchCommand::AddFruit { vine: parse_vine(vine)?, y: parse_y(y)?, points })
        }
        ["fruit", "del" | "delete" | "remove", vine, y] => {
            in_match(MatchCommand::RemoveFruit { vine: parse_vine(vine)?, y: parse_y(y)? })
        }
        ["fruit", ..] => Err(CommandError::Usage("fruit add <vine> <y> <points> | fruit del <vine> <y>")),
        [other, ..] => Err(CommandError::Unknown(other.to_string())),
        [] => Ok(None),
    }
}

fn parse_vine(text: &str) -> Result<u8, CommandError> {
    text.parse::<u8>().map_err(|_| CommandError::Invalid { field: "vine", value: text.to_string() })
}

fn parse_y(text: &str) -> Result<f64, CommandError> {
    match text.parse::<f64>() {
        Ok(y) if y.is_finite() => Ok(y),
        _ => Err(CommandError::Invalid { field: "y", value: text.to_string() }),
    }
}

/// Run a command and describe the outcome.
pub async fn execute(command: AdminCommand, rooms: &RoomManager, registry: &SessionRegistry) -> String {
    match command {
        AdminCommand::Help => HELP.to_string(),
        AdminCommand::Quit => "shutting down".to_string(),
        AdminCommand::Matches => {
            let matches = rooms.list_matches().await;
            if matches.is_empty() {
                return "no matches".to_string();
            }
            matches
                .iter()
                .map(|m| {
                    format!(
                        "{} {:?} tick {} players {}/{} spectators {}{}",
                        m.match_id,
                        m.phase,
                        m.tick,
                        m.players,
                        m.max_players,
                        m.spectators,
                        if m.paused { " (paused)" } else { "" },
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        AdminCommand::Sessions => {
            let sessions = registry.list().await;
            if sessions.is_empty() {
                return "no sessions".to_string();
            }
            let mut lines = Vec::with_capacity(sessions.len());
            for session in sessions {
                let match_id = rooms
                    .match_of(&session.id)
                    .await
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                lines.push(format!(
                    "{} {} {:?} {:?} since {} match {}",
                    session.id,
                    session.display_name(),
                    session.role,
                    session.handle.transport,
                    session.connected_at.format("%H:%M:%S"),
                    match_id,
                ));
            }
            lines.join("\n")
        }
        AdminCommand::Stats { target } => match rooms.telemetry(target).await {
            Ok((match_id, telemetry)) => format!("match {}\n{}", match_id, telemetry.report()),
            Err(e) => format!("error: {}", e),
        },
        AdminCommand::Match { command, target } => match rooms.admin(target, command).await {
            Ok(text) => text,
            Err(e) => format!("error: {}", e),
        },
    }
}

/// Read commands from stdin until `quit` or end of input.
///
/// stdin is read on a plain thread so a pending read never holds up
/// runtime shutdown.
pub async fn run_console(rooms: Arc<RoomManager>, registry: Arc<SessionRegistry>) -> ConsoleExit {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);

    let spawned = std::thread::Builder::new()
        .name("admin-console".to_string())
        .spawn(move || forward_lines(std::io::stdin().lock(), line_tx));
    if let Err(e) = spawned {
        warn!("Admin console unavailable: {}", e);
        return ConsoleExit::Eof;
    }

    info!("Admin console ready, type 'help'");

    while let Some(line) = line_rx.recv().await {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(AdminCommand::Quit)) => return ConsoleExit::Quit,
            Ok(Some(command)) => println!("{}", execute(command, &rooms, &registry).await),
            Err(e) => println!("error: {} (type 'help')", e),
        }
    }

    ConsoleExit::Eof
}

/// Send each line of `reader` down `lines` until input ends, a read fails,
/// or the receiver goes away. Blocks the calling thread.
fn forward_lines<R: BufRead>(reader: R, lines: mpsc::Sender<String>) {
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if lines.blocking_send(line).is_err() {
            break;
        }
    }
}
