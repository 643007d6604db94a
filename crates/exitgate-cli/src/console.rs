//! Operator commands.
//!
//! The same commands are reachable as subcommands and, while the lane runs,
//! as console lines starting with `:`:
//!
//! ```text
//! :exit IMGTEST001 [operator] [gate_id]
//! :gate open|close|status|reset
//! :cache stats|clear|invalidate <card>
//! :diagnostics
//! :metrics
//! :scanner on|off
//! :quit
//! ```

use std::str::FromStr;

use anyhow::Result;
use exitgate_engine::{ExitRequest, LaneHandle};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    Open,
    Close,
    Status,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    Stats,
    Clear,
    Invalidate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Exit {
        identifier: String,
        operator: Option<String>,
        gate_id: Option<String>,
    },
    Gate(GateAction),
    Cache(CacheAction),
    Diagnostics,
    Metrics,
    Scanner(bool),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
:exit <identifier> [operator] [gate_id]
:gate open|close|status|reset
:cache stats|clear|invalidate <card>
:diagnostics
:metrics
:scanner on|off
:quit";

impl FromStr for OperatorCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ParseCommandError::Empty)?;
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("exit", [identifier, rest @ ..]) if rest.len() <= 2 => OperatorCommand::Exit {
                identifier: (*identifier).to_string(),
                operator: rest.first().map(|s| (*s).to_string()),
                gate_id: rest.get(1).map(|s| (*s).to_string()),
            },
            ("exit", _) => {
                return Err(ParseCommandError::Usage("exit <identifier> [operator] [gate_id]"));
            }
            ("gate", [action]) => OperatorCommand::Gate(match *action {
                "open" => GateAction::Open,
                "close" => GateAction::Close,
                "status" => GateAction::Status,
                "reset" => GateAction::Reset,
                _ => return Err(ParseCommandError::Usage("gate open|close|status|reset")),
            }),
            ("gate", _) => return Err(ParseCommandError::Usage("gate open|close|status|reset")),
            ("cache", ["stats"]) => OperatorCommand::Cache(CacheAction::Stats),
            ("cache", ["clear"]) => OperatorCommand::Cache(CacheAction::Clear),
            ("cache", ["invalidate", card]) => {
                OperatorCommand::Cache(CacheAction::Invalidate((*card).to_string()))
            }
            ("cache", _) => {
                return Err(ParseCommandError::Usage("cache stats|clear|invalidate <card>"));
            }
            ("diagnostics" | "diag", []) => OperatorCommand::Diagnostics,
            ("metrics", []) => OperatorCommand::Metrics,
            ("scanner", ["on"]) => OperatorCommand::Scanner(true),
            ("scanner", ["off"]) => OperatorCommand::Scanner(false),
            ("scanner", _) => return Err(ParseCommandError::Usage("scanner on|off")),
            ("help" | "?", []) => OperatorCommand::Help,
            ("quit" | "q", []) => OperatorCommand::Quit,
            _ => return Err(ParseCommandError::Unknown(line.trim().to_string())),
        };
        Ok(command)
    }
}

/// Run a lane command and render its answer as JSON.
///
/// `Scanner`, `Help` and `Quit` belong to the console loop and answer `null`
/// here.
pub async fn execute(lane: &LaneHandle, command: OperatorCommand) -> Result<Value> {
    let value = match command {
        OperatorCommand::Exit {
            identifier,
            operator,
            gate_id,
        } => {
            let mut request = ExitRequest::new(identifier);
            if let Some(operator) = operator {
                request = request.operator(operator);
            }
            if let Some(gate_id) = gate_id {
                request = request.gate_id(gate_id);
            }
            serde_json::to_value(lane.process_exit(request).await)?
        }
        OperatorCommand::Gate(GateAction::Open) => json!({ "state": lane.open_gate().await? }),
        OperatorCommand::Gate(GateAction::Close) => json!({ "state": lane.close_gate().await? }),
        OperatorCommand::Gate(GateAction::Reset) => json!({ "state": lane.reset_gate().await? }),
        OperatorCommand::Gate(GateAction::Status) => serde_json::to_value(lane.gate_status().await?)?,
        OperatorCommand::Cache(CacheAction::Stats) => serde_json::to_value(lane.cache_stats())?,
        OperatorCommand::Cache(CacheAction::Clear) => json!({ "removed": lane.cache_clear() }),
        OperatorCommand::Cache(CacheAction::Invalidate(card)) => {
            let removed = lane.cache_invalidate(&card);
            json!({ "card": card, "removed": removed })
        }
        OperatorCommand::Diagnostics => serde_json::to_value(lane.diagnostics().await?)?,
        OperatorCommand::Metrics => serde_json::to_value(lane.metrics().await?)?,
        OperatorCommand::Scanner(_) | OperatorCommand::Help | OperatorCommand::Quit => Value::Null,
    };
    Ok(value)
}
