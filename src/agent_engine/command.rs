//! Decision parsing: turns one raw oracle response into exactly one [`CommandKind`].
//!
//! Parsing never fails. Anything that is not a JSON object carrying a known
//! `command` tag becomes [`CommandKind::Unrecognized`].

use serde_json::{Map, Value};

/// Wire tag of the direct-reply sentinel. Not executable; see the engine.
pub const REPLY_TO_USER: &str = "reply_to_user";

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Coordinates are in capture space when parsed, device space after the
    /// engine has transformed them.
    Click {
        x: Option<i32>,
        y: Option<i32>,
        label: Option<String>,
    },
    TypeText { text: Option<String> },
    LaunchProgram { alias: String, args: Vec<String> },
    RunPlugin { name: String },
    RequestHigherDetail { reason: Option<String> },
    TaskComplete { message: Option<String> },
    Unrecognized {
        /// The raw `command` value, if there was a string one.
        raw: Option<String>,
        arguments: Map<String, Value>,
    },
    /// Synthesized by the engine when the oracle call itself failed.
    OracleError { message: String },
}

impl CommandKind {
    /// Wire tag used in the history summary.
    pub fn tag(&self) -> &str {
        match self {
            CommandKind::Click { .. } => "click",
            CommandKind::TypeText { .. } => "type_text",
            CommandKind::LaunchProgram { .. } => "launch_program",
            CommandKind::RunPlugin { .. } => "run_plugin",
            CommandKind::RequestHigherDetail { .. } => "request_higher_detail",
            CommandKind::TaskComplete { .. } => "task_complete",
            CommandKind::Unrecognized { raw, .. } => raw.as_deref().unwrap_or("unrecognized"),
            CommandKind::OracleError { .. } => "api_error",
        }
    }

    /// True for commands that go through the dispatcher.
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            CommandKind::Click { .. }
                | CommandKind::TypeText { .. }
                | CommandKind::LaunchProgram { .. }
                | CommandKind::RunPlugin { .. }
        )
    }

    /// Arguments object as recorded in history.
    pub fn arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        match self {
            CommandKind::Click { x, y, label } => {
                if let Some(x) = x {
                    args.insert("x".into(), Value::from(*x));
                }
                if let Some(y) = y {
                    args.insert("y".into(), Value::from(*y));
                }
                if let Some(label) = label {
                    args.insert("label".into(), Value::from(label.clone()));
                }
            }
            CommandKind::TypeText { text } => {
                if let Some(text) = text {
                    args.insert("text".into(), Value::from(text.clone()));
                }
            }
            CommandKind::LaunchProgram { alias, args: extra } => {
                args.insert("alias".into(), Value::from(alias.clone()));
                if !extra.is_empty() {
                    args.insert("args".into(), Value::from(extra.clone()));
                }
            }
            CommandKind::RunPlugin { name } => {
                args.insert("name".into(), Value::from(name.clone()));
            }
            CommandKind::RequestHigherDetail { reason } => {
                if let Some(reason) = reason {
                    args.insert("reason".into(), Value::from(reason.clone()));
                }
            }
            CommandKind::TaskComplete { message } => {
                if let Some(message) = message {
                    args.insert("message".into(), Value::from(message.clone()));
                }
            }
            CommandKind::Unrecognized { arguments, .. } => return arguments.clone(),
            CommandKind::OracleError { message } => {
                args.insert("message".into(), Value::from(message.clone()));
            }
        }
        args
    }
}

/// Parse the raw text of an oracle response.
pub fn parse_decision(raw: &str) -> CommandKind {
    let value = serde_json::from_str::<Value>(raw.trim())
        .ok()
        .or_else(|| extract_json_object(raw));
    match value {
        Some(v) => parse_decision_value(&v),
        None => {
            tracing::debug!(len = raw.len(), "oracle response is not JSON");
            unrecognized(None, Map::new())
        }
    }
}

/// Parse an already-decoded oracle response.
pub fn parse_decision_value(value: &Value) -> CommandKind {
    let Some(obj) = value.as_object() else {
        return unrecognized(None, Map::new());
    };
    let arguments = match obj.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return unrecognized(command_tag(obj), Map::new()),
    };
    let Some(tag) = command_tag(obj) else {
        return unrecognized(None, arguments);
    };

    match tag.as_str() {
        "click" => {
            let (x, y) = coordinates(&arguments).unzip();
            CommandKind::Click {
                x,
                y,
                label: first_str(&arguments, &["label", "element_name", "element", "description"]),
            }
        }
        "type_text" => CommandKind::TypeText {
            text: arguments.get("text").and_then(Value::as_str).map(str::to_string),
        },
        "launch_program" => match first_str(&arguments, &["alias", "program"]) {
            Some(alias) => CommandKind::LaunchProgram {
                alias,
                args: string_list(arguments.get("args")),
            },
            None => unrecognized(Some(tag), arguments),
        },
        "run_plugin" => match first_str(&arguments, &["name", "plugin"]) {
            Some(name) => CommandKind::RunPlugin { name },
            None => unrecognized(Some(tag), arguments),
        },
        "request_higher_detail" => CommandKind::RequestHigherDetail {
            reason: first_str(&arguments, &["reason", "description"]),
        },
        "task_complete" => CommandKind::TaskComplete {
            message: first_str(&arguments, &["message"]),
        },
        _ => unrecognized(Some(tag), arguments),
    }
}

fn unrecognized(raw: Option<String>, arguments: Map<String, Value>) -> CommandKind {
    CommandKind::Unrecognized { raw, arguments }
}

fn command_tag(obj: &Map<String, Value>) -> Option<String> {
    obj.get("command")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-blank string value among `keys`, trimmed.
fn first_str(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric x/y from a nested `coords` object, else from the top level.
fn coordinates(args: &Map<String, Value>) -> Option<(i32, i32)> {
    let nested = args.get("coords").and_then(Value::as_object);
    nested
        .into_iter()
        .chain(std::iter::once(args))
        .find_map(|candidate| {
            let x = candidate.get("x").and_then(Value::as_f64)?;
            let y = candidate.get("y").and_then(Value::as_f64)?;
            Some((x as i32, y as i32))
        })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// First `{...}` object in text that may carry code fences or prose. The
/// stream parser stops at the end of that object, so braces in any trailing
/// text are never read.
fn extract_json_object(raw: &str) -> Option<Value> {
    raw.match_indices('{').find_map(|(start, _)| {
        match serde_json::Deserializer::from_str(&raw[start..])
            .into_iter::<Value>()
            .next()
        {
            Some(Ok(value @ Value::Object(_))) => Some(value),
            _ => None,
        }
    })
}
