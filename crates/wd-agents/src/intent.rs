//! Turning a user's request into an [`Operation`].

use async_trait::async_trait;
use wd_core::types::{Operation, OperationKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("empty request")]
    Empty,
    #[error("unrecognised request: {0}")]
    Unrecognised(String),
    #[error("{kind} request is missing its {what}")]
    MissingArgument {
        kind: OperationKind,
        what: &'static str,
    },
    #[error("malformed operation JSON: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, IntentError>;

/// Anything that can interpret a request, be it a local parser or a
/// remote classifier.
#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn parse(&self, input: &str) -> Result<Operation>;
}

/// Understands two forms:
///
/// - the structured shape `{"type": "delete", "path": "..", "destination": .., "content": ..}`
/// - short commands: `list [dir]`, `read <file>`, `delete <path>`,
///   `move <from> to <to>`, `write <file>: <text>`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandIntentParser;

impl CommandIntentParser {
    pub fn parse_str(&self, input: &str) -> Result<Operation> {
        let input = input.trim();
        if input.is_empty() {
            return Err(IntentError::Empty);
        }
        if input.starts_with('{') {
            return serde_json::from_str(input).map_err(|e| IntentError::Json(e.to_string()));
        }

        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };
        let kind: OperationKind = verb
            .parse()
            .map_err(|_| IntentError::Unrecognised(input.to_string()))?;

        match kind {
            OperationKind::List => Ok(Operation::list(if rest.is_empty() { "." } else { unquote(rest) })),
            OperationKind::Read | OperationKind::Delete => {
                let path = required(kind, unquote(rest), "path")?;
                Ok(Operation::new(kind, path))
            }
            OperationKind::Move => {
                let (from, to) = rest.rsplit_once(" to ").ok_or(IntentError::MissingArgument {
                    kind,
                    what: "destination",
                })?;
                let from = required(kind, unquote(from.trim()), "path")?;
                let to = required(kind, unquote(to.trim()), "destination")?;
                Ok(Operation::relocate(from, to))
            }
            OperationKind::Write => match rest.split_once(':') {
                Some((path, content)) => {
                    let path = required(kind, unquote(path.trim()), "path")?;
                    Ok(Operation::write(path, content.strip_prefix(' ').unwrap_or(content)))
                }
                None => {
                    let path = required(kind, unquote(rest), "path")?;
                    Ok(Operation::new(kind, path))
                }
            },
        }
    }
}

#[async_trait]
impl IntentSource for CommandIntentParser {
    async fn parse(&self, input: &str) -> Result<Operation> {
        self.parse_str(input)
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

fn required<'a>(kind: OperationKind, value: &'a str, what: &'static str) -> Result<&'a str> {
    if value.is_empty() {
        Err(IntentError::MissingArgument { kind, what })
    } else {
        Ok(value)
    }
}
