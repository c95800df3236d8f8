//! Interaction script parsing.
//!
//! Scripts are lists of `"<verb>:<argument>"` strings. A whole script is
//! parsed before anything is dispatched, so a typo in step five never leaves
//! an application half driven.
//!
//! ```
//! use tui_snapshots::interaction::{parse_interaction, Verb};
//!
//! let cmd = parse_interaction("press:enter").unwrap();
//! assert_eq!(cmd.verb(), Verb::Press);
//! assert!(parse_interaction("f2").unwrap_err().to_string().contains("press:f2"));
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{InteractionError, InvalidInteraction, ValidationError};

/// Longest accepted `wait` step.
pub const MAX_WAIT_SECS: f64 = 300.0;

/// Interaction vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Click,
    Type,
    Press,
    Hover,
    Wait,
}

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Click, Verb::Type, Verb::Press, Verb::Hover, Verb::Wait];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Click => "click",
            Verb::Type => "type",
            Verb::Press => "press",
            Verb::Hover => "hover",
            Verb::Wait => "wait",
        }
    }

    /// Known-good commands for this verb, quoted back in error messages.
    pub fn examples(&self) -> &'static [&'static str] {
        match self {
            Verb::Press => &["press:f2", "press:enter", "press:escape", "press:ctrl+c"],
            Verb::Click => &["click:#button", "click:.submit", "click:Button"],
            Verb::Hover => &["hover:#menu", "hover:.dropdown", "hover:Button"],
            Verb::Type => &["type:hello world", "type:username", "type:password123"],
            Verb::Wait => &["wait:0.5", "wait:1.0", "wait:2.0"],
        }
    }

    fn lookup(name: &str) -> Option<Verb> {
        Verb::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated interaction. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InteractionCommand {
    verb: Verb,
    argument: String,
}

impl InteractionCommand {
    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn argument(&self) -> &str {
        &self.argument
    }

    /// Delay requested by a `wait` step.
    pub fn duration(&self) -> Option<Duration> {
        match self.verb {
            Verb::Wait => self.argument.parse::<f64>().ok().map(Duration::from_secs_f64),
            _ => None,
        }
    }

    /// Canonical key name for a `press` step.
    pub fn key(&self) -> Option<String> {
        match self.verb {
            Verb::Press => Some(normalize_key(&self.argument)),
            _ => None,
        }
    }

    /// Pointer target for `click` and `hover` steps.
    pub fn target(&self) -> Option<Target> {
        match self.verb {
            Verb::Click | Verb::Hover => Some(Target::parse(&self.argument)),
            _ => None,
        }
    }
}

impl fmt::Display for InteractionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.verb, self.argument)
    }
}

impl FromStr for InteractionCommand {
    type Err = InteractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_interaction(s)
    }
}

impl Serialize for InteractionCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InteractionCommand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_interaction(&raw).map_err(serde::de::Error::custom)
    }
}

/// Where a click or hover lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `#label`
    Id(String),
    /// `.label`
    Class(String),
    /// Bare visible text
    Text(String),
    /// `@col,row`, zero-based
    Cell { col: u16, row: u16 },
}

impl Target {
    pub fn parse(raw: &str) -> Target {
        let raw = raw.trim();
        if let Some((col, row)) = raw.strip_prefix('@').and_then(|rest| rest.split_once(',')) {
            if let (Ok(col), Ok(row)) = (col.trim().parse(), row.trim().parse()) {
                return Target::Cell { col, row };
            }
        }
        if let Some(label) = raw.strip_prefix('#') {
            return Target::Id(label.to_string());
        }
        if let Some(label) = raw.strip_prefix('.') {
            return Target::Class(label.to_string());
        }
        Target::Text(raw.to_string())
    }

    /// Text to search for on screen, if the target is not a fixed cell.
    pub fn label(&self) -> Option<&str> {
        match self {
            Target::Id(s) | Target::Class(s) | Target::Text(s) => Some(s),
            Target::Cell { .. } => None,
        }
    }
}

/// Canonical spelling for a key name: lower case, aliases folded.
///
/// `"Esc"` becomes `"escape"`, `"Return"` becomes `"enter"`, `"CTRL+C"`
/// becomes `"ctrl+c"`. Single printable characters keep their case.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() == 1 {
        return trimmed.to_string();
    }
    let lower = trimmed.to_lowercase();
    if let Some(rest) = lower.strip_prefix("ctrl+").or_else(|| lower.strip_prefix("c-")) {
        return format!("ctrl+{rest}");
    }
    if let Some(rest) = lower.strip_prefix("alt+").or_else(|| lower.strip_prefix("m-")) {
        return format!("alt+{rest}");
    }
    match lower.as_str() {
        "esc" => "escape".into(),
        "return" | "cr" => "enter".into(),
        "pgup" | "page_up" => "pageup".into(),
        "pgdn" | "pagedown" | "page_down" => "pagedown".into(),
        "del" => "delete".into(),
        "ins" => "insert".into(),
        "bs" => "backspace".into(),
        "arrowup" => "up".into(),
        "arrowdown" => "down".into(),
        "arrowleft" => "left".into(),
        "arrowright" => "right".into(),
        _ => lower,
    }
}

fn owned(examples: &[&str]) -> Vec<String> {
    examples.iter().map(|s| s.to_string()).collect()
}

/// Parse one interaction string.
pub fn parse_interaction(command: &str) -> Result<InteractionCommand, InteractionError> {
    let Some((verb_part, argument)) = command.split_once(':') else {
        let bare = command.trim();
        let examples = if bare.is_empty() {
            owned(&["press:f2", "click:#button", "wait:1.0"])
        } else {
            vec![
                format!("press:{bare}"),
                format!("click:#{bare}"),
                format!("click:.{bare}"),
                format!("click:{bare}"),
            ]
        };
        return Err(InteractionError::Malformed {
            command: command.to_string(),
            examples,
        });
    };

    let Some(verb) = Verb::lookup(verb_part) else {
        return Err(InteractionError::UnknownVerb {
            command: command.to_string(),
            verb: verb_part.to_string(),
            examples: owned(&[
                "press:enter",
                "click:#button",
                "hover:.menu-item",
                "type:hello world",
                "wait:1.0",
            ]),
        });
    };

    match verb {
        // Empty text is allowed; it may be intentional.
        Verb::Type => {}
        Verb::Press | Verb::Click | Verb::Hover => {
            if argument.trim().is_empty() {
                return Err(InteractionError::MissingArgument {
                    command: command.to_string(),
                    verb: verb.to_string(),
                    examples: owned(verb.examples()),
                });
            }
        }
        Verb::Wait => check_duration(command, argument)?,
    }

    let argument = match verb {
        Verb::Type => argument.to_string(),
        _ => argument.trim().to_string(),
    };
    Ok(InteractionCommand { verb, argument })
}

fn check_duration(command: &str, argument: &str) -> Result<(), InteractionError> {
    let invalid = |reason: String| InteractionError::InvalidDuration {
        command: command.to_string(),
        argument: argument.to_string(),
        reason,
        examples: owned(Verb::Wait.examples()),
    };
    let seconds: f64 = argument
        .trim()
        .parse()
        .map_err(|_| invalid("must be a number of seconds".into()))?;
    if !seconds.is_finite() {
        return Err(invalid("must be a finite number of seconds".into()));
    }
    if seconds < 0.0 {
        return Err(invalid("cannot be negative".into()));
    }
    if seconds > MAX_WAIT_SECS {
        return Err(invalid(format!("exceeds the {MAX_WAIT_SECS}s limit")));
    }
    Ok(())
}

/// Outcome of checking a whole script.
#[derive(Debug, Clone, Default)]
pub struct SequenceValidation {
    pub validated: Vec<InteractionCommand>,
    pub errors: Vec<InvalidInteraction>,
    pub suggestions: Vec<String>,
    pub total: usize,
}

impl SequenceValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<InteractionCommand>, ValidationError> {
        if self.errors.is_empty() {
            Ok(self.validated)
        } else {
            Err(ValidationError {
                errors: self.errors,
                total: self.total,
            })
        }
    }
}

/// Check every command of a script, collecting all failures.
pub fn validate_sequence<S: AsRef<str>>(commands: &[S]) -> SequenceValidation {
    let mut report = SequenceValidation {
        total: commands.len(),
        ..Default::default()
    };

    for (index, raw) in commands.iter().enumerate() {
        match parse_interaction(raw.as_ref()) {
            Ok(cmd) => report.validated.push(cmd),
            Err(error) => report.errors.push(InvalidInteraction { index, error }),
        }
    }

    if !report.errors.is_empty() {
        report.suggestions = vec![
            "every interaction uses '<verb>:<argument>' with a colon separator".to_string(),
            "bare key names such as 'f2' need a verb, e.g. 'press:f2'".to_string(),
            format!(
                "found {} format error(s) in {} interaction(s)",
                report.errors.len(),
                report.total
            ),
        ];
    }
    report
}

/// Parse a whole script, failing if any command is invalid.
pub fn parse_sequence<S: AsRef<str>>(commands: &[S]) -> Result<Vec<InteractionCommand>, ValidationError> {
    validate_sequence(commands).into_result()
}
