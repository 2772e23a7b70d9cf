use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_MODEL_ENDPOINT: &str = "http://localhost:11434";
pub const HISTORY_LIMIT: usize = 50;
pub const DEFAULT_WAIT_MS: u64 = 2000;
/// Longest WAIT a plan may ask for.
pub const MAX_WAIT_MS: u64 = 60_000;
pub const STEP_PACING_MS: u64 = 500;
/// Page text shorter than this usually means the content handler is missing.
pub const MIN_READABLE_CHARS: usize = 50;
pub const SUMMARY_INPUT_CHARS: usize = 4000;
pub const RAW_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Down,
    Up,
    Top,
    Bottom,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScrollDirection::Down => "down",
            ScrollDirection::Up => "up",
            ScrollDirection::Top => "top",
            ScrollDirection::Bottom => "bottom",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    Back,
    Forward,
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabOp {
    New,
    Close,
}

/// A normalized unit of work for the action executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Scroll { direction: ScrollDirection },
    Navigate { direction: NavDirection },
    Tab { op: TabOp },
    Search { query: String },
    Click { target: String },
    Type { target: String, text: String },
    FillForm,
    Read,
    OpenUrl { url: String },
    Wait { ms: u64 },
}

/// What the model thinks the user wants.
///
/// Anything outside the documented vocabulary is kept verbatim in `Other`
/// and executed like any actionable intent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Option<String>")]
pub enum Intent {
    Chat,
    Search,
    Click,
    Read,
    Unknown,
    Other(String),
    #[default]
    Unspecified,
}

impl From<Value> for Intent {
    fn from(raw: Value) -> Self {
        let Value::String(raw) = raw else {
            return Intent::Unspecified;
        };
        match raw.trim().to_ascii_uppercase().as_str() {
            "" => Intent::Unspecified,
            "CHAT" => Intent::Chat,
            "SEARCH" => Intent::Search,
            "CLICK" => Intent::Click,
            "READ" => Intent::Read,
            "UNKNOWN" => Intent::Unknown,
            _ => Intent::Other(raw),
        }
    }
}

impl From<Intent> for Option<String> {
    fn from(intent: Intent) -> Self {
        let name = match intent {
            Intent::Chat => "CHAT",
            Intent::Search => "SEARCH",
            Intent::Click => "CLICK",
            Intent::Read => "READ",
            Intent::Unknown => "UNKNOWN",
            Intent::Other(raw) => return Some(raw),
            Intent::Unspecified => return None,
        };
        Some(name.to_string())
    }
}

/// A multi-step plan returned by the language model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub intent: Intent,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_response"
    )]
    pub response: Option<String>,
    #[serde(default, deserialize_with = "lenient_steps")]
    pub steps: Vec<Step>,
}

impl Plan {
    /// A conversational reply with nothing to execute.
    pub fn chat(response: impl Into<String>) -> Self {
        Self {
            intent: Intent::Chat,
            response: Some(response.into()),
            steps: Vec::new(),
        }
    }
}

fn lenient_response<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(lenient_text))
}

/// Each step is decoded on its own so one malformed entry cannot sink the plan.
fn lenient_steps<'de, D>(deserializer: D) -> Result<Vec<Step>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => Ok(items.into_iter().map(Step::from).collect()),
        _ => Ok(Vec::new()),
    }
}

/// Strings as-is, numbers in their JSON spelling, anything else absent.
fn lenient_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One plan entry. Built from the loose record the model emits; fields are
/// optional because the model routinely leaves them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "RawStep")]
pub enum Step {
    OpenUrl { url: Option<String> },
    Wait { ms: Option<u64> },
    Click { selector: Option<String>, text: Option<String> },
    Search { query: Option<String>, text: Option<String> },
    Read,
    Type { selector: Option<String>, text: Option<String> },
    FillForm,
    Unrecognized { action: String },
}

/// Wire shape of a step as the model writes it.
#[derive(Debug, Clone, Default, Serialize)]
struct RawStep {
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ms: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Models emit durations as integers, floats or numeric strings.
/// Capped at [`MAX_WAIT_MS`].
fn millis(value: &Value) -> Option<u64> {
    let ms = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        _ => None,
    };
    ms.map(|ms| ms.min(MAX_WAIT_MS))
}

impl From<Value> for Step {
    fn from(value: Value) -> Self {
        let Value::Object(fields) = &value else {
            return Step::Unrecognized {
                action: value.to_string(),
            };
        };
        let field = |name: &str| fields.get(name).and_then(lenient_text);
        let action = field("action").unwrap_or_default();
        match action.trim().to_ascii_uppercase().as_str() {
            "OPEN_URL" => Step::OpenUrl { url: field("url") },
            "WAIT" => Step::Wait {
                ms: fields.get("ms").and_then(millis),
            },
            "CLICK" => Step::Click {
                selector: field("selector"),
                text: field("text"),
            },
            "SEARCH" => Step::Search {
                query: field("query"),
                text: field("text"),
            },
            "READ" => Step::Read,
            "TYPE" => Step::Type {
                selector: field("selector"),
                text: field("text"),
            },
            "FILL_FORM" => Step::FillForm,
            _ => Step::Unrecognized { action },
        }
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let named = |action: &str| RawStep {
            action: action.to_string(),
            ..RawStep::default()
        };
        match step {
            Step::OpenUrl { url } => RawStep {
                url,
                ..named("OPEN_URL")
            },
            Step::Wait { ms } => RawStep {
                ms: ms.map(Value::from),
                ..named("WAIT")
            },
            Step::Click { selector, text } => RawStep {
                selector,
                text,
                ..named("CLICK")
            },
            Step::Search { query, text } => RawStep {
                query,
                text,
                ..named("SEARCH")
            },
            Step::Read => named("READ"),
            Step::Type { selector, text } => RawStep {
                selector,
                text,
                ..named("TYPE")
            },
            Step::FillForm => named("FILL_FORM"),
            Step::Unrecognized { action } => named(&action),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    Warning,
    UnknownIntent,
}

/// Outcome of a command, handed back to whoever submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
}

impl CommandResult {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            text: None,
            plan: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Status::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Status::Warning, message)
    }

    pub fn unknown_intent(message: impl Into<String>) -> Self {
        Self::new(Status::UnknownIntent, message)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub use_language_model: bool,
    #[serde(default = "default_endpoint")]
    pub model_endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_MODEL_ENDPOINT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_language_model: false,
            model_endpoint: default_endpoint(),
        }
    }
}

/// Personal details used to autofill forms.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        [&self.name, &self.email, &self.phone, &self.address]
            .iter()
            .all(|field| field.as_deref().is_none_or(|v| v.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub command: String,
}
