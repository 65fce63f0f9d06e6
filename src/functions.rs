//! Function-call detection and dispatch.
//!
//! The generator has no structured output mode, so a function call is a
//! convention inside free text. [`detect`] is a best-effort classifier over
//! that text with an explicit grammar; [`dispatch`] runs a detected call
//! against a [`FunctionRegistry`] and always returns a [`FunctionOutcome`],
//! never an error.
//!
//! # Grammar
//!
//! Two shapes are recognized, checked in this order:
//!
//! 1. **Tagged**: the first `<function_call>…</function_call>` block whose
//!    body is a JSON object with a string `name` and an object `arguments`:
//!
//!    ```text
//!    <function_call>
//!    {"name": "send_email", "arguments": {"to_email": "a@b.c", ...}}
//!    </function_call>
//!    ```
//!
//! 2. **Legacy**: a `"function_call": {"name": …, "arguments": {…}}` member,
//!    either inside a JSON object or bare in the text.
//!
//! A missing `arguments` key means no arguments. Anything else (broken
//! JSON, a non-string name, non-object arguments, an unclosed tag) is not a
//! call and the text is treated as a plain answer.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::DispatchError;
use crate::models::{FunctionCallDirective, FunctionDescriptor, FunctionOutcome, OutcomeStatus};

const OPEN_TAG: &str = "<function_call>";
const CLOSE_TAG: &str = "</function_call>";
const LEGACY_KEY: &str = "\"function_call\"";

/// A capability the model may invoke by name.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Static declaration rendered into the prompt and used for validation.
    fn descriptor(&self) -> &FunctionDescriptor;

    /// Run the capability. Arguments have already been validated against
    /// the descriptor. Returns a human-readable success message.
    async fn invoke(&self, arguments: &Map<String, Value>) -> anyhow::Result<String>;
}

/// Registered capabilities, looked up by descriptor name.
pub struct FunctionRegistry {
    capabilities: Vec<Box<dyn Capability>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Register a capability. A later registration with the same name
    /// shadows nothing: lookups return the first match.
    pub fn register(&mut self, capability: Box<dyn Capability>) {
        self.capabilities.push(capability);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities
            .iter()
            .find(|c| c.descriptor().name == name)
            .map(|c| c.as_ref())
    }

    /// Descriptors in registration order, for prompt rendering.
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.capabilities
            .iter()
            .map(|c| c.descriptor().clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of scanning generated text for a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Plain answer.
    None,
    /// A valid call to a registered function.
    Call(FunctionCallDirective),
    /// A well-formed directive that failed validation.
    Rejected { name: String, error: DispatchError },
}

/// Classify generated text.
pub fn detect(text: &str, registry: &FunctionRegistry) -> Detection {
    let directive = match parse_tagged(text).or_else(|| parse_legacy(text)) {
        Some(d) => d,
        None => return Detection::None,
    };

    let capability = match registry.find(&directive.name) {
        Some(c) => c,
        None => {
            return Detection::Rejected {
                error: DispatchError::UnknownFunction(directive.name.clone()),
                name: directive.name,
            }
        }
    };

    match validate_arguments(capability.descriptor(), &directive.arguments) {
        Ok(()) => Detection::Call(directive),
        Err(error) => Detection::Rejected {
            name: directive.name,
            error,
        },
    }
}

/// Run a detected call. Failures are captured in the outcome.
pub async fn dispatch(
    registry: &FunctionRegistry,
    directive: &FunctionCallDirective,
    timeout: Duration,
) -> FunctionOutcome {
    let capability = match registry.find(&directive.name) {
        Some(c) => c,
        None => {
            return outcome_for_rejection(
                &directive.name,
                &DispatchError::UnknownFunction(directive.name.clone()),
            )
        }
    };

    // Re-checked here so a capability is never invoked without its
    // required arguments, whoever built the directive.
    if let Err(err) = validate_arguments(capability.descriptor(), &directive.arguments) {
        return outcome_for_rejection(&directive.name, &err);
    }

    tracing::info!(function = %directive.name, "dispatching function call");

    let result = tokio::time::timeout(timeout, capability.invoke(&directive.arguments)).await;
    let failure = match result {
        Ok(Ok(message)) => {
            return FunctionOutcome {
                function: directive.name.clone(),
                status: OutcomeStatus::Success,
                error: None,
                message,
            }
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(_) => format!("timed out after {}s", timeout.as_secs()),
    };

    let err = DispatchError::CapabilityFailure {
        function: directive.name.clone(),
        message: failure,
    };
    tracing::warn!(function = %directive.name, error = %err, "function call failed");

    FunctionOutcome {
        function: directive.name.clone(),
        status: OutcomeStatus::Failed,
        error: Some(err.kind().to_string()),
        message: err.to_string(),
    }
}

/// Outcome reported for a directive that was refused before invocation.
pub fn outcome_for_rejection(name: &str, error: &DispatchError) -> FunctionOutcome {
    FunctionOutcome {
        function: name.to_string(),
        status: OutcomeStatus::Rejected,
        error: Some(error.kind().to_string()),
        message: error.to_string(),
    }
}

/// Detect and, when a call is found, dispatch it.
///
/// `None` means the text is a plain answer.
pub async fn handle(
    text: &str,
    registry: &FunctionRegistry,
    timeout: Duration,
) -> Option<FunctionOutcome> {
    match detect(text, registry) {
        Detection::None => None,
        Detection::Call(directive) => Some(dispatch(registry, &directive, timeout).await),
        Detection::Rejected { name, error } => {
            tracing::warn!(function = %name, error = %error, "function call rejected");
            Some(outcome_for_rejection(&name, &error))
        }
    }
}

fn parse_tagged(text: &str) -> Option<FunctionCallDirective> {
    let mut rest = text;
    while let Some(open) = rest.find(OPEN_TAG) {
        let body_start = &rest[open + OPEN_TAG.len()..];
        let close = body_start.find(CLOSE_TAG)?;
        if let Ok(value) = serde_json::from_str::<Value>(body_start[..close].trim()) {
            if let Some(directive) = directive_from_value(&value) {
                return Some(directive);
            }
        }
        rest = &body_start[close + CLOSE_TAG.len()..];
    }
    None
}

fn parse_legacy(text: &str) -> Option<FunctionCallDirective> {
    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find(LEGACY_KEY) {
        let after_key = search_from + pos + LEGACY_KEY.len();
        search_from = after_key;

        let rest = text[after_key..].trim_start();
        let Some(value_text) = rest.strip_prefix(':') else {
            continue;
        };

        // Parse one JSON value and ignore whatever trails it.
        let mut stream = serde_json::Deserializer::from_str(value_text).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if let Some(directive) = directive_from_value(&value) {
                return Some(directive);
            }
        }
    }
    None
}

fn directive_from_value(value: &Value) -> Option<FunctionCallDirective> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match obj.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return None,
    };
    Some(FunctionCallDirective {
        name: name.to_string(),
        arguments,
    })
}

fn type_matches(kind: &str, value: &Value) -> bool {
    match kind {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Check required presence and declared types.
fn validate_arguments(
    descriptor: &FunctionDescriptor,
    arguments: &Map<String, Value>,
) -> Result<(), DispatchError> {
    let mut invalid = Vec::new();

    for name in &descriptor.required {
        match arguments.get(name) {
            None | Some(Value::Null) => invalid.push(name.clone()),
            Some(_) => {}
        }
    }

    for (name, spec) in &descriptor.parameters {
        if let Some(value) = arguments.get(name) {
            if !value.is_null() && !type_matches(&spec.kind, value) && !invalid.contains(name) {
                invalid.push(name.clone());
            }
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::MissingArguments {
            function: descriptor.name.clone(),
            missing: invalid,
        })
    }
}
