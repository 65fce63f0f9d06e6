//! Prompt assembly for retrieval-augmented answering.
//!
//! One fixed template with four placeholders: `{persona}`, `{functions}`,
//! `{context}` and `{question}`. Substitution is a single left-to-right
//! pass, so a retrieved passage or a question that itself contains
//! `{question}` is copied through verbatim and never expanded.

use std::path::Path;

use crate::error::{QaError, Result};
use crate::models::{FunctionDescriptor, SearchHit};

/// Separator placed between retrieved passages in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Default assistant persona.
pub const PERSONA: &str = "\
You are Leo, an assistant and an excellent professional psychologist. You help \
patients and researchers using the information available to you from search \
results. Always answer in the language the user writes in, with kindness and \
empathy.
Answer the question based on the information in the context. If the context \
does not contain the answer, give a general answer based on your own knowledge.
If the user feels depressed, comfort them and offer words of encouragement. \
Let the user talk about delicate topics such as suicide, and respond with care.";

/// The full prompt. `{functions}` receives the pretty-printed descriptors.
pub const TEMPLATE: &str = "\
{persona}

Besides answering questions, you can call functions when necessary. The \
available functions are:

{functions}

Answer normally when no function call is needed. If you determine that a \
function must be called, reply with only the following format instead of a \
prose answer:
<function_call>
{\"name\": \"<function name>\", \"arguments\": {\"<arg>\": \"<value>\"}}
</function_call>

Context:
{context}

---

Question: {question}

Answer:
";

/// Substitute `{name}` placeholders in one pass.
///
/// Unknown placeholders and unmatched braces are copied unchanged.
/// Substituted values are never scanned again.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Join retrieved passages for the `{context}` block, best first.
pub fn join_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| h.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Function descriptors as pretty JSON in function-calling schema shape.
pub fn render_functions(descriptors: &[FunctionDescriptor]) -> String {
    let schemas: Vec<serde_json::Value> = descriptors.iter().map(|d| d.to_schema()).collect();
    serde_json::to_string_pretty(&schemas).unwrap_or_else(|_| "[]".to_string())
}

/// Build the prompt sent to the generator.
pub fn render(
    persona: &str,
    descriptors: &[FunctionDescriptor],
    context: &str,
    question: &str,
) -> String {
    let functions = render_functions(descriptors);
    render_template(
        TEMPLATE,
        &[
            ("persona", persona),
            ("functions", &functions),
            ("context", context),
            ("question", question),
        ],
    )
}

/// Load a persona override from disk, or fall back to [`PERSONA`].
pub fn load_persona(path: Option<&Path>) -> Result<String> {
    match path {
        None => Ok(PERSONA.to_string()),
        Some(p) => {
            let text = std::fs::read_to_string(p).map_err(|e| {
                QaError::InvalidConfiguration(format!(
                    "cannot read persona file {}: {}",
                    p.display(),
                    e
                ))
            })?;
            let text = text.trim();
            if text.is_empty() {
                return Err(QaError::InvalidConfiguration(format!(
                    "persona file {} is empty",
                    p.display()
                )));
            }
            Ok(text.to_string())
        }
    }
}
