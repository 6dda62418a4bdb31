//! Prompt module for the three extraction stages.
//!
//! Each stage module exposes a system prompt, a user prompt builder, the
//! tool name used to force structured output and the tool's JSON schema.

pub mod classifier;
pub mod projection;
pub mod region;

/// Substitute `{key}` placeholders in a single pass.
///
/// Inserted values are never rescanned, so paper text containing braces
/// cannot disturb the other fields.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
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

/// Section enum shared by every stage schema
pub(crate) const SECTION_ENUM: [&str; 7] = [
    "Methods",
    "Results",
    "Figure",
    "Abstract",
    "Introduction",
    "Discussion",
    "Other",
];
