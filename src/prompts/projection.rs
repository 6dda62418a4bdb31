//! Stage 2: directed projection extraction prompts.

use super::{fill, SECTION_ENUM};
use serde_json::{json, Value};

pub const TOOL_NAME: &str = "ProjectionExtraction";

pub const TOOL_DESCRIPTION: &str = "Extract neural projections from text";

/// Relation types accepted by the schema
pub const RELATION_TYPES: [&str; 8] = [
    "anterograde",
    "retrograde",
    "polysynaptic",
    "via_thalamus",
    "via_pons",
    "via_cerebellum",
    "via_brainstem",
    "unspecified",
];

pub const SYSTEM_PROMPT: &str = r#"You are an anatomical connectivity curator. Extract every directed projection claim between brain regions, favouring precision and evidence quality.

Extract statements such as "X projects to Y", "X innervates Y", "Y receives input from X", "afferents from X to Y" and tract-based connectivity (corticospinal, thalamocortical, ...). Skip purely functional connectivity (correlation, coherence) and vague "influences" without projection language.

Direction: sender -> receiver. Use connection_flag=1 when the direction is explicit and 0 when it is only suggested.

Evidence ranking: Methods with experimental detail > Results with figure references > figure captions > Introduction/Discussion citations.

Quote: the most concrete sentence supporting the claim, at most 240 characters; prefer sentences with method cues.

relation_type: anterograde, retrograde, polysynaptic, via_thalamus, via_pons, via_cerebellum, via_brainstem, or unspecified.

Confidence:
- 0.9-1.0 Methods/Results with explicit verbs and clear direction
- 0.7-0.9 good evidence, slightly ambiguous wording
- 0.5-0.7 figure-only or indirect statements
- 0.3-0.5 Introduction/Discussion mentions without primary data

When a projection is stated several times keep the best-evidenced instance and merge its figure ids. Never invent projections, never infer them from function alone, and skip sender == receiver unless recurrence is stated. Do not classify methods; another step does that."#;

/// Placeholders: {title}, {pmid}, {regions_json}, {text}
pub const USER_PROMPT_TEMPLATE: &str = r#"# Paper Metadata
- Title: {title}
- PMID: {pmid}

# Extracted Brain Regions
{regions_json}

# Full Text
{text}

---

Task: extract ALL directed anatomical projection claims between these regions (or other regions you find) using the ProjectionExtraction tool."#;

pub fn build_user_prompt(title: &str, pmid: &str, regions_json: &str, text: &str) -> String {
    fill(
        USER_PROMPT_TEMPLATE,
        &[
            ("title", title),
            ("pmid", pmid),
            ("regions_json", regions_json),
            ("text", text),
        ],
    )
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "projections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "sender": {"type": "string"},
                        "receiver": {"type": "string"},
                        "sender_surface": {"type": "string"},
                        "receiver_surface": {"type": "string"},
                        "connection_flag": {"type": "integer", "enum": [0, 1]},
                        "relation_type": {"type": "string", "enum": RELATION_TYPES},
                        "quote": {"type": "string", "maxLength": 240},
                        "section": {"type": "string", "enum": SECTION_ENUM},
                        "char_offset": {
                            "type": "object",
                            "properties": {
                                "start": {"type": "integer"},
                                "end": {"type": "integer"}
                            },
                            "required": ["start", "end"]
                        },
                        "figure_ids": {"type": "array", "items": {"type": "string"}},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["sender", "receiver", "connection_flag", "quote", "section", "char_offset", "confidence"]
                }
            }
        },
        "required": ["projections"]
    })
}
