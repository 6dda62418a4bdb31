//! Stage 1: brain region extraction prompts.

use super::{fill, SECTION_ENUM};
use serde_json::{json, Value};

/// Tool name the model is forced to call
pub const TOOL_NAME: &str = "RegionExtraction";

/// Tool description sent with the schema
pub const TOOL_DESCRIPTION: &str = "Extract brain regions from text";

/// System prompt for region extraction
pub const SYSTEM_PROMPT: &str = r#"You are a neuroscience curator who identifies brain regions named in scientific papers.

Extract every brain region the paper mentions, from large structures down to nuclei, layers and subdivisions, including abbreviations (M1, V1, CPu, MD, CA1, ...) and species-specific nomenclature.

Do not extract:
- non-neural tissue unless it is explicitly innervated
- cell types without a location ("dopaminergic neurons")
- generic terms such as "brain" or "cortex" on their own

Map a region to a name from the hint list only when you are confident ("primary motor cortex" -> "M1"); otherwise keep the original wording in surface_form.

For each region report the surrounding sentence (at most 200 characters), the section it appears in (Methods, Results, Figure, Abstract, Introduction, Discussion, Other), its character offset and a confidence:
- 0.9-1.0 standard, unambiguous nomenclature
- 0.7-0.9 common term with some ambiguity
- 0.5-0.7 non-standard or unclear naming
- 0.3-0.5 questionable reference

Methods, Results and figure captions are the most valuable sections. Your output feeds a projection extraction step."#;

/// User prompt template.
/// Placeholders: {title}, {journal}, {year}, {pmid}, {region_hints}, {text}
pub const USER_PROMPT_TEMPLATE: &str = r#"# Paper Metadata
- Title: {title}
- Journal: {journal}
- Year: {year}
- PMID: {pmid}

# Canonical Region Hints
{region_hints}

# Full Text
{text}

---

Task: extract ALL brain regions mentioned in this paper using the RegionExtraction tool."#;

/// Build the stage 1 user prompt
pub fn build_user_prompt(
    title: &str,
    journal: &str,
    year: &str,
    pmid: &str,
    region_hints: &str,
    text: &str,
) -> String {
    fill(
        USER_PROMPT_TEMPLATE,
        &[
            ("title", title),
            ("journal", journal),
            ("year", year),
            ("pmid", pmid),
            ("region_hints", region_hints),
            ("text", text),
        ],
    )
}

/// JSON schema of the tool input
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "regions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "canonical_name": {"type": "string", "description": "Canonical name from hints if mappable"},
                        "surface_form": {"type": "string", "description": "Original text form"},
                        "abbreviation": {"type": "string"},
                        "context": {"type": "string", "description": "Surrounding text, max 200 chars"},
                        "section": {"type": "string", "enum": SECTION_ENUM},
                        "char_offset": {"type": "integer"},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["canonical_name", "surface_form", "section", "confidence"]
                }
            }
        },
        "required": ["regions"]
    })
}
