//! Stage 3: method and taxon classification prompts.

use super::fill;
use serde_json::{json, Value};

pub const TOOL_NAME: &str = "MethodTaxonClassification";

pub const TOOL_DESCRIPTION: &str = "Classify experimental methods and species";

pub const METHODS: [&str; 8] = [
    "Tracer study",
    "DTI/tractography",
    "Opto/Chemo",
    "Electrophys",
    "Anatomical imaging/clearing",
    "Imaging (fMRI/rsFC)",
    "Review",
    "Unspecified",
];

pub const TAXA: [&str; 10] = [
    "Mouse",
    "Rat",
    "Non-human primate",
    "Human",
    "Zebrafish",
    "Songbird",
    "Cat",
    "Ferret",
    "Other",
    "Unspecified",
];

pub const SYSTEM_PROMPT: &str = r#"You classify the experimental method and the species behind each neural projection claim.

Read the local context of each quote first, then the paper's Methods section.

Methods (pick the one that most directly establishes the projection; priority Tracer > DTI > Opto/Chemo > Electrophys > Anatomical imaging > fMRI/rsFC > Review):
- Tracer study: PHA-L, BDA, Fluoro-Gold, CTB, WGA-HRP, HRP, rabies, PRV, HSV, AAV, anterograde/retrograde tracer or virus injections
- DTI/tractography: diffusion tensor imaging, DWI, diffusion MRI, fiber tracking, probabilistic or deterministic tracking
- Opto/Chemo: optogenetics, ChR2, halorhodopsin, ArchT, DREADD, CNO, photostimulation
- Electrophys: single/multi-unit recording, LFP, patch clamp, whole-cell, ECoG
- Anatomical imaging/clearing: CLARITY, iDISCO, CUBIC, light-sheet, fMOST, serial two-photon tomography, MAPseq, MEMRI
- Imaging (fMRI/rsFC): fMRI, BOLD, resting-state or effective connectivity, PET
- Review: reviews and meta-analyses
- Unspecified: no clear indicator

Taxa: Mouse, Rat, Non-human primate, Human, Zebrafish, Songbird, Cat, Ferret, Other, Unspecified. Look for species cues near the quote, then in Methods, then in the title and abstract.

Method confidence: 0.9-1.0 explicit keywords nearby, 0.7-0.9 clear from Methods, 0.5-0.7 indirect, 0.3-0.5 very uncertain.
Taxon confidence: 0.95-1.0 stated nearby or in Methods, 0.8-0.95 elsewhere in the paper, 0.5-0.8 inferred from the usual model system, below 0.5 highly uncertain.

Return one entry per input projection, keeping its sender and receiver unchanged, with a short method_rationale and a neurotransmitter when one is clearly stated."#;

/// Placeholders: {title}, {pmid}, {projections_json}, {text}
pub const USER_PROMPT_TEMPLATE: &str = r#"# Paper Metadata
- Title: {title}
- PMID: {pmid}

# Projection Records to Classify
{projections_json}

# Full Text (for method/taxon context)
{text}

---

Task: for each projection determine the experimental METHOD, the TAXON and any clearly stated NEUROTRANSMITTER, and report them with the MethodTaxonClassification tool."#;

pub fn build_user_prompt(title: &str, pmid: &str, projections_json: &str, text: &str) -> String {
    fill(
        USER_PROMPT_TEMPLATE,
        &[
            ("title", title),
            ("pmid", pmid),
            ("projections_json", projections_json),
            ("text", text),
        ],
    )
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "classified_projections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "sender": {"type": "string"},
                        "receiver": {"type": "string"},
                        "quote": {"type": "string"},
                        "section": {"type": "string"},
                        "method": {"type": "string", "enum": METHODS},
                        "method_confidence": {"type": "number", "minimum": 0, "maximum": 1},
                        "method_rationale": {"type": "string"},
                        "taxon": {"type": "string", "enum": TAXA},
                        "taxon_confidence": {"type": "number", "minimum": 0, "maximum": 1},
                        "neurotransmitter": {"type": "string"}
                    },
                    "required": ["sender", "receiver", "method", "method_confidence", "taxon", "taxon_confidence"]
                }
            }
        },
        "required": ["classified_projections"]
    })
}
