//! Three-stage extraction pipeline.
//!
//! Stage 1 lists brain regions, stage 2 extracts directed projections
//! between them and stage 3 classifies the method and species behind each
//! projection. Each stage is one structured-output call; its answer is
//! validated into typed records before the next stage sees it.

use crate::error::{BifError, Result};
use crate::index::PaperMeta;
use crate::llm::{ReasoningService, StageRequest};
use crate::prompts::{classifier, projection, region};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

pub const REGION_MAX_TOKENS: u32 = 8000;
pub const PROJECTION_MAX_TOKENS: u32 = 16000;
pub const CLASSIFIER_MAX_TOKENS: u32 = 16000;

/// Document text beyond this many characters is not sent
pub const DEFAULT_MAX_TEXT_CHARS: usize = 80_000;

/// Canonical abbreviations offered to stage 1
pub const DEFAULT_REGION_HINTS: &str =
    "M1,V1,CPu,MD,CA1,Thalamus,Cerebellum,STN,SNc,GPe,GPi,PPN,SMA,pre-SMA,PFC,Hippocampus,Putamen,Caudate";

/// String-valued enum with a catch-all variant for unknown labels.
///
/// Matching is case-insensitive; `null` and unknown strings map to the
/// fallback so one odd value never fails a whole stage.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $label:literal),+ $(,)?
        }
        fallback = $fallback:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "Option<String>", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn parse(label: &str) -> Self {
                let label = label.trim();
                $(
                    if label.eq_ignore_ascii_case($label) {
                        return $name::$variant;
                    }
                )+
                $name::$fallback
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$fallback
            }
        }

        impl From<Option<String>> for $name {
            fn from(label: Option<String>) -> Self {
                label.as_deref().map(Self::parse).unwrap_or_default()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum! {
    /// Paper section a claim was found in
    pub enum Section {
        Methods => "Methods",
        Results => "Results",
        Figure => "Figure",
        Abstract => "Abstract",
        Introduction => "Introduction",
        Discussion => "Discussion",
        Other => "Other",
    }
    fallback = Other;
}

labelled_enum! {
    /// How a projection was established anatomically
    pub enum RelationType {
        Anterograde => "anterograde",
        Retrograde => "retrograde",
        Polysynaptic => "polysynaptic",
        ViaThalamus => "via_thalamus",
        ViaPons => "via_pons",
        ViaCerebellum => "via_cerebellum",
        ViaBrainstem => "via_brainstem",
        Unspecified => "unspecified",
    }
    fallback = Unspecified;
}

labelled_enum! {
    /// Experimental method behind a projection claim
    pub enum Method {
        Tracer => "Tracer study",
        Dti => "DTI/tractography",
        OptoChemo => "Opto/Chemo",
        Electrophys => "Electrophys",
        AnatomicalImaging => "Anatomical imaging/clearing",
        FunctionalImaging => "Imaging (fMRI/rsFC)",
        Review => "Review",
        Unspecified => "Unspecified",
    }
    fallback = Unspecified;
}

labelled_enum! {
    /// Species studied
    pub enum Taxon {
        Mouse => "Mouse",
        Rat => "Rat",
        NonHumanPrimate => "Non-human primate",
        Human => "Human",
        Zebrafish => "Zebrafish",
        Songbird => "Songbird",
        Cat => "Cat",
        Ferret => "Ferret",
        Other => "Other",
        Unspecified => "Unspecified",
    }
    fallback = Unspecified;
}

/// Deserializers that tolerate `null`, numbers-as-strings and the like.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        })
    }

    pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s],
            _ => Vec::new(),
        })
    }
}

/// Anything truthy becomes 1, everything else 0.
fn connection_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u8, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => u8::from(n.as_f64().is_some_and(|f| f != 0.0)),
        Some(Value::Bool(b)) => u8::from(b),
        Some(Value::String(s)) => u8::from(matches!(s.trim(), "1" | "true" | "yes")),
        _ => 0,
    })
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Brain region mention (stage 1)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    pub canonical_name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub surface_form: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub abbreviation: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub context: String,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub char_offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub confidence: f64,
}

/// Character span of a quote in the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

/// Directed projection claim (stage 2)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    pub sender: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub receiver: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub sender_surface: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub receiver_surface: String,
    #[serde(default, deserialize_with = "connection_flag")]
    pub connection_flag: u8,
    #[serde(default)]
    pub relation_type: RelationType,
    #[serde(default, deserialize_with = "lenient::string")]
    pub quote: String,
    #[serde(default)]
    pub section: Section,
    #[serde(default)]
    pub char_offset: Option<CharSpan>,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub figure_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub confidence: f64,
}

/// A projection with its method and taxon classification (stage 3)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedProjection {
    pub projection: ProjectionRecord,
    pub method: Method,
    pub method_confidence: f64,
    pub method_rationale: String,
    pub taxon: Taxon,
    pub taxon_confidence: f64,
    pub neurotransmitter: String,
}

impl ClassifiedProjection {
    /// Projection with no classification available
    pub fn unclassified(projection: ProjectionRecord) -> Self {
        Self {
            projection,
            method: Method::Unspecified,
            method_confidence: 0.0,
            method_rationale: String::new(),
            taxon: Taxon::Unspecified,
            taxon_confidence: 0.0,
            neurotransmitter: String::new(),
        }
    }
}

/// Raw stage 3 entry before it is matched to a projection
#[derive(Debug, Clone, Default, Deserialize)]
struct ClassificationEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    sender: String,
    #[serde(default, deserialize_with = "lenient::string")]
    receiver: String,
    #[serde(default, deserialize_with = "lenient::string")]
    quote: String,
    #[serde(default)]
    section: Section,
    #[serde(default)]
    method: Method,
    #[serde(default, deserialize_with = "lenient::number")]
    method_confidence: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    method_rationale: String,
    #[serde(default)]
    taxon: Taxon,
    #[serde(default, deserialize_with = "lenient::number")]
    taxon_confidence: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    neurotransmitter: String,
}

impl ClassificationEntry {
    fn matches(&self, projection: &ProjectionRecord) -> bool {
        same_region(&self.sender, &projection.sender)
            && same_region(&self.receiver, &projection.receiver)
    }

    fn apply(self, projection: ProjectionRecord) -> ClassifiedProjection {
        ClassifiedProjection {
            projection,
            method: self.method,
            method_confidence: clamp_confidence(self.method_confidence),
            method_rationale: self.method_rationale,
            taxon: self.taxon,
            taxon_confidence: clamp_confidence(self.taxon_confidence),
            neurotransmitter: self.neurotransmitter.trim().to_string(),
        }
    }

    /// Stage 3 returned a pair stage 2 never produced; keep what it told us.
    fn into_standalone(self) -> ClassifiedProjection {
        let projection = ProjectionRecord {
            sender: self.sender.trim().to_string(),
            receiver: self.receiver.trim().to_string(),
            connection_flag: 1,
            quote: self.quote.clone(),
            section: self.section,
            ..Default::default()
        };
        self.apply(projection)
    }
}

fn same_region(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Turns a document into classified projection records.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, meta: &PaperMeta) -> Result<Vec<ClassifiedProjection>>;
}

/// Region -> projection -> classification pipeline over a reasoning service
pub struct ExtractionPipeline<R> {
    service: R,
    region_hints: String,
    max_text_chars: usize,
}

impl<R: ReasoningService> ExtractionPipeline<R> {
    pub fn new(service: R) -> Self {
        Self {
            service,
            region_hints: DEFAULT_REGION_HINTS.to_string(),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    pub fn with_region_hints(mut self, hints: &str) -> Self {
        self.region_hints = hints.to_string();
        self
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn service(&self) -> &R {
        &self.service
    }

    async fn extract_regions(&self, text: &str, meta: &PaperMeta) -> Result<Vec<RegionRecord>> {
        let request = StageRequest {
            system: region::SYSTEM_PROMPT,
            user: region::build_user_prompt(
                &meta.title,
                &meta.journal,
                &meta.year,
                &meta.pmid,
                &self.region_hints,
                text,
            ),
            tool_name: region::TOOL_NAME,
            tool_description: region::TOOL_DESCRIPTION,
            schema: region::schema(),
            max_tokens: REGION_MAX_TOKENS,
        };
        let answer = self.service.call_tool(&request).await?;
        Ok(validate_regions(stage_items(&answer, "regions")?))
    }

    async fn extract_projections(
        &self,
        text: &str,
        meta: &PaperMeta,
        regions: &[RegionRecord],
    ) -> Result<Vec<ProjectionRecord>> {
        let regions_json = serde_json::to_string_pretty(regions)?;
        let request = StageRequest {
            system: projection::SYSTEM_PROMPT,
            user: projection::build_user_prompt(&meta.title, &meta.pmid, &regions_json, text),
            tool_name: projection::TOOL_NAME,
            tool_description: projection::TOOL_DESCRIPTION,
            schema: projection::schema(),
            max_tokens: PROJECTION_MAX_TOKENS,
        };
        let answer = self.service.call_tool(&request).await?;
        Ok(validate_projections(stage_items(&answer, "projections")?))
    }

    async fn classify(
        &self,
        text: &str,
        meta: &PaperMeta,
        projections: &[ProjectionRecord],
    ) -> Result<Vec<ClassificationEntry>> {
        let projections_json = serde_json::to_string_pretty(projections)?;
        let request = StageRequest {
            system: classifier::SYSTEM_PROMPT,
            user: classifier::build_user_prompt(&meta.title, &meta.pmid, &projections_json, text),
            tool_name: classifier::TOOL_NAME,
            tool_description: classifier::TOOL_DESCRIPTION,
            schema: classifier::schema(),
            max_tokens: CLASSIFIER_MAX_TOKENS,
        };
        let answer = self.service.call_tool(&request).await?;
        Ok(stage_items(&answer, "classified_projections")?)
    }
}

#[async_trait]
impl<R: ReasoningService> Extractor for ExtractionPipeline<R> {
    async fn extract(&self, text: &str, meta: &PaperMeta) -> Result<Vec<ClassifiedProjection>> {
        let text = truncate_chars(text, self.max_text_chars);
        let pmid = meta.pmid.as_str();

        let regions = self.extract_regions(text, meta).await?;
        info!(pmid = pmid, regions = regions.len(), "Stage 1 complete");
        if regions.is_empty() {
            return Ok(Vec::new());
        }

        let projections = self.extract_projections(text, meta, &regions).await?;
        info!(pmid = pmid, projections = projections.len(), "Stage 2 complete");
        if projections.is_empty() {
            return Ok(Vec::new());
        }

        match self.classify(text, meta, &projections).await {
            Ok(entries) => {
                info!(pmid = pmid, classified = entries.len(), "Stage 3 complete");
                Ok(merge_classifications(projections, entries))
            }
            Err(e) => {
                warn!(
                    pmid = pmid,
                    error = %e,
                    "Classification failed, keeping unclassified projections"
                );
                Ok(projections
                    .into_iter()
                    .map(ClassifiedProjection::unclassified)
                    .collect())
            }
        }
    }
}

/// Deserialize `answer[key]` item by item; malformed items are skipped.
fn stage_items<T: for<'de> Deserialize<'de>>(answer: &Value, key: &str) -> Result<Vec<T>> {
    let items = answer
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| BifError::Parse(format!("stage answer has no '{}' array", key)))?;

    Ok(items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(key = key, error = %e, "Skipping malformed stage item");
                None
            }
        })
        .collect())
}

fn validate_regions(regions: Vec<RegionRecord>) -> Vec<RegionRecord> {
    regions
        .into_iter()
        .filter(|r| !r.canonical_name.trim().is_empty() || !r.surface_form.trim().is_empty())
        .map(|mut r| {
            r.confidence = clamp_confidence(r.confidence);
            r
        })
        .collect()
}

fn validate_projections(projections: Vec<ProjectionRecord>) -> Vec<ProjectionRecord> {
    projections
        .into_iter()
        .filter_map(|mut p| {
            p.sender = p.sender.trim().to_string();
            p.receiver = p.receiver.trim().to_string();
            if p.sender.is_empty() || p.receiver.is_empty() {
                return None;
            }
            p.confidence = clamp_confidence(p.confidence);
            Some(p)
        })
        .collect()
}

/// Attach stage 3 answers to stage 2 projections by (sender, receiver).
fn merge_classifications(
    projections: Vec<ProjectionRecord>,
    entries: Vec<ClassificationEntry>,
) -> Vec<ClassifiedProjection> {
    let mut pending: Vec<Option<ClassificationEntry>> = entries.into_iter().map(Some).collect();

    let mut merged: Vec<ClassifiedProjection> = projections
        .into_iter()
        .map(|projection| {
            let slot = pending
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|e| e.matches(&projection)));
            match slot.and_then(Option::take) {
                Some(entry) => entry.apply(projection),
                None => ClassifiedProjection::unclassified(projection),
            }
        })
        .collect();

    merged.extend(
        pending
            .into_iter()
            .flatten()
            .filter(|e| !e.sender.trim().is_empty() && !e.receiver.trim().is_empty())
            .map(ClassificationEntry::into_standalone),
    );
    merged
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Reasoning service replaying canned answers and recording tool names.
    #[derive(Default)]
    struct ScriptedService {
        answers: Mutex<VecDeque<Result<Value>>>,
        calls: Mutex<Vec<StageRequest>>,
    }

    impl ScriptedService {
        fn new(answers: Vec<Result<Value>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::default(),
            }
        }

        fn tools_called(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().iter().map(|r| r.tool_name).collect()
        }

        fn request(&self, idx: usize) -> StageRequest {
            self.calls.lock().unwrap()[idx].clone()
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedService {
        async fn call_tool(&self, request: &StageRequest) -> Result<Value> {
            self.calls.lock().unwrap().push(request.clone());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BifError::Parse("no scripted answer".into())))
        }
    }

    fn meta() -> PaperMeta {
        PaperMeta {
            pmid: "101".into(),
            title: "Motor cortex outputs".into(),
            journal: "J Neurosci".into(),
            year: "2004".into(),
            ..Default::default()
        }
    }

    fn regions_answer() -> Value {
        json!({"regions": [
            {"canonical_name": "M1", "surface_form": "primary motor cortex", "section": "Methods", "confidence": 0.95},
            {"canonical_name": "CPu", "surface_form": "striatum", "section": "Results", "confidence": 1.7},
            {"canonical_name": "", "surface_form": "", "section": "Other", "confidence": 0.5}
        ]})
    }

    fn projections_answer() -> Value {
        json!({"projections": [
            {"sender": "M1", "receiver": "CPu", "connection_flag": 1, "relation_type": "anterograde",
             "quote": "BDA injections in M1 labeled terminals in CPu.", "section": "Methods",
             "char_offset": {"start": 10, "end": 58}, "figure_ids": ["Fig. 2A"], "confidence": 0.92},
            {"sender": "M1", "receiver": "STN", "connection_flag": "1", "relation_type": "hyperdirect",
             "quote": "M1 sends a hyperdirect projection to STN.", "section": "Discussion",
             "char_offset": {"start": 200, "end": 240}, "confidence": 0.6},
            {"sender": " ", "receiver": "GPe", "connection_flag": 0, "quote": "x", "section": "Results",
             "char_offset": {"start": 0, "end": 1}, "confidence": 0.5}
        ]})
    }

    #[tokio::test]
    async fn test_full_pipeline_merges_classification() {
        let service = ScriptedService::new(vec![
            Ok(regions_answer()),
            Ok(projections_answer()),
            Ok(json!({"classified_projections": [
                {"sender": "m1", "receiver": "cpu", "method": "Tracer study", "method_confidence": 0.9,
                 "method_rationale": "BDA injection", "taxon": "Rat", "taxon_confidence": 0.97,
                 "neurotransmitter": "glutamate"}
            ]})),
        ]);
        let pipeline = ExtractionPipeline::new(service);

        let records = pipeline.extract("full text", &meta()).await.unwrap();

        assert_eq!(
            pipeline.service().tools_called(),
            vec!["RegionExtraction", "ProjectionExtraction", "MethodTaxonClassification"]
        );
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.projection.sender, "M1");
        assert_eq!(first.projection.receiver, "CPu");
        assert_eq!(first.projection.relation_type, RelationType::Anterograde);
        assert_eq!(first.projection.figure_ids, vec!["Fig. 2A".to_string()]);
        assert_eq!(first.method, Method::Tracer);
        assert_eq!(first.taxon, Taxon::Rat);
        assert_eq!(first.neurotransmitter, "glutamate");

        // Not returned by stage 3, unknown relation type falls back
        let second = &records[1];
        assert_eq!(second.projection.receiver, "STN");
        assert_eq!(second.projection.connection_flag, 1);
        assert_eq!(second.projection.relation_type, RelationType::Unspecified);
        assert_eq!(second.method, Method::Unspecified);
        assert_eq!(second.taxon_confidence, 0.0);
    }

    #[tokio::test]
    async fn test_stage2_prompt_carries_validated_regions() {
        let service = ScriptedService::new(vec![
            Ok(regions_answer()),
            Ok(json!({"projections": []})),
        ]);
        let pipeline = ExtractionPipeline::new(service);
        pipeline.extract("text", &meta()).await.unwrap();

        let request = pipeline.service().request(1);
        assert_eq!(request.max_tokens, PROJECTION_MAX_TOKENS);
        assert!(request.user.contains("primary motor cortex"));
        // Clamped before being handed on
        assert!(request.user.contains("\"confidence\": 1.0"));
        assert!(!request.user.contains("1.7"));
    }

    #[tokio::test]
    async fn test_no_regions_skips_later_stages() {
        let service = ScriptedService::new(vec![Ok(json!({"regions": []}))]);
        let pipeline = ExtractionPipeline::new(service);

        let records = pipeline.extract("text", &meta()).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(pipeline.service().tools_called(), vec!["RegionExtraction"]);
    }

    #[tokio::test]
    async fn test_no_projections_skips_classification() {
        let service = ScriptedService::new(vec![
            Ok(regions_answer()),
            Ok(json!({"projections": []})),
        ]);
        let pipeline = ExtractionPipeline::new(service);

        let records = pipeline.extract("text", &meta()).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(pipeline.service().tools_called().len(), 2);
    }

    #[tokio::test]
    async fn test_classification_failure_degrades() {
        let service = ScriptedService::new(vec![
            Ok(regions_answer()),
            Ok(projections_answer()),
            Err(BifError::Api {
                code: 529,
                message: "overloaded".into(),
            }),
        ]);
        let pipeline = ExtractionPipeline::new(service);

        let records = pipeline.extract("text", &meta()).await.unwrap();

        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.method, Method::Unspecified);
            assert_eq!(record.method_confidence, 0.0);
            assert_eq!(record.taxon, Taxon::Unspecified);
            assert_eq!(record.taxon_confidence, 0.0);
        }
    }

    #[tokio::test]
    async fn test_region_failure_is_error() {
        let service = ScriptedService::new(vec![Ok(json!({"unexpected": true}))]);
        let pipeline = ExtractionPipeline::new(service);

        let err = pipeline.extract("text", &meta()).await.unwrap_err();
        assert!(matches!(err, BifError::Parse(_)));
        assert_eq!(pipeline.service().tools_called().len(), 1);
    }

    #[tokio::test]
    async fn test_text_is_truncated_before_prompting() {
        let service = ScriptedService::new(vec![Ok(json!({"regions": []}))]);
        let pipeline = ExtractionPipeline::new(service).with_max_text_chars(5);

        pipeline.extract("abcdefghij", &meta()).await.unwrap();

        let prompt = pipeline.service().request(0).user;
        assert!(prompt.contains("abcde\n"));
        assert!(!prompt.contains("abcdef"));
    }

    #[test]
    fn test_merge_keeps_unmatched_stage3_entries() {
        let projections = vec![ProjectionRecord {
            sender: "GPe".into(),
            receiver: "STN".into(),
            ..Default::default()
        }];
        let entries: Vec<ClassificationEntry> = serde_json::from_value(json!([
            {"sender": "SNc", "receiver": "CPu", "quote": "nigrostriatal", "method": "opto/chemo",
             "method_confidence": -3, "taxon": "Mouse", "taxon_confidence": "0.8"}
        ]))
        .unwrap();

        let merged = merge_classifications(projections, entries);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].method, Method::Unspecified);
        let extra = &merged[1];
        assert_eq!(extra.projection.sender, "SNc");
        assert_eq!(extra.projection.connection_flag, 1);
        assert_eq!(extra.method, Method::OptoChemo);
        assert_eq!(extra.method_confidence, 0.0);
        assert_eq!(extra.taxon_confidence, 0.8);
    }

    #[test]
    fn test_labelled_enums() {
        assert_eq!(Method::parse("imaging (fmri/rsfc)"), Method::FunctionalImaging);
        assert_eq!(Taxon::parse("Macaque"), Taxon::Unspecified);
        assert_eq!(Section::from(None), Section::Other);
        assert_eq!(Taxon::NonHumanPrimate.to_string(), "Non-human primate");
        assert_eq!(serde_json::to_value(Method::Dti).unwrap(), json!("DTI/tractography"));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("αβγδ", 2), "αβ");
        assert_eq!(truncate_chars("short", 80), "short");
        assert_eq!(truncate_chars("", 0), "");
    }
}
