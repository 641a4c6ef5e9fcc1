//! Core Types for the Enrichment Pipeline
//!
//! Defines the data model shared by every pipeline layer:
//! - **Record**: one prospect flowing through the pipeline, with its enrichment bag
//! - **Outcome**: Success / PartialSuccess / Failure for fetches and stages
//! - **RecordState**: per-record stage state machine
//! - **StageStatus** / **SkipReason**: what the Batch Result reports per stage
//!
//! # Architecture
//! Per-record sequential stage chain:
//! Performance → Enrichment → Financial-Leak → Qualification → Priority

use crate::stages::enrichment::EnrichmentProfile;
use crate::stages::financial_leak::LeakEstimate;
use crate::stages::performance::PerformanceAssessment;
use crate::stages::priority::PriorityScore;
use crate::stages::qualification::QualificationResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Sources and Stages
// ============================================================================

/// External data source behind one fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Web-performance measurement
    Performance,
    /// Technology-stack / firmographic detection
    TechStack,
    /// Ad-spend intelligence
    AdIntelligence,
    /// Public company registry
    Registry,
}

impl SourceKind {
    /// All sources in fixed order
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Performance,
        SourceKind::TechStack,
        SourceKind::AdIntelligence,
        SourceKind::Registry,
    ];

    /// Stable name used in config keys, logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Performance => "performance",
            SourceKind::TechStack => "tech-stack",
            SourceKind::AdIntelligence => "ad-intelligence",
            SourceKind::Registry => "registry",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage in the enrichment chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Web-performance sub-score
    Performance,
    /// Technology / firmographic enrichment
    Enrichment,
    /// Financial opportunity (leak) estimate
    FinancialLeak,
    /// Weighted qualification score and tier
    Qualification,
    /// Final priority rank key
    Priority,
}

impl StageName {
    /// Fixed chain order
    pub const ORDERED: [StageName; 5] = [
        StageName::Performance,
        StageName::Enrichment,
        StageName::FinancialLeak,
        StageName::Qualification,
        StageName::Priority,
    ];

    /// Stable name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Performance => "performance",
            StageName::Enrichment => "enrichment",
            StageName::FinancialLeak => "financial-leak",
            StageName::Qualification => "qualification",
            StageName::Priority => "priority",
        }
    }

    /// Position in the chain (0-based)
    pub fn position(&self) -> usize {
        match self {
            StageName::Performance => 0,
            StageName::Enrichment => 1,
            StageName::FinancialLeak => 2,
            StageName::Qualification => 3,
            StageName::Priority => 4,
        }
    }

    /// Stages after this one, in order
    pub fn following(&self) -> &'static [StageName] {
        static CHAIN: [StageName; 5] = StageName::ORDERED;
        &CHAIN[self.position() + 1..]
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Raw input fields for one prospect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFields {
    /// Company display name
    pub company_name: Option<String>,
    /// Website URL or bare domain
    pub domain: Option<String>,
    /// City
    pub city: Option<String>,
    /// State / region / province
    pub region: Option<String>,
    /// Country (name or ISO code)
    pub country: Option<String>,
    /// Industry label as supplied
    pub industry: Option<String>,
    /// Employee count as supplied
    pub employee_count: Option<u32>,
    /// Annual revenue as supplied
    pub annual_revenue: Option<f64>,
    /// Primary contact name
    pub contact_name: Option<String>,
    /// Primary contact email
    pub contact_email: Option<String>,
    /// Primary contact phone
    pub contact_phone: Option<String>,
    /// Any further columns, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One prospect flowing through the pipeline
///
/// `input_index` is the record's position in the batch input and is the
/// stable tie-break key for ranking. The enrichment bag is written only by
/// the stage that owns each entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier (normalised domain, else company key)
    pub key: String,
    /// Position in the batch input (0-based)
    pub input_index: usize,
    /// Raw input fields
    pub fields: RecordFields,
    /// Typed stage outputs
    pub bag: EnrichmentBag,
}

impl Record {
    /// Create a record with a key derived from its fields
    pub fn new(input_index: usize, fields: RecordFields) -> Self {
        let key = derive_record_key(input_index, &fields);
        Self {
            key,
            input_index,
            fields,
            bag: EnrichmentBag::default(),
        }
    }
}

/// Stable key: normalised domain, else normalised company name, else position
pub fn derive_record_key(input_index: usize, fields: &RecordFields) -> String {
    if let Some(domain) = fields
        .domain
        .as_deref()
        .and_then(crate::sources::normalize_domain)
    {
        return domain;
    }
    if let Some(name) = fields
        .company_name
        .as_deref()
        .and_then(crate::sources::normalize_company)
    {
        return name;
    }
    format!("record-{}", input_index)
}

/// Mapping from stage to that stage's typed output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentBag {
    outputs: BTreeMap<StageName, StageOutput>,
}

impl EnrichmentBag {
    /// Store a stage output under its owning stage
    pub fn insert(&mut self, output: StageOutput) {
        self.outputs.insert(output.stage(), output);
    }

    /// Output for a stage, if that stage produced one
    pub fn get(&self, stage: StageName) -> Option<&StageOutput> {
        self.outputs.get(&stage)
    }

    /// Stages with outputs
    pub fn stages(&self) -> impl Iterator<Item = StageName> + '_ {
        self.outputs.keys().copied()
    }

    /// Number of stored outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// True when no stage has produced output
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Performance stage output
    pub fn performance(&self) -> Option<&PerformanceAssessment> {
        match self.outputs.get(&StageName::Performance) {
            Some(StageOutput::Performance(p)) => Some(p),
            _ => None,
        }
    }

    /// Enrichment stage output
    pub fn enrichment(&self) -> Option<&EnrichmentProfile> {
        match self.outputs.get(&StageName::Enrichment) {
            Some(StageOutput::Enrichment(e)) => Some(e),
            _ => None,
        }
    }

    /// Financial-leak stage output
    pub fn leak(&self) -> Option<&LeakEstimate> {
        match self.outputs.get(&StageName::FinancialLeak) {
            Some(StageOutput::FinancialLeak(l)) => Some(l),
            _ => None,
        }
    }

    /// Qualification stage output
    pub fn qualification(&self) -> Option<&QualificationResult> {
        match self.outputs.get(&StageName::Qualification) {
            Some(StageOutput::Qualification(q)) => Some(q),
            _ => None,
        }
    }

    /// Priority stage output
    pub fn priority(&self) -> Option<&PriorityScore> {
        match self.outputs.get(&StageName::Priority) {
            Some(StageOutput::Priority(p)) => Some(p),
            _ => None,
        }
    }
}

/// Typed output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StageOutput {
    /// Performance sub-score
    Performance(PerformanceAssessment),
    /// Merged technology / firmographic profile
    Enrichment(EnrichmentProfile),
    /// Opportunity estimate
    FinancialLeak(LeakEstimate),
    /// Qualification score and tier
    Qualification(QualificationResult),
    /// Final rank key
    Priority(PriorityScore),
}

impl StageOutput {
    /// Stage that owns this output
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Performance(_) => StageName::Performance,
            StageOutput::Enrichment(_) => StageName::Enrichment,
            StageOutput::FinancialLeak(_) => StageName::FinancialLeak,
            StageOutput::Qualification(_) => StageName::Qualification,
            StageOutput::Priority(_) => StageName::Priority,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Error classification carried by failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Timeout, throttling, temporary unavailability
    Transient,
    /// Malformed key, entity does not exist, request rejected
    Permanent,
    /// Unexpected error inside the pipeline (caught at the record boundary)
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Internal => "internal",
        })
    }
}

/// Failure payload of an [`Outcome`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Error classification
    pub kind: ErrorKind,
    /// Whether re-running may succeed
    pub retriable: bool,
    /// Human-readable cause
    pub message: String,
}

impl Failure {
    /// Non-retriable failure
    pub fn terminal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: false,
            message: message.into(),
        }
    }

    /// Retriable failure
    pub fn retriable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retriable: true,
            message: message.into(),
        }
    }
}

/// Result of one fetch or one stage evaluation
///
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Full result
    Success(T),
    /// Usable result with a degraded input
    PartialSuccess {
        /// The (possibly defaulted) value
        value: T,
        /// Why the value is degraded
        reason: String,
    },
    /// No usable result
    Failure(Failure),
}

impl<T> Outcome<T> {
    /// Value for Success / PartialSuccess
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) | Outcome::PartialSuccess { value: v, .. } => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    /// Failure payload, if failed
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// True for Failure with `retriable = true`
    pub fn is_retriable_failure(&self) -> bool {
        matches!(self, Outcome::Failure(f) if f.retriable)
    }

    /// Map the carried value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::PartialSuccess { value, reason } => Outcome::PartialSuccess {
                value: f(value),
                reason,
            },
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }
}

/// Outcome of one stage on one record
pub type StageOutcome = Outcome<StageOutput>;

// ============================================================================
// Per-record reporting
// ============================================================================

/// Why a stage did not run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "kebab-case")]
pub enum SkipReason {
    /// An earlier stage failed terminally
    Failure {
        /// Stage that failed
        stage: StageName,
    },
    /// Business policy gate (e.g. opportunity below minimum)
    Policy {
        /// Stage whose output tripped the gate
        stage: StageName,
        /// Gate explanation
        reason: String,
    },
    /// Batch cancelled before the record started
    Cancelled,
}

/// Terminal status of one stage for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StageStatus {
    /// Success
    Completed,
    /// PartialSuccess
    Degraded {
        /// Degradation cause
        reason: String,
    },
    /// Terminal failure
    Failed {
        /// Error classification
        kind: ErrorKind,
        /// Failure cause
        message: String,
    },
    /// Not run
    Skipped(SkipReason),
}

impl StageStatus {
    /// Short label for events and logs
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Degraded { .. } => "degraded",
            StageStatus::Failed { .. } => "failed",
            StageStatus::Skipped(SkipReason::Failure { .. }) => "skipped-failure",
            StageStatus::Skipped(SkipReason::Policy { .. }) => "skipped-policy",
            StageStatus::Skipped(SkipReason::Cancelled) => "skipped-cancelled",
        }
    }
}

/// Per-record stage state machine
///
/// Transitions fire only on a terminal stage outcome, in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RecordState {
    /// No stage has completed
    Pending,
    /// Performance stage terminal
    PerformanceDone,
    /// Enrichment stage terminal
    Enriched,
    /// Financial-leak stage terminal
    LeakAnalyzed,
    /// Qualification stage terminal
    Qualified,
    /// Priority stage terminal
    Prioritized,
    /// Terminal: a stage failed
    Failed {
        /// Failing stage
        stage: StageName,
    },
    /// Terminal: remaining stages skipped by policy or cancellation
    Skipped {
        /// Skip cause
        reason: SkipReason,
    },
}

impl RecordState {
    /// Next stage to run, None when terminal
    pub fn next_stage(&self) -> Option<StageName> {
        match self {
            RecordState::Pending => Some(StageName::Performance),
            RecordState::PerformanceDone => Some(StageName::Enrichment),
            RecordState::Enriched => Some(StageName::FinancialLeak),
            RecordState::LeakAnalyzed => Some(StageName::Qualification),
            RecordState::Qualified => Some(StageName::Priority),
            RecordState::Prioritized
            | RecordState::Failed { .. }
            | RecordState::Skipped { .. } => None,
        }
    }

    /// State after `stage` produced a usable output
    ///
    /// Returns None if `stage` is not the next stage for this state.
    pub fn advance(&self, stage: StageName) -> Option<RecordState> {
        if self.next_stage() != Some(stage) {
            return None;
        }
        Some(match stage {
            StageName::Performance => RecordState::PerformanceDone,
            StageName::Enrichment => RecordState::Enriched,
            StageName::FinancialLeak => RecordState::LeakAnalyzed,
            StageName::Qualification => RecordState::Qualified,
            StageName::Priority => RecordState::Prioritized,
        })
    }

    /// True once no further stage will run
    pub fn is_terminal(&self) -> bool {
        self.next_stage().is_none()
    }
}

/// Record-level classification used by the Batch Result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    /// Every stage completed without degradation
    Succeeded,
    /// Reached the final stage with at least one degraded stage
    Degraded,
    /// Stopped by a business policy gate
    Filtered,
    /// A stage failed terminally
    Failed,
    /// Never started because the batch was cancelled
    Cancelled,
}

impl RecordStatus {
    /// Short label for events and logs
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Succeeded => "succeeded",
            RecordStatus::Degraded => "degraded",
            RecordStatus::Filtered => "filtered",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
        }
    }

    /// True when the record reached the Priority stage
    pub fn reached_priority(&self) -> bool {
        matches!(self, RecordStatus::Succeeded | RecordStatus::Degraded)
    }
}

// ============================================================================
// Confidence-scored values
// ============================================================================

/// Value with its source provenance and confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceValue<T> {
    /// Value
    pub value: T,
    /// Confidence score (0.0-1.0)
    pub confidence: f64,
    /// Source that provided this value ("input", "registry", ...)
    pub source: String,
}

impl<T> ConfidenceValue<T> {
    /// Create new confidence value with clamped confidence (0.0-1.0)
    pub fn new(value: T, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_value_clamping() {
        let cv = ConfidenceValue::new("test".to_string(), 1.5, "registry");
        assert_eq!(cv.confidence, 1.0, "Confidence should be clamped to 1.0");

        let cv2 = ConfidenceValue::new("test".to_string(), -0.5, "registry");
        assert_eq!(cv2.confidence, 0.0, "Confidence should be clamped to 0.0");
    }

    #[test]
    fn test_state_machine_walks_chain_in_order() {
        let mut state = RecordState::Pending;
        for stage in StageName::ORDERED {
            assert_eq!(state.next_stage(), Some(stage));
            state = state.advance(stage).unwrap();
        }
        assert_eq!(state, RecordState::Prioritized);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_state_machine_rejects_out_of_order_stage() {
        let state = RecordState::Pending;
        assert!(state.advance(StageName::Qualification).is_none());

        let failed = RecordState::Failed {
            stage: StageName::Performance,
        };
        assert!(failed.advance(StageName::Enrichment).is_none());
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_following_stages() {
        assert_eq!(StageName::Performance.following().len(), 4);
        assert_eq!(
            StageName::FinancialLeak.following(),
            &[StageName::Qualification, StageName::Priority]
        );
        assert!(StageName::Priority.following().is_empty());
    }

    #[test]
    fn test_record_key_prefers_domain() {
        let fields = RecordFields {
            company_name: Some("Acme Plumbing LLC".to_string()),
            domain: Some("https://www.AcmePlumbing.com/contact".to_string()),
            ..Default::default()
        };
        assert_eq!(Record::new(0, fields).key, "acmeplumbing.com");
    }

    #[test]
    fn test_record_key_falls_back_to_company_then_index() {
        let named = RecordFields {
            company_name: Some("  Acme   Plumbing ".to_string()),
            ..Default::default()
        };
        assert_eq!(Record::new(3, named).key, "acme plumbing");

        let anonymous = RecordFields::default();
        assert_eq!(Record::new(7, anonymous).key, "record-7");
    }

    #[test]
    fn test_outcome_map_preserves_reason() {
        let outcome: Outcome<u32> = Outcome::PartialSuccess {
            value: 2,
            reason: "defaulted".to_string(),
        };
        match outcome.map(|v| v * 10) {
            Outcome::PartialSuccess { value, reason } => {
                assert_eq!(value, 20);
                assert_eq!(reason, "defaulted");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_retriable_failure_detection() {
        let retriable: Outcome<()> =
            Outcome::Failure(Failure::retriable(ErrorKind::Transient, "budget wait"));
        let terminal: Outcome<()> =
            Outcome::Failure(Failure::terminal(ErrorKind::Permanent, "not found"));
        assert!(retriable.is_retriable_failure());
        assert!(!terminal.is_retriable_failure());
    }

    #[test]
    fn test_record_fields_deserialize_partial_json() {
        let fields: RecordFields =
            serde_json::from_str(r#"{"company_name":"Acme","employee_count":12}"#).unwrap();
        assert_eq!(fields.company_name.as_deref(), Some("Acme"));
        assert_eq!(fields.employee_count, Some(12));
        assert!(fields.domain.is_none());
    }
}
