//! Enrichment Stage
//!
//! Merges the input record with the tech-stack, ad-intelligence and registry
//! payloads into one confidence-scored profile.
//!
//! # Fusion
//! Candidate values for the same field are grouped by agreement. Agreeing
//! sources combine as
//! ```text
//! posterior = 1 - (1 - c1) * (1 - c2) * ... * (1 - cN)
//! ```
//! and the group with the highest posterior wins.
//!
//! # Failure policy
//! The stage fails only when every source it depends on failed. Any failed
//! or defaulted source, or a registry record whose name does not match the
//! input, makes the result a PartialSuccess.

use super::{missing_fetch, round_to, Stage};
use crate::config::EnrichmentConfig;
use crate::fetchers::{FetchReport, FetchedSources};
use crate::sources::{AdSignals, RegistrySignals, RegistryStatus, TechSignals};
use crate::types::{
    ConfidenceValue, Failure, Outcome, Record, SourceKind, StageName, StageOutcome, StageOutput,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Output of the Enrichment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentProfile {
    /// Best company name
    pub company_name: Option<ConfidenceValue<String>>,
    /// Best industry label
    pub industry: Option<ConfidenceValue<String>>,
    /// Best employee count
    pub employee_count: Option<ConfidenceValue<u32>>,
    /// Best annual revenue
    pub annual_revenue: Option<ConfidenceValue<f64>>,
    /// Detected technologies
    pub technologies: Vec<String>,
    /// Content management system
    pub cms: Option<String>,
    /// E-commerce platform
    pub ecommerce_platform: Option<String>,
    /// Analytics installed
    pub has_analytics: Option<bool>,
    /// Valid TLS certificate
    pub has_ssl: Option<bool>,
    /// Mobile-friendly layout
    pub mobile_friendly: Option<bool>,
    /// Ad activity (None when the source was unavailable)
    pub ads: Option<AdSignals>,
    /// Registry filing status
    pub registry_status: Option<ConfidenceValue<RegistryStatus>>,
    /// Year of incorporation
    pub incorporation_year: Option<i32>,
    /// Jaro-Winkler similarity of registry name to input name
    pub registry_name_similarity: Option<f64>,
    /// Plausible contact email present
    pub has_email: bool,
    /// Contact phone present
    pub has_phone: bool,
    /// Confidence-weighted completeness (0-1)
    pub completeness: f64,
    /// Per-field contribution to completeness (0-1)
    pub field_completeness: BTreeMap<String, f64>,
    /// Sources that answered with real data
    pub sources_used: Vec<SourceKind>,
    /// Sources that answered with a default
    pub sources_degraded: Vec<SourceKind>,
    /// Sources that failed
    pub sources_failed: Vec<SourceKind>,
}

/// Loose email plausibility: something@domain.tld
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Phone present with at least 7 digits
pub fn is_plausible_phone(phone: &str) -> bool {
    phone.chars().filter(|c| c.is_ascii_digit()).count() >= 7
}

/// Fuse candidate values, boosting agreement
///
/// Candidates are grouped with `same`; each group's confidence is the
/// agreement posterior. Ties keep the earliest group.
pub fn fuse<T: Clone>(
    candidates: Vec<ConfidenceValue<T>>,
    same: impl Fn(&T, &T) -> bool,
) -> Option<ConfidenceValue<T>> {
    let mut groups: Vec<(ConfidenceValue<T>, f64, Vec<String>)> = Vec::new();

    for candidate in candidates {
        match groups.iter_mut().find(|(lead, _, _)| same(&lead.value, &candidate.value)) {
            Some((lead, disbelief, sources)) => {
                *disbelief *= 1.0 - candidate.confidence;
                sources.push(candidate.source.clone());
                if candidate.confidence > lead.confidence {
                    lead.value = candidate.value;
                }
            }
            None => {
                let disbelief = 1.0 - candidate.confidence;
                let sources = vec![candidate.source.clone()];
                groups.push((candidate, disbelief, sources));
            }
        }
    }

    let mut best: Option<ConfidenceValue<T>> = None;
    for (lead, disbelief, sources) in groups {
        let posterior = 1.0 - disbelief;
        if best.as_ref().map_or(true, |b| posterior > b.confidence) {
            best = Some(ConfidenceValue::new(lead.value, posterior, sources.join("+")));
        }
    }
    best
}

fn same_text(a: &String, b: &String) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn normalize_name(name: &str) -> String {
    const SUFFIXES: [&str; 8] = ["ltd", "limited", "llc", "inc", "plc", "corp", "co", "gmbh"];
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !SUFFIXES.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two company names, ignoring case, punctuation and legal suffixes
pub fn name_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize_name(a), &normalize_name(b))
}

/// How a dependency answered
enum Answer<'a, P> {
    Real(&'a P),
    Default(&'a str),
    Failed(&'a Failure),
}

fn answer<P>(report: &FetchReport<P>) -> Answer<'_, P> {
    match &report.outcome {
        Outcome::Success(p) => Answer::Real(p),
        Outcome::PartialSuccess { reason, .. } => Answer::Default(reason),
        Outcome::Failure(f) => Answer::Failed(f),
    }
}

/// Technology / firmographic enrichment
pub struct EnrichmentStage {
    config: EnrichmentConfig,
}

impl EnrichmentStage {
    /// Create the stage
    pub fn new(config: EnrichmentConfig) -> Self {
        Self { config }
    }

    /// Build the profile from whatever sources answered
    pub fn merge(
        &self,
        record: &Record,
        tech: Option<&TechSignals>,
        ads: Option<&AdSignals>,
        registry: Option<&RegistrySignals>,
    ) -> (EnrichmentProfile, Option<String>) {
        let c = &self.config;
        let fields = &record.fields;
        let mut mismatch = None;

        // Registry trust scales with how well its name matches the input
        let similarity = registry
            .and_then(|r| r.registered_name.as_deref())
            .zip(fields.company_name.as_deref())
            .map(|(registered, given)| round_to(name_similarity(registered, given), 4));
        let registry_confidence = match similarity {
            Some(sim) if sim < c.name_match_threshold => {
                mismatch = Some(format!(
                    "registry name does not match input (similarity {:.2})",
                    sim
                ));
                c.registry_confidence * sim
            }
            _ => c.registry_confidence,
        };

        let company_name = fuse(
            [
                fields
                    .company_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| ConfidenceValue::new(n, c.input_confidence, "input")),
                registry
                    .and_then(|r| r.registered_name.clone())
                    .map(|n| ConfidenceValue::new(n, registry_confidence, "registry")),
            ]
            .into_iter()
            .flatten()
            .collect(),
            |a: &String, b: &String| name_similarity(a, b) >= c.name_match_threshold,
        );

        let industry = fuse(
            [
                fields
                    .industry
                    .clone()
                    .filter(|i| !i.trim().is_empty())
                    .map(|i| ConfidenceValue::new(i, c.input_confidence, "input")),
                registry
                    .and_then(|r| r.industry.clone())
                    .map(|i| ConfidenceValue::new(i, registry_confidence, "registry")),
                tech.and_then(|t| t.industry.clone())
                    .map(|i| ConfidenceValue::new(i, c.tech_confidence, "tech-stack")),
            ]
            .into_iter()
            .flatten()
            .collect(),
            same_text,
        );

        let employee_count = fuse(
            [
                fields
                    .employee_count
                    .map(|n| ConfidenceValue::new(n, c.input_confidence, "input")),
                registry
                    .and_then(|r| r.employee_count)
                    .map(|n| ConfidenceValue::new(n, registry_confidence, "registry")),
                tech.and_then(|t| t.employee_estimate)
                    .map(|n| ConfidenceValue::new(n, c.tech_confidence, "tech-stack")),
            ]
            .into_iter()
            .flatten()
            .collect(),
            |a: &u32, b: &u32| a == b,
        );

        let annual_revenue = fuse(
            [
                fields
                    .annual_revenue
                    .filter(|r| r.is_finite() && *r >= 0.0)
                    .map(|r| ConfidenceValue::new(r, c.input_confidence, "input")),
                tech.and_then(|t| t.revenue_estimate)
                    .filter(|r| r.is_finite() && *r >= 0.0)
                    .map(|r| ConfidenceValue::new(r, c.tech_confidence, "tech-stack")),
            ]
            .into_iter()
            .flatten()
            .collect(),
            |a: &f64, b: &f64| (a - b).abs() < f64::EPSILON,
        );

        let registry_status = registry
            .filter(|r| r.status != RegistryStatus::Unknown)
            .map(|r| ConfidenceValue::new(r.status, registry_confidence, "registry"));

        let has_email = fields
            .contact_email
            .as_deref()
            .is_some_and(is_plausible_email);
        let has_phone = fields
            .contact_phone
            .as_deref()
            .is_some_and(is_plausible_phone);
        let has_location = [&fields.city, &fields.region, &fields.country]
            .iter()
            .any(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()));

        let technologies = tech.map(|t| t.technologies.clone()).unwrap_or_default();
        let conf = |v: Option<f64>| v.unwrap_or(0.0);
        let field_completeness: BTreeMap<String, f64> = [
            ("company_name", conf(company_name.as_ref().map(|v| v.confidence))),
            ("industry", conf(industry.as_ref().map(|v| v.confidence))),
            ("employee_count", conf(employee_count.as_ref().map(|v| v.confidence))),
            ("annual_revenue", conf(annual_revenue.as_ref().map(|v| v.confidence))),
            (
                "technologies",
                if technologies.is_empty() { 0.0 } else { c.tech_confidence },
            ),
            ("ad_activity", if ads.is_some() { c.ads_confidence } else { 0.0 }),
            ("registry_status", conf(registry_status.as_ref().map(|v| v.confidence))),
            ("location", if has_location { c.input_confidence } else { 0.0 }),
            (
                "contact",
                if has_email || has_phone { c.input_confidence } else { 0.0 },
            ),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), round_to(value, 4)))
        .collect();

        let (weighted, total) = c
            .completeness_weights
            .entries()
            .iter()
            .fold((0.0, 0.0), |(sum, total), (name, weight)| {
                let value = field_completeness.get(*name).copied().unwrap_or(0.0);
                (sum + value * weight, total + weight)
            });
        let completeness = if total > 0.0 {
            round_to(weighted / total, 4)
        } else {
            0.0
        };

        let profile = EnrichmentProfile {
            company_name,
            industry,
            employee_count,
            annual_revenue,
            technologies,
            cms: tech.and_then(|t| t.cms.clone()),
            ecommerce_platform: tech.and_then(|t| t.ecommerce_platform.clone()),
            has_analytics: tech.and_then(|t| t.has_analytics),
            has_ssl: tech.and_then(|t| t.has_ssl),
            mobile_friendly: tech.and_then(|t| t.mobile_friendly),
            ads: ads.cloned(),
            registry_status,
            incorporation_year: registry.and_then(|r| r.incorporation_year),
            registry_name_similarity: similarity,
            has_email,
            has_phone,
            completeness,
            field_completeness,
            sources_used: Vec::new(),
            sources_degraded: Vec::new(),
            sources_failed: Vec::new(),
        };

        (profile, mismatch)
    }
}

impl Stage for EnrichmentStage {
    fn name(&self) -> StageName {
        StageName::Enrichment
    }

    fn dependencies(&self) -> &'static [SourceKind] {
        &[
            SourceKind::TechStack,
            SourceKind::AdIntelligence,
            SourceKind::Registry,
        ]
    }

    fn evaluate(&self, record: &Record, fetched: &FetchedSources) -> StageOutcome {
        let (Some(tech), Some(ads), Some(registry)) = (
            &fetched.tech_stack,
            &fetched.ad_intelligence,
            &fetched.registry,
        ) else {
            let missing = [
                (fetched.tech_stack.is_none(), SourceKind::TechStack),
                (fetched.ad_intelligence.is_none(), SourceKind::AdIntelligence),
                (fetched.registry.is_none(), SourceKind::Registry),
            ]
            .into_iter()
            .find_map(|(absent, kind)| absent.then_some(kind))
            .unwrap_or(SourceKind::TechStack);
            return missing_fetch(self.name(), missing);
        };

        let mut used = Vec::new();
        let mut degraded = Vec::new();
        let mut failed: Vec<(SourceKind, &Failure)> = Vec::new();
        let mut reasons = Vec::new();

        let tech = match answer(tech) {
            Answer::Real(t) => {
                used.push(SourceKind::TechStack);
                Some(t)
            }
            Answer::Default(reason) => {
                degraded.push(SourceKind::TechStack);
                reasons.push(reason.to_string());
                None
            }
            Answer::Failed(f) => {
                failed.push((SourceKind::TechStack, f));
                None
            }
        };
        let ads = match answer(ads) {
            Answer::Real(a) => {
                used.push(SourceKind::AdIntelligence);
                Some(a)
            }
            Answer::Default(reason) => {
                degraded.push(SourceKind::AdIntelligence);
                reasons.push(reason.to_string());
                None
            }
            Answer::Failed(f) => {
                failed.push((SourceKind::AdIntelligence, f));
                None
            }
        };
        let registry = match answer(registry) {
            Answer::Real(r) => {
                used.push(SourceKind::Registry);
                Some(r)
            }
            Answer::Default(reason) => {
                degraded.push(SourceKind::Registry);
                reasons.push(reason.to_string());
                None
            }
            Answer::Failed(f) => {
                failed.push((SourceKind::Registry, f));
                None
            }
        };

        if failed.len() == self.dependencies().len() {
            let retriable = failed.iter().all(|(_, f)| f.retriable);
            let kind = failed[0].1.kind;
            let message = failed
                .iter()
                .map(|(source, f)| format!("{}: {}", source, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Outcome::Failure(Failure {
                kind,
                retriable,
                message: format!("all enrichment sources failed ({})", message),
            });
        }

        for (source, f) in &failed {
            reasons.push(format!("{} failed: {}", source, f.message));
        }

        let (mut profile, mismatch) = self.merge(record, tech, ads, registry);
        profile.sources_used = used;
        profile.sources_degraded = degraded;
        profile.sources_failed = failed.iter().map(|(s, _)| *s).collect();
        reasons.extend(mismatch);

        debug!(
            record = %record.key,
            completeness = profile.completeness,
            sources_used = profile.sources_used.len(),
            "Enrichment merged"
        );

        if reasons.is_empty() {
            Outcome::Success(StageOutput::Enrichment(profile))
        } else {
            Outcome::PartialSuccess {
                value: StageOutput::Enrichment(profile),
                reason: reasons.join("; "),
            }
        }
    }
}
