//! Source payload types
//!
//! Minimal typed shapes the stages consume. Every field is optional or
//! defaulted so partial vendor responses still decode.

use serde::{Deserialize, Serialize};

/// Web-performance metrics for one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMetrics {
    /// Largest Contentful Paint (ms)
    pub lcp_ms: Option<f64>,
    /// First Contentful Paint (ms)
    pub fcp_ms: Option<f64>,
    /// Total Blocking Time (ms)
    pub tbt_ms: Option<f64>,
    /// Cumulative Layout Shift (unitless)
    pub cls: Option<f64>,
    /// Time To First Byte (ms)
    pub ttfb_ms: Option<f64>,
    /// Vendor overall score (0-100), used when no metric is present
    pub overall_score: Option<f64>,
}

impl PerformanceMetrics {
    /// Number of individual metrics present
    pub fn measured_count(&self) -> usize {
        [self.lcp_ms, self.fcp_ms, self.tbt_ms, self.cls, self.ttfb_ms]
            .iter()
            .filter(|m| m.is_some())
            .count()
    }
}

/// Technology / firmographic signals for one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechSignals {
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
    /// Estimated headcount
    pub employee_estimate: Option<u32>,
    /// Estimated annual revenue
    pub revenue_estimate: Option<f64>,
    /// Detected industry
    pub industry: Option<String>,
}

/// Ad activity for one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdSignals {
    /// Currently running ads
    pub active: bool,
    /// Platforms with ads (e.g. "google", "meta")
    pub platforms: Vec<String>,
    /// Number of live creatives
    pub ad_count: u32,
    /// Estimated monthly ad spend
    pub estimated_monthly_spend: Option<f64>,
}

/// Registry filing status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryStatus {
    /// Trading
    Active,
    /// Dissolved / struck off
    Dissolved,
    /// Anything else the registry reports
    #[default]
    #[serde(other)]
    Unknown,
}

/// Public registry record for one company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySignals {
    /// Registered legal name
    pub registered_name: Option<String>,
    /// Registry number
    pub registration_number: Option<String>,
    /// Filing status
    pub status: RegistryStatus,
    /// Year of incorporation
    pub incorporation_year: Option<i32>,
    /// Reported employee count
    pub employee_count: Option<u32>,
    /// Industry classification (e.g. SIC description)
    pub industry: Option<String>,
}
