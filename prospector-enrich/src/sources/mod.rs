//! External data sources
//!
//! Each source sits behind a [`SourceClient`]: one async call per lookup key,
//! returning a typed payload or a classified [`SourceError`]. Clients carry no
//! rate limiting, caching or retry; those belong to the fetcher wrapping them.
//!
//! # Sources
//! - **performance**: web-performance metrics for a domain
//! - **tech-stack**: technology / firmographic signals for a domain
//! - **ad-intelligence**: ad activity for a domain
//! - **registry**: public registry record for a company name (+ country)

pub mod http;
pub mod payloads;

pub use http::HttpSourceClient;
pub use payloads::{AdSignals, PerformanceMetrics, RegistrySignals, RegistryStatus, TechSignals};

use crate::types::{ErrorKind, Record, SourceKind};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Source call errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Call exceeded its deadline
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Source asked us to slow down
    #[error("Throttled by source")]
    Throttled {
        /// Server-suggested wait, if provided
        retry_after: Option<Duration>,
    },

    /// Source temporarily unavailable (5xx, connection failure)
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Waiting for rate budget exceeded its deadline
    #[error("Rate budget wait exceeded {0} ms")]
    BudgetWait(u64),

    /// Lookup entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record has no usable lookup key for this source
    #[error("Malformed lookup key: {0}")]
    MalformedKey(String),

    /// Request rejected (auth, bad request)
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response excerpt
        message: String,
    },

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl SourceError {
    /// Error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Timeout(_)
            | SourceError::Throttled { .. }
            | SourceError::Unavailable(_)
            | SourceError::BudgetWait(_) => ErrorKind::Transient,
            SourceError::NotFound(_)
            | SourceError::MalformedKey(_)
            | SourceError::Rejected { .. }
            | SourceError::Decode(_) => ErrorKind::Permanent,
        }
    }

    /// True when the fetcher should back off and call again
    ///
    /// A rate-budget wait is transient but is not retried inside the fetcher;
    /// it surfaces as a retriable failure for the stage runner instead.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_) | SourceError::Throttled { .. } | SourceError::Unavailable(_)
        )
    }

    /// Server-suggested wait before retrying
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Normalised lookup key for one source call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LookupKey(String);

impl LookupKey {
    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the key a source needs from a record
    ///
    /// Domain-keyed sources use the normalised domain. The registry uses the
    /// normalised company name, suffixed with the lowercased country when
    /// present.
    pub fn for_source(source: SourceKind, record: &Record) -> Result<Self, SourceError> {
        match source {
            SourceKind::Performance | SourceKind::TechStack | SourceKind::AdIntelligence => record
                .fields
                .domain
                .as_deref()
                .and_then(normalize_domain)
                .map(LookupKey)
                .ok_or_else(|| {
                    SourceError::MalformedKey(format!(
                        "record {} has no usable domain",
                        record.key
                    ))
                }),
            SourceKind::Registry => {
                let name = record
                    .fields
                    .company_name
                    .as_deref()
                    .and_then(normalize_company)
                    .ok_or_else(|| {
                        SourceError::MalformedKey(format!(
                            "record {} has no usable company name",
                            record.key
                        ))
                    })?;
                let country = record
                    .fields
                    .country
                    .as_deref()
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty());
                Ok(LookupKey(match country {
                    Some(country) => format!("{}|{}", name, country),
                    None => name,
                }))
            }
        }
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LookupKey {
    fn from(s: &str) -> Self {
        LookupKey(s.to_string())
    }
}

/// Normalise a website URL or domain to a bare lowercase host
///
/// Strips scheme, `www.`, path, query, port and trailing dots. Returns None
/// when nothing host-like remains.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    let without_scheme = match trimmed.find("://") {
        Some(pos) => &trimmed[pos + 3..],
        None => trimmed.as_str(),
    };
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    let valid = !host.is_empty()
        && host.contains('.')
        && !host.starts_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    valid.then(|| host.to_string())
}

/// Normalise a company name: lowercase, collapsed whitespace
pub fn normalize_company(raw: &str) -> Option<String> {
    let collapsed = raw
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// One external source behind a uniform call interface
#[async_trait]
pub trait SourceClient<P>: Send + Sync {
    /// Perform one external call for `key`
    async fn call(&self, key: &LookupKey) -> Result<P, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordFields;

    #[test]
    fn test_normalize_domain_variants() {
        assert_eq!(
            normalize_domain("https://www.Example.com/about?x=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(normalize_domain("example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(
            normalize_domain("http://shop.example.com:8080/").as_deref(),
            Some("shop.example.com")
        );
        assert_eq!(normalize_domain("example.com.").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_normalize_domain_rejects_garbage() {
        assert!(normalize_domain("").is_none());
        assert!(normalize_domain("   ").is_none());
        assert!(normalize_domain("not a domain").is_none());
        assert!(normalize_domain("localhost").is_none());
        assert!(normalize_domain("https://").is_none());
    }

    #[test]
    fn test_registry_key_includes_country() {
        let record = Record::new(
            0,
            RecordFields {
                company_name: Some("Acme  Plumbing".to_string()),
                country: Some(" GB ".to_string()),
                ..Default::default()
            },
        );
        let key = LookupKey::for_source(SourceKind::Registry, &record).unwrap();
        assert_eq!(key.as_str(), "acme plumbing|gb");
    }

    #[test]
    fn test_missing_domain_is_malformed_key() {
        let record = Record::new(
            0,
            RecordFields {
                company_name: Some("Acme".to_string()),
                ..Default::default()
            },
        );
        let err = LookupKey::for_source(SourceKind::Performance, &record).unwrap_err();
        assert!(matches!(err, SourceError::MalformedKey(_)));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_error_classification() {
        assert!(SourceError::Timeout(100).should_retry());
        assert!(SourceError::Unavailable("503".into()).should_retry());
        assert!(!SourceError::BudgetWait(100).should_retry());
        assert_eq!(SourceError::BudgetWait(100).kind(), ErrorKind::Transient);
        assert!(!SourceError::NotFound("x".into()).should_retry());
        assert_eq!(
            SourceError::Rejected {
                status: 401,
                message: "bad key".into()
            }
            .kind(),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn test_retry_after_only_for_throttled() {
        let throttled = SourceError::Throttled {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(SourceError::Timeout(5).retry_after(), None);
    }
}
