//! Option resolution: ordered fallback expressions, first valid value wins.
//!
//! Every stage knob is configured as a list of [`Expression`]s. For each
//! request the list is evaluated left to right:
//!
//! - evaluation failure → reported, next source
//! - blank result (after trimming) → next source
//! - unparsable or out-of-range result → reported, next source
//! - first valid value wins
//!
//! If nothing wins the caller's static default applies. This lets a knob
//! prefer a client hint, fall back to the query string, then to a constant,
//! without the stage knowing where values come from.

mod context;
mod expr;

pub use context::RequestContext;
pub use expr::{EvalError, ExprParseError, Expression, Template};

use std::sync::Arc;

use thiserror::Error;

use crate::codec::{Colorspace, FilterType, Interlace};

/// Ordered expression sources for one knob.
pub type ExpressionList = Vec<Arc<dyn Expression>>;

/// A source that was skipped during resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("Failure while evaluating the {knob} expression '{source_text}', value skipped: {reason}")]
    ExpressionEvalFailure {
        knob: &'static str,
        source_text: String,
        reason: String,
    },

    #[error("{knob} expression '{source_text}' empty, value skipped")]
    Blank {
        knob: &'static str,
        source_text: String,
    },

    #[error("{knob} expression '{source_text}' gave '{value}', value ignored: {reason}")]
    ParseRangeFailure {
        knob: &'static str,
        source_text: String,
        value: String,
        reason: String,
    },
}

/// Outcome of resolving one knob.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The winning value, if any source produced one.
    pub value: Option<T>,
    /// Sources skipped before the winner (or all of them).
    pub issues: Vec<OptionError>,
}

impl<T> Resolved<T> {
    /// The winning value or `default`.
    pub fn or(self, default: T) -> T {
        self.value.unwrap_or(default)
    }
}

/// Value kinds a knob can resolve to.
pub trait OptionValue: Sized {
    fn parse_value(raw: &str) -> Result<Self, String>;
}

impl OptionValue for String {
    fn parse_value(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl OptionValue for u32 {
    fn parse_value(raw: &str) -> Result<Self, String> {
        raw.parse::<u32>().map_err(|e| format!("not a non-negative integer: {e}"))
    }
}

impl OptionValue for f64 {
    fn parse_value(raw: &str) -> Result<Self, String> {
        let value = raw.parse::<f64>().map_err(|e| format!("not a number: {e}"))?;
        if !value.is_finite() {
            return Err("out of range".to_string());
        }
        Ok(value)
    }
}

impl OptionValue for Colorspace {
    fn parse_value(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|e: crate::codec::UnknownName| e.to_string())
    }
}

impl OptionValue for Interlace {
    fn parse_value(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|e: crate::codec::UnknownName| e.to_string())
    }
}

impl OptionValue for FilterType {
    fn parse_value(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|e: crate::codec::UnknownName| e.to_string())
    }
}

/// Evaluates one knob's sources against a request.
#[derive(Debug, Clone, Copy)]
pub struct OptionResolver<'a> {
    knob: &'static str,
    sources: &'a [Arc<dyn Expression>],
}

impl<'a> OptionResolver<'a> {
    pub fn new(knob: &'static str, sources: &'a [Arc<dyn Expression>]) -> Self {
        Self { knob, sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn resolve<T: OptionValue>(&self, ctx: &RequestContext) -> Resolved<T> {
        self.resolve_with(ctx, T::parse_value)
    }

    /// Resolve with a knob-specific parser (ranges narrower than the kind).
    pub fn resolve_with<T>(
        &self,
        ctx: &RequestContext,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Resolved<T> {
        let mut issues = Vec::new();

        for source in self.sources {
            let issue = match source.evaluate(ctx) {
                Err(err) => OptionError::ExpressionEvalFailure {
                    knob: self.knob,
                    source_text: source.source().to_string(),
                    reason: err.reason,
                },
                Ok(raw) if raw.trim().is_empty() => OptionError::Blank {
                    knob: self.knob,
                    source_text: source.source().to_string(),
                },
                Ok(raw) => match parse(raw.trim()) {
                    Ok(value) => {
                        tracing::trace!(
                            request_id = %ctx.request_id,
                            knob = self.knob,
                            source = source.source(),
                            value = raw.trim(),
                            "Option resolved"
                        );
                        return Resolved {
                            value: Some(value),
                            issues,
                        };
                    }
                    Err(reason) => OptionError::ParseRangeFailure {
                        knob: self.knob,
                        source_text: source.source().to_string(),
                        value: raw,
                        reason,
                    },
                },
            };

            tracing::debug!(request_id = %ctx.request_id, uri = %ctx.uri, "{issue}");
            issues.push(issue);
        }

        Resolved {
            value: None,
            issues,
        }
    }
}
