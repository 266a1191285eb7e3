//! String expressions interpolating request values.
//!
//! A template is literal text with `%{NAME}` references:
//!
//! | Reference | Value |
//! |---|---|
//! | `%{QUERY_STRING}` | raw query string |
//! | `%{REQUEST_URI}` | full request URI |
//! | `%{PATH}` | URI path |
//! | `%{req:Name}` / `%{http:Name}` | request header, empty if absent |
//! | `%{query:name}` | query parameter, empty if absent |
//! | `%{env:name}` | request variable, evaluation fails if unset |

use std::fmt;

use thiserror::Error;

use super::RequestContext;

/// Failure while evaluating an expression for one request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct EvalError {
    pub reason: String,
}

/// Failure while parsing an expression at configuration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot parse expression '{source_text}': {reason}")]
pub struct ExprParseError {
    pub source_text: String,
    pub reason: String,
}

/// A configured value source, evaluated per request.
pub trait Expression: Send + Sync + fmt::Debug {
    /// The text the expression was configured from.
    fn source(&self) -> &str;

    fn evaluate(&self, ctx: &RequestContext) -> Result<String, EvalError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Variable {
    QueryString,
    RequestUri,
    Path,
    Header(String),
    Query(String),
    Env(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Variable(Variable),
}

/// Parsed `%{...}` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ExprParseError> {
        let fail = |reason: String| ExprParseError {
            source_text: source.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("%{") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(fail("unterminated '%{' reference".to_string()));
            };
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::Variable(parse_variable(&after[..end]).map_err(fail)?));
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// A template with no references.
    pub fn literal(text: &str) -> Self {
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![Part::Literal(text.to_string())]
        };
        Self {
            source: text.to_string(),
            parts,
        }
    }
}

fn parse_variable(name: &str) -> Result<Variable, String> {
    let name = name.trim();
    match name {
        "QUERY_STRING" => return Ok(Variable::QueryString),
        "REQUEST_URI" => return Ok(Variable::RequestUri),
        "PATH" => return Ok(Variable::Path),
        _ => {}
    }

    let Some((prefix, arg)) = name.split_once(':') else {
        return Err(format!("unknown variable '{name}'"));
    };
    if arg.is_empty() {
        return Err(format!("'{prefix}:' needs a name"));
    }
    match prefix {
        "req" | "http" => Ok(Variable::Header(arg.to_string())),
        "query" => Ok(Variable::Query(arg.to_string())),
        "env" => Ok(Variable::Env(arg.to_string())),
        _ => Err(format!("unknown function '{prefix}'")),
    }
}

impl Expression for Template {
    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(&self, ctx: &RequestContext) -> Result<String, EvalError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Variable(Variable::QueryString) => out.push_str(ctx.query_string()),
                Part::Variable(Variable::RequestUri) => out.push_str(&ctx.uri),
                Part::Variable(Variable::Path) => out.push_str(ctx.path()),
                Part::Variable(Variable::Header(name)) => {
                    out.push_str(ctx.header(name).unwrap_or_default())
                }
                Part::Variable(Variable::Query(name)) => {
                    out.push_str(ctx.query_param(name).unwrap_or_default())
                }
                Part::Variable(Variable::Env(name)) => match ctx.var(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(EvalError {
                            reason: format!("variable '{name}' is not set"),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}
