use std::sync::Arc;

use crate::ingest::{DecodeOption, DEFAULT_MAX_SIZE_BYTES};
use crate::options::{Expression, ExpressionList, Template};
use crate::pipeline::PipelineConfig;
use crate::stage::{ResizeSettings, StageKind, StageSpec};

use super::loader::ConfigError;
use super::types::{Config, ResizeConfig, ScopeConfig};

fn override_list(parent: &[String], child: &[String]) -> Vec<String> {
    if child.is_empty() {
        parent.to_vec()
    } else {
        child.to_vec()
    }
}

fn concat_list(parent: &[String], child: &[String]) -> Vec<String> {
    child.iter().chain(parent).cloned().collect()
}

impl ResizeConfig {
    pub fn merge(parent: &ResizeConfig, child: &ResizeConfig) -> ResizeConfig {
        ResizeConfig {
            columns: concat_list(&parent.columns, &child.columns),
            rows: concat_list(&parent.rows, &child.rows),
            filter_type: concat_list(&parent.filter_type, &child.filter_type),
            blur: concat_list(&parent.blur, &child.blur),
            factor: concat_list(&parent.factor, &child.factor),
            modulus: child.modulus.or(parent.modulus),
        }
    }
}

impl ScopeConfig {
    /// Resolve `child` against its enclosing `parent`.
    ///
    /// Stage list, size cap and the single-valued knobs are overridden by the
    /// child when set. Resize expression lists are concatenated with the
    /// child's sources first. Decode options are overlaid per key.
    pub fn merge(parent: &ScopeConfig, child: &ScopeConfig) -> ScopeConfig {
        let mut options = parent.options.clone();
        options.extend(child.options.iter().map(|(k, v)| (k.clone(), v.clone())));

        ScopeConfig {
            stages: child.stages.clone().or_else(|| parent.stages.clone()),
            max_size_bytes: child.max_size_bytes.or(parent.max_size_bytes),
            options,
            format: override_list(&parent.format, &child.format),
            colorspace: override_list(&parent.colorspace, &child.colorspace),
            interlace: override_list(&parent.interlace, &child.interlace),
            quality: override_list(&parent.quality, &child.quality),
            resize: ResizeConfig::merge(&parent.resize, &child.resize),
        }
    }

    /// Parse expressions and fill in defaults.
    pub fn compile(&self) -> Result<PipelineConfig, ConfigError> {
        let stages = self
            .stages
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|kind| self.compile_stage(*kind))
            .collect::<Result<Vec<_>, _>>()?;

        let decode_options = self
            .options
            .iter()
            .map(|(name, value)| {
                let (format, key) = split_option_name(name)?;
                Ok(DecodeOption {
                    format: format.to_string(),
                    key: key.to_string(),
                    value: Arc::new(parse_expression("options", value)?) as Arc<dyn Expression>,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(PipelineConfig {
            max_size_bytes: self.max_size_bytes.unwrap_or(DEFAULT_MAX_SIZE_BYTES),
            decode_options,
            stages,
        })
    }

    fn compile_stage(&self, kind: StageKind) -> Result<StageSpec, ConfigError> {
        let spec = match kind {
            StageKind::Format => StageSpec::Format(compile_list("format", &self.format)?),
            StageKind::Colorspace => {
                StageSpec::Colorspace(compile_list("colorspace", &self.colorspace)?)
            }
            StageKind::Interlace => StageSpec::Interlace(compile_list("interlace", &self.interlace)?),
            StageKind::Quality => StageSpec::Quality(compile_list("quality", &self.quality)?),
            StageKind::Strip => StageSpec::Strip,
            StageKind::Resize => {
                let r = &self.resize;
                StageSpec::Resize(ResizeSettings {
                    columns: compile_list("resize.columns", &r.columns)?,
                    rows: compile_list("resize.rows", &r.rows)?,
                    filter_type: compile_list("resize.filter_type", &r.filter_type)?,
                    blur: compile_list("resize.blur", &r.blur)?,
                    factor: compile_list("resize.factor", &r.factor)?,
                    modulus: r.modulus.unwrap_or(1),
                })
            }
        };
        Ok(spec)
    }

    /// Check knob values that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_bytes == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "max_size_bytes must be a size in bytes, and greater than zero".to_string(),
            });
        }
        if self.resize.modulus == Some(0) {
            return Err(ConfigError::ValidationError {
                message: "resize.modulus must be greater than zero".to_string(),
            });
        }
        for (name, value) in &self.options {
            split_option_name(name)?;
            parse_expression("options", value)?;
        }

        let lists = [
            ("format", &self.format),
            ("colorspace", &self.colorspace),
            ("interlace", &self.interlace),
            ("quality", &self.quality),
            ("resize.columns", &self.resize.columns),
            ("resize.rows", &self.resize.rows),
            ("resize.filter_type", &self.resize.filter_type),
            ("resize.blur", &self.resize.blur),
            ("resize.factor", &self.resize.factor),
        ];
        for (knob, sources) in lists {
            compile_list(knob, sources)?;
        }
        Ok(())
    }
}

impl Config {
    /// Effective scope for a request path.
    ///
    /// Every location whose path prefixes `uri_path` applies, least specific
    /// first.
    pub fn resolve_for(&self, uri_path: &str) -> ScopeConfig {
        let mut matching: Vec<_> = self
            .locations
            .iter()
            .filter(|location| uri_path.starts_with(&location.path))
            .collect();
        matching.sort_by_key(|location| location.path.len());

        matching
            .into_iter()
            .fold(self.pipeline.clone(), |resolved, location| {
                ScopeConfig::merge(&resolved, &location.scope)
            })
    }
}

fn split_option_name(name: &str) -> Result<(&str, &str), ConfigError> {
    match name.split_once(':') {
        Some((format, key)) if !format.is_empty() && !key.is_empty() => Ok((format, key)),
        _ => Err(ConfigError::ValidationError {
            message: format!("option name '{name}' must be of the form 'format:key'"),
        }),
    }
}

fn parse_expression(knob: &str, source: &str) -> Result<Template, ConfigError> {
    Template::parse(source).map_err(|source| ConfigError::Expression {
        knob: knob.to_string(),
        source,
    })
}

fn compile_list(knob: &str, sources: &[String]) -> Result<ExpressionList, ConfigError> {
    sources
        .iter()
        .map(|source| Ok(Arc::new(parse_expression(knob, source)?) as Arc<dyn Expression>))
        .collect()
}
