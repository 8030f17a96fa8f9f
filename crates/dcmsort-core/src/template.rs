//! `{name}` / `{name:03d}` placeholder substitution for path and output templates.

use crate::error::Error;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)(?::([^{}]*))?\}")
            .expect("placeholder regex is valid");
    static ref FORMAT_FLAGS: Regex =
        Regex::new(r"^(0)?([0-9]+)?([ds])?$").expect("format flags regex is valid");
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Int(i) => write!(f, "{}", i),
            TemplateValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TemplateValue {
    fn from(v: i64) -> Self {
        TemplateValue::Int(v)
    }
}

impl From<usize> for TemplateValue {
    fn from(v: usize) -> Self {
        TemplateValue::Int(v as i64)
    }
}

impl From<String> for TemplateValue {
    fn from(v: String) -> Self {
        TemplateValue::Str(v)
    }
}

impl From<&str> for TemplateValue {
    fn from(v: &str) -> Self {
        TemplateValue::Str(v.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateParams {
    values: BTreeMap<String, TemplateValue>,
}

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.values.get(name)
    }
}

/// Names of the placeholders used in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Substitute every placeholder. Unknown names and unsupported format
/// flags are `PlanConfig` errors.
pub fn render(template: &str, params: &TemplateParams) -> Result<String, Error> {
    let mut failure: Option<Error> = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "{{" {
            return "{".to_string();
        }
        if whole == "}}" {
            return "}".to_string();
        }
        let name = &caps[1];
        let flags = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let result = match params.get(name) {
            Some(value) => format_value(value, flags),
            None => Err(Error::PlanConfig(format!(
                "unresolved placeholder '{{{}}}' in template '{}'",
                name, template
            ))),
        };
        match result {
            Ok(s) => s,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn format_value(value: &TemplateValue, flags: &str) -> Result<String, Error> {
    let caps = FORMAT_FLAGS
        .captures(flags)
        .ok_or_else(|| Error::PlanConfig(format!("unsupported format flags ':{}'", flags)))?;
    let zero_pad = caps.get(1).is_some();
    let width: usize = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let kind = caps.get(3).map(|m| m.as_str());

    match (value, kind) {
        (TemplateValue::Int(i), None | Some("d")) => Ok(if zero_pad {
            format!("{:0width$}", i, width = width)
        } else {
            format!("{:>width$}", i, width = width)
        }),
        (TemplateValue::Int(i), Some(_)) => Ok(format!("{:<width$}", i, width = width)),
        (TemplateValue::Str(s), None | Some("s")) => Ok(format!("{:<width$}", s, width = width)),
        (TemplateValue::Str(s), Some(k)) => Err(Error::PlanConfig(format!(
            "format code '{}' does not apply to text value '{}'",
            k, s
        ))),
    }
}
