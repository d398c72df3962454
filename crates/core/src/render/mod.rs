//! View rendering for HTML pages. Templates are files named after the view with an optional
//! locale suffix (`index_de_DE.html`, `index_de.html`, `index.html`), written in minijinja syntax
//! and filled from a JSON model.

use crate::error::ValidationError;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod files;

pub use files::FileTemplates;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template not found: {view} (locale {locale})")]
    NotFound { view: String, locale: String },

    #[error("template name error: {view:?}: {reason}")]
    MalformedName { view: String, reason: String },

    #[error("template render error in {view}: {detail}")]
    Processing { view: String, detail: String },

    #[error("template io error for {view}")]
    Io {
        view: String,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    /// Missing or badly named templates: fix the deployment, retrying will not help.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::MalformedName { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, view: &str, model: &Value, locale: &Locale) -> Result<String, RenderError>;
}

/// Parsed-template cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateCache {
    /// Re-read and re-parse on every render.
    None,
    /// Keep up to this many parsed templates, evicting the least recently used.
    Bounded(usize),
}

impl FromStr for TemplateCache {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "none" | "off" | "false" | "0" => Ok(Self::None),
            other => other
                .parse::<usize>()
                .map(Self::Bounded)
                .map_err(|_| ValidationError::Invalid {
                    field: "TEMPLATE_CACHE",
                    reason: format!("expected none or a capacity, got {other:?}"),
                }),
        }
    }
}

/// Language tag such as `en`, `de_DE` or `de-DE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    pub fn parse(tag: &str) -> Result<Self, ValidationError> {
        let mut parts = tag.trim().split(['_', '-']);
        let language = parts.next().unwrap_or_default().to_ascii_lowercase();
        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::Invalid {
                field: "locale",
                reason: format!("bad language in {tag:?}"),
            });
        }

        let region = match parts.next() {
            Some(r) if !r.is_empty() && r.chars().all(|c| c.is_ascii_alphanumeric()) => {
                Some(r.to_ascii_uppercase())
            }
            Some(_) => {
                return Err(ValidationError::Invalid {
                    field: "locale",
                    reason: format!("bad region in {tag:?}"),
                })
            }
            None => None,
        };

        Ok(Self { language, region })
    }

    /// File-name suffixes from most to least specific, ending with the unsuffixed name.
    pub fn suffixes(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(3);
        if let Some(region) = &self.region {
            out.push(format!("_{}_{}", self.language, region));
        }
        out.push(format!("_{}", self.language));
        out.push(String::new());
        out
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}_{}", self.language, region),
            None => f.write_str(&self.language),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_suffixes_fall_back_to_plain_name() {
        let de = Locale::parse("de-de").unwrap();
        assert_eq!(de.to_string(), "de_DE");
        assert_eq!(de.suffixes(), vec!["_de_DE", "_de", ""]);
        assert_eq!(Locale::parse("en").unwrap().suffixes(), vec!["_en", ""]);
        assert!(Locale::parse("").is_err());
        assert!(Locale::parse("e1").is_err());
    }

    #[test]
    fn parses_cache_setting() {
        assert_eq!("none".parse::<TemplateCache>().unwrap(), TemplateCache::None);
        assert_eq!("300".parse::<TemplateCache>().unwrap(), TemplateCache::Bounded(300));
        assert!("lots".parse::<TemplateCache>().is_err());
    }
}
