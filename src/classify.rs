//! Synthesis failure classification.
//!
//! The synth tool only reports failures as unstructured stderr, so
//! classification is a first-match-wins scan over an ordered rule table.
//! `is_fatal` uses a narrower marker set: a false positive there would skip a
//! fallback strategy that could have succeeded.
use crate::config::{self, SynthConfig};
use crate::environment::Language;
use crate::util::bounded_excerpt;
use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RuntimeIncompatibility,
    MissingDependencies,
    CredentialUnavailable,
    Timeout,
    UnknownOrSyntax,
}

/// Self-contained description of why synthesis failed and what to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDiagnosis {
    pub category: ErrorCategory,
    pub message: String,
    pub technical_excerpt: String,
    pub recommendations: Vec<String>,
    pub user_fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_marker: Option<String>,
}

impl ErrorDiagnosis {
    pub fn cancelled() -> Self {
        Self {
            category: ErrorCategory::UnknownOrSyntax,
            message: "CDK synthesis was cancelled before it completed".to_string(),
            technical_excerpt: "cancelled".to_string(),
            recommendations: vec!["Re-run the analysis to synthesize this app".to_string()],
            user_fixable: false,
            matched_marker: None,
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub category: ErrorCategory,
    pub markers: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    pub message: String,
    pub recommendations: Vec<String>,
    pub user_fixable: bool,
}

struct CompiledRule {
    rule: ClassifierRule,
    pattern: Regex,
}

/// Compiled classification table plus the fatal marker set.
pub struct Classifier {
    rules: Vec<CompiledRule>,
    fatal: Option<Regex>,
    excerpt_max_chars: usize,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("rules", &self.rules.len())
            .field("fatal", &self.fatal.as_ref().map(Regex::as_str))
            .field("excerpt_max_chars", &self.excerpt_max_chars)
            .finish()
    }
}

fn marker_pattern(markers: &[String], case_insensitive: bool) -> Result<Regex> {
    let alternation = markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .map(|marker| regex::escape(marker))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(case_insensitive)
        .build()
        .with_context(|| format!("compile marker pattern {alternation:?}"))
}

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI escape pattern"))
}

/// Strip terminal color codes the synth tool emits even when piped.
pub fn strip_ansi(text: &str) -> String {
    ansi_escape().replace_all(text, "").into_owned()
}

impl Classifier {
    pub fn new(
        rules: &[ClassifierRule],
        fatal_markers: &[String],
        excerpt_max_chars: usize,
    ) -> Result<Self> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                if rule.markers.iter().all(|marker| marker.is_empty()) {
                    return Err(anyhow!("classifier rule {idx} has no markers"));
                }
                let pattern = marker_pattern(&rule.markers, rule.case_insensitive)
                    .with_context(|| format!("classifier rule {idx}"))?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // An empty alternation would match everything.
        let fatal = if fatal_markers.iter().all(|marker| marker.is_empty()) {
            None
        } else {
            Some(marker_pattern(fatal_markers, false).context("fatal markers")?)
        };
        Ok(Self {
            rules,
            fatal,
            excerpt_max_chars,
        })
    }

    pub fn from_config(config: &SynthConfig) -> Result<Self> {
        Self::new(
            &config.classifier_rules,
            &config.fatal_markers,
            config.excerpt_max_chars,
        )
    }

    /// True when no alternate invocation strategy could repair the failure.
    pub fn is_fatal(&self, diagnostic_text: &str) -> bool {
        self.fatal
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(diagnostic_text))
    }

    pub fn classify(&self, diagnostic_text: &str, language: Language) -> ErrorDiagnosis {
        let cleaned = strip_ansi(diagnostic_text);
        let excerpt = if cleaned.trim().is_empty() {
            "no diagnostic output captured".to_string()
        } else {
            bounded_excerpt(&cleaned, self.excerpt_max_chars)
        };

        for compiled in &self.rules {
            if let Some(found) = compiled.pattern.find(&cleaned) {
                let rule = &compiled.rule;
                return ErrorDiagnosis {
                    category: rule.category,
                    message: rule.message.clone(),
                    technical_excerpt: excerpt,
                    recommendations: rule
                        .recommendations
                        .iter()
                        .map(|text| render_recommendation(text, language))
                        .collect(),
                    user_fixable: rule.user_fixable,
                    matched_marker: Some(found.as_str().to_string()),
                };
            }
        }

        ErrorDiagnosis {
            category: ErrorCategory::UnknownOrSyntax,
            message: "CDK synthesis failed".to_string(),
            technical_excerpt: excerpt,
            recommendations: vec![
                "Run \"cdk synth\" locally to reproduce the error".to_string(),
                "Check the CDK app for syntax or configuration errors".to_string(),
            ],
            user_fixable: true,
            matched_marker: None,
        }
    }
}

fn render_recommendation(template: &str, language: Language) -> String {
    template
        .replace("{install_command}", language.install_command())
        .replace("{dependency_file}", language.dependency_file())
}

fn default_classifier() -> &'static Classifier {
    static DEFAULT: OnceLock<Classifier> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        Classifier::new(
            &config::default_classifier_rules(),
            &config::default_fatal_markers(),
            config::DEFAULT_EXCERPT_MAX_CHARS,
        )
        .expect("built-in classifier rules compile")
    })
}

/// Classify with the built-in rule table.
pub fn classify(diagnostic_text: &str, language: Language) -> ErrorDiagnosis {
    default_classifier().classify(diagnostic_text, language)
}

/// Fatal check with the built-in marker set.
pub fn is_fatal(diagnostic_text: &str) -> bool {
    default_classifier().is_fatal(diagnostic_text)
}
