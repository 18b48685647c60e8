//! Adaptive CDK synthesis.
//!
//! Runs the synth tool through the configured strategy ladder. Each attempt
//! is appended to an attempt log; the `SynthesisResult` is built once the
//! ladder reaches a terminal state.
mod ladder;
mod process;

pub use ladder::{transition, LadderEvent, LadderState};
pub use process::{
    CancelToken, ProcessRunner, RunOutput, RunRequest, SynthRunner, Termination, MAX_STDERR_BYTES,
};

use crate::classify::{strip_ansi, Classifier, ErrorDiagnosis};
use crate::config::{StrategyDescriptor, SynthConfig};
use crate::environment::Language;
use crate::util::bounded_excerpt;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy: StrategyDescriptor,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_excerpt: Option<String>,
    pub timeout_secs: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<StrategyDescriptor>,
    pub template_paths: Vec<PathBuf>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<ErrorDiagnosis>,
    pub attempts: Vec<AttemptRecord>,
    pub final_state: LadderState,
}

/// What one rung produced, before it is folded into the attempt log.
struct AttemptObservation {
    event: LadderEvent,
    diagnostic_text: String,
    templates: Vec<PathBuf>,
    duration: Duration,
}

/// Drives one synth tool through the strategy ladder.
#[derive(Debug)]
pub struct Synthesizer<R = ProcessRunner> {
    config: SynthConfig,
    tool_command: Vec<String>,
    classifier: Classifier,
    runner: R,
}

impl Synthesizer<ProcessRunner> {
    pub fn new(config: SynthConfig, tool_command: Vec<String>) -> Result<Self> {
        Self::with_runner(config, tool_command, ProcessRunner::new())
    }
}

impl<R: SynthRunner> Synthesizer<R> {
    pub fn with_runner(config: SynthConfig, tool_command: Vec<String>, runner: R) -> Result<Self> {
        let classifier = Classifier::from_config(&config)?;
        Ok(Self {
            config,
            tool_command,
            classifier,
            runner,
        })
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn synthesize(&self, root: &Path, language: Language) -> SynthesisResult {
        self.synthesize_with_cancel(root, language, &CancelToken::new())
    }

    pub fn synthesize_with_cancel(
        &self,
        root: &Path,
        language: Language,
        cancel: &CancelToken,
    ) -> SynthesisResult {
        let strategies = &self.config.strategies;
        let ladder_len = strategies.len();
        let mut state = transition(LadderState::NotStarted, LadderEvent::Start, ladder_len);
        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(ladder_len);
        let mut last_diagnostic = String::new();
        let mut templates = Vec::new();

        while let LadderState::Attempting(index) = state {
            if cancel.is_cancelled() {
                state = transition(state, LadderEvent::Cancelled, ladder_len);
                break;
            }
            let strategy = &strategies[index];
            let observation = self.attempt(root, strategy, cancel);
            let outcome = match observation.event {
                LadderEvent::Succeeded => AttemptOutcome::Success,
                LadderEvent::Fatal => AttemptOutcome::FatalFailure,
                LadderEvent::TimedOut => AttemptOutcome::Timeout,
                LadderEvent::Cancelled => AttemptOutcome::Cancelled,
                LadderEvent::Retryable | LadderEvent::Start => AttemptOutcome::RetryableFailure,
            };
            let excerpt = self.excerpt(&observation.diagnostic_text);
            tracing::info!(
                root = %root.display(),
                strategy = %strategy.name,
                outcome = ?outcome,
                elapsed_ms = observation.duration.as_millis() as u64,
                "synth attempt finished"
            );
            attempts.push(AttemptRecord {
                strategy: strategy.clone(),
                outcome,
                diagnostic_excerpt: (!excerpt.is_empty()).then_some(excerpt),
                timeout_secs: self.config.timeout_secs,
                duration_ms: observation.duration.as_millis() as u64,
            });
            last_diagnostic = observation.diagnostic_text;
            templates = observation.templates;
            state = transition(state, observation.event, ladder_len);
        }

        self.finalize(state, attempts, templates, &last_diagnostic, language)
    }

    fn attempt(
        &self,
        root: &Path,
        strategy: &StrategyDescriptor,
        cancel: &CancelToken,
    ) -> AttemptObservation {
        let argv: Vec<String> = self
            .tool_command
            .iter()
            .chain(strategy.invocation_flags.iter())
            .cloned()
            .collect();
        let request = RunRequest {
            argv: &argv,
            cwd: root,
            timeout: Duration::from_secs(self.config.timeout_secs),
        };
        let started = Instant::now();
        let output = match self.runner.run(&request, cancel) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(strategy = %strategy.name, error = %err, "synth tool did not start");
                return AttemptObservation {
                    event: LadderEvent::Retryable,
                    diagnostic_text: format!("{err:#}"),
                    templates: Vec::new(),
                    duration: started.elapsed(),
                };
            }
        };

        let (event, diagnostic_text, templates) = match output.termination {
            Termination::TimedOut => (
                LadderEvent::TimedOut,
                format!(
                    "Timeout (>{} seconds) running '{}' strategy\n{}",
                    self.config.timeout_secs, strategy.name, output.stderr
                ),
                Vec::new(),
            ),
            Termination::Cancelled => (
                LadderEvent::Cancelled,
                "synthesis cancelled".to_string(),
                Vec::new(),
            ),
            Termination::Exited if output.exit_code == Some(0) => {
                let found =
                    discover_templates(root, &self.config.output_dir, &self.config.template_suffix);
                match found {
                    Ok(found) if !found.is_empty() => {
                        (LadderEvent::Succeeded, String::new(), found)
                    }
                    Ok(_) => (
                        LadderEvent::Retryable,
                        format!(
                            "synth exited 0 but produced no *{} files under {}\n{}",
                            self.config.template_suffix, self.config.output_dir, output.stderr
                        ),
                        Vec::new(),
                    ),
                    Err(err) => (LadderEvent::Retryable, format!("{err:#}"), Vec::new()),
                }
            }
            Termination::Exited => {
                let text = if output.stderr.trim().is_empty() {
                    match output.exit_code {
                        Some(code) => format!("synth exited with status {code} and no stderr"),
                        None => "synth was terminated by a signal".to_string(),
                    }
                } else {
                    output.stderr
                };
                let event = if self.classifier.is_fatal(&text) {
                    LadderEvent::Fatal
                } else {
                    LadderEvent::Retryable
                };
                (event, text, Vec::new())
            }
        };

        AttemptObservation {
            event,
            diagnostic_text,
            templates,
            duration: output.duration,
        }
    }

    fn finalize(
        &self,
        state: LadderState,
        attempts: Vec<AttemptRecord>,
        templates: Vec<PathBuf>,
        last_diagnostic: &str,
        language: Language,
    ) -> SynthesisResult {
        let mut result = SynthesisResult {
            success: false,
            strategy_used: None,
            template_paths: Vec::new(),
            warnings: Vec::new(),
            diagnosis: None,
            attempts,
            final_state: state,
        };
        match state {
            LadderState::Succeeded => {
                let used = result
                    .attempts
                    .last()
                    .map(|attempt| attempt.strategy.clone());
                if result.attempts.len() > 1 {
                    if let (Some(first), Some(used)) = (result.attempts.first(), used.as_ref()) {
                        let warning = format!(
                            "Used '{}' strategy ('{}' synth failed)",
                            used.name, first.strategy.name
                        );
                        tracing::warn!(
                            strategy = %used.name,
                            "synthesis needed a fallback strategy"
                        );
                        result.warnings.push(warning);
                    }
                }
                result.success = true;
                result.strategy_used = used;
                result.template_paths = templates;
            }
            LadderState::Cancelled => {
                result.diagnosis = Some(ErrorDiagnosis::cancelled());
            }
            _ => {
                result.diagnosis = Some(self.classifier.classify(last_diagnostic, language));
            }
        }
        result
    }

    fn excerpt(&self, text: &str) -> String {
        bounded_excerpt(&strip_ansi(text), self.config.excerpt_max_chars)
    }
}

/// List generated templates directly under `<root>/<output_dir>`, sorted.
pub fn discover_templates(root: &Path, output_dir: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let dir = root.join(output_dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix) && name.len() > suffix.len());
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
#[path = "synthesize_tests.rs"]
mod tests;
