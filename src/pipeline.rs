//! Batch pipeline: detect, synthesize, and clean each project root.
//!
//! Roots are processed by a bounded pool of scoped workers. Reports keep the
//! input order regardless of which worker finished first.
use crate::clean::{load_template, CleaningReport, TemplateCleaner};
use crate::environment::{self, EnvironmentDescriptor};
use crate::synth::{
    CancelToken, LadderState, ProcessRunner, SynthRunner, SynthesisResult, Synthesizer,
};
use crate::util::{display_path, path_slug, write_bytes_atomic, write_json_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
pub const REPORT_FILE: &str = "report.json";
const MAX_DEFAULT_JOBS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateReport {
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub generated_by_tool: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaning: Option<CleaningReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub root: PathBuf,
    pub slug: String,
    pub environment: EnvironmentDescriptor,
    pub synthesis: SynthesisResult,
    pub templates: Vec<TemplateReport>,
}

impl ProjectReport {
    pub fn succeeded(&self) -> bool {
        self.synthesis.success && self.templates.iter().all(|template| template.error.is_none())
    }

    pub fn cancelled(&self) -> bool {
        self.synthesis.final_state == LadderState::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub schema_version: u32,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub projects: Vec<ProjectReport>,
}

impl BatchReport {
    fn from_projects(projects: Vec<ProjectReport>) -> Self {
        let cancelled = projects.iter().filter(|project| project.cancelled()).count();
        let succeeded = projects.iter().filter(|project| project.succeeded()).count();
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            succeeded,
            failed: projects.len() - succeeded - cancelled,
            cancelled,
            projects,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.projects.len()
    }
}

/// Shared, read-only state for every project in a run.
#[derive(Debug)]
pub struct PipelineContext<R = ProcessRunner> {
    pub synthesizer: Synthesizer<R>,
    pub cleaner: TemplateCleaner,
    /// Where cleaned templates are written; `None` cleans in memory only.
    pub output_dir: Option<PathBuf>,
    pub cancel: CancelToken,
}

impl<R: SynthRunner> PipelineContext<R> {
    pub fn new(
        synthesizer: Synthesizer<R>,
        cleaner: TemplateCleaner,
        output_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            cleaner,
            output_dir,
            cancel: CancelToken::new(),
        }
    }
}

pub fn default_jobs() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_JOBS)
}

pub fn process_project<R: SynthRunner>(root: &Path, ctx: &PipelineContext<R>) -> ProjectReport {
    process_project_as(root, path_slug(root), ctx)
}

fn process_project_as<R: SynthRunner>(
    root: &Path,
    slug: String,
    ctx: &PipelineContext<R>,
) -> ProjectReport {
    let environment = environment::detect(root);
    let synthesis = ctx
        .synthesizer
        .synthesize_with_cancel(root, environment.language, &ctx.cancel);

    let templates = if synthesis.success {
        let project_out = ctx.output_dir.as_ref().map(|dir| dir.join(&slug));
        synthesis
            .template_paths
            .iter()
            .map(|path| process_template(path, project_out.as_deref(), &ctx.cleaner))
            .collect()
    } else {
        Vec::new()
    };

    let report = ProjectReport {
        root: root.to_path_buf(),
        slug,
        environment,
        synthesis,
        templates,
    };
    tracing::info!(
        root = %root.display(),
        success = report.succeeded(),
        templates = report.templates.len(),
        "project processed"
    );
    report
}

fn process_template(
    source: &Path,
    project_out: Option<&Path>,
    cleaner: &TemplateCleaner,
) -> TemplateReport {
    let output = project_out.and_then(|dir| source.file_name().map(|name| dir.join(name)));
    let mut report = TemplateReport {
        source: source.to_path_buf(),
        output: None,
        generated_by_tool: false,
        cleaning: None,
        error: None,
    };
    match clean_or_copy(source, output.as_deref(), cleaner) {
        Ok((generated, cleaning)) => {
            report.generated_by_tool = generated;
            report.cleaning = cleaning;
            report.output = output;
        }
        Err(err) => {
            tracing::warn!(template = %source.display(), error = %err, "template not processed");
            report.error = Some(format!("{err:#}"));
        }
    }
    report
}

/// Clean tool-generated templates; copy anything else through unchanged.
fn clean_or_copy(
    source: &Path,
    output: Option<&Path>,
    cleaner: &TemplateCleaner,
) -> Result<(bool, Option<CleaningReport>)> {
    let template = load_template(source)?;
    if cleaner.is_generated_by_tool(&template) {
        let (cleaned, cleaning) = cleaner.clean(&template);
        if let Some(output) = output {
            write_json_atomic(output, &cleaned)?;
        }
        return Ok((true, Some(cleaning)));
    }
    if let Some(output) = output {
        let bytes = fs::read(source).with_context(|| format!("read {}", source.display()))?;
        write_bytes_atomic(output, &bytes)?;
    }
    Ok((false, None))
}

/// Process `roots` on at most `jobs` workers.
///
/// With `fail_fast`, the first failed project cancels the shared token, which
/// terminates in-flight attempts and marks pending projects cancelled.
pub fn run_batch<R: SynthRunner>(
    roots: &[PathBuf],
    ctx: &PipelineContext<R>,
    jobs: usize,
    fail_fast: bool,
) -> BatchReport {
    let mut seen = BTreeSet::new();
    let roots: Vec<&PathBuf> = roots
        .iter()
        .filter(|root| {
            let key = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
            seen.insert(key)
        })
        .collect();
    let slugs = unique_slugs(&roots);
    let workers = jobs.max(1).min(roots.len().max(1));
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<ProjectReport>>> = Mutex::new(vec![None; roots.len()]);

    tracing::info!(projects = roots.len(), workers, fail_fast, "batch started");
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(root) = roots.get(index) else {
                    break;
                };
                let report = process_project_as(root, slugs[index].clone(), ctx);
                if fail_fast && !report.succeeded() && !report.cancelled() {
                    tracing::warn!(root = %root.display(), "cancelling remaining projects");
                    ctx.cancel.cancel();
                }
                if let Ok(mut slots) = slots.lock() {
                    slots[index] = Some(report);
                }
            });
        }
    });

    let projects = slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .flatten()
        .collect();
    let report = BatchReport::from_projects(projects);
    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "batch finished"
    );
    report
}

/// One output directory name per root. Roots whose slugs collide get `-2`,
/// `-3`, ... in input order.
fn unique_slugs(roots: &[&PathBuf]) -> Vec<String> {
    let mut taken = HashSet::new();
    roots
        .iter()
        .map(|root| {
            let base = path_slug(root);
            let mut slug = base.clone();
            let mut suffix = 2;
            while !taken.insert(slug.clone()) {
                slug = format!("{base}-{suffix}");
                suffix += 1;
            }
            slug
        })
        .collect()
}

/// Write `report.json` under `out_dir` and return its path.
pub fn write_report(out_dir: &Path, report: &BatchReport) -> Result<PathBuf> {
    let path = out_dir.join(REPORT_FILE);
    write_json_atomic(&path, report)?;
    tracing::info!(path = %display_path(&path, None), "report written");
    Ok(path)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
