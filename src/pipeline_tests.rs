use super::*;
use crate::config::default_config;
use crate::synth::{RunOutput, RunRequest, Termination};
use serde_json::json;
use std::time::Duration;

const GENERATED: &str = r#"{
  "Resources": {
    "Topic": {"Type": "AWS::SNS::Topic", "Metadata": {"aws:cdk:path": "Stack/Topic/Resource"}},
    "CDKMetadata": {"Type": "AWS::CDK::Metadata"}
  },
  "Parameters": {"BootstrapVersion": {"Type": "AWS::SSM::Parameter::Value<String>"}}
}"#;

const PLAIN: &str = r#"{"Resources": {"Queue": {"Type": "AWS::SQS::Queue"}}}"#;

/// Behaves according to the project directory name: `ok*` synthesizes one
/// template, `mixed*` also emits a hand-written and a corrupt one, `fail*`
/// reports a syntax error.
struct DirectoryRunner;

impl SynthRunner for DirectoryRunner {
    fn run(&self, request: &RunRequest<'_>, _cancel: &CancelToken) -> Result<RunOutput> {
        let name = request
            .cwd
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let out = request.cwd.join("cdk.out");
        let finished = |exit_code, stderr: &str| RunOutput {
            exit_code: Some(exit_code),
            stderr: stderr.to_string(),
            termination: Termination::Exited,
            duration: Duration::from_millis(1),
        };
        if name.starts_with("fail") {
            return Ok(finished(1, "SyntaxError: Unexpected token '}'"));
        }
        fs::create_dir_all(&out)?;
        fs::write(out.join("App.template.json"), GENERATED)?;
        if name.starts_with("mixed") {
            fs::write(out.join("Imported.template.json"), PLAIN)?;
            fs::write(out.join("Broken.template.json"), "{ not json")?;
        }
        Ok(finished(0, ""))
    }
}

fn context(output_dir: Option<PathBuf>) -> PipelineContext<DirectoryRunner> {
    let synthesizer = Synthesizer::with_runner(
        default_config(),
        vec!["cdk".to_string(), "synth".to_string()],
        DirectoryRunner,
    )
    .expect("synthesizer");
    PipelineContext::new(synthesizer, TemplateCleaner::default(), output_dir)
}

fn project(base: &Path, name: &str) -> PathBuf {
    let root = base.join(name);
    fs::create_dir_all(&root).expect("create project");
    fs::write(root.join("cdk.json"), r#"{"app": "python3 app.py"}"#).expect("write cdk.json");
    root
}

#[test]
fn process_project_writes_cleaned_templates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = project(dir.path(), "ok-billing");
    let out = dir.path().join("out");
    let ctx = context(Some(out.clone()));

    let report = process_project(&root, &ctx);

    assert!(report.succeeded());
    assert_eq!(report.templates.len(), 1);
    let template = &report.templates[0];
    assert!(template.generated_by_tool);
    let expected_output = out.join(&report.slug).join("App.template.json");
    assert_eq!(template.output.as_deref(), Some(expected_output.as_path()));
    let cleaning = template.cleaning.as_ref().expect("cleaning report");
    assert!(cleaning.removed_resource_names.contains("CDKMetadata"));

    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(&expected_output).expect("read output")).expect("parse");
    assert_eq!(
        written,
        json!({"Resources": {"Topic": {"Type": "AWS::SNS::Topic"}}})
    );
}

#[test]
fn hand_written_templates_are_copied_and_corrupt_ones_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = project(dir.path(), "mixed-app");
    let out = dir.path().join("out");
    let ctx = context(Some(out.clone()));

    let report = process_project(&root, &ctx);

    assert!(report.synthesis.success);
    assert!(!report.succeeded());
    let by_name = |name: &str| {
        report
            .templates
            .iter()
            .find(|template| template.source.file_name().and_then(|n| n.to_str()) == Some(name))
            .expect("template report")
    };
    let imported = by_name("Imported.template.json");
    assert!(!imported.generated_by_tool);
    assert!(imported.cleaning.is_none());
    let copied = fs::read_to_string(out.join(&report.slug).join("Imported.template.json"))
        .expect("copied template");
    assert_eq!(copied, PLAIN);

    let broken = by_name("Broken.template.json");
    assert!(broken.error.as_deref().is_some_and(|err| err.contains("parse template")));
    assert!(broken.output.is_none());
    assert!(by_name("App.template.json").error.is_none());
}

#[test]
fn failed_synthesis_skips_cleaning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = project(dir.path(), "fail-app");
    let report = process_project(&root, &context(None));

    assert!(!report.succeeded());
    assert!(report.templates.is_empty());
    assert_eq!(report.synthesis.final_state, LadderState::FailedFatal);
    assert!(report.environment.has_app_config);
}

#[test]
fn batch_preserves_input_order_and_deduplicates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let beta = project(dir.path(), "ok-beta");
    let alpha = project(dir.path(), "fail-alpha");
    let gamma = project(dir.path(), "ok-gamma");
    let roots = vec![beta.clone(), alpha.clone(), beta.clone(), gamma.clone()];

    let report = run_batch(&roots, &context(None), 3, false);

    let order: Vec<&Path> = report.projects.iter().map(|p| p.root.as_path()).collect();
    assert_eq!(order, vec![beta.as_path(), alpha.as_path(), gamma.as_path()]);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 0);
    assert!(!report.all_succeeded());
}

#[test]
fn spellings_of_the_same_root_run_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let infra = project(dir.path(), "ok-infra");
    let respelled = infra.join("..").join("ok-infra");

    let report = run_batch(&[infra.clone(), respelled], &context(None), 2, false);

    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].root, infra);
}

#[test]
fn colliding_slugs_get_distinct_output_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let flat = project(dir.path(), "ok-app");
    let nested = project(&dir.path().join("ok"), "app");
    assert_eq!(path_slug(&flat), path_slug(&nested));
    let out = dir.path().join("out");

    let report = run_batch(&[flat, nested], &context(Some(out.clone())), 2, false);

    assert_eq!(report.succeeded, 2);
    let first = &report.projects[0];
    let second = &report.projects[1];
    assert_eq!(first.slug, path_slug(&first.root));
    assert_eq!(second.slug, format!("{}-2", first.slug));
    let outputs: Vec<PathBuf> = report
        .projects
        .iter()
        .map(|project| project.templates[0].output.clone().expect("output path"))
        .collect();
    assert_ne!(outputs[0], outputs[1]);
    for output in &outputs {
        assert!(output.is_file(), "missing {}", output.display());
    }
}

#[test]
fn slug_suffixes_do_not_collide_with_natural_slugs() {
    let roots = [
        PathBuf::from("/w/ok-app"),
        PathBuf::from("/w/ok/app"),
        PathBuf::from("/w/ok-app-2"),
    ];
    let refs: Vec<&PathBuf> = roots.iter().collect();
    assert_eq!(
        unique_slugs(&refs),
        vec!["w-ok-app", "w-ok-app-2", "w-ok-app-2-2"]
    );
}

#[test]
fn fail_fast_cancels_remaining_projects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = project(dir.path(), "fail-first");
    let second = project(dir.path(), "ok-second");
    let ctx = context(None);

    let report = run_batch(&[first, second], &ctx, 1, true);

    assert!(ctx.cancel.is_cancelled());
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 1);
    let skipped = &report.projects[1];
    assert!(skipped.cancelled());
    assert!(skipped.synthesis.attempts.is_empty());
}

#[test]
fn report_is_written_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = project(dir.path(), "ok-report");
    let out = dir.path().join("out");
    let ctx = context(Some(out.clone()));
    let report = run_batch(&[root], &ctx, default_jobs(), false);

    let path = write_report(&out, &report).expect("write report");

    assert_eq!(path, out.join(REPORT_FILE));
    let value: serde_json::Value =
        serde_json::from_slice(&fs::read(&path).expect("read report")).expect("parse report");
    assert_eq!(value["schema_version"], REPORT_SCHEMA_VERSION);
    assert_eq!(value["succeeded"], 1);
    assert_eq!(value["projects"][0]["synthesis"]["success"], true);
    assert_eq!(value["projects"][0]["environment"]["has_app_config"], true);
}

#[test]
fn default_jobs_is_bounded() {
    let jobs = default_jobs();
    assert!((1..=MAX_DEFAULT_JOBS).contains(&jobs));
}
