use anyhow::Result;
use cdk_synth::clean::{clean_template_file, CleanOptions, TemplateCleaner};
use cdk_synth::config::{
    config_stub, load_effective_config, resolve_tool_command, validate_config, SynthConfig,
};
use cdk_synth::environment::detect;
use cdk_synth::locate::discover_roots;
use cdk_synth::pipeline::{default_jobs, run_batch, write_report, PipelineContext};
use cdk_synth::synth::Synthesizer;
use cdk_synth::util::write_json_atomic;
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

use cli::{
    CleanArgs, Command, ConfigArgs, DetectArgs, LocateArgs, RootArgs, RunArgs, SynthArgs, ToolArgs,
};

/// Operational errors (bad config, unreadable input) as opposed to a
/// synthesis that ran and failed.
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    let outcome = match args.command {
        Command::Detect(args) => cmd_detect(args),
        Command::Synth(args) => cmd_synth(args),
        Command::Clean(args) => cmd_clean(args),
        Command::Locate(args) => cmd_locate(args),
        Command::Run(args) => cmd_run(args),
        Command::Config(args) => cmd_config(args),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn cmd_detect(args: DetectArgs) -> Result<ExitCode> {
    print_json(&detect(&args.root))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_synth(args: SynthArgs) -> Result<ExitCode> {
    let (config, tool_command) = resolve_tooling(&args.tool, Some(&args.root))?;
    let language = args
        .language
        .unwrap_or_else(|| detect(&args.root).language);
    let synthesizer = Synthesizer::new(config, tool_command)?;
    let result = synthesizer.synthesize(&args.root, language);

    match &args.out {
        Some(path) => write_json_atomic(path, &result)?,
        None => print_json(&result)?,
    }
    Ok(exit_for(result.success))
}

fn cmd_clean(args: CleanArgs) -> Result<ExitCode> {
    let cleaner = TemplateCleaner::new(
        Default::default(),
        CleanOptions {
            keep_resource_metadata: args.keep_resource_metadata,
        },
    );
    let (cleaned, report) = clean_template_file(&cleaner, &args.input, args.out.as_deref())?;
    if args.out.is_none() {
        print_json(&cleaned)?;
        if args.report {
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
        }
    } else if args.report {
        print_json(&report)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_locate(args: LocateArgs) -> Result<ExitCode> {
    print_json(&discover_roots(&args.files))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let mut roots = args.roots;
    roots.extend(
        discover_roots(&args.changed_files)
            .into_iter()
            .map(|location| location.root),
    );
    if roots.is_empty() {
        tracing::info!("no CDK apps found for the given inputs");
    }

    let (config, tool_command) = resolve_tooling(&args.tool, None)?;
    let cleaner = TemplateCleaner::new(
        config.cleaner.clone(),
        CleanOptions {
            keep_resource_metadata: args.keep_resource_metadata,
        },
    );
    let synthesizer = Synthesizer::new(config, tool_command)?;
    let ctx = PipelineContext::new(synthesizer, cleaner, Some(args.out.clone()));
    let jobs = args.jobs.unwrap_or_else(default_jobs);

    let report = run_batch(&roots, &ctx, jobs, args.fail_fast);
    let path = write_report(&args.out, &report)?;
    println!("{}", path.display());
    Ok(exit_for(report.all_succeeded()))
}

fn cmd_config(args: ConfigArgs) -> Result<ExitCode> {
    if args.stub {
        println!("{}", config_stub()?);
        return Ok(ExitCode::SUCCESS);
    }
    let config = load_effective_config(args.config.as_deref(), args.root.as_deref())?;
    print_json(&config)?;
    Ok(ExitCode::SUCCESS)
}

fn resolve_tooling(
    tool: &ToolArgs,
    project_root: Option<&Path>,
) -> Result<(SynthConfig, Vec<String>)> {
    let mut config = load_effective_config(tool.config.as_deref(), project_root)?;
    if let Some(secs) = tool.timeout_secs {
        config.timeout_secs = secs;
        validate_config(&config)?;
    }
    let tool_command = resolve_tool_command(tool.tool.as_deref(), &config)?;
    tracing::debug!(
        tool = ?tool_command,
        timeout_secs = config.timeout_secs,
        "synth tooling resolved"
    );
    Ok((config, tool_command))
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}
