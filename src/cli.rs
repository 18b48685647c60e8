//! CLI argument parsing.
//!
//! Commands map one-to-one onto library operations; policy lives in the
//! library so tests can drive it without the binary.
use cdk_synth::environment::Language;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cdk-synth",
    version,
    about = "Synthesize, diagnose, and normalize CDK apps for cost analysis",
    after_help = "Examples:\n  cdk-synth detect --root infra\n  cdk-synth synth --root infra --tool 'npx cdk synth'\n  cdk-synth clean --input cdk.out/Billing.template.json --out clean.json\n  cdk-synth locate infra/lib/stack.ts app/main.py\n  cdk-synth run --changed-file infra/lib/stack.ts --out /tmp/synth --jobs 2",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Detect(DetectArgs),
    Synth(SynthArgs),
    Clean(CleanArgs),
    Locate(LocateArgs),
    Run(RunArgs),
    Config(ConfigArgs),
}

/// Config and tool overrides shared by commands that invoke the synth tool.
#[derive(Args, Debug, Clone, Default)]
pub struct ToolArgs {
    /// Synth config JSON (default: <root>/.cdk-synth.json, then user config)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Synth tool command, e.g. "npx cdk synth" (default: CDK_SYNTH_TOOL or "cdk synth")
    #[arg(long, value_name = "CMD")]
    pub tool: Option<String>,

    /// Per-attempt wall-clock bound in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
#[command(about = "Describe a project's toolchain environment")]
pub struct DetectArgs {
    /// CDK app root
    #[arg(long, value_name = "DIR")]
    pub root: PathBuf,
}

#[derive(Parser, Debug)]
#[command(about = "Run the synthesis fallback ladder for one app")]
pub struct SynthArgs {
    /// CDK app root
    #[arg(long, value_name = "DIR")]
    pub root: PathBuf,

    /// Override the detected language
    #[arg(long, value_enum)]
    pub language: Option<Language>,

    #[command(flatten)]
    pub tool: ToolArgs,

    /// Write the result JSON here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Strip synth bookkeeping from a template")]
pub struct CleanArgs {
    /// Template JSON to clean
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Write the cleaned template here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Keep aws:cdk:path entries in resource metadata
    #[arg(long)]
    pub keep_resource_metadata: bool,

    /// Also print the cleaning report: to stdout with --out, otherwise to
    /// stderr after the template
    #[arg(long)]
    pub report: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Map changed files to the CDK app roots that own them")]
pub struct LocateArgs {
    /// Changed files (e.g. from git diff --name-only)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Synthesize and clean a batch of apps, writing report.json")]
pub struct RunArgs {
    /// CDK app root (repeatable)
    #[arg(long = "root", value_name = "DIR", required_unless_present = "changed_files")]
    pub roots: Vec<PathBuf>,

    /// Changed file used to discover app roots (repeatable)
    #[arg(long = "changed-file", value_name = "FILE")]
    pub changed_files: Vec<PathBuf>,

    /// Output directory for cleaned templates and report.json
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Concurrent apps (default: available parallelism, at most 4)
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Cancel remaining apps after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Keep aws:cdk:path entries in resource metadata
    #[arg(long)]
    pub keep_resource_metadata: bool,

    #[command(flatten)]
    pub tool: ToolArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Print the effective synth config")]
pub struct ConfigArgs {
    /// Resolve project-local config from this app root
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Config file to load instead of the resolution order
    #[arg(long, value_name = "PATH", conflicts_with = "stub")]
    pub config: Option<PathBuf>,

    /// Print the built-in defaults as an editable stub
    #[arg(long)]
    pub stub: bool,
}
