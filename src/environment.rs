//! Project environment detection.
//!
//! Detection reads a fixed set of manifest and lock files directly under the
//! project root and never executes anything. Read and parse failures become
//! risk flags instead of errors so a broken manifest cannot abort the pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Package name of the infrastructure library in Node and Python manifests.
pub const LIBRARY_PACKAGE: &str = "aws-cdk-lib";
/// Module path prefix of the infrastructure library in `go.mod`.
pub const LIBRARY_GO_MODULE: &str = "github.com/aws/aws-cdk-go/awscdk";
/// App configuration file read by the synth tool.
pub const APP_CONFIG_FILE: &str = "cdk.json";

const PACKAGE_JSON: &str = "package.json";
const REQUIREMENTS_TXT: &str = "requirements.txt";
const GO_MOD: &str = "go.mod";
const TSCONFIG_JSON: &str = "tsconfig.json";

/// Files whose presence means dependency versions are pinned.
pub const LOCK_FILES: [&str; 7] = [
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    REQUIREMENTS_TXT,
    "Pipfile.lock",
    "poetry.lock",
    "go.sum",
];

/// Dependency manifests recognized at the project root.
pub const MANIFEST_FILES: [&str; 6] = [
    PACKAGE_JSON,
    REQUIREMENTS_TXT,
    "setup.py",
    "pom.xml",
    "build.gradle",
    GO_MOD,
];

/// Language the infrastructure app is written in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Java,
    Csharp,
    Go,
    #[default]
    Unknown,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Java => "java",
            Language::Csharp => "csharp",
            Language::Go => "go",
            Language::Unknown => "unknown",
        }
    }

    /// Command that installs the project's declared dependencies.
    pub fn install_command(self) -> &'static str {
        match self {
            Language::Python => "pip install -r requirements.txt",
            Language::Javascript | Language::Typescript => "npm install",
            Language::Java => "mvn package",
            Language::Csharp => "dotnet restore",
            Language::Go => "go mod download",
            Language::Unknown => "install the dependencies declared by the project",
        }
    }

    /// Dependency file users should check when installs are incomplete.
    pub fn dependency_file(self) -> &'static str {
        match self {
            Language::Python => REQUIREMENTS_TXT,
            Language::Javascript | Language::Typescript => PACKAGE_JSON,
            Language::Java => "pom.xml",
            Language::Csharp => "the .csproj file",
            Language::Go => GO_MOD,
            Language::Unknown => "your dependency manifest",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    MissingLockFiles,
    UnpinnedLibraryVersion,
    DetectionWarning,
}

/// Predicted issue attached to an environment before synthesis runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub kind: RiskKind,
    pub severity: RiskSeverity,
    pub message: String,
}

/// What detection learned about a project root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_library_version: Option<String>,
    pub language: Language,
    pub has_lock_file: bool,
    pub has_manifest: bool,
    pub has_app_config: bool,
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
}

impl EnvironmentDescriptor {
    pub fn has_risk(&self, kind: RiskKind) -> bool {
        self.risk_flags.iter().any(|flag| flag.kind == kind)
    }
}

/// Inspect `root` and describe its toolchain environment.
pub fn detect(root: &Path) -> EnvironmentDescriptor {
    let mut descriptor = EnvironmentDescriptor {
        has_lock_file: LOCK_FILES.iter().any(|name| root.join(name).is_file()),
        has_manifest: MANIFEST_FILES.iter().any(|name| root.join(name).is_file())
            || has_dotnet_project(root).unwrap_or(false),
        has_app_config: root.join(APP_CONFIG_FILE).is_file(),
        ..EnvironmentDescriptor::default()
    };

    let declared = detect_node_version(root, &mut descriptor.risk_flags)
        .map(|version| {
            let language = if root.join(TSCONFIG_JSON).is_file() {
                Language::Typescript
            } else {
                Language::Javascript
            };
            (version, language)
        })
        .or_else(|| {
            detect_python_version(root, &mut descriptor.risk_flags)
                .map(|version| (version, Language::Python))
        })
        .or_else(|| {
            detect_go_version(root, &mut descriptor.risk_flags)
                .map(|version| (version, Language::Go))
        });

    match declared {
        Some((version, language)) => {
            if is_unpinned(&version, language) {
                descriptor.risk_flags.push(RiskFlag {
                    kind: RiskKind::UnpinnedLibraryVersion,
                    severity: RiskSeverity::Low,
                    message: format!(
                        "{LIBRARY_PACKAGE} version {version:?} is a range; synthesis may pick up a newer release"
                    ),
                });
            }
            descriptor.declared_library_version = Some(version);
            descriptor.language = language;
        }
        None => {
            descriptor.language = structural_language(root, &mut descriptor.risk_flags);
        }
    }

    if !descriptor.has_lock_file {
        descriptor.risk_flags.push(RiskFlag {
            kind: RiskKind::MissingLockFiles,
            severity: RiskSeverity::Medium,
            message: "No lock files found - versions may not be pinned".to_string(),
        });
    }

    tracing::debug!(
        root = %root.display(),
        language = %descriptor.language,
        version = descriptor.declared_library_version.as_deref().unwrap_or("-"),
        risk_flags = descriptor.risk_flags.len(),
        "environment detected"
    );
    descriptor
}

fn read_optional(root: &Path, name: &str, flags: &mut Vec<RiskFlag>) -> Option<String> {
    let path = root.join(name);
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(err) => {
            flags.push(detection_warning(format!("Could not read {name}: {err}")));
            None
        }
    }
}

fn detection_warning(message: String) -> RiskFlag {
    RiskFlag {
        kind: RiskKind::DetectionWarning,
        severity: RiskSeverity::Low,
        message,
    }
}

fn detect_node_version(root: &Path, flags: &mut Vec<RiskFlag>) -> Option<String> {
    let text = read_optional(root, PACKAGE_JSON, flags)?;
    let manifest: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            flags.push(detection_warning(format!(
                "Could not detect {LIBRARY_PACKAGE} version from {PACKAGE_JSON}: {err}"
            )));
            return None;
        }
    };
    ["dependencies", "devDependencies"].iter().find_map(|table| {
        manifest
            .get(table)
            .and_then(|deps| deps.get(LIBRARY_PACKAGE))
            .and_then(|version| version.as_str())
            .map(str::trim)
            .filter(|version| !version.is_empty())
            .map(str::to_string)
    })
}

fn detect_python_version(root: &Path, flags: &mut Vec<RiskFlag>) -> Option<String> {
    let text = read_optional(root, REQUIREMENTS_TXT, flags)?;
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .find(|line| line.contains(LIBRARY_PACKAGE))
        .map(str::to_string)
}

fn detect_go_version(root: &Path, flags: &mut Vec<RiskFlag>) -> Option<String> {
    let text = read_optional(root, GO_MOD, flags)?;
    text.lines()
        .map(str::trim)
        .find(|line| line.contains(LIBRARY_GO_MODULE))
        .and_then(|line| {
            line.split_whitespace()
                .skip_while(|token| !token.contains(LIBRARY_GO_MODULE))
                .nth(1)
        })
        .map(str::to_string)
}

fn is_unpinned(version: &str, language: Language) -> bool {
    match language {
        Language::Javascript | Language::Typescript => {
            version.starts_with(['^', '~', '>', '*']) || version == "latest"
        }
        Language::Python => !version.contains("=="),
        _ => false,
    }
}

fn structural_language(root: &Path, flags: &mut Vec<RiskFlag>) -> Language {
    let exists = |name: &str| root.join(name).is_file();
    if exists(REQUIREMENTS_TXT) || exists("setup.py") {
        return Language::Python;
    }
    if exists(PACKAGE_JSON) {
        return if exists(TSCONFIG_JSON) {
            Language::Typescript
        } else {
            Language::Javascript
        };
    }
    if exists("pom.xml") || exists("build.gradle") {
        return Language::Java;
    }
    match has_dotnet_project(root) {
        Ok(true) => return Language::Csharp,
        Ok(false) => {}
        Err(err) => {
            flags.push(detection_warning(format!(
                "Could not list {}: {err}",
                root.display()
            )));
        }
    }
    if exists(GO_MOD) {
        return Language::Go;
    }
    Language::Unknown
}

/// `*.csproj` and `*.sln` files have project-specific names, so they are
/// found by listing the root rather than through `MANIFEST_FILES`.
fn has_dotnet_project(root: &Path) -> std::io::Result<bool> {
    let found = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            let path = entry.path();
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("csproj") | Some("sln")
            )
        });
    Ok(found)
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
