//! Map changed source files to the CDK app roots that own them.
use crate::environment::{self, Language, APP_CONFIG_FILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Source extensions that can belong to a CDK app.
pub const APP_SOURCE_EXTENSIONS: [&str; 7] = ["py", "ts", "js", "mjs", "java", "cs", "go"];
/// How many directories (starting with the file's own) are searched.
pub const MAX_SEARCH_LEVELS: usize = 5;

const CONTEXT_FILE: &str = "cdk.context.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLocation {
    pub root: PathBuf,
    pub language: Language,
}

/// Find the app root for `file`, or `None` when the file is not part of one.
pub fn locate_app_root(file: &Path) -> Option<AppLocation> {
    let extension = file.extension().and_then(|ext| ext.to_str())?;
    if !APP_SOURCE_EXTENSIONS.contains(&extension) {
        return None;
    }

    let start = if file.is_dir() { file } else { file.parent()? };
    let start = if start.as_os_str().is_empty() {
        Path::new(".")
    } else {
        start
    };
    let root = start
        .ancestors()
        .take(MAX_SEARCH_LEVELS)
        .find(|dir| is_app_root(dir))?;
    let language = environment::detect(root).language;
    tracing::debug!(
        file = %file.display(),
        root = %root.display(),
        language = %language,
        "located app root"
    );
    Some(AppLocation {
        root: root.to_path_buf(),
        language,
    })
}

/// Locate roots for many files, de-duplicated in first-seen order.
pub fn discover_roots<P: AsRef<Path>>(files: &[P]) -> Vec<AppLocation> {
    let mut seen = BTreeSet::new();
    files
        .iter()
        .filter_map(|file| locate_app_root(file.as_ref()))
        .filter(|location| seen.insert(location.root.clone()))
        .collect()
}

pub fn is_app_root(dir: &Path) -> bool {
    dir.join(APP_CONFIG_FILE).is_file()
        || dir.join(CONTEXT_FILE).is_file()
        || has_app_structure(dir)
}

fn has_app_structure(dir: &Path) -> bool {
    let mentions = |name: &str, needle: &str| {
        fs::read_to_string(dir.join(name)).is_ok_and(|text| text.contains(needle))
    };

    let python_entry = dir.join("app.py").is_file() || dir.join("cdk.py").is_file();
    if python_entry && mentions("requirements.txt", "aws-cdk") {
        return true;
    }
    if node_manifest_names_cdk(dir) {
        return true;
    }
    if mentions("pom.xml", "software.amazon.awscdk") {
        return true;
    }
    if mentions("go.mod", "github.com/aws/aws-cdk-go") {
        return true;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(|entry| entry.ok()).any(|entry| {
        let path = entry.path();
        path.extension().is_some_and(|ext| ext == "csproj")
            && fs::read_to_string(&path).is_ok_and(|text| text.contains("Amazon.CDK"))
    })
}

fn node_manifest_names_cdk(dir: &Path) -> bool {
    let Ok(text) = fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&text) else {
        return false;
    };
    ["dependencies", "devDependencies"].iter().any(|table| {
        manifest
            .get(table)
            .and_then(|deps| deps.as_object())
            .is_some_and(|deps| deps.keys().any(|name| name.contains("aws-cdk")))
    })
}
