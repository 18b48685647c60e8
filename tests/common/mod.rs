//! Shared test infrastructure for CLI integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A CDK-style template with every kind of bookkeeping the cleaner removes.
pub const SYNTHESIZED_TEMPLATE: &str = r#"{
  "Resources": {
    "Bucket83908E77": {
      "Type": "AWS::S3::Bucket",
      "Metadata": {"aws:cdk:path": "Billing/Bucket/Resource"}
    },
    "CDKMetadata": {
      "Type": "AWS::CDK::Metadata",
      "Properties": {"Analytics": "v2:deflate64:H4sI"},
      "Condition": "CDKMetadataAvailable"
    }
  },
  "Conditions": {
    "CDKMetadataAvailable": {"Fn::Equals": [{"Ref": "AWS::Region"}, "us-east-1"]}
  },
  "Parameters": {
    "BootstrapVersion": {
      "Type": "AWS::SSM::Parameter::Value<String>",
      "Default": "/cdk-bootstrap/hnb659fds/version",
      "Description": "Version of the CDK Bootstrap resources [cdk:skip]"
    }
  },
  "Rules": {
    "CheckBootstrapVersion": {"Assertions": []}
  }
}"#;

/// Isolated workspace: projects, fake tools, and a private config home.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().expect("create workspace");
        fs::create_dir_all(dir.path().join("home")).expect("create home");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a project directory containing `cdk.json` plus `files`.
    pub fn project(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.path().join(name);
        fs::create_dir_all(&root).expect("create project");
        fs::write(root.join("cdk.json"), r#"{"app": "python3 app.py"}"#).expect("write cdk.json");
        for (name, contents) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::write(path, contents).expect("write project file");
        }
        root
    }

    /// Write an executable shell script standing in for `cdk`.
    #[cfg(unix)]
    pub fn fake_tool(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        let mut perms = fs::metadata(&path).expect("stat fake tool").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod fake tool");
        path
    }

    /// Build a `cdk-synth` command that cannot see the user's config or env.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cdk-synth"));
        let home = self.path().join("home");
        cmd.env("HOME", &home)
            .env("XDG_CONFIG_HOME", home.join(".config"))
            .env("RUST_LOG", "warn")
            .env_remove("CDK_SYNTH_TOOL");
        cmd
    }
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let text = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
    serde_json::from_str(&text).unwrap_or_else(|err| panic!("parse {}: {err}", path.display()))
}

/// Lines the fake tool appended to `attempts.log` in the project root.
pub fn attempt_log(root: &Path) -> Vec<String> {
    fs::read_to_string(root.join("attempts.log"))
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
