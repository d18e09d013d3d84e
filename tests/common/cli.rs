use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A scratch directory holding `rvstore.yaml` and the database.
pub struct CliEnv {
    pub dir: TempDir,
}

impl CliEnv {
    pub fn new(config_yaml: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("rvstore.yaml"), config_yaml).expect("write config");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write file");
        path
    }

    /// `rvs` running in the scratch directory with `RVSTORE_*` cleared.
    pub fn command(&self) -> Command {
        let bin = assert_cmd::cargo::cargo_bin!("rvs");
        let mut cmd = Command::new(bin.as_os_str());
        cmd.current_dir(self.path());
        for (key, _) in std::env::vars() {
            if key.starts_with("RVSTORE_") {
                cmd.env_remove(key);
            }
        }
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Run with `--json` and parse stdout.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(&[&["--json"], args].concat());
        assert!(output.status.success(), "rvs {args:?} failed: {output:?}");
        serde_json::from_slice(&output.stdout).expect("stdout is JSON")
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("run rvs")
    }
}
