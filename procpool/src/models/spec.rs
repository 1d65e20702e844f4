//! Description of a process to launch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// What to run for one pool slot.
///
/// Environment variables in `env` are merged over the ambient environment
/// of the pool's process. Set `clear_env` to hand the child only `env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Executable path or name (resolved through `PATH`).
    pub command: String,

    /// Arguments to pass to the program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Start from an empty environment instead of the ambient one.
    #[serde(default)]
    pub clear_env: bool,
}

impl ProcessSpec {
    /// Create a spec for the given program.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Replace the ambient environment with `env` alone.
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates() {
        let spec = ProcessSpec::new("sh")
            .arg("-c")
            .args(["echo $A", "ignored"])
            .env("A", "1")
            .envs([("B", "2")])
            .cwd("/tmp");

        assert_eq!(spec.command, "sh");
        assert_eq!(spec.args, vec!["-c", "echo $A", "ignored"]);
        assert_eq!(spec.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(spec.env.get("B").map(String::as_str), Some("2"));
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert!(!spec.clear_env);
    }

    #[test]
    fn deserializes_with_defaults() {
        let spec: ProcessSpec = serde_json::from_str(r#"{"command":"cat"}"#).unwrap();
        assert_eq!(spec, ProcessSpec::new("cat"));
    }
}
