//! Worker process configuration
//!
//! Every worker kind can be given an explicit launch command. Kinds without one
//! are launched by re-invoking the `reqflow` executable as `reqflow worker <kind>`.

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The closed set of worker processes the pipeline knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Collector,
    Analyzer,
    Requirement,
    Reporter,
    Vector,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Collector,
        WorkerKind::Analyzer,
        WorkerKind::Requirement,
        WorkerKind::Reporter,
        WorkerKind::Vector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Collector => "collector",
            WorkerKind::Analyzer => "analyzer",
            WorkerKind::Requirement => "requirement",
            WorkerKind::Reporter => "reporter",
            WorkerKind::Vector => "vector",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown worker kind: {}", s))
    }
}

/// How to launch one worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Executable to run
    pub program: PathBuf,

    /// Arguments passed to the executable
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables, on top of the inherited environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// `<program> worker <kind>`: a reqflow executable hosting the built-in worker
    pub fn self_hosted(program: impl Into<PathBuf>, kind: WorkerKind) -> Self {
        Self::new(program).arg("worker").arg(kind.as_str())
    }
}

/// Launch commands keyed by worker kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    #[serde(default)]
    pub commands: BTreeMap<WorkerKind, WorkerCommand>,
}

impl WorkersConfig {
    /// Every worker kind hosted by the given reqflow executable
    pub fn self_hosted(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let commands = WorkerKind::ALL
            .into_iter()
            .map(|kind| (kind, WorkerCommand::self_hosted(program.clone(), kind)))
            .collect();
        Self { commands }
    }

    pub fn command_for(&self, kind: WorkerKind) -> Option<&WorkerCommand> {
        self.commands.get(&kind)
    }

    pub fn set(&mut self, kind: WorkerKind, command: WorkerCommand) {
        self.commands.insert(kind, command);
    }
}

impl Validatable for WorkersConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (kind, command) in &self.commands {
            validate_required_string(
                &command.program.to_string_lossy(),
                &format!("{}.program", kind),
                self.domain_name(),
            )?;
            for key in command.env.keys() {
                if key.is_empty() || key.contains('=') {
                    return Err(self.validation_error(format!(
                        "{}: invalid environment variable name '{}'",
                        kind, key
                    )));
                }
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "workers"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_kind_round_trip_names() {
        for kind in WorkerKind::ALL {
            assert_eq!(kind.as_str().parse::<WorkerKind>().unwrap(), kind);
        }
        assert_eq!("Reporter".parse::<WorkerKind>().unwrap(), WorkerKind::Reporter);
        assert!("scheduler".parse::<WorkerKind>().is_err());
    }

    #[test]
    fn test_self_hosted_commands() {
        let config = WorkersConfig::self_hosted("/usr/local/bin/reqflow");
        assert_eq!(config.commands.len(), WorkerKind::ALL.len());

        let analyzer = config.command_for(WorkerKind::Analyzer).unwrap();
        assert_eq!(analyzer.program, PathBuf::from("/usr/local/bin/reqflow"));
        assert_eq!(analyzer.args, vec!["worker", "analyzer"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_validation() {
        let mut config = WorkersConfig::default();
        assert!(config.validate().is_ok());

        config.set(WorkerKind::Vector, WorkerCommand::new(""));
        assert!(config.validate().is_err());

        config.set(
            WorkerKind::Vector,
            WorkerCommand::new("python").env("BAD=NAME", "1"),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workers_yaml() {
        let yaml = r#"
commands:
  analyzer:
    program: python
    args: ["services/mcp_analyzer/src/server.py"]
    env:
      PYTHONUNBUFFERED: "1"
"#;
        let config: WorkersConfig = serde_yaml::from_str(yaml).unwrap();
        let analyzer = config.command_for(WorkerKind::Analyzer).unwrap();
        assert_eq!(analyzer.program, PathBuf::from("python"));
        assert_eq!(analyzer.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert!(config.command_for(WorkerKind::Collector).is_none());
    }
}
