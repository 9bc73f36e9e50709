//! Plugin descriptor schema.
//!
//! Defines the metadata every capability carries and the small value types the
//! command resolver trades in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    Language,
    #[serde(alias = "provider")]
    HostingProvider,
    PackageManager,
    Editor,
    Other,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Language => "language",
            PluginKind::HostingProvider => "hosting-provider",
            PluginKind::PackageManager => "package-manager",
            PluginKind::Editor => "editor",
            PluginKind::Other => "other",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "language" => Ok(PluginKind::Language),
            "hosting-provider" | "provider" => Ok(PluginKind::HostingProvider),
            "package-manager" => Ok(PluginKind::PackageManager),
            "editor" => Ok(PluginKind::Editor),
            "other" => Ok(PluginKind::Other),
            other => Err(format!("unknown plugin kind '{}'", other)),
        }
    }
}

/// A dependency on another registered plugin.
///
/// Accepts either a bare identifier or `{ "id": ..., "version": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RequirementRepr")]
pub struct PluginRequirement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PluginRequirement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementRepr {
    Id(String),
    Full {
        id: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl From<RequirementRepr> for PluginRequirement {
    fn from(repr: RequirementRepr) -> Self {
        match repr {
            RequirementRepr::Id(id) => PluginRequirement::new(id),
            RequirementRepr::Full { id, version } => PluginRequirement { id, version },
        }
    }
}

/// Descriptor shared by every capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Unique identifier (e.g. "python", "loom-plugin-elixir").
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub kind: PluginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Exact version, or `>=x.y.z`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<PluginRequirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_languages: Vec<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl PluginMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        kind: PluginKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            kind,
            description: None,
            min_host_version: None,
            requires: Vec::new(),
            requires_languages: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A verb that may be resolved to a command per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Test,
    Lint,
    Start,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Test, CommandKind::Lint, CommandKind::Start];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Test => "test",
            CommandKind::Lint => "lint",
            CommandKind::Start => "start",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(CommandKind::Test),
            "lint" => Ok(CommandKind::Lint),
            "start" => Ok(CommandKind::Start),
            other => Err(format!("unknown command kind '{}'", other)),
        }
    }
}

/// Per-kind command strings. Used both for discovered commands and for
/// explicit overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl CommandSet {
    /// Command for `kind`, ignoring blank strings.
    pub fn get(&self, kind: CommandKind) -> Option<&str> {
        let value = match kind {
            CommandKind::Test => self.test.as_deref(),
            CommandKind::Lint => self.lint.as_deref(),
            CommandKind::Start => self.start.as_deref(),
        };
        value.filter(|cmd| !cmd.trim().is_empty())
    }

    pub fn set(&mut self, kind: CommandKind, command: impl Into<String>) {
        let slot = match kind {
            CommandKind::Test => &mut self.test,
            CommandKind::Lint => &mut self.lint,
            CommandKind::Start => &mut self.start,
        };
        *slot = Some(command.into());
    }

    pub fn is_empty(&self) -> bool {
        CommandKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// How a resolved command gets executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommandRunner {
    /// The command is executable as-is.
    Direct,
    /// Prefix the command with `program args...`.
    Via { program: String, args: Vec<String> },
}

impl CommandRunner {
    pub fn via<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandRunner::Via {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, CommandRunner::Direct)
    }

    /// Full command line with the runner prefix applied.
    pub fn command_line(&self, command: &str) -> String {
        match self {
            CommandRunner::Direct => command.to_string(),
            CommandRunner::Via { program, args } => {
                let mut parts = Vec::with_capacity(args.len() + 2);
                parts.push(program.as_str());
                parts.extend(args.iter().map(String::as_str));
                parts.push(command);
                parts.join(" ")
            }
        }
    }
}

impl fmt::Display for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandRunner::Direct => f.write_str("(direct)"),
            CommandRunner::Via { program, args } if args.is_empty() => f.write_str(program),
            CommandRunner::Via { program, args } => write!(f, "{} {}", program, args.join(" ")),
        }
    }
}

/// Toolchain profile reported by a language plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toolchain {
    /// Primary executable (e.g. "node", "python3", "cargo").
    #[serde(default)]
    pub executable: Option<String>,
    /// Command that installs project dependencies.
    #[serde(default)]
    pub install_command: Option<String>,
    /// Command that builds the project.
    #[serde(default)]
    pub build_command: Option<String>,
    /// Source file extensions, without the dot.
    #[serde(default)]
    pub extensions: Vec<String>,
}
