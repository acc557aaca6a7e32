//! Layered configuration for stagehand.
//!
//! Settings are read from `.stagehand/stagehand.toml` in the project
//! directory, then overlaid with environment variables (a project `.env`
//! is loaded first), then with CLI flags by the command that needs them.
//!
//! # Configuration File Format
//!
//! ```toml
//! ignore = ["dist/**", "*.log"]
//!
//! [project]
//! kind = "multi-file"
//! entry = "src/main"
//!
//! [transform]
//! jsx_factory = "React.createElement"
//! jsx_fragment = "React.Fragment"
//!
//! [gateway]
//! port = 4173
//! host = "127.0.0.1"
//! scope = "/preview"
//! upstream = "https://cdn.example.com"
//!
//! [sandbox]
//! command = "node"
//! args = ["-"]
//! timeout_secs = 15
//! settle_ms = 250
//! mount_id = "root"
//!
//! [build]
//! boot_on = "plan"
//! replay_delay_ms = 40
//!
//! [logging]
//! format = "json"
//! dir = ".stagehand/logs"
//!
//! [externals]
//! "lodash" = "_"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::orchestrator::BootPolicy;
use crate::project::ProjectKind;
use crate::sandbox::shell::DEFAULT_MOUNT_ID;
use crate::transform::TransformConfig;

pub const CONFIG_DIR: &str = ".stagehand";
pub const CONFIG_FILE: &str = "stagehand.toml";

pub const ENV_PORT: &str = "STAGEHAND_PORT";
pub const ENV_UPSTREAM: &str = "STAGEHAND_UPSTREAM";
pub const ENV_NODE: &str = "STAGEHAND_NODE";

/// Project shape overrides; both fall back to detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// `static`, `single-file` or `multi-file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Entry designator overriding the kind's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// URL prefix under which project files are served
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Where requests outside the project are forwarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

fn default_port() -> u16 {
    4173
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_scope() -> String {
    "/preview".to_string()
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            scope: default_scope(),
            upstream: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// JavaScript runtime used to execute the linked program
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long the runtime waits for late faults after rendering
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_mount_id")]
    pub mount_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_command() -> String {
    "node".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-".to_string()]
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    250
}

fn default_mount_id() -> String {
    DEFAULT_MOUNT_ID.to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout_secs: default_timeout_secs(),
            settle_ms: default_settle_ms(),
            mount_id: default_mount_id(),
            env: BTreeMap::new(),
        }
    }
}

impl SandboxSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// `plan` boots once the plan settles, `file` after every completed file
    #[serde(default)]
    pub boot_on: BootPolicy,
    /// Pause between replayed chunks
    #[serde(default)]
    pub replay_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for a daily rolling log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// The complete stagehand.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandToml {
    /// Globs of project paths never loaded into the registry
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// `specifier = "globalName"` pairs resolved as externals
    #[serde(default)]
    pub externals: BTreeMap<String, String>,
}

impl StagehandToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stagehand.toml")
    }

    /// Load `stagehand.toml` from `config_dir`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize stagehand.toml")
    }

    /// Overlay environment values; `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup(ENV_PORT) {
            self.gateway.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_PORT} '{port}'"))?;
        }
        if let Some(upstream) = lookup(ENV_UPSTREAM).filter(|u| !u.trim().is_empty()) {
            self.gateway.upstream = Some(upstream.trim().to_string());
        }
        if let Some(node) = lookup(ENV_NODE).filter(|n| !n.trim().is_empty()) {
            self.sandbox.command = node.trim().to_string();
        }
        Ok(())
    }

    /// Configured project kind, if one is set and valid.
    pub fn project_kind(&self) -> Result<Option<ProjectKind>> {
        self.project
            .kind
            .as_deref()
            .map(str::parse::<ProjectKind>)
            .transpose()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.project_kind() {
            warnings.push(e.to_string());
        }
        if let Some(entry) = &self.project.entry
            && entry.trim().is_empty()
        {
            warnings.push("Invalid entry: must not be empty".to_string());
        }

        let scope = &self.gateway.scope;
        if !scope.is_empty() && (!scope.starts_with('/') || scope.len() == 1) {
            warnings.push(format!(
                "Invalid scope '{}': should start with '/' (e.g., '/preview') or be empty",
                scope
            ));
        }
        if scope.ends_with('/') && scope.len() > 1 {
            warnings.push(format!("Invalid scope '{}': should not end with '/'", scope));
        }
        if let Some(upstream) = &self.gateway.upstream {
            match reqwest::Url::parse(upstream) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => warnings.push(format!(
                    "Invalid upstream '{}': unsupported scheme '{}'",
                    upstream,
                    url.scheme()
                )),
                Err(e) => warnings.push(format!("Invalid upstream '{}': {}", upstream, e)),
            }
        }

        if self.sandbox.command.trim().is_empty() {
            warnings.push("Invalid sandbox command: must not be empty".to_string());
        }
        if self.sandbox.timeout_secs == 0 {
            warnings.push("Invalid timeout_secs 0: must be at least 1".to_string());
        }
        if self.sandbox.mount_id.trim().is_empty() {
            warnings.push("Invalid mount_id: must not be empty".to_string());
        }

        if self.transform.jsx_factory.trim().is_empty() {
            warnings.push("Invalid jsx_factory: must not be empty".to_string());
        }
        if self.transform.jsx_fragment.trim().is_empty() {
            warnings.push("Invalid jsx_fragment: must not be empty".to_string());
        }

        for (specifier, global) in &self.externals {
            if !is_global_name(global) {
                warnings.push(format!(
                    "Invalid external '{}': '{}' is not a global name",
                    specifier, global
                ));
            }
        }
        for pattern in &self.ignore {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(format!("Invalid ignore pattern '{}': {}", pattern, e));
            }
        }

        warnings
    }
}

/// Dotted JavaScript identifier path such as `_` or `window.Chart`.
fn is_global_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

/// Commented starting point written by `stagehand config init`.
pub const CONFIG_TEMPLATE: &str = r#"# stagehand configuration
#
# Paths (globs) never loaded from the project directory.
ignore = []

[project]
# kind = "multi-file"   # static | single-file | multi-file (detected when unset)
# entry = "src/App"     # overrides the kind's entry designator

[transform]
jsx_factory = "React.createElement"
jsx_fragment = "React.Fragment"

[gateway]
port = 4173
host = "127.0.0.1"
scope = "/preview"
# upstream = "https://cdn.example.com"

[sandbox]
command = "node"
args = ["-"]
timeout_secs = 15
settle_ms = 250
mount_id = "root"

[build]
boot_on = "plan"        # plan | file
replay_delay_ms = 0

[logging]
format = "pretty"       # pretty | json
# dir = ".stagehand/logs"

[externals]
# "lodash" = "_"
"#;

/// Configuration resolved for one project directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: StagehandToml,
}

impl Config {
    /// Load file settings, then the project `.env`, then process environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = StagehandToml::load_or_default(&config_dir)?;

        let env_file = project_dir.join(".env");
        if env_file.exists() {
            dotenvy::from_path(&env_file)
                .with_context(|| format!("Failed to load {}", env_file.display()))?;
        }
        toml.apply_env(|key| std::env::var(key).ok())?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn has_config_file(&self) -> bool {
        self.config_path().exists()
    }

    /// Write the commented template unless a config file already exists.
    /// Returns whether a file was written.
    pub fn init_file(&self) -> Result<bool> {
        let path = self.config_path();
        if path.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.config_dir)
            .with_context(|| format!("Failed to create {}", self.config_dir.display()))?;
        std::fs::write(&path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(true)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
