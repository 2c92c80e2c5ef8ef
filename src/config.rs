//! Adapter configuration, launch/attach arguments and their validation.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variables passed through to the debuggee.
///
/// The runtime is started with `env_clear()`; only these survive.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Host used by launch requests and attach requests without `host`.
pub const DEFAULT_HOST: &str = "localhost";

// ── Adapter configuration file ────────────────────────────────────────────────

/// Runtime defaults applied when launch/attach arguments omit them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Debug port used when the front end does not pass one.
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// Deadline for the initial connect, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Grace period before a terminating debuggee is killed, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// Delay between connect attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Runtime executable name used to build the default runtime path.
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
}

fn default_port() -> u16 {
    9090
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_executable_name() -> String {
    "runtime".into()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            connect_timeout_ms: default_timeout_ms(),
            terminate_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            executable_name: default_executable_name(),
        }
    }
}

impl RuntimeConfig {
    /// Initial connect deadline.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Terminate grace period.
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    /// Delay between connect attempts.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Executable file name for the host platform.
    #[must_use]
    pub fn executable_file_name(&self) -> String {
        if cfg!(windows) && !self.executable_name.to_ascii_lowercase().ends_with(".exe") {
            format!("{}.exe", self.executable_name)
        } else {
            self.executable_name.clone()
        }
    }
}

/// Front-end listener settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// TCP address to accept front ends on; stdio when absent.
    #[serde(default)]
    pub listen: Option<String>,
}

/// Adapter configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Runtime defaults.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl AdapterConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address does not parse.
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.server
            .listen
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|err| AppError::Config(format!("server.listen invalid: {err}")))
            })
            .transpose()
    }

    fn validate(&self) -> Result<()> {
        let runtime = &self.runtime;
        if runtime.connect_timeout_ms == 0 {
            return Err(AppError::Config(
                "runtime.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        if runtime.terminate_timeout_ms == 0 {
            return Err(AppError::Config(
                "runtime.terminate_timeout_ms must be greater than zero".into(),
            ));
        }
        if runtime.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "runtime.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if runtime.executable_name.trim().is_empty() {
            return Err(AppError::Config(
                "runtime.executable_name must not be empty".into(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }
}

// ── Launch / attach arguments ─────────────────────────────────────────────────

/// How a launched debuggee is hosted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConsoleKind {
    /// Child process with captured output.
    #[default]
    Debug,
    /// Visible terminal; no output capture.
    Terminal,
}

/// Arguments of a `launch` request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchArgs {
    /// Script the runtime executes.
    pub program: Option<String>,
    /// Runtime executable; derived from the workspace when absent.
    pub runtime: Option<String>,
    /// Debug port.
    pub port: Option<u16>,
    /// Connect timeout and terminate grace period, in milliseconds.
    pub timeout: Option<u64>,
    /// Run without debugging.
    pub no_debug: bool,
    /// Pass `-console` (default on).
    pub console: Option<bool>,
    /// `"terminal"` to run in a terminal, anything else captures output.
    pub console_type: Option<String>,
    /// Pass `-disableScriptCache` (default on).
    pub disable_script_cache: Option<bool>,
    /// Pass `-disableOpcodeCache` (default on).
    pub disable_opcode_cache: Option<bool>,
    /// Pass `-reportMemoryLeaks`.
    pub report_memory_leaks: bool,
    /// Extra runtime arguments placed before the program.
    pub args: Vec<String>,
    /// Folder holding the original sources.
    pub source_folder: Option<String>,
    /// Folder holding `.map` files.
    pub source_maps_folder: Option<String>,
    /// Disable source mapping.
    pub no_source_maps: bool,
    /// Workspace folder used to locate the default runtime.
    pub workspace_folder: Option<String>,
}

/// Arguments of an `attach` request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachArgs {
    /// Script the runtime executes.
    pub program: Option<String>,
    /// Debuggee host.
    pub host: Option<String>,
    /// Debug port.
    pub port: Option<u16>,
    /// Connect timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Folder holding the original sources.
    pub source_folder: Option<String>,
    /// Folder holding `.map` files.
    pub source_maps_folder: Option<String>,
    /// Disable source mapping.
    pub no_source_maps: bool,
}

/// Everything the supervisor needs to start the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Runtime executable.
    pub runtime: PathBuf,
    /// Folder the runtime runs in.
    pub working_dir: PathBuf,
    /// Runtime command-line arguments.
    pub args: Vec<String>,
    /// Debug port.
    pub port: u16,
    /// Connect deadline.
    pub timeout: Duration,
    /// Terminate grace period before the runtime is killed.
    pub grace: Duration,
    /// Run without debugging.
    pub no_debug: bool,
    /// Hosting mode.
    pub console: ConsoleKind,
}

impl LaunchArgs {
    /// Hosting mode requested by `consoleType`.
    #[must_use]
    pub fn console_kind(&self) -> ConsoleKind {
        match self.console_type.as_deref() {
            Some("terminal") => ConsoleKind::Terminal,
            _ => ConsoleKind::Debug,
        }
    }

    /// Resolve the runtime executable and command line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no runtime can be determined or the
    /// runtime file does not exist.
    pub fn plan(&self, defaults: &RuntimeConfig) -> Result<LaunchPlan> {
        let program = self
            .program
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Config("Parameter \"program\" not specified".into()))?;

        let runtime = match self.runtime.as_deref().filter(|r| !r.is_empty()) {
            Some(runtime) => PathBuf::from(runtime),
            None => default_runtime_path(
                self.workspace_folder.as_deref(),
                Path::new(program),
                &defaults.executable_file_name(),
            )
            .ok_or_else(|| AppError::Config("Parameter \"runtime\" not specified".into()))?,
        };
        let runtime = PathBuf::from(normalize_local_path(&runtime.to_string_lossy()));

        if !runtime.is_file() {
            return Err(AppError::Config(format!(
                "Parameter \"runtime\": file not found: {}",
                runtime.display()
            )));
        }
        let runtime = fs::canonicalize(&runtime).map_err(|err| {
            AppError::Config(format!(
                "Parameter \"runtime\": {}: {err}",
                runtime.display()
            ))
        })?;
        let working_dir = runtime
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let port = self.port.filter(|&p| p != 0).unwrap_or(defaults.default_port);
        let requested = self.timeout.filter(|&t| t != 0).map(Duration::from_millis);
        let timeout = requested.unwrap_or_else(|| defaults.connect_timeout());
        let grace = requested.unwrap_or_else(|| defaults.terminate_timeout());

        Ok(LaunchPlan {
            runtime,
            working_dir,
            args: self.runtime_args(program, port),
            port,
            timeout,
            grace,
            no_debug: self.no_debug,
            console: self.console_kind(),
        })
    }

    /// Runtime command line for `program` on `port`.
    #[must_use]
    pub fn runtime_args(&self, program: &str, port: u16) -> Vec<String> {
        let mut args = Vec::new();

        if !self.no_debug {
            args.push("-debug".to_owned());
            args.push("-paused".to_owned());
            // The runtime expects flag and value in one argument.
            args.push(format!("-port {port}"));
        }
        if self.console != Some(false) {
            args.push("-console".to_owned());
        }
        if self.disable_script_cache != Some(false) {
            args.push("-disableScriptCache".to_owned());
        }
        if self.disable_opcode_cache != Some(false) {
            args.push("-disableOpcodeCache".to_owned());
        }
        if self.report_memory_leaks {
            args.push("-reportMemoryLeaks".to_owned());
        }
        args.extend(self.args.iter().cloned());
        args.push(program.to_owned());
        args
    }

    /// Source layout options.
    #[must_use]
    pub fn source_options(&self) -> SourceOptions<'_> {
        SourceOptions {
            program: self.program.as_deref(),
            source_folder: self.source_folder.as_deref(),
            source_maps_folder: self.source_maps_folder.as_deref(),
            no_source_maps: self.no_source_maps,
        }
    }
}

impl AttachArgs {
    /// Debuggee host, `localhost` by default.
    #[must_use]
    pub fn host(&self) -> &str {
        self.host
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST)
    }

    /// Source layout options.
    #[must_use]
    pub fn source_options(&self) -> SourceOptions<'_> {
        SourceOptions {
            program: self.program.as_deref(),
            source_folder: self.source_folder.as_deref(),
            source_maps_folder: self.source_maps_folder.as_deref(),
            no_source_maps: self.no_source_maps,
        }
    }
}

// ── Source layout ─────────────────────────────────────────────────────────────

/// Source-related options shared by launch and attach.
#[derive(Debug, Clone, Copy)]
pub struct SourceOptions<'a> {
    /// Script the runtime executes.
    pub program: Option<&'a str>,
    /// Folder holding the original sources.
    pub source_folder: Option<&'a str>,
    /// Folder holding `.map` files.
    pub source_maps_folder: Option<&'a str>,
    /// Disable source mapping.
    pub no_source_maps: bool,
}

/// Validated folders of a debug session. Folder strings end with a
/// separator so they can be used as path prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    /// Program file name relative to `program_folder`.
    pub program_name: String,
    /// Folder of the program file.
    pub program_folder: String,
    /// Explicit source folder, or the program folder without mapping.
    pub source_folder: Option<String>,
    /// Folder holding `.map` files; `None` when mapping is disabled.
    pub maps_folder: Option<String>,
}

impl SourceOptions<'_> {
    /// Check that every referenced file and folder exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the offending parameter.
    pub fn resolve(&self) -> Result<SourceLayout> {
        let program = self
            .program
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Config("Parameter \"program\" not specified".into()))?;
        let program_path = Path::new(program);
        if !program_path.exists() {
            return Err(AppError::Config(format!(
                "Parameter \"program\": file not found: {program}"
            )));
        }

        let parent = program_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_owned());
        let program_folder = with_trailing_separator(&normalize_local_path(&parent));
        let program_name = program_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let maps_folder = if self.no_source_maps {
            None
        } else {
            match self.source_maps_folder.filter(|f| !f.is_empty()) {
                Some(folder) => {
                    if !Path::new(folder).is_dir() {
                        return Err(AppError::Config(format!(
                            "Parameter \"sourceMapsFolder\": folder not found: {folder}"
                        )));
                    }
                    Some(with_trailing_separator(&normalize_local_path(folder)))
                }
                None => Some(program_folder.clone()),
            }
        };

        let source_folder = match self.source_folder.filter(|f| !f.is_empty()) {
            Some(folder) => {
                if !Path::new(folder).is_dir() {
                    return Err(AppError::Config(format!(
                        "Parameter \"sourceFolder\": folder not found: {folder}"
                    )));
                }
                Some(with_trailing_separator(&normalize_local_path(folder)))
            }
            None if self.no_source_maps => Some(program_folder.clone()),
            None => None,
        };

        Ok(SourceLayout {
            program_name,
            program_folder,
            source_folder,
            maps_folder,
        })
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

/// Platform directory next to the workspace that holds the runtime build.
#[must_use]
pub const fn platform_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        "osx-x64"
    } else if cfg!(windows) {
        "win-x64"
    } else {
        "linux-x64"
    }
}

/// `<workspace>/../<platform dir>/<executable>`.
///
/// `workspace` defaults to the grandparent folder of `program`.
#[must_use]
pub fn default_runtime_path(
    workspace: Option<&str>,
    program: &Path,
    executable: &str,
) -> Option<PathBuf> {
    let workspace = match workspace.filter(|w| !w.is_empty()) {
        Some(folder) => PathBuf::from(folder),
        None => program.parent()?.parent()?.to_path_buf(),
    };
    Some(workspace.join("..").join(platform_dir()).join(executable))
}

fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

/// Lexically normalise `path` and lower-case its first character.
///
/// Resolves `.` and `..` components and repeated separators, keeps a
/// trailing separator, and lower-cases the first character so Windows drive
/// letters compare equal regardless of how they were reported.
#[must_use]
pub fn normalize_local_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let separator = std::path::MAIN_SEPARATOR;
    let absolute = path.starts_with(is_separator);
    let trailing = path.ends_with(is_separator);

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(is_separator) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    if absolute {
        normalized.push(separator);
    }
    normalized.push_str(&parts.join(&separator.to_string()));
    if trailing && !parts.is_empty() {
        normalized.push(separator);
    }
    if normalized.is_empty() {
        normalized.push('.');
    }

    let mut chars = normalized.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => normalized,
    }
}

/// Append the platform separator unless `path` already ends with one.
#[must_use]
pub fn with_trailing_separator(path: &str) -> String {
    if path.ends_with(is_separator) {
        path.to_owned()
    } else {
        format!("{path}{}", std::path::MAIN_SEPARATOR)
    }
}
