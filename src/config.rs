use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SAMPLE_CONFIG: &str = r#"# pitcrew configuration
#
# Helpers are started top to bottom, the program marked is_main = true is
# started last. When it exits, every helper is closed again in reverse order.

version = 1

# All durations are in milliseconds.
[timing]
window_search_max_attempts = 10
window_search_attempt_interval = 500
splash_monitor_total_budget = 60000
splash_monitor_poll_interval = 1000
main_watch_poll_interval = 1000
termination_grace_timeout = 5000
# Second, longer search for normal programs whose window was not found the
# first time. Set the attempts to 0 to skip it.
retry_search_max_attempts = 8
retry_search_attempt_interval = 1500

[[program]]
name = "SimHub"
path = 'C:\Program Files (x86)\SimHub\SimHubWPF.exe'

[[program]]
name = "Crew Chief"
path = 'C:\Program Files (x86)\Britton IT Ltd\CrewChiefV4\CrewChiefV4.exe'
arguments = "-minimized"
systray_only = true

[[program]]
name = "Oculus Client"
path = 'C:\Program Files\Oculus\Support\oculus-client\OculusClient.exe'
has_splash_screen = true

[[program]]
name = "iRacing"
path = 'C:\Program Files (x86)\iRacing\ui\iRacingUI.exe'
is_main = true
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub timing: Timing,
    #[serde(rename = "program", alias = "programs", default)]
    pub programs: Vec<ProgramEntry>,
}

/// One `[[program]]` table as written by the user, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default, alias = "starts_in_tray")]
    pub systray_only: bool,
    #[serde(default)]
    pub has_splash_screen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub window_search_max_attempts: u32,
    pub window_search_attempt_interval: u64,
    pub splash_monitor_total_budget: u64,
    pub splash_monitor_poll_interval: u64,
    pub main_watch_poll_interval: u64,
    pub termination_grace_timeout: u64,
    pub retry_search_max_attempts: u32,
    pub retry_search_attempt_interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Main,
    Helper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupBehavior {
    Normal,
    SystrayOnly,
    SplashScreen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    pub path: PathBuf,
    pub arguments: String,
    pub role: Role,
    pub startup: StartupBehavior,
}

/// A validated configuration: helpers in configured order plus the one main
/// program.
#[derive(Debug, Clone)]
pub struct ProgramSet {
    pub helpers: Vec<ProgramSpec>,
    pub main: ProgramSpec,
}

fn default_version() -> u32 {
    1
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            window_search_max_attempts: 10,
            window_search_attempt_interval: 500,
            splash_monitor_total_budget: 60_000,
            splash_monitor_poll_interval: 1_000,
            main_watch_poll_interval: 1_000,
            termination_grace_timeout: 5_000,
            retry_search_max_attempts: 8,
            retry_search_attempt_interval: 1_500,
        }
    }
}

impl Timing {
    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.window_search_attempt_interval)
    }

    pub fn splash_budget(&self) -> Duration {
        Duration::from_millis(self.splash_monitor_total_budget)
    }

    pub fn splash_poll(&self) -> Duration {
        Duration::from_millis(self.splash_monitor_poll_interval)
    }

    pub fn main_poll(&self) -> Duration {
        Duration::from_millis(self.main_watch_poll_interval)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_grace_timeout)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_search_attempt_interval)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                "window_search_max_attempts",
                u64::from(self.window_search_max_attempts),
            ),
            (
                "window_search_attempt_interval",
                self.window_search_attempt_interval,
            ),
            ("splash_monitor_total_budget", self.splash_monitor_total_budget),
            (
                "splash_monitor_poll_interval",
                self.splash_monitor_poll_interval,
            ),
            ("main_watch_poll_interval", self.main_watch_poll_interval),
            ("termination_grace_timeout", self.termination_grace_timeout),
            (
                "retry_search_attempt_interval",
                self.retry_search_attempt_interval,
            ),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(ConfigError::InvalidTiming { field }),
            None => Ok(()),
        }
    }
}

impl StartupBehavior {
    pub fn label(self) -> &'static str {
        match self {
            StartupBehavior::Normal => "normal",
            StartupBehavior::SystrayOnly => "systray-only",
            StartupBehavior::SplashScreen => "splash-screen",
        }
    }
}

impl ProgramSet {
    /// Programs in the order they are started: helpers first, main last.
    pub fn launch_order(&self) -> impl Iterator<Item = &ProgramSpec> {
        self.helpers.iter().chain(std::iter::once(&self.main))
    }
}

impl AppConfig {
    /// Load config from path. A missing file gets a sample written in its
    /// place and is reported as an error so nothing half-configured runs.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            if let Err(err) = write_sample(path, false) {
                tracing::warn!("could not write sample config: {err:#}");
            }
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, is_json(path)).map_err(|detail| ConfigError::Parse {
            path: path.to_path_buf(),
            detail,
        })
    }

    fn parse(raw: &str, json: bool) -> std::result::Result<Self, String> {
        if json {
            serde_json::from_str(raw).map_err(|err| err.to_string())
        } else {
            toml::from_str(raw).map_err(|err| err.to_string())
        }
    }

    /// Check the invariants the orchestrator relies on and split the list
    /// into helpers and the main program.
    pub fn validate(&self) -> Result<ProgramSet, ConfigError> {
        self.timing.validate()?;

        let mut seen_names = HashSet::new();
        let mut helpers = Vec::new();
        let mut mains = Vec::new();

        for (index, entry) in self.programs.iter().enumerate() {
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if entry.path.trim().is_empty() {
                return Err(ConfigError::EmptyPath { name: name.into() });
            }
            if entry.systray_only && entry.has_splash_screen {
                return Err(ConfigError::ConflictingStartup { name: name.into() });
            }
            if !seen_names.insert(name.to_string()) {
                tracing::warn!(program = name, "program name is used more than once");
            }

            let path = PathBuf::from(entry.path.trim());
            if !path.exists() {
                tracing::warn!(program = name, path = %path.display(), "path not found");
            }

            let startup = if entry.systray_only {
                StartupBehavior::SystrayOnly
            } else if entry.has_splash_screen {
                StartupBehavior::SplashScreen
            } else {
                StartupBehavior::Normal
            };

            let role = if entry.is_main { Role::Main } else { Role::Helper };
            let spec = ProgramSpec {
                name: name.into(),
                path,
                arguments: entry.arguments.trim().into(),
                role,
                startup,
            };

            match role {
                Role::Main => {
                    if startup != StartupBehavior::Normal {
                        tracing::warn!(
                            program = name,
                            "startup flags are ignored for the main program"
                        );
                    }
                    mains.push(ProgramSpec {
                        startup: StartupBehavior::Normal,
                        ..spec
                    });
                }
                Role::Helper => helpers.push(spec),
            }
        }

        if mains.len() > 1 {
            return Err(ConfigError::MultipleMainPrograms {
                names: mains.into_iter().map(|m| m.name).collect(),
            });
        }
        let main = mains.pop().ok_or(ConfigError::NoMainProgram)?;
        Ok(ProgramSet { helpers, main })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Write the commented sample config. Existing files are only replaced when
/// `force` is set.
pub fn write_sample(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
    }
    fs::write(path, SAMPLE_CONFIG)
        .with_context(|| format!("failed to write config file: {}", path.display()))
}

pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "pitcrew")
        .map(|dirs| dirs.config_dir().join("pitcrew.toml"))
        .unwrap_or_else(|| PathBuf::from("pitcrew.toml"))
}
