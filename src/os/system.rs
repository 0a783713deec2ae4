use std::{
    collections::HashMap,
    fs,
    path::Path,
    process::{Child, Command, Stdio},
};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessStatus, System};

use super::{ProcessApi, ProcessId};
use crate::error::{LaunchError, LaunchFailure};

/// Process control backed by `std::process` for the programs we spawn and
/// `sysinfo` for everything else (descendants, pre-existing instances).
pub(crate) struct SystemProcesses {
    system: Mutex<System>,
    // Spawned children stay here so they get reaped and their exit is seen
    // even after the pid is recycled.
    children: Mutex<HashMap<ProcessId, Child>>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn listed_alive(&self, pid: ProcessId) -> bool {
        let sys_pid = Pid::from_u32(pid.0);
        let mut system = self.system.lock();
        if !system.refresh_process(sys_pid) {
            return false;
        }
        system
            .process(sys_pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn kill_listed(&self, pid: ProcessId) -> Result<()> {
        let sys_pid = Pid::from_u32(pid.0);
        let mut system = self.system.lock();
        if !system.refresh_process(sys_pid) {
            return Ok(());
        }
        let Some(process) = system.process(sys_pid) else {
            return Ok(());
        };
        if !process.kill() {
            bail!("failed to kill process {pid}");
        }
        Ok(())
    }

    #[cfg(unix)]
    fn request_close(&self, pid: ProcessId) -> Result<()> {
        use sysinfo::Signal;

        let sys_pid = Pid::from_u32(pid.0);
        let mut system = self.system.lock();
        if !system.refresh_process(sys_pid) {
            return Ok(());
        }
        let Some(process) = system.process(sys_pid) else {
            return Ok(());
        };
        match process.kill_with(Signal::Term) {
            Some(true) => Ok(()),
            Some(false) => bail!("failed to send SIGTERM to {pid}"),
            None => bail!("SIGTERM is not supported on this platform"),
        }
    }

    #[cfg(windows)]
    fn request_close(&self, pid: ProcessId) -> Result<()> {
        let closed = super::win32::close_windows_of(&[pid]);
        if closed == 0 {
            bail!("process {pid} has no window to close");
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn request_close(&self, pid: ProcessId) -> Result<()> {
        bail!("graceful termination is not supported for {pid}")
    }
}

impl ProcessApi for SystemProcesses {
    fn start(&self, path: &Path, arguments: &str) -> Result<ProcessId, LaunchError> {
        // The child runs from the executable's folder, so a relative path
        // must be pinned to our own working directory first.
        let path = std::path::absolute(path).map_err(|err| LaunchError::from_io(&err))?;
        let path = path.as_path();
        if !path.exists() {
            return Err(LaunchError::new(
                LaunchFailure::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }

        let mut command = Command::new(path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        apply_arguments(&mut command, arguments)?;
        detach(&mut command);

        let child = command.spawn().map_err(|err| LaunchError::from_io(&err))?;
        let pid = ProcessId(child.id());
        self.children.lock().insert(pid, child);
        Ok(pid)
    }

    fn exists(&self, pid: ProcessId) -> bool {
        if let Some(child) = self.children.lock().get_mut(&pid) {
            match child.try_wait() {
                Ok(None) => return true,
                Ok(Some(_)) => return false,
                Err(err) => {
                    tracing::debug!(%pid, "try_wait failed, asking the process table: {err}");
                }
            }
        }
        self.listed_alive(pid)
    }

    fn terminate(&self, pid: ProcessId, forceful: bool) -> Result<()> {
        if !forceful {
            return self.request_close(pid);
        }
        if let Some(child) = self.children.lock().get_mut(&pid) {
            return child
                .kill()
                .with_context(|| format!("failed to kill process {pid}"));
        }
        self.kill_listed(pid)
    }

    fn child_processes(&self, pid: ProcessId) -> Vec<ProcessId> {
        let parent = Pid::from_u32(pid.0);
        let mut system = self.system.lock();
        system.refresh_processes();
        system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(parent) && p.status() != ProcessStatus::Zombie)
            .map(|(child, _)| ProcessId(child.as_u32()))
            .collect()
    }

    fn instances_of(&self, path: &Path) -> Vec<ProcessId> {
        let wanted = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut system = self.system.lock();
        system.refresh_processes();
        system
            .processes()
            .iter()
            .filter(|(_, p)| {
                p.exe().is_some_and(|exe| {
                    exe == wanted || fs::canonicalize(exe).is_ok_and(|c| c == wanted)
                })
            })
            .map(|(pid, _)| ProcessId(pid.as_u32()))
            .collect()
    }
}

#[cfg(windows)]
fn apply_arguments(command: &mut Command, arguments: &str) -> Result<(), LaunchError> {
    use std::os::windows::process::CommandExt;

    // Windows programs parse their own command line, so hand it over as is.
    if !arguments.is_empty() {
        command.raw_arg(arguments);
    }
    Ok(())
}

#[cfg(not(windows))]
fn apply_arguments(command: &mut Command, arguments: &str) -> Result<(), LaunchError> {
    if arguments.is_empty() {
        return Ok(());
    }
    let args = shlex::split(arguments).ok_or_else(|| {
        LaunchError::new(
            LaunchFailure::OsRejected,
            format!("cannot split arguments: {arguments}"),
        )
    })?;
    command.args(args);
    Ok(())
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    use windows_sys::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};

    command.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // Keep Ctrl+C in our terminal from reaching the helpers directly; the
    // shutdown cascade closes them in order instead.
    command.process_group(0);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
