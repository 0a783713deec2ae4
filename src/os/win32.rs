use std::{io, thread, time::Duration};

use anyhow::{Result, bail};
use windows_sys::Win32::{
    Foundation::{BOOL, HWND, LPARAM, TRUE, WPARAM},
    UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic,
        IsWindowVisible, PostMessageW, SC_MINIMIZE, SW_MINIMIZE, ShowWindow, WM_CLOSE,
        WM_SYSCOMMAND,
    },
};

use super::{ProcessId, WindowApi, WindowId};

/// Time given to a window to process `SW_MINIMIZE` before we check it.
const MINIMIZE_SETTLE: Duration = Duration::from_millis(100);

pub(crate) struct Win32Windows;

struct EnumContext<'a> {
    pids: &'a [ProcessId],
    found: Vec<HWND>,
}

unsafe extern "system" fn collect_owned(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam is the EnumContext passed by `top_level_windows`, which
    // outlives the synchronous EnumWindows call.
    let ctx = unsafe { &mut *(lparam as *mut EnumContext<'_>) };
    let mut owner = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, &mut owner) };
    if ctx.pids.iter().any(|pid| pid.0 == owner) {
        ctx.found.push(hwnd);
    }
    TRUE
}

fn top_level_windows(pids: &[ProcessId]) -> Vec<HWND> {
    let mut ctx = EnumContext {
        pids,
        found: Vec::new(),
    };
    let ok = unsafe { EnumWindows(Some(collect_owned), &mut ctx as *mut EnumContext<'_> as LPARAM) };
    if ok == 0 {
        tracing::debug!("EnumWindows failed: {}", io::Error::last_os_error());
    }
    ctx.found
}

/// Ask every top-level window of `pids` to close. Returns how many windows
/// accepted the request.
pub(crate) fn close_windows_of(pids: &[ProcessId]) -> usize {
    top_level_windows(pids)
        .into_iter()
        .filter(|hwnd| unsafe { PostMessageW(*hwnd, WM_CLOSE, 0, 0) } != 0)
        .count()
}

impl WindowApi for Win32Windows {
    fn windows_owned_by(&self, pids: &[ProcessId]) -> Vec<WindowId> {
        top_level_windows(pids).into_iter().map(WindowId).collect()
    }

    fn is_visible(&self, window: WindowId) -> bool {
        unsafe { IsWindowVisible(window.0) != 0 }
    }

    fn is_minimized(&self, window: WindowId) -> bool {
        unsafe { IsIconic(window.0) != 0 }
    }

    fn minimize(&self, window: WindowId) -> Result<()> {
        if self.is_minimized(window) {
            return Ok(());
        }
        unsafe { ShowWindow(window.0, SW_MINIMIZE) };
        thread::sleep(MINIMIZE_SETTLE);
        if self.is_minimized(window) {
            return Ok(());
        }

        // Some windows swallow ShowWindow while they are still initialising
        // but honour the system menu command.
        let posted =
            unsafe { PostMessageW(window.0, WM_SYSCOMMAND, SC_MINIMIZE as WPARAM, 0) };
        if posted == 0 {
            bail!(
                "window {window} rejected minimize: {}",
                io::Error::last_os_error()
            );
        }
        Ok(())
    }

    fn title(&self, window: WindowId) -> Option<String> {
        let len = unsafe { GetWindowTextLengthW(window.0) };
        if len <= 0 {
            return None;
        }
        let mut buffer = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(window.0, buffer.as_mut_ptr(), len + 1) };
        if copied <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..copied as usize]))
    }
}
