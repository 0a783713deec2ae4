use std::sync::Once;

use anyhow::{Result, bail};

use super::{ProcessId, WindowApi, WindowId};

/// Window backend for platforms without a supported window manager. It never
/// sees a window, so every search ends as not found.
pub(crate) struct HeadlessWindows {
    warned: Once,
}

impl HeadlessWindows {
    pub fn new() -> Self {
        Self { warned: Once::new() }
    }
}

impl WindowApi for HeadlessWindows {
    fn windows_owned_by(&self, _pids: &[ProcessId]) -> Vec<WindowId> {
        self.warned.call_once(|| {
            tracing::warn!("window management is only available on Windows; windows stay as they are");
        });
        Vec::new()
    }

    fn is_visible(&self, _window: WindowId) -> bool {
        false
    }

    fn is_minimized(&self, _window: WindowId) -> bool {
        false
    }

    fn minimize(&self, window: WindowId) -> Result<()> {
        bail!("cannot minimize window {window} on this platform")
    }
}
