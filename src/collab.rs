//! Non-core collaborators the engine talks to through narrow interfaces
//! (§9 Design Notes: "the core never imports a GUI library").

use std::path::PathBuf;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// File-chooser and download-folder-chooser, invoked by the CLI binaries
/// (or a future dialog collaborator) and handed to the engine by value.
/// The engine itself never depends on a GUI toolkit.
pub trait Dialog {
    fn choose_upload(&self, dir_allowed: bool) -> Result<Vec<PathBuf>>;
    fn choose_download(&self) -> Result<PathBuf>;
}

/// A [`Dialog`] that never prompts; used when the CLI supplies paths
/// directly on the command line.
pub struct NoDialog;

impl Dialog for NoDialog {
    fn choose_upload(&self, _dir_allowed: bool) -> Result<Vec<PathBuf>> {
        anyhow::bail!("no file dialog configured; pass paths explicitly")
    }

    fn choose_download(&self) -> Result<PathBuf> {
        anyhow::bail!("no file dialog configured; pass a destination explicitly")
    }
}

/// Thin wrapper around an `indicatif` progress bar, suppressed entirely
/// when `quiet` is set (§10.5).
pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(total_bytes: u64, quiet: bool) -> Self {
        if quiet {
            return Progress { bar: None };
        }
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Progress { bar: Some(bar) }
    }

    pub fn set_position(&self, saved: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(saved);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dialog_always_errs() {
        assert!(NoDialog.choose_upload(true).is_err());
        assert!(NoDialog.choose_download().is_err());
    }

    #[test]
    fn quiet_progress_has_no_bar() {
        let p = Progress::new(100, true);
        assert!(p.bar.is_none());
        p.set_position(50);
        p.finish();
    }
}
