//! Boot-time application of deferred updates.
//!
//! System and data overlay payloads cannot be swapped in while the system is
//! running. They are extracted into a pending directory, and a small shell
//! script is dropped where the boot sequence picks it up. On the next boot
//! the script copies the pending payload over the live root, then removes
//! the payload and itself.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{UpdateError, UpdateResult};

/// Writes the boot-time trigger script.
#[derive(Debug, Clone)]
pub struct BootTrigger {
    script_path: PathBuf,
}

impl BootTrigger {
    /// Trigger backed by the boot script at `script_path`.
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }

    /// Where the boot script is written.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Whether a trigger is waiting for the next boot.
    pub fn is_armed(&self) -> bool {
        self.script_path.is_file()
    }

    /// Script text applying `pending_dir` onto `live_root`.
    pub fn render(&self, pending_dir: &Path, live_root: &Path) -> String {
        let pending = shell_quote(pending_dir);
        let live = shell_quote(live_root);
        let script = shell_quote(&self.script_path);

        format!(
            "#!/bin/sh\n\
             # Generated by modupdater. Applies a verified update on boot.\n\
             set -e\n\
             PENDING={pending}\n\
             LIVE={live}\n\
             if [ -d \"$PENDING\" ]; then\n\
             \tmkdir -p \"$LIVE\"\n\
             \tcp -a \"$PENDING\"/. \"$LIVE\"/\n\
             \tsync\n\
             \trm -rf \"$PENDING\"\n\
             fi\n\
             rm -f {script}\n\
             sync\n"
        )
    }

    /// Atomically write the script (temp file, then rename), mode 0755.
    ///
    /// # Arguments
    ///
    /// * `pending_dir` - directory holding the staged payload
    /// * `live_root` - root the payload is copied onto at boot
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be written or renamed into place.
    pub fn arm(&self, pending_dir: &Path, live_root: &Path) -> UpdateResult<()> {
        if let Some(parent) = self.script_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| UpdateError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let tmp = self.script_path.with_extension("tmp");
        let content = self.render(pending_dir, live_root);
        {
            let mut file = fs::File::create(&tmp).map_err(|e| UpdateError::io(&tmp, e))?;
            file.write_all(content.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| UpdateError::io(&tmp, e))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))
                .map_err(|e| UpdateError::io(&tmp, e))?;
        }

        fs::rename(&tmp, &self.script_path).map_err(|e| UpdateError::io(&self.script_path, e))?;
        info!(
            script = %self.script_path.display(),
            pending = %pending_dir.display(),
            live = %live_root.display(),
            "Boot trigger armed"
        );
        Ok(())
    }

    /// Remove a previously armed script. Returns whether one was armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the script exists but cannot be removed.
    pub fn disarm(&self) -> UpdateResult<bool> {
        match fs::remove_file(&self.script_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(UpdateError::io(&self.script_path, e)),
        }
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Hands control to the platform once a deferred update is armed.
pub trait RebootHandoff: Send + Sync {
    fn request_reboot(&self) -> UpdateResult<()>;
}

/// Flushes file systems and reboots the device.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReboot;

impl RebootHandoff for SystemReboot {
    fn request_reboot(&self) -> UpdateResult<()> {
        info!("Syncing file systems before reboot");
        let sync = Command::new("sync")
            .status()
            .map_err(|e| UpdateError::RebootFailed(format!("sync: {}", e)))?;
        if !sync.success() {
            warn!(status = ?sync.code(), "sync exited with an error");
        }

        info!("Rebooting");
        let status = Command::new("reboot")
            .status()
            .map_err(|e| UpdateError::RebootFailed(format!("reboot: {}", e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(UpdateError::RebootFailed(format!(
                "reboot exited with {:?}",
                status.code()
            )))
        }
    }
}

/// Leaves the reboot to the user.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualReboot;

impl RebootHandoff for ManualReboot {
    fn request_reboot(&self) -> UpdateResult<()> {
        info!("Update will be applied on the next reboot");
        Ok(())
    }
}
