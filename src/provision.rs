//! Working directory provisioning.
//!
//! A server's process runs in `<root>/<envDir>`. Shared resources are linked
//! into that directory rather than copied, and the resolved launch command is
//! written next to them as a script for anyone inspecting the server by hand.
//!
//! Every step is idempotent so a retried or repeated provisioning converges
//! on the same layout.

use crate::config::Config;
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prepares server directories according to the configured layout
#[derive(Debug, Clone)]
pub struct Provisioner {
    env_dir: String,
    launch_script: String,
    jar_link_name: String,
    mods_link_name: String,
}

impl Provisioner {
    /// Create a provisioner using the layout from `config`
    pub fn new(config: &Config) -> Self {
        Self {
            env_dir: config.env_dir.clone(),
            launch_script: config.launch_script.clone(),
            jar_link_name: config.jar_link_name.clone(),
            mods_link_name: config.mods_link_name.clone(),
        }
    }

    /// Working directory of the server rooted at `root`
    pub fn env_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.env_dir)
    }

    /// Create the env directory, link resources into it and write the launch script.
    ///
    /// Returns the env directory.
    pub fn provision(
        &self,
        root: &Path,
        jar: &Path,
        mod_pack: Option<&Path>,
        command: &str,
    ) -> Result<PathBuf> {
        let env_dir = self.env_dir(root);
        fs::create_dir_all(&env_dir).map_err(|e| {
            Error::ProvisionFailed(format!(
                "Failed to create server environment directory {}: {}",
                env_dir.display(),
                e
            ))
        })?;

        link_resource(jar, &env_dir.join(&self.jar_link_name))?;
        if let Some(mod_pack) = mod_pack {
            link_resource(mod_pack, &env_dir.join(&self.mods_link_name))?;
        }
        self.write_launch_script(root, command)?;

        tracing::info!(root = %root.display(), "Server environment provisioned");
        Ok(env_dir)
    }

    /// Write `#!/bin/bash` followed by `command` to the launch script
    pub fn write_launch_script(&self, root: &Path, command: &str) -> Result<PathBuf> {
        let script = self.env_dir(root).join(&self.launch_script);
        fs::write(&script, format!("#!/bin/bash\n{}\n", command)).map_err(|e| {
            Error::ProvisionFailed(format!("Failed to write {}: {}", script.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).map_err(|e| {
                Error::ProvisionFailed(format!("Failed to make {} executable: {}", script.display(), e))
            })?;
        }

        Ok(script)
    }
}

/// Point `link` at `source`, replacing a stale link or file.
///
/// A link that already points at `source` is left untouched. A real
/// directory at `link` is never removed.
pub fn link_resource(source: &Path, link: &Path) -> Result<()> {
    match fs::read_link(link) {
        Ok(current) if current == source => {
            tracing::debug!(link = %link.display(), "Resource link already in place");
            return Ok(());
        }
        _ => {}
    }

    match fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::ProvisionFailed(format!(
                "Refusing to replace directory {} with a link",
                link.display()
            )));
        }
        Ok(_) => remove_link(link).map_err(|e| {
            Error::ProvisionFailed(format!("Failed to remove stale {}: {}", link.display(), e))
        })?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::ProvisionFailed(format!(
                "Failed to inspect {}: {}",
                link.display(),
                e
            )));
        }
    }

    symlink(source, link).map_err(|e| {
        Error::ProvisionFailed(format!(
            "Failed to link {} -> {}: {}",
            link.display(),
            source.display(),
            e
        ))
    })?;

    tracing::debug!(link = %link.display(), source = %source.display(), "Resource linked");
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink(source: &Path, link: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, link)
    } else {
        std::os::windows::fs::symlink_file(source, link)
    }
}

#[cfg(unix)]
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn remove_link(link: &Path) -> io::Result<()> {
    // Directory symlinks must be removed as directories on Windows
    fs::remove_file(link).or_else(|_| fs::remove_dir(link))
}
