use std::path::Path;

use anyhow::{Context, Result};

use crate::{Config, Listen};

/// Creates the writable paths up front, then asks the kernel to confine the
/// process to them where the platform supports it.
pub fn enter(config: &Config) -> Result<()> {
    fs_err::create_dir_all(&config.store_path).context("failed to create the store directory")?;
    if let Listen::Unix(path) = &config.listen {
        if let Some(parent) = nonempty_parent(path) {
            fs_err::create_dir_all(parent).context("failed to create the socket directory")?;
        }
    }
    imp::lockdown(config)
}

fn nonempty_parent(path: &Path) -> Option<&Path> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

#[cfg(target_os = "openbsd")]
mod imp {
    use std::{ffi::CString, os::unix::ffi::OsStrExt, path::Path};

    use anyhow::{Context, Result, bail};
    use tracing::info;

    use crate::{Config, Listen};

    pub fn lockdown(config: &Config) -> Result<()> {
        unveil(Path::new("/"), "r")?;
        unveil(&config.store_path, "rwc")?;
        if let Listen::Unix(path) = &config.listen {
            let parent = super::nonempty_parent(path).unwrap_or_else(|| Path::new("."));
            unveil(parent, "rwc")?;
        }
        pledge("stdio rpath wpath cpath flock fattr inet unix")?;
        info!("entered kernel sandbox");
        Ok(())
    }

    fn unveil(path: &Path, permissions: &str) -> Result<()> {
        let path =
            CString::new(path.as_os_str().as_bytes()).context("unveil path contains NUL")?;
        let permissions = CString::new(permissions).context("unveil permissions contain NUL")?;
        // SAFETY: both arguments are valid NUL-terminated strings.
        let rc = unsafe { libc::unveil(path.as_ptr(), permissions.as_ptr()) };
        if rc == 0 {
            Ok(())
        } else {
            bail!("unveil failed: {}", std::io::Error::last_os_error());
        }
    }

    fn pledge(promises: &str) -> Result<()> {
        let promises = CString::new(promises).context("pledge promises contain NUL")?;
        // Empty execpromises: nothing this process execs may pledge anything.
        let execpromises = CString::new("").context("pledge execpromises contain NUL")?;
        // SAFETY: both arguments are valid NUL-terminated strings.
        let rc = unsafe { libc::pledge(promises.as_ptr(), execpromises.as_ptr()) };
        if rc == 0 {
            Ok(())
        } else {
            bail!("pledge failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "openbsd"))]
mod imp {
    use anyhow::Result;
    use tracing::debug;

    use crate::Config;

    pub fn lockdown(_config: &Config) -> Result<()> {
        debug!("kernel sandbox is unavailable on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_parents_resolve_to_real_directories() {
        assert_eq!(
            nonempty_parent(Path::new("/run/kleister.sock")),
            Some(Path::new("/run")),
        );
        assert_eq!(nonempty_parent(Path::new("kleister.sock")), None);
    }
}
