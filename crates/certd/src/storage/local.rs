//! Local certificate files
//!
//! The local TLS server reads two files from one directory:
//!
//! ```text
//! out_dir/
//! ├── fullchain.pem     # Certificate chain, leaf first (0644)
//! └── privkey.pem       # EC PRIVATE KEY (0600)
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! reader never observes a half-written chain or key.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use seedcert_common::DerivedKey;
use tracing::{debug, info};

use super::{LocalWriter, StorageError};

/// File name of the certificate chain
pub const FULLCHAIN_FILE: &str = "fullchain.pem";

/// File name of the private key
pub const PRIVKEY_FILE: &str = "privkey.pem";

const CHAIN_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

/// Filesystem implementation of [`LocalWriter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLocalWriter;

impl FsLocalWriter {
    pub fn new() -> Self {
        Self
    }
}

impl LocalWriter for FsLocalWriter {
    fn write_chain(&self, out_dir: &Path, chain_pem: &str) -> Result<PathBuf, StorageError> {
        let path = write_atomic(out_dir, FULLCHAIN_FILE, chain_pem.as_bytes(), CHAIN_MODE)?;
        info!(path = %path.display(), "Wrote certificate chain");
        Ok(path)
    }

    fn write_key(&self, out_dir: &Path, key: &DerivedKey) -> Result<PathBuf, StorageError> {
        let pem = key.to_sec1_pem()?;
        let path = write_atomic(out_dir, PRIVKEY_FILE, pem.as_bytes(), KEY_MODE)?;
        info!(
            path = %path.display(),
            fingerprint = %key.fingerprint(),
            "Wrote private key"
        );
        Ok(path)
    }
}

/// Write `contents` to `out_dir/name` with permissions `mode`, returning the
/// absolute path of the file.
fn write_atomic(out_dir: &Path, name: &str, contents: &[u8], mode: u32) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(out_dir)?;
    let dir = fs::canonicalize(out_dir)?;
    let target = dir.join(name);
    let tmp = dir.join(format!(".{}.tmp", name));

    let result = (|| -> std::io::Result<()> {
        let mut file = open_with_mode(&tmp, mode)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        // The mode given at open time is masked by the umask
        set_mode(&tmp, mode)?;
        fs::rename(&tmp, &target)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!(path = %target.display(), mode = %format!("{:o}", mode), "File replaced");
    Ok(target)
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
