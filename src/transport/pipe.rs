//! Unix domain socket listener.
//!
//! # Example
//!
//! ```ignore
//! use udsocket_rpc::transport::{generate_socket_path, PipeListener};
//!
//! let path = generate_socket_path();
//! let listener = PipeListener::bind(&path).await?;
//! let stream = listener.accept().await?;
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/udsocket-rpc-{pid}-{random}.sock`
pub fn generate_socket_path() -> PathBuf {
    let pid = std::process::id();
    std::env::temp_dir().join(format!("udsocket-rpc-{}-{:x}.sock", pid, rand_u64()))
}

/// Simple random u64 using system time, process ID and a call counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static CALLS: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    let calls = CALLS.fetch_add(1, Ordering::Relaxed);
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ calls.rotate_left(32)
}

/// Remove a socket file left behind by an earlier process.
fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Unix domain socket listener that owns its socket file.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
}

impl PipeListener {
    /// Bind to a Unix socket path.
    ///
    /// Removes any existing file at the path before binding.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        remove_stale(path)?;

        let listener = UnixListener::bind(path)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        // Clean up socket file when listener is dropped
        let _ = std::fs::remove_file(&self.path);
    }
}
