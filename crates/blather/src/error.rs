use std::io;
use std::path::PathBuf;

/// Errors surfaced by the server and client binaries.
///
/// Setup failures (FIFO creation, signal registration) are fatal: the
/// caller logs them and exits non-zero. Per-client I/O failures during the
/// event loop are plain `io::Error`s logged at `warn` and handled in place;
/// they never need to become a `BlatherError` variant because they don't
/// propagate past the client that caused them.
#[derive(Debug, thiserror::Error)]
pub enum BlatherError {
  #[error("{name:?} is {len} bytes, longer than the {max}-byte field it must fit")]
  NameTooLong { name: String, len: usize, max: usize },

  #[error("failed to create fifo at {path}: {source}")]
  CreateFifo { path: PathBuf, source: nix::Error },

  #[error("failed to open {path}: {source}")]
  OpenFifo { path: PathBuf, source: io::Error },

  #[error("failed to register signal handler: {0}")]
  Signal(#[from] io::Error),

  #[error("log store error: {0}")]
  Log(String),

  #[error("a server is already running on {0} (join fifo exists and is in use)")]
  AlreadyRunning(PathBuf),
}

pub type Result<T> = std::result::Result<T, BlatherError>;
