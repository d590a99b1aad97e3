//! Environment-driven configuration. There is no config *file*: spec.md's
//! external interface is argv plus a handful of env vars, so this module
//! just resolves defaults the way the original `DEFAULT_PERMS` constant and
//! `BL_ADVANCED` env var did.

use std::env;
use std::path::PathBuf;

use crate::error::{BlatherError, Result};
use crate::wire::MAXNAME;

const DEFAULT_PING_SECS: u64 = 5;
const DEFAULT_DISCONNECT_SECS: u64 = 15;
const DEFAULT_PERMS: u32 = 0o622;

#[derive(Debug, Clone)]
pub struct Config {
  pub advanced: bool,
  pub ping_secs: u64,
  pub disconnect_secs: u64,
  pub perms: u32,
}

impl Config {
  pub fn from_env() -> Self {
    Config {
      advanced: env_flag("BL_ADVANCED"),
      ping_secs: env_u64("BL_PING_SECS", DEFAULT_PING_SECS),
      disconnect_secs: env_u64("BL_DISCONNECT_SECS", DEFAULT_DISCONNECT_SECS),
      perms: env_perms("BL_PERMS", DEFAULT_PERMS),
    }
  }
}

fn env_flag(key: &str) -> bool {
  match env::var(key) {
    Ok(v) => !v.is_empty() && v != "0",
    Err(_) => false,
  }
}

fn env_u64(key: &str, default: u64) -> u64 {
  env::var(key)
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(default)
}

fn env_perms(key: &str, default: u32) -> u32 {
  env::var(key)
    .ok()
    .and_then(|v| u32::from_str_radix(v.trim_start_matches("0o"), 8).ok())
    .unwrap_or(default)
}

/// Validate that a name (server name or user name) fits in a wire field
/// and contains no path separators, since it becomes part of a FIFO path.
pub fn validate_name(name: &str) -> Result<()> {
  if name.is_empty() || name.contains('/') || name.len() >= MAXNAME {
    return Err(BlatherError::NameTooLong {
      name: name.to_string(),
      len: name.len(),
      max: MAXNAME,
    });
  }
  Ok(())
}

/// Path of the server's join FIFO, matching the original source's
/// `<server_name>.fifo` naming.
pub fn join_fifo_path(server_name: &str) -> PathBuf {
  PathBuf::from(format!("{server_name}.fifo"))
}

/// Per-client FIFO paths, keyed by user name and pid so repeat joins from
/// the same user don't collide.
pub fn client_to_server_fifo_path(user_name: &str, pid: u32) -> PathBuf {
  PathBuf::from(format!("{user_name}.{pid}.server.fifo"))
}

pub fn client_to_client_fifo_path(user_name: &str, pid: u32) -> PathBuf {
  PathBuf::from(format!("{user_name}.{pid}.client.fifo"))
}

/// Path of the optional append-only log for a server, and its sidecar lock
/// file used to protect the `who`-record critical section.
pub fn log_path(server_name: &str) -> PathBuf {
  PathBuf::from(format!("{server_name}.log"))
}

pub fn who_lock_path(server_name: &str) -> PathBuf {
  PathBuf::from(format!("{server_name}.who.lock"))
}
