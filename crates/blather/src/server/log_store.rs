//! Optional append-only chat log: a `who` record at offset 0 naming the
//! currently joined clients, followed by appended `MessageRecord`s.
//!
//! Two processes touch this file concurrently in practice: the server
//! (rewriting the `who` record on every join/departure, appending every
//! broadcast message) and clients running `%who`/`%last N` (reading
//! directly, no server round trip). The `who` region is the one place that
//! needs mutual exclusion against a torn read, since it's rewritten in
//! place rather than appended; `nix::fcntl::flock` on a sidecar file stands
//! in for the named POSIX semaphore the original design used, since `nix`
//! ships no semaphore binding.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{FlockArg, flock};

use crate::wire::{MAXCLIENTS, MAXNAME, MESSAGE_RECORD_LEN, MessageRecord};

const WHO_COUNT_LEN: usize = 4;
const WHO_REGION_LEN: usize = WHO_COUNT_LEN + MAXCLIENTS * MAXNAME;

/// RAII advisory lock held for the duration of a `who`-region read or write.
struct WhoLock {
  _file: File,
}

impl WhoLock {
  fn acquire(lock_path: &Path) -> io::Result<Self> {
    let file = OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(lock_path)?;
    flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(io::Error::from)?;
    Ok(WhoLock { _file: file })
  }
}

impl Drop for WhoLock {
  fn drop(&mut self) {
    let _ = flock(self._file.as_raw_fd(), FlockArg::Unlock);
  }
}

pub struct LogStore {
  file: File,
  lock_path: PathBuf,
}

impl LogStore {
  pub fn open(path: &Path, lock_path: &Path) -> io::Result<Self> {
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .open(path)?;
    let store = LogStore {
      file,
      lock_path: lock_path.to_path_buf(),
    };
    if store.file.metadata()?.len() < WHO_REGION_LEN as u64 {
      store.write_who_locked(&[])?;
    }
    Ok(store)
  }

  fn write_who_locked(&self, names: &[String]) -> io::Result<()> {
    let _lock = WhoLock::acquire(&self.lock_path)?;
    self.write_who_unlocked(names)
  }

  fn write_who_unlocked(&self, names: &[String]) -> io::Result<()> {
    let mut buf = [0_u8; WHO_REGION_LEN];
    let count = names.len().min(MAXCLIENTS) as u32;
    buf[0..4].copy_from_slice(&count.to_ne_bytes());
    for (i, name) in names.iter().take(MAXCLIENTS).enumerate() {
      let start = WHO_COUNT_LEN + i * MAXNAME;
      let field = &mut buf[start..start + MAXNAME];
      let bytes = name.as_bytes();
      let n = bytes.len().min(MAXNAME - 1);
      field[..n].copy_from_slice(&bytes[..n]);
    }
    self.file.write_at(&buf, 0)
  }

  /// Rewrite the `who` record with the currently joined client names.
  pub fn write_who(&self, names: &[String]) -> io::Result<()> {
    self.write_who_locked(names)
  }

  /// Read the currently recorded `who` list.
  pub fn read_who(&self) -> io::Result<Vec<String>> {
    let _lock = WhoLock::acquire(&self.lock_path)?;
    let mut buf = [0_u8; WHO_REGION_LEN];
    self.file.read_at(&mut buf, 0)?;
    let count = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
    let count = count.min(MAXCLIENTS);
    let mut names = Vec::with_capacity(count);
    for i in 0..count {
      let start = WHO_COUNT_LEN + i * MAXNAME;
      let field = &buf[start..start + MAXNAME];
      let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
      names.push(String::from_utf8_lossy(&field[..end]).into_owned());
    }
    Ok(names)
  }

  /// Append one message record to the log, past the `who` region.
  pub fn append(&self, mesg: &MessageRecord) -> io::Result<()> {
    let _lock = WhoLock::acquire(&self.lock_path)?;
    let len = self.file.metadata()?.len();
    let offset = len.max(WHO_REGION_LEN as u64);
    let mut buf = Vec::new();
    mesg.write_to(&mut buf)?;
    self.file.write_at(&buf, offset)
  }

  /// Read up to `n` most recent message records, clamped to however many
  /// are actually present. Never reads before the end of the `who` region.
  pub fn read_last(&self, n: usize) -> io::Result<Vec<MessageRecord>> {
    let len = self.file.metadata()?.len();
    if len <= WHO_REGION_LEN as u64 {
      return Ok(Vec::new());
    }
    let available_bytes = len - WHO_REGION_LEN as u64;
    let available = (available_bytes / MESSAGE_RECORD_LEN as u64) as usize;
    let take = n.min(available);
    let mut out = Vec::with_capacity(take);
    let start_record = available - take;
    for i in 0..take {
      let offset = WHO_REGION_LEN as u64 + (start_record + i) as u64 * MESSAGE_RECORD_LEN as u64;
      let mut buf = [0_u8; MESSAGE_RECORD_LEN];
      self.file.read_at(&mut buf, offset)?;
      if let Some(rec) = MessageRecord::read_from(&buf[..])? {
        out.push(rec);
      }
    }
    Ok(out)
  }
}
