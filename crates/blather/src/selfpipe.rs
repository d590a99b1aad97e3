//! Self-pipe signal plumbing shared by the server and client event loops.
//!
//! A signal handler cannot safely do anything beyond writing a byte to a
//! pre-registered file descriptor, so `SIGINT`/`SIGTERM` are wired through
//! `signal_hook::low_level::pipe::register` to one end of a
//! `UnixStream::pair()`. The read end is polled alongside the FIFOs: when a
//! signal arrives, the blocking `poll()` wakes up exactly like it would for
//! FIFO traffic, and the actual shutdown work happens back in ordinary
//! (non-signal) thread context.

use std::io;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub struct SelfPipe {
  pub flag: Arc<AtomicBool>,
  pub read_end: UnixStream,
}

impl SelfPipe {
  pub fn install() -> io::Result<Self> {
    let (read_end, write_end) = UnixStream::pair()?;
    read_end.set_nonblocking(true)?;

    let write_for_int = write_end.try_clone()?;
    signal_hook::low_level::pipe::register(signal_hook::consts::SIGINT, write_for_int)?;
    signal_hook::low_level::pipe::register(signal_hook::consts::SIGTERM, write_end)?;

    Ok(SelfPipe {
      flag: Arc::new(AtomicBool::new(false)),
      read_end,
    })
  }

  /// Drains whatever bytes the signal handler wrote and marks the flag.
  /// Call this once poll reports the read end readable.
  pub fn drain(&self) {
    use std::io::Read;
    use std::sync::atomic::Ordering;
    let mut buf = [0_u8; 64];
    let mut read_end = &self.read_end;
    loop {
      match read_end.read(&mut buf) {
        Ok(0) => break,
        Ok(_) => continue,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(_) => break,
      }
    }
    self.flag.store(true, Ordering::SeqCst);
  }
}
