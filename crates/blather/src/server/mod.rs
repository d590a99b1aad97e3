//! Server core: a single-threaded event loop built around a blocking
//! `poll()`, reading join requests off one well-known FIFO and chat
//! traffic off one FIFO per joined client.

pub mod log_store;

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::config::{self, Config};
use crate::error::{BlatherError, Result};
use crate::selfpipe::SelfPipe;
use crate::wire::{JoinRecord, Kind, MAXCLIENTS, MessageRecord};

use self::log_store::LogStore;

struct ClientRecord {
  name: String,
  to_client_fd: File,
  to_server_fd: File,
  to_client_path: PathBuf,
  to_server_path: PathBuf,
  data_ready: bool,
  last_contact: Instant,
}

pub struct Server {
  server_name: String,
  config: Config,
  join_fd: File,
  join_path: PathBuf,
  clients: Vec<ClientRecord>,
  log: Option<Arc<LogStore>>,
  self_pipe: SelfPipe,
  join_ready: bool,
}

impl Server {
  pub fn start(server_name: &str, config: Config) -> Result<Self> {
    config::validate_name(server_name)?;
    let join_path = config::join_fifo_path(server_name);
    let _ = fs::remove_file(&join_path);
    make_fifo(&join_path, config.perms)?;
    let join_fd = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&join_path)
      .map_err(|source| BlatherError::OpenFifo {
        path: join_path.clone(),
        source,
      })?;

    let log = if config.advanced {
      let log_path = config::log_path(server_name);
      let lock_path = config::who_lock_path(server_name);
      let store = LogStore::open(&log_path, &lock_path).map_err(|source| BlatherError::OpenFifo {
        path: log_path,
        source,
      })?;
      Some(Arc::new(store))
    } else {
      None
    };

    let self_pipe = SelfPipe::install()?;

    info!("server {server_name} listening on {}", join_path.display());

    Ok(Server {
      server_name: server_name.to_string(),
      config,
      join_fd,
      join_path,
      clients: Vec::new(),
      log,
      self_pipe,
      join_ready: false,
    })
  }

  /// Runs the event loop until a `SIGINT`/`SIGTERM` is observed, performing
  /// graceful shutdown before returning.
  pub fn run(&mut self) -> Result<()> {
    loop {
      if self.self_pipe.flag.load(Ordering::SeqCst) {
        break;
      }
      match self.check_sources()? {
        PollOutcome::Interrupted => continue,
        PollOutcome::Ready => {}
      }

      if self.self_pipe.flag.load(Ordering::SeqCst) {
        break;
      }

      if self.join_ready {
        self.join_ready = false;
        self.handle_join();
      }

      let mut i = 0;
      while i < self.clients.len() {
        if self.clients[i].data_ready {
          self.clients[i].data_ready = false;
          if self.handle_client(i) {
            continue;
          }
        }
        i += 1;
      }

      if self.config.advanced {
        self.sweep_liveness();
      }
    }

    self.shutdown();
    Ok(())
  }

  fn check_sources(&mut self) -> Result<PollOutcome> {
    let mut fds: Vec<PollFd> = Vec::with_capacity(self.clients.len() + 2);
    fds.push(PollFd::new(self.join_fd.as_fd(), PollFlags::POLLIN));
    for client in &self.clients {
      fds.push(PollFd::new(client.to_server_fd.as_fd(), PollFlags::POLLIN));
    }
    fds.push(PollFd::new(self.self_pipe.read_end.as_fd(), PollFlags::POLLIN));

    let timeout = if self.config.advanced {
      PollTimeout::from(1000_u16)
    } else {
      PollTimeout::NONE
    };

    match poll(&mut fds, timeout) {
      Ok(_) => {}
      Err(nix::Error::EINTR) => return Ok(PollOutcome::Interrupted),
      Err(e) => return Err(BlatherError::Signal(io::Error::from(e))),
    }

    self.join_ready = fds[0]
      .revents()
      .is_some_and(|r| r.contains(PollFlags::POLLIN));

    let last = fds.len() - 1;
    for (client, fd) in self.clients.iter_mut().zip(fds[1..last].iter()) {
      client.data_ready = fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
    }

    if fds[last].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
      self.self_pipe.drain();
    }

    Ok(PollOutcome::Ready)
  }

  fn handle_join(&mut self) {
    let join = match JoinRecord::read_from(&mut self.join_fd) {
      Ok(j) => j,
      Err(e) => {
        warn!("discarding malformed join request: {e}");
        return;
      }
    };

    if self.clients.len() >= MAXCLIENTS {
      warn!("refusing join from {:?}: client table is full", join.name);
      return;
    }

    let to_client_path = PathBuf::from(&join.to_client_fname);
    let to_server_path = PathBuf::from(&join.to_server_fname);

    let to_client_fd = match OpenOptions::new().read(true).write(true).open(&to_client_path) {
      Ok(f) => f,
      Err(e) => {
        warn!("join from {:?} failed: open {to_client_path:?}: {e}", join.name);
        return;
      }
    };
    let to_server_fd = match OpenOptions::new().read(true).write(true).open(&to_server_path) {
      Ok(f) => f,
      Err(e) => {
        warn!("join from {:?} failed: open {to_server_path:?}: {e}", join.name);
        return;
      }
    };

    info!("{} joined", join.name);
    self.clients.push(ClientRecord {
      name: join.name.clone(),
      to_client_fd,
      to_server_fd,
      to_client_path,
      to_server_path,
      data_ready: false,
      last_contact: Instant::now(),
    });

    self.sync_who_record();
    self.broadcast(&MessageRecord::new(Kind::Joined, join.name, ""));
  }

  /// Returns true if the client at `idx` was removed.
  fn handle_client(&mut self, idx: usize) -> bool {
    let read_result = MessageRecord::read_from(&mut self.clients[idx].to_server_fd);
    let mesg = match read_result {
      Ok(Some(m)) => m,
      Ok(None) => {
        debug!("client {} closed its fifo", self.clients[idx].name);
        self.remove_client(idx);
        return true;
      }
      Err(e) => {
        warn!("dropping client {} after read error: {e}", self.clients[idx].name);
        self.remove_client(idx);
        return true;
      }
    };

    self.clients[idx].last_contact = Instant::now();

    match mesg.kind {
      Kind::Mesg => {
        self.broadcast(&mesg);
        false
      }
      Kind::Departed => {
        let name = self.clients[idx].name.clone();
        self.remove_client(idx);
        self.broadcast(&MessageRecord::new(Kind::Departed, name, ""));
        true
      }
      Kind::Ping => false,
      Kind::Joined | Kind::Shutdown | Kind::Disconnected => false,
    }
  }

  fn broadcast(&mut self, mesg: &MessageRecord) {
    if let Some(log) = &self.log
      && !matches!(mesg.kind, Kind::Ping)
      && let Err(e) = log.append(mesg)
    {
      warn!("failed to append to log: {e}");
    }

    let mut dead = Vec::new();
    for (i, client) in self.clients.iter_mut().enumerate() {
      if let Err(e) = mesg.write_to(&mut client.to_client_fd) {
        warn!("dropping client {} after write error: {e}", client.name);
        dead.push(i);
      }
    }
    for idx in dead.into_iter().rev() {
      self.remove_client(idx);
    }
  }

  fn remove_client(&mut self, idx: usize) {
    let client = self.clients.remove(idx);
    let _ = fs::remove_file(&client.to_client_path);
    let _ = fs::remove_file(&client.to_server_path);
    self.sync_who_record();
  }

  fn sweep_liveness(&mut self) {
    let now = Instant::now();
    let ping_after = Duration::from_secs(self.config.ping_secs);
    let disconnect_after = Duration::from_secs(self.config.disconnect_secs);

    let mut to_disconnect = Vec::new();
    for (i, client) in self.clients.iter_mut().enumerate() {
      let idle = now.duration_since(client.last_contact);
      if idle >= disconnect_after {
        to_disconnect.push(i);
      } else if idle >= ping_after {
        let _ =
          MessageRecord::new(Kind::Ping, self.server_name.clone(), "").write_to(&mut client.to_client_fd);
      }
    }

    for idx in to_disconnect.into_iter().rev() {
      let name = self.clients[idx].name.clone();
      self.remove_client(idx);
      self.broadcast(&MessageRecord::new(Kind::Disconnected, name, ""));
    }
  }

  /// Offloads the `who`-record rewrite to a helper thread, matching the
  /// teacher's `daemon-poller` background-thread idiom, serialized against
  /// other writers/readers by `LogStore`'s own internal flock.
  fn sync_who_record(&self) {
    let Some(log) = self.log.clone() else { return };
    let names: Vec<String> = self.clients.iter().map(|c| c.name.clone()).collect();
    std::thread::spawn(move || {
      if let Err(e) = log.write_who(&names) {
        warn!("failed to update who record: {e}");
      }
    });
  }

  fn shutdown(&mut self) {
    info!("server {} shutting down", self.server_name);

    let _ = fs::remove_file(&self.join_path);

    self.broadcast(&MessageRecord::new(Kind::Shutdown, self.server_name.clone(), ""));

    while !self.clients.is_empty() {
      self.remove_client(0);
    }
  }
}

enum PollOutcome {
  Ready,
  Interrupted,
}

fn make_fifo(path: &Path, perms: u32) -> Result<()> {
  mkfifo(path, Mode::from_bits_truncate(perms)).map_err(|source| BlatherError::CreateFifo {
    path: path.to_path_buf(),
    source,
  })
}
