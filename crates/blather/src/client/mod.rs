//! Client core: join handshake plus the two-worker I/O loop (one thread
//! drives the terminal line editor, one polls the incoming FIFO), replacing
//! the original's `pthread_cancel`-based teardown with a shared shutdown
//! flag checked at every suspension point.

pub mod line_editor;

use std::fs::{self, File, OpenOptions};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{info, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::config::{self, Config};
use crate::error::{BlatherError, Result};
use crate::selfpipe::SelfPipe;
use crate::server::log_store::LogStore;
use crate::wire::{JoinRecord, Kind, MessageRecord};

use self::line_editor::LineEditor;

pub struct Client {
  name: String,
  server_name: String,
  to_server_fd: File,
  to_client_fd: File,
  to_server_path: PathBuf,
  to_client_path: PathBuf,
  editor: Arc<dyn LineEditor>,
  running: Arc<AtomicBool>,
  self_pipe: SelfPipe,
  advanced: bool,
}

impl Client {
  pub fn join(
    server_name: &str,
    user_name: &str,
    config: &Config,
    editor: Arc<dyn LineEditor>,
  ) -> Result<Self> {
    config::validate_name(server_name)?;
    config::validate_name(user_name)?;

    let pid = std::process::id();
    let to_server_path = config::client_to_server_fifo_path(user_name, pid);
    let to_client_path = config::client_to_client_fifo_path(user_name, pid);

    make_fifo(&to_server_path, config.perms)?;
    make_fifo(&to_client_path, config.perms)?;

    let to_server_fd = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&to_server_path)
      .map_err(|source| BlatherError::OpenFifo {
        path: to_server_path.clone(),
        source,
      })?;
    let to_client_fd = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&to_client_path)
      .map_err(|source| BlatherError::OpenFifo {
        path: to_client_path.clone(),
        source,
      })?;

    let join_path = config::join_fifo_path(server_name);
    let mut join_fd = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&join_path)
      .map_err(|_| BlatherError::AlreadyRunning(join_path.clone()))?;

    let join_rec = JoinRecord {
      name: user_name.to_string(),
      to_server_fname: to_server_path.display().to_string(),
      to_client_fname: to_client_path.display().to_string(),
    };
    join_rec
      .write_to(&mut join_fd)
      .map_err(|source| BlatherError::OpenFifo { path: join_path, source })?;

    let self_pipe = SelfPipe::install()?;

    Ok(Client {
      name: user_name.to_string(),
      server_name: server_name.to_string(),
      to_server_fd,
      to_client_fd,
      to_server_path,
      to_client_path,
      editor,
      running: Arc::new(AtomicBool::new(true)),
      self_pipe,
      advanced: config.advanced,
    })
  }

  /// Runs both worker threads to completion and cleans up FIFOs.
  pub fn run(self) -> Result<()> {
    let prompt = format!("{}>> ", self.name);
    let running = self.running.clone();
    let editor = self.editor.clone();

    // Signal watcher: does the actual graceful-departure work once a
    // SIGINT/SIGTERM byte shows up on the self-pipe, outside of any
    // signal-handler context.
    let watcher_running = running.clone();
    let watcher_pipe_fd = self
      .self_pipe
      .read_end
      .try_clone()
      .map_err(BlatherError::Signal)?;
    let watcher_name = self.name.clone();
    let mut watcher_to_server_fd = dup_fd(&self.to_server_fd)?;
    let watcher_handle = thread::spawn(move || {
      let signaled = loop {
        if !watcher_running.load(Ordering::SeqCst) {
          break false;
        }
        let mut fds = [PollFd::new(watcher_pipe_fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(200_u16)) {
          Ok(_) => {}
          Err(nix::Error::EINTR) => continue,
          Err(_) => break false,
        }
        if fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
          break true;
        }
      };
      if signaled && watcher_running.swap(false, Ordering::SeqCst) {
        let _ = MessageRecord::new(Kind::Departed, watcher_name, "")
          .write_to(&mut watcher_to_server_fd);
      }
    });

    let reader_running = running.clone();
    let reader_editor = editor.clone();
    let reader_name = self.name.clone();
    let mut to_client_fd = dup_fd(&self.to_client_fd)?;
    let mut to_server_for_pings = dup_fd(&self.to_server_fd)?;
    let reader_handle = thread::spawn(move || {
      reader_loop(
        &mut to_client_fd,
        &mut to_server_for_pings,
        &reader_editor,
        &reader_name,
        &reader_running,
      );
    });

    let mut to_server_fd = dup_fd(&self.to_server_fd)?;
    let log = if self.advanced {
      Some(LogStore::open(
        &config::log_path(&self.server_name),
        &config::who_lock_path(&self.server_name),
      ))
    } else {
      None
    };
    let log = log.transpose().map_err(|e| BlatherError::Log(e.to_string()))?;

    editor.prompt(&prompt).map_err(BlatherError::Signal)?;
    input_loop(&mut to_server_fd, &editor, &self.name, &running, log.as_ref(), &prompt);

    running.store(false, Ordering::SeqCst);
    let _ = reader_handle.join();
    let _ = watcher_handle.join();

    let _ = fs::remove_file(&self.to_server_path);
    let _ = fs::remove_file(&self.to_client_path);
    Ok(())
  }
}

fn input_loop(
  to_server_fd: &mut File,
  editor: &Arc<dyn LineEditor>,
  name: &str,
  running: &Arc<AtomicBool>,
  log: Option<&LogStore>,
  prompt: &str,
) {
  loop {
    if !running.load(Ordering::SeqCst) {
      break;
    }
    let line = match editor.read_line(running) {
      Ok(Some(l)) => l,
      Ok(None) => break,
      Err(e) => {
        warn!("input error: {e}");
        break;
      }
    };

    if let Some(rest) = line.strip_prefix("%who") {
      let _ = rest;
      if let Some(log) = log {
        match log.read_who() {
          Ok(names) => {
            let _ = editor.print_line(&format!("-- who: {} --", names.join(", ")));
          }
          Err(e) => {
            let _ = editor.print_line(&format!("-- %who failed: {e} --"));
          }
        }
      } else {
        let _ = editor.print_line("-- %who requires BL_ADVANCED on both ends --");
      }
      let _ = editor.prompt(prompt);
      continue;
    }

    if let Some(rest) = line.strip_prefix("%last") {
      let n: usize = rest.trim().parse().unwrap_or(10);
      if let Some(log) = log {
        match log.read_last(n) {
          Ok(records) => {
            let _ = editor.print_line(&format!("-- last {} message(s) --", records.len()));
            for rec in records {
              let _ = editor.print_line(&format!("[{}] : {}", rec.name, rec.body));
            }
          }
          Err(e) => {
            let _ = editor.print_line(&format!("-- %last failed: {e} --"));
          }
        }
      } else {
        let _ = editor.print_line("-- %last requires BL_ADVANCED on both ends --");
      }
      let _ = editor.prompt(prompt);
      continue;
    }

    if line.is_empty() {
      let _ = editor.prompt(prompt);
      continue;
    }

    let mesg = MessageRecord::new(Kind::Mesg, name, line);
    if mesg.write_to(&mut *to_server_fd).is_err() {
      break;
    }
    let _ = editor.prompt(prompt);
  }

  if running.swap(false, Ordering::SeqCst) {
    let _ = MessageRecord::new(Kind::Departed, name, "").write_to(&mut *to_server_fd);
  }
}

fn reader_loop(
  to_client_fd: &mut File,
  to_server_fd: &mut File,
  editor: &Arc<dyn LineEditor>,
  name: &str,
  running: &Arc<AtomicBool>,
) {
  loop {
    if !running.load(Ordering::SeqCst) {
      break;
    }

    let mut fds = [PollFd::new(to_client_fd.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(200_u16)) {
      Ok(_) => {}
      Err(nix::Error::EINTR) => continue,
      Err(_) => break,
    }
    if !fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
      continue;
    }

    let mesg = match MessageRecord::read_from(&mut *to_client_fd) {
      Ok(Some(m)) => m,
      Ok(None) => break,
      Err(e) => {
        warn!("reader error: {e}");
        break;
      }
    };

    match mesg.kind {
      Kind::Mesg => {
        let _ = editor.print_line(&format!("[{}] : {}", mesg.name, mesg.body));
      }
      Kind::Joined => {
        let _ = editor.print_line(&format!("-- {} has joined --", mesg.name));
      }
      Kind::Departed => {
        let _ = editor.print_line(&format!("-- {} has left --", mesg.name));
      }
      Kind::Disconnected => {
        let _ = editor.print_line(&format!("-- {} disconnected (no response) --", mesg.name));
      }
      Kind::Ping => {
        let _ = MessageRecord::new(Kind::Ping, name, "").write_to(&mut *to_server_fd);
      }
      Kind::Shutdown => {
        let _ = editor.print_line("-- server is shutting down --");
        running.store(false, Ordering::SeqCst);
        break;
      }
    }
  }
  info!("reader worker exiting");
}

fn make_fifo(path: &std::path::Path, perms: u32) -> Result<()> {
  mkfifo(path, Mode::from_bits_truncate(perms)).map_err(|source| BlatherError::CreateFifo {
    path: path.to_path_buf(),
    source,
  })
}

fn dup_fd(file: &File) -> Result<File> {
  file.try_clone().map_err(BlatherError::Signal)
}
