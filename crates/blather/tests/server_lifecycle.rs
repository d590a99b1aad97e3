//! Spawns a real `blather-server` process and talks to it over real FIFOs
//! from two fake "client" harness threads, covering the echo, fan-out and
//! graceful-departure scenarios from spec.md §8.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use blather::wire::{JoinRecord, Kind, MessageRecord};

struct FakeClient {
  name: String,
  to_server: fs::File,
  to_client: fs::File,
  to_server_path: PathBuf,
  to_client_path: PathBuf,
}

impl FakeClient {
  fn join(dir: &Path, server_name: &str, name: &str) -> Self {
    let pid = std::process::id();
    let unique = format!("{name}.{}", rand_suffix());
    let to_server_path = dir.join(format!("{unique}.{pid}.server.fifo"));
    let to_client_path = dir.join(format!("{unique}.{pid}.client.fifo"));

    mkfifo(&to_server_path, Mode::from_bits_truncate(0o622)).unwrap();
    mkfifo(&to_client_path, Mode::from_bits_truncate(0o622)).unwrap();

    let to_server = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&to_server_path)
      .unwrap();
    let to_client = OpenOptions::new()
      .read(true)
      .write(true)
      .open(&to_client_path)
      .unwrap();

    let join_path = dir.join(format!("{server_name}.fifo"));
    let mut join_fd = OpenOptions::new().read(true).write(true).open(&join_path).unwrap();

    JoinRecord {
      name: name.to_string(),
      to_server_fname: to_server_path.display().to_string(),
      to_client_fname: to_client_path.display().to_string(),
    }
    .write_to(&mut join_fd)
    .unwrap();

    FakeClient {
      name: name.to_string(),
      to_server,
      to_client,
      to_server_path,
      to_client_path,
    }
  }

  fn send_mesg(&mut self, body: &str) {
    MessageRecord::new(Kind::Mesg, self.name.clone(), body)
      .write_to(&mut self.to_server)
      .unwrap();
  }

  fn send_departed(&mut self) {
    MessageRecord::new(Kind::Departed, self.name.clone(), "")
      .write_to(&mut self.to_server)
      .unwrap();
  }

  fn recv(&mut self) -> MessageRecord {
    MessageRecord::read_from(&mut self.to_client).unwrap().unwrap()
  }
}

fn rand_suffix() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
}

struct ServerProcess {
  child: Child,
  dir: tempfile::TempDir,
  server_name: String,
}

impl ServerProcess {
  fn start(server_name: &str) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let child = Command::new(cargo_bin("blather-server"))
      .arg(server_name)
      .current_dir(dir.path())
      .spawn()
      .unwrap();

    let join_path = dir.path().join(format!("{server_name}.fifo"));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !join_path.exists() {
      if Instant::now() > deadline {
        panic!("server never created its join fifo");
      }
      thread::sleep(Duration::from_millis(20));
    }

    ServerProcess {
      child,
      dir,
      server_name: server_name.to_string(),
    }
  }

  fn join(&self, name: &str) -> FakeClient {
    FakeClient::join(self.dir.path(), &self.server_name, name)
  }
}

impl Drop for ServerProcess {
  fn drop(&mut self) {
    let _ = self.child.kill();
    let _ = self.child.wait();
  }
}

#[test]
fn single_client_echo() {
  let server = ServerProcess::start("echo-test");
  let mut a = server.join("alice");

  // self-joined broadcast
  let joined = a.recv();
  assert_eq!(joined.kind, Kind::Joined);
  assert_eq!(joined.name, "alice");

  a.send_mesg("hello");
  let echoed = a.recv();
  assert_eq!(echoed.kind, Kind::Mesg);
  assert_eq!(echoed.name, "alice");
  assert_eq!(echoed.body, "hello");
}

#[test]
fn two_client_fan_out() {
  let server = ServerProcess::start("fanout-test");
  let mut a = server.join("alice");
  let joined_a = a.recv();
  assert_eq!(joined_a.kind, Kind::Joined);

  let mut b = server.join("bob");
  // alice sees bob's join broadcast
  let bob_joined = a.recv();
  assert_eq!(bob_joined.kind, Kind::Joined);
  assert_eq!(bob_joined.name, "bob");
  // bob sees his own join broadcast too
  let bob_joined_self = b.recv();
  assert_eq!(bob_joined_self.kind, Kind::Joined);
  assert_eq!(bob_joined_self.name, "bob");

  a.send_mesg("hi");
  let a_sees = a.recv();
  assert_eq!((a_sees.kind, a_sees.name.as_str(), a_sees.body.as_str()), (Kind::Mesg, "alice", "hi"));
  let b_sees = b.recv();
  assert_eq!((b_sees.kind, b_sees.name.as_str(), b_sees.body.as_str()), (Kind::Mesg, "alice", "hi"));
}

#[test]
fn graceful_departure_removes_fifos_and_notifies_peers() {
  let server = ServerProcess::start("departure-test");
  let mut a = server.join("alice");
  let _ = a.recv(); // alice's own JOINED

  let mut b = server.join("bob");
  let _ = a.recv(); // alice sees bob join
  let _ = b.recv(); // bob sees his own join

  let a_paths = (a.to_server_path.clone(), a.to_client_path.clone());
  a.send_departed();

  let departed = b.recv();
  assert_eq!(departed.kind, Kind::Departed);
  assert_eq!(departed.name, "alice");

  let deadline = Instant::now() + Duration::from_secs(5);
  while a_paths.0.exists() || a_paths.1.exists() {
    if Instant::now() > deadline {
      panic!("server never unlinked departed client's fifos");
    }
    thread::sleep(Duration::from_millis(20));
  }
}

#[test]
fn shutdown_banner_then_unlinks_join_fifo() {
  let mut server = ServerProcess::start("shutdown-test");
  let mut a = server.join("alice");
  let _ = a.recv(); // own JOINED

  nix::sys::signal::kill(
    nix::unistd::Pid::from_raw(server.child.id() as i32),
    nix::sys::signal::Signal::SIGINT,
  )
  .unwrap();

  let shutdown = a.recv();
  assert_eq!(shutdown.kind, Kind::Shutdown);

  let status = server.child.wait().unwrap();
  assert!(status.success());

  let join_path = server.dir.path().join(format!("{}.fifo", server.server_name));
  assert!(!join_path.exists());
}
