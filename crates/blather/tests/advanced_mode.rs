//! Advanced-mode (`BL_ADVANCED=1`) behavior: the on-disk log's `who` region
//! and appended messages, and liveness-driven disconnect detection
//! (spec.md §8 scenarios 5 and 6).

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use blather::server::log_store::LogStore;
use blather::wire::{JoinRecord, Kind, MessageRecord};

struct FakeClient {
  name: String,
  to_server: fs::File,
  to_client: fs::File,
}

impl FakeClient {
  fn join(dir: &Path, server_name: &str, name: &str) -> Self {
    let pid = std::process::id();
    let to_server_path = dir.join(format!("{name}.{pid}.server.fifo"));
    let to_client_path = dir.join(format!("{name}.{pid}.client.fifo"));

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

    FakeClient { name: name.to_string(), to_server, to_client }
  }

  fn send_mesg(&mut self, body: &str) {
    MessageRecord::new(Kind::Mesg, self.name.clone(), body)
      .write_to(&mut self.to_server)
      .unwrap();
  }

  fn send_ping(&mut self) {
    MessageRecord::new(Kind::Ping, self.name.clone(), "")
      .write_to(&mut self.to_server)
      .unwrap();
  }

  fn recv(&mut self) -> MessageRecord {
    MessageRecord::read_from(&mut self.to_client).unwrap().unwrap()
  }

  /// Like `recv`, but times out instead of blocking forever — used to wait
  /// out the liveness sweep without hanging the suite on a bug.
  fn recv_timeout(&mut self, timeout: Duration) -> Option<MessageRecord> {
    use std::os::fd::AsFd;
    let mut fds = [nix::poll::PollFd::new(self.to_client.as_fd(), nix::poll::PollFlags::POLLIN)];
    let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
    nix::poll::poll(&mut fds, nix::poll::PollTimeout::from(millis)).ok()?;
    if fds[0].revents()?.contains(nix::poll::PollFlags::POLLIN) {
      MessageRecord::read_from(&mut self.to_client).ok()?
    } else {
      None
    }
  }
}

struct ServerProcess {
  child: Child,
  dir: tempfile::TempDir,
  server_name: String,
}

impl ServerProcess {
  fn start_advanced(server_name: &str, ping_secs: u64, disconnect_secs: u64) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let child = Command::new(cargo_bin("blather-server"))
      .arg(server_name)
      .env("BL_ADVANCED", "1")
      .env("BL_PING_SECS", ping_secs.to_string())
      .env("BL_DISCONNECT_SECS", disconnect_secs.to_string())
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

    ServerProcess { child, dir, server_name: server_name.to_string() }
  }

  fn join(&self, name: &str) -> FakeClient {
    FakeClient::join(self.dir.path(), &self.server_name, name)
  }

  fn log_path(&self) -> PathBuf {
    self.dir.path().join(format!("{}.log", self.server_name))
  }

  fn who_lock_path(&self) -> PathBuf {
    self.dir.path().join(format!("{}.who.lock", self.server_name))
  }
}

impl Drop for ServerProcess {
  fn drop(&mut self) {
    let _ = self.child.kill();
    let _ = self.child.wait();
  }
}

#[test]
fn who_and_last_records_are_readable_from_the_log() {
  let server = ServerProcess::start_advanced("log-test", 60, 120);
  let mut a = server.join("alice");
  let _ = a.recv(); // own JOINED

  let mut b = server.join("bob");
  let _ = a.recv(); // alice sees bob JOINED
  let _ = b.recv(); // bob sees own JOINED

  for i in 0..4 {
    a.send_mesg(&format!("msg {i}"));
    let _ = a.recv();
    let _ = b.recv();
  }

  // give the who-record writer thread a moment to land its update
  thread::sleep(Duration::from_millis(200));

  let store = LogStore::open(&server.log_path(), &server.who_lock_path()).unwrap();
  let who = store.read_who().unwrap();
  assert!(who.contains(&"alice".to_string()));
  assert!(who.contains(&"bob".to_string()));

  let last = store.read_last(3).unwrap();
  assert_eq!(last.len(), 3);
  assert_eq!(last[0].body, "msg 1");
  assert_eq!(last[1].body, "msg 2");
  assert_eq!(last[2].body, "msg 3");
}

#[test]
fn silent_peer_is_eventually_marked_disconnected() {
  let server = ServerProcess::start_advanced("disconnect-test", 1, 2);
  let mut a = server.join("alice");
  let _ = a.recv(); // own JOINED

  let mut b = server.join("bob");
  let _ = a.recv(); // alice sees bob JOINED
  let _ = b.recv(); // bob sees own JOINED

  // alice never answers the server's PING probes; bob replies to every PING
  // like a real client would (client/mod.rs's reader worker), so only alice
  // goes quiet long enough to be disconnected.
  let mut saw_disconnected = false;
  let deadline = Instant::now() + Duration::from_secs(10);
  while Instant::now() < deadline {
    match b.recv_timeout(Duration::from_millis(500)) {
      Some(msg) if msg.kind == Kind::Ping => {
        b.send_ping();
      }
      Some(msg) if msg.kind == Kind::Disconnected && msg.name == "alice" => {
        saw_disconnected = true;
        break;
      }
      _ => continue,
    }
  }
  assert!(saw_disconnected, "bob never observed alice's disconnect");
}
