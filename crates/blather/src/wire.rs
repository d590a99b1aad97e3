//! Fixed-size wire records exchanged over the join FIFO and per-client FIFOs.
//!
//! Every record is a plain byte layout: no length prefix, no serde, no
//! bincode framing. A reader always asks for exactly `size_of::<T>()` bytes,
//! which is how FIFO traffic stays frame-free even though pipes give no
//! natural message boundaries of their own.

use std::io::{self, Read, Write};

/// Capacity, in bytes, of any name-like field (client name, server name,
/// FIFO path). Matches the original source's `MAXNAME`.
pub const MAXNAME: usize = 32;

/// Maximum number of simultaneously joined clients a server will track.
pub const MAXCLIENTS: usize = 50;

/// Capacity, in bytes, of a message body. Chosen so that
/// `size_of::<MessageRecord>()` stays comfortably under `PIPE_BUF`, keeping
/// a single `write()` of a whole record atomic.
pub const MAXBODY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Kind {
  Mesg = 0,
  Joined = 1,
  Departed = 2,
  Shutdown = 3,
  Ping = 4,
  Disconnected = 5,
}

impl Kind {
  fn from_u32(v: u32) -> io::Result<Self> {
    match v {
      0 => Ok(Kind::Mesg),
      1 => Ok(Kind::Joined),
      2 => Ok(Kind::Departed),
      3 => Ok(Kind::Shutdown),
      4 => Ok(Kind::Ping),
      5 => Ok(Kind::Disconnected),
      other => Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unknown message kind tag {other}"),
      )),
    }
  }
}

/// A client's handshake announcement, written once to the server's join
/// FIFO and never again.
#[derive(Debug, Clone)]
pub struct JoinRecord {
  pub name: String,
  pub to_server_fname: String,
  pub to_client_fname: String,
}

const JOIN_RECORD_LEN: usize = MAXNAME * 3;

impl JoinRecord {
  pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
    let mut buf = [0_u8; JOIN_RECORD_LEN];
    put_str(&mut buf[0..MAXNAME], &self.name)?;
    put_str(&mut buf[MAXNAME..MAXNAME * 2], &self.to_server_fname)?;
    put_str(&mut buf[MAXNAME * 2..MAXNAME * 3], &self.to_client_fname)?;
    w.write_all(&buf)
  }

  pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
    let mut buf = [0_u8; JOIN_RECORD_LEN];
    r.read_exact(&mut buf)?;
    Ok(JoinRecord {
      name: get_str(&buf[0..MAXNAME]),
      to_server_fname: get_str(&buf[MAXNAME..MAXNAME * 2]),
      to_client_fname: get_str(&buf[MAXNAME * 2..MAXNAME * 3]),
    })
  }
}

/// A broadcastable chat event: a chat line, a presence change, a server
/// directive, or a liveness probe. The `body` field is meaningful only for
/// `Kind::Mesg`; other kinds leave it zero-filled.
#[derive(Debug, Clone)]
pub struct MessageRecord {
  pub kind: Kind,
  pub name: String,
  pub body: String,
}

pub const MESSAGE_RECORD_LEN: usize = 4 + MAXNAME + MAXBODY;

impl MessageRecord {
  pub fn new(kind: Kind, name: impl Into<String>, body: impl Into<String>) -> Self {
    MessageRecord {
      kind,
      name: name.into(),
      body: body.into(),
    }
  }

  pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
    let mut buf = [0_u8; MESSAGE_RECORD_LEN];
    buf[0..4].copy_from_slice(&(self.kind as u32).to_ne_bytes());
    put_str(&mut buf[4..4 + MAXNAME], &self.name)?;
    put_str(&mut buf[4 + MAXNAME..], &self.body)?;
    w.write_all(&buf)
  }

  /// Returns `Ok(None)` on a clean end-of-file (the peer closed its write
  /// end without sending a final record), `Ok(Some(_))` on a full record,
  /// and `Err` on a short/corrupt read.
  pub fn read_from<R: Read>(mut r: R) -> io::Result<Option<Self>> {
    let mut buf = [0_u8; MESSAGE_RECORD_LEN];
    match read_exact_or_eof(&mut r, &mut buf)? {
      false => Ok(None),
      true => {
        let kind_tag = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let kind = Kind::from_u32(kind_tag)?;
        let name = get_str(&buf[4..4 + MAXNAME]);
        let body = get_str(&buf[4 + MAXNAME..]);
        Ok(Some(MessageRecord { kind, name, body }))
      }
    }
  }
}

fn put_str(field: &mut [u8], s: &str) -> io::Result<()> {
  let bytes = s.as_bytes();
  if bytes.len() >= field.len() {
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("value {s:?} does not fit in a {}-byte field", field.len()),
    ));
  }
  field[..bytes.len()].copy_from_slice(bytes);
  field[bytes.len()..].fill(0);
  Ok(())
}

fn get_str(field: &[u8]) -> String {
  let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
  String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Like `Read::read_exact`, but treats a zero-byte read at the very start as
/// a clean EOF (`Ok(false)`) instead of an error, and still rejects a short
/// read that starts mid-record.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
  let mut filled = 0;
  while filled < buf.len() {
    match r.read(&mut buf[filled..]) {
      Ok(0) => {
        if filled == 0 {
          return Ok(false);
        }
        return Err(io::Error::new(
          io::ErrorKind::UnexpectedEof,
          "short read on message record",
        ));
      }
      Ok(n) => filled += n,
      Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(true)
}
