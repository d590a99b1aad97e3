//! Terminal line editing. spec.md treats this as an external collaborator
//! out of scope for the protocol itself, but a runnable client still needs
//! one: `RawLineEditor` puts the terminal in raw mode and echoes input a
//! character at a time, the way `simpio_t` does in the original source,
//! while staying interruptible so shutdown doesn't need thread
//! cancellation.

use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;

/// Poll interval used while waiting for a keypress. Short enough that a
/// shutdown flag flip is noticed promptly, long enough to not spin.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait LineEditor: Send + Sync {
  /// Writes a prompt (e.g. `"alice>> "`) to the terminal.
  fn prompt(&self, text: &str) -> io::Result<()>;

  /// Prints one line of incoming chat output, interleaved safely with any
  /// in-progress prompt/input line.
  fn print_line(&self, text: &str) -> io::Result<()>;

  /// Reads one line of input. Returns `Ok(None)` on Ctrl-D/EOF, or once
  /// `running` flips to `false` while waiting.
  fn read_line(&self, running: &AtomicBool) -> io::Result<Option<String>>;
}

pub struct RawLineEditor {
  state: Mutex<()>,
}

impl RawLineEditor {
  pub fn new() -> io::Result<Self> {
    terminal::enable_raw_mode()?;
    Ok(RawLineEditor { state: Mutex::new(()) })
  }
}

impl Drop for RawLineEditor {
  fn drop(&mut self) {
    let _ = terminal::disable_raw_mode();
  }
}

impl LineEditor for RawLineEditor {
  fn prompt(&self, text: &str) -> io::Result<()> {
    let _guard = self.state.lock().unwrap();
    print!("\r\n{text}");
    io::stdout().flush()
  }

  fn print_line(&self, text: &str) -> io::Result<()> {
    let _guard = self.state.lock().unwrap();
    print!("\r\n{text}");
    io::stdout().flush()
  }

  fn read_line(&self, running: &AtomicBool) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
      if !running.load(Ordering::SeqCst) {
        return Ok(None);
      }

      if !event::poll(POLL_INTERVAL)? {
        continue;
      }

      let Event::Key(key) = event::read()? else {
        continue;
      };
      if key.kind != KeyEventKind::Press {
        continue;
      }

      match key.code {
        KeyCode::Enter => {
          print!("\r\n");
          io::stdout().flush()?;
          return Ok(Some(line));
        }
        KeyCode::Char('d')
          if key
            .modifiers
            .contains(crossterm::event::KeyModifiers::CONTROL) =>
        {
          print!("\r\n");
          io::stdout().flush()?;
          return Ok(None);
        }
        KeyCode::Char('c')
          if key
            .modifiers
            .contains(crossterm::event::KeyModifiers::CONTROL) =>
        {
          return Ok(None);
        }
        KeyCode::Backspace => {
          if line.pop().is_some() {
            print!("\u{8} \u{8}");
            io::stdout().flush()?;
          }
        }
        KeyCode::Char(c) => {
          line.push(c);
          print!("{c}");
          io::stdout().flush()?;
        }
        _ => {}
      }
    }
  }
}
