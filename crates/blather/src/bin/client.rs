use std::sync::Arc;

use clap::Parser;

use blather::client::Client;
use blather::client::line_editor::RawLineEditor;
use blather::config::Config;
use blather::logging;

/// Join a blather chat server as an interactive terminal client.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
  /// Name of the server to join (matches the `<server_name>.fifo` it listens on).
  server_name: String,

  /// This client's display name.
  user_name: String,
}

fn main() {
  logging::init();
  let args = Args::parse();
  let config = Config::from_env();

  let editor = match RawLineEditor::new() {
    Ok(e) => Arc::new(e),
    Err(e) => {
      log::error!("failed to start terminal line editor: {e}");
      std::process::exit(1);
    }
  };

  let client = match Client::join(&args.server_name, &args.user_name, &config, editor) {
    Ok(c) => c,
    Err(e) => {
      log::error!("{e}");
      std::process::exit(1);
    }
  };

  if let Err(e) = client.run() {
    log::error!("{e}");
    std::process::exit(1);
  }
}
