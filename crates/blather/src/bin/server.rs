use clap::Parser;

use blather::config::Config;
use blather::logging;
use blather::server::Server;

/// Run a blather chat server, listening for joins on `<server_name>.fifo`.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
  /// Name identifying this server's join FIFO.
  server_name: String,
}

fn main() {
  logging::init();
  let args = Args::parse();
  let config = Config::from_env();

  let mut server = match Server::start(&args.server_name, config) {
    Ok(s) => s,
    Err(e) => {
      log::error!("{e}");
      std::process::exit(1);
    }
  };

  if let Err(e) = server.run() {
    log::error!("{e}");
    std::process::exit(1);
  }
}
