#[macro_use]
extern crate log;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::process;
use std::time::Duration;

use clap::Parser;

use tproxy_relay::config::{self, Config};
use tproxy_relay::OriginalDst;


/// Transparent TCP relay for netfilter-redirected connections.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Port the redirect rules point at
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Local address to bind
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind: Ipv4Addr,

    /// Do not set IP_TRANSPARENT on the listener
    #[arg(long)]
    no_transparent: bool,

    #[arg(long, default_value_t = config::DEFAULT_BACKLOG)]
    backlog: i32,

    /// Bytes moved per read
    #[arg(long, default_value_t = config::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Give up on a pending connect after this many milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            listen: SocketAddrV4::new(self.bind, self.port),
            transparent: !self.no_transparent,
            backlog: self.backlog,
            buffer_size: self.buffer_size.max(1),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            ..Config::default()
        }
    }
}


fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let cfg = Args::parse().config();
    if let Err(err) = tproxy_relay::run(cfg, Box::new(OriginalDst)) {
        error!("{}", err);
        process::exit(1);
    }
}
