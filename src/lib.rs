#[macro_use]
extern crate log;

pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod evloop;
pub mod listener;
pub mod mux;
pub mod relay;
pub mod resolver;

mod establish;

pub use config::Config;
pub use endpoint::RoleCounts;
pub use error::{Error, Result};
pub use evloop::EventLoop;
pub use resolver::{OriginalDst, Resolver, StaticResolver};


/// Binds the listener and relays redirected connections until the
/// multiplexer itself fails.
pub fn run(cfg: Config, resolver: Box<dyn Resolver>) -> Result<()> {
    let listener = listener::bind(&cfg)?;
    let mut evloop = EventLoop::new(&cfg, resolver)?;
    evloop.add_listener(listener)?;

    evloop.run()
}
