use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;


pub const DEFAULT_PORT: u16 = 3128;
pub const DEFAULT_BACKLOG: i32 = 10;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Runtime settings of the relay.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the redirect rules point at.
    pub listen: SocketAddrV4,
    /// Set `IP_TRANSPARENT` on the listener. Needs `CAP_NET_ADMIN`.
    pub transparent: bool,
    pub backlog: i32,
    /// Upper bound of a single read, and so of a pending write.
    pub buffer_size: usize,
    pub events_capacity: usize,
    /// `None` lets a pending connect wait forever.
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT),
            transparent: true,
            backlog: DEFAULT_BACKLOG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            connect_timeout: None,
        }
    }
}
