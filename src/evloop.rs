use std::cmp;
use std::io;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::net::TcpStream;

use slab::Slab;

use crate::config::Config;
use crate::endpoint::{Endpoint, Listening, Relay, Role, RoleCounts};
use crate::error::Result;
use crate::mux::{Interest, Multiplexer, Readiness};
use crate::resolver::Resolver;


/// Single-threaded relay engine. Owns the multiplexer and the arena of
/// endpoint records; arena ids double as registration tags.
pub struct EventLoop {
    pub(crate) mux: Multiplexer,
    pub(crate) resolver: Box<dyn Resolver>,
    pub(crate) endpoints: Slab<Endpoint>,
    pub(crate) read_buffer: Vec<u8>,
    pub(crate) connect_timeout: Option<Duration>,
}

impl EventLoop {
    pub fn new(cfg: &Config, resolver: Box<dyn Resolver>) -> Result<EventLoop> {
        let mux = Multiplexer::new(cfg.events_capacity)?;
        let endpoints = Slab::new();
        let read_buffer = vec![0; cfg.buffer_size];
        let connect_timeout = cfg.connect_timeout;
        Ok(EventLoop{ mux, resolver, endpoints, read_buffer, connect_timeout })
    }

    pub fn add_listener(&mut self, listener: TcpListener) -> Result<usize> {
        let addr = listener.local_addr()?;
        let id = self.insert(Endpoint::Listening(Listening{ listener, addr }),
                             Interest::Read)?;
        debug!("listener {} on {}", id, addr);
        Ok(id)
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            self.turn(None)?;
        }
    }

    /// Waits once and dispatches everything that became ready. Returns the
    /// number of readiness events handled.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = self.wait_timeout(timeout);
        let ready = self.mux.wait(timeout)?;
        for &event in ready.iter() {
            self.dispatch(event);
        }
        if self.connect_timeout.is_some() {
            self.expire_connects(Instant::now());
        }
        Ok(ready.len())
    }

    pub fn roles(&self) -> RoleCounts {
        let mut counts = RoleCounts::default();
        for (_, endpoint) in self.endpoints.iter() {
            match endpoint.role() {
                Role::Listening => counts.listening += 1,
                Role::Connecting => counts.connecting += 1,
                Role::Relaying => counts.relaying += 1,
            }
        }
        counts
    }

    fn wait_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        let now = Instant::now();
        let until_deadline = self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));
        match (timeout, until_deadline) {
            (Some(a), Some(b)) => Some(cmp::min(a, b)),
            (a, b) => a.or(b),
        }
    }

    fn dispatch(&mut self, ready: Readiness) {
        let role = match self.endpoints.get(ready.tag) {
            Some(endpoint) => endpoint.role(),
            None => {
                trace!("event for released tag {}", ready.tag);
                return;
            }
        };

        match role {
            Role::Listening => self.accept(ready.tag),
            Role::Connecting => self.complete_connect(ready.tag),
            Role::Relaying => self.relay(ready),
        }
    }

    fn accept(&mut self, id: usize) {
        let accepted = match self.endpoints.get(id) {
            Some(Endpoint::Listening(listening)) => listening.listener.accept(),
            _ => return,
        };

        let (client, peer) = match accepted {
            Ok(pair) => pair,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!("accept failed: {}", err);
                return;
            }
        };
        info!("accepted client {}", peer);

        if let Err(err) = self.open(client) {
            warn!("closing client {}: {}", peer, err);
        }
    }

    /// Resolves and dials the destination of a freshly accepted client.
    /// Dropping `client` on any error closes it.
    fn open(&mut self, client: TcpStream) -> Result<()> {
        let destination = self.resolver.resolve(&client)?;
        info!("original destination: {}", destination);
        self.establish(client, destination)
    }

    pub(crate) fn insert(&mut self, endpoint: Endpoint, interest: Interest)
        -> Result<usize>
    {
        let entry = self.endpoints.vacant_entry();
        let id = entry.key();
        self.mux.register(&endpoint, id, interest)?;
        entry.insert(endpoint);
        Ok(id)
    }

    pub(crate) fn insert_relay(&mut self, mut relay: Relay) -> Result<usize> {
        let interest = relay.wanted();
        let entry = self.endpoints.vacant_entry();
        let id = entry.key();
        if let Some(interest) = interest {
            self.mux.register(&*relay.source, id, interest)?;
        }
        relay.interest = interest;
        entry.insert(Endpoint::Relaying(relay));
        Ok(id)
    }

    /// Deregisters and drops a record without touching its peer. Streams
    /// the record was the last holder of are closed.
    pub(crate) fn discard(&mut self, id: usize) -> Option<Endpoint> {
        if !self.endpoints.contains(id) {
            return None;
        }
        let endpoint = self.endpoints.remove(id);
        self.mux.deregister(&endpoint);
        Some(endpoint)
    }

    pub(crate) fn relay_mut(&mut self, id: usize) -> Option<&mut Relay> {
        match self.endpoints.get_mut(id) {
            Some(Endpoint::Relaying(relay)) => Some(relay),
            _ => None,
        }
    }
}
