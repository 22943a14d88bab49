//! Byte relay between the two halves of an established connection.
//!
//! Each direction reads one buffer at a time and writes it straight to the
//! other side. When the sink cannot take everything, the remainder is parked
//! as the single pending chunk of the record that owns the sink's
//! registration, that record waits for write readiness, and the reading
//! direction is paused until the chunk drains.

use std::io::{self, Read, Write};
use std::net::Shutdown;

use mio::net::TcpStream;

use crate::endpoint::{Endpoint, Relay};
use crate::evloop::EventLoop;
use crate::mux::Readiness;


/// Writes from `data` until it is exhausted or `sink` would block.
fn write_until_blocked<W: Write>(mut sink: W, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match sink.write(&data[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => return Err(err),
        }
    }
    Ok(written)
}


/// Unwritten tail of one read.
#[derive(Debug)]
pub struct Chunk {
    data: Vec<u8>,
    pos: usize,
}

impl Chunk {
    pub fn new(data: &[u8]) -> Chunk {
        Chunk{ data: data.to_vec(), pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes as much as `sink` takes; `Ok(true)` once nothing is left.
    pub fn write_to<W: Write>(&mut self, sink: W) -> io::Result<bool> {
        self.pos += write_until_blocked(sink, &self.data[self.pos..])?;
        Ok(self.is_empty())
    }
}


enum Step {
    Idle,
    Park(Chunk),
    Close,
}

fn describe(stream: &TcpStream) -> String {
    match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "<disconnected>".to_string(),
    }
}


impl EventLoop {
    pub(crate) fn relay(&mut self, ready: Readiness) {
        let id = ready.tag;
        if ready.writable || ready.hup || ready.error {
            self.relay_writable(id);
        }
        if ready.readable || ready.hup || ready.error {
            self.relay_readable(id);
        }
    }

    /// One bounded read from the source, forwarded to the sink.
    fn relay_readable(&mut self, id: usize) {
        let step = {
            let relay = match self.endpoints.get_mut(id) {
                Some(Endpoint::Relaying(relay)) if relay.reading && !relay.paused =>
                    relay,
                _ => return,
            };
            let buffer = &mut self.read_buffer;

            match (&*relay.source).read(buffer) {
                Ok(0) => {
                    debug!("relay {}: end of stream from {}", id,
                           describe(&relay.source));
                    Step::Close
                },
                Ok(n) => match write_until_blocked(&*relay.sink, &buffer[..n]) {
                    Ok(written) if written == n => {
                        trace!("relay {}: {} bytes to {}", id, n,
                               describe(&relay.sink));
                        Step::Idle
                    },
                    Ok(written) => Step::Park(Chunk::new(&buffer[written..n])),
                    Err(err) => {
                        debug!("relay {}: write failed: {}", id, err);
                        Step::Close
                    },
                },
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock
                             || err.kind() == io::ErrorKind::Interrupted =>
                    Step::Idle,
                Err(err) => {
                    debug!("relay {}: read failed: {}", id, err);
                    Step::Close
                },
            }
        };

        match step {
            Step::Idle => (),
            Step::Park(chunk) => self.park(id, chunk),
            Step::Close => self.close_read(id),
        }
    }

    /// Flushes the chunk waiting to go out through this record's source.
    fn relay_writable(&mut self, id: usize) {
        let flushed = {
            let relay = match self.relay_mut(id) {
                Some(relay) => relay,
                None => return,
            };
            let source = &*relay.source;
            match relay.pending.as_mut() {
                Some(chunk) => chunk.write_to(source),
                None => return,
            }
        };

        match flushed {
            Ok(false) => (),
            Ok(true) => {
                let peer = match self.relay_mut(id) {
                    Some(relay) => {
                        relay.pending = None;
                        relay.peer
                    },
                    None => return,
                };
                trace!("relay {}: pending chunk drained", id);
                if let Some(peer) = peer {
                    self.resume(peer);
                }
                self.settle(id);
            },
            Err(err) => {
                debug!("relay {}: flush failed: {}", id, err);
                self.destroy(id);
            },
        }
    }

    /// Hands the unwritten tail of a read to whoever owns the sink.
    fn park(&mut self, id: usize, chunk: Chunk) {
        trace!("relay {}: parking {} bytes", id, chunk.len());
        let peer = match self.relay_mut(id) {
            Some(relay) => relay.peer,
            None => return,
        };

        let owner = match peer {
            Some(peer) => {
                if let Some(relay) = self.relay_mut(peer) {
                    relay.pending = Some(chunk);
                }
                self.settle(peer);
                peer
            },
            None => {
                // The reverse direction is gone, so the sink is not watched
                // any more. A write-only record takes over the chunk.
                let (source, sink) = match self.relay_mut(id) {
                    Some(relay) => (relay.sink.clone(), relay.source.clone()),
                    None => return,
                };
                let mut drain = Relay::new(source, sink);
                drain.reading = false;
                drain.pending = Some(chunk);
                match self.insert_relay(drain) {
                    Ok(owner) => {
                        self.link(id, owner);
                        owner
                    },
                    Err(err) => {
                        warn!("relay {}: cannot watch sink: {}", id, err);
                        self.close_read(id);
                        return;
                    },
                }
            },
        };

        if !self.endpoints.contains(owner) {
            return;
        }
        if let Some(relay) = self.relay_mut(id) {
            relay.paused = true;
        }
        self.settle(id);
    }

    fn resume(&mut self, id: usize) {
        if let Some(relay) = self.relay_mut(id) {
            relay.paused = false;
        }
        self.settle(id);
    }

    /// Ends this direction: no more reads, and the far side of the sink
    /// sees end of stream. The reverse direction is left alone.
    fn close_read(&mut self, id: usize) {
        if let Some(relay) = self.relay_mut(id) {
            relay.reading = false;
            if let Err(err) = relay.sink.shutdown(Shutdown::Write) {
                trace!("relay {}: shutdown: {}", id, err);
            }
        }
        self.settle(id);
    }

    /// Brings the registration in line with the record's state, or destroys
    /// the record once it has nothing left to do.
    fn settle(&mut self, id: usize) {
        let (current, wanted, done) = match self.relay_mut(id) {
            Some(relay) => (relay.interest, relay.wanted(), relay.is_done()),
            None => return,
        };

        if done {
            self.destroy(id);
            return;
        }
        if current == wanted {
            return;
        }

        let result = match self.endpoints.get(id) {
            Some(Endpoint::Relaying(relay)) => {
                let source = &*relay.source;
                match (current, wanted) {
                    (_, None) => {
                        self.mux.deregister(source);
                        Ok(())
                    },
                    (None, Some(interest)) => self.mux.register(source, id, interest),
                    (Some(_), Some(interest)) =>
                        self.mux.reregister(source, id, interest),
                }
            },
            _ => return,
        };

        match result {
            Ok(()) => {
                if let Some(relay) = self.relay_mut(id) {
                    relay.interest = wanted;
                }
            },
            Err(err) => {
                warn!("relay {}: {}", id, err);
                self.destroy(id);
            },
        }
    }

    pub(crate) fn link(&mut self, a: usize, b: usize) {
        if let Some(relay) = self.relay_mut(a) {
            relay.peer = Some(b);
        }
        if let Some(relay) = self.relay_mut(b) {
            relay.peer = Some(a);
        }
    }

    /// Removes a relay record. A peer that was paused on this record's
    /// chunk resumes and finds out about the loss on its next write.
    fn destroy(&mut self, id: usize) {
        let peer = match self.discard(id) {
            Some(Endpoint::Relaying(relay)) => {
                info!("relay {} from {} closed", id, describe(&relay.source));
                relay.peer
            },
            _ => return,
        };

        if let Some(peer) = peer {
            let paused = match self.relay_mut(peer) {
                Some(relay) => {
                    relay.peer = None;
                    relay.paused
                },
                None => false,
            };
            if paused {
                self.resume(peer);
            }
        }
    }
}
