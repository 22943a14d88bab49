use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::rc::Rc;
use std::time::Instant;

use mio::{Evented, Poll, PollOpt, Ready, Token};
use mio::net::{TcpListener, TcpStream};

use crate::mux::Interest;
use crate::relay::Chunk;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Listening,
    Connecting,
    Relaying,
}

/// Number of live records per role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoleCounts {
    pub listening: usize,
    pub connecting: usize,
    pub relaying: usize,
}

impl RoleCounts {
    pub fn total(&self) -> usize {
        self.listening + self.connecting + self.relaying
    }
}


/// The record kept for every descriptor under multiplexer watch. The
/// registration tag of a descriptor is the arena id of its record.
pub enum Endpoint {
    Listening(Listening),
    Connecting(Connecting),
    Relaying(Relay),
}

impl Endpoint {
    pub fn role(&self) -> Role {
        match *self {
            Endpoint::Listening(_) => Role::Listening,
            Endpoint::Connecting(_) => Role::Connecting,
            Endpoint::Relaying(_) => Role::Relaying,
        }
    }

    fn source(&self) -> &dyn Evented {
        match *self {
            Endpoint::Listening(ref l) => &l.listener,
            Endpoint::Connecting(ref c) => &*c.outbound,
            Endpoint::Relaying(ref r) => &*r.source,
        }
    }
}

impl Evented for Endpoint {
    fn register(&self, poll: &Poll, token: Token, interest: Ready,
                opts: PollOpt) -> io::Result<()>
    {
        self.source().register(poll, token, interest, opts)
    }

    fn reregister(&self, poll: &Poll, token: Token, interest: Ready,
                opts: PollOpt) -> io::Result<()>
    {
        self.source().reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        self.source().deregister(poll)
    }
}


pub struct Listening {
    pub listener: TcpListener,
    pub addr: SocketAddr,
}


/// An outbound connect that has not completed yet. The client is not
/// watched meanwhile; whatever it sends waits in the kernel.
pub struct Connecting {
    pub outbound: Rc<TcpStream>,
    pub client: Rc<TcpStream>,
    pub destination: SocketAddrV4,
    pub deadline: Option<Instant>,
}


/// One direction of an established connection: bytes read from `source` are
/// written to `sink`. The reverse direction is the record at `peer`, which
/// reads `sink` and writes `source`. Both records share the two streams, a
/// descriptor is closed once neither of them holds it.
pub struct Relay {
    pub source: Rc<TcpStream>,
    pub sink: Rc<TcpStream>,
    pub peer: Option<usize>,
    /// Cleared once `source` reports end of stream.
    pub reading: bool,
    /// Set while the peer holds a chunk it could not write to our sink.
    pub paused: bool,
    /// Bytes the peer read that still have to go out through `source`.
    pub pending: Option<Chunk>,
    /// Interest currently registered for `source`, `None` when unregistered.
    pub interest: Option<Interest>,
}

impl Relay {
    pub fn new(source: Rc<TcpStream>, sink: Rc<TcpStream>) -> Relay {
        Relay {
            source,
            sink,
            peer: None,
            reading: true,
            paused: false,
            pending: None,
            interest: None,
        }
    }

    /// The interest this record should be registered with right now.
    pub fn wanted(&self) -> Option<Interest> {
        Interest::new(self.reading && !self.paused, self.pending.is_some())
    }

    /// A record with nothing left to read or flush is finished.
    pub fn is_done(&self) -> bool {
        !self.reading && self.pending.is_none()
    }
}
