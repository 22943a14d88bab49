//! Readiness multiplexer.
//!
//! A thin layer over `mio::Poll`. Tags are the arena ids of endpoint records
//! and every registration is level-triggered, so a descriptor that is still
//! readable after one bounded read is reported again on the next wait.

use std::io;
use std::time::Duration;

use mio::{Evented, Events, Poll, PollOpt, Ready, Token};
use mio::unix::UnixReady;

use crate::error::{Error, Result};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    pub fn new(readable: bool, writable: bool) -> Option<Interest> {
        match (readable, writable) {
            (true, false) => Some(Interest::Read),
            (false, true) => Some(Interest::Write),
            (true, true) => Some(Interest::ReadWrite),
            (false, false) => None,
        }
    }

    fn ready(self) -> Ready {
        match self {
            Interest::Read => Ready::readable(),
            Interest::Write => Ready::writable(),
            Interest::ReadWrite => Ready::readable() | Ready::writable(),
        }
    }
}


/// One ready descriptor as reported by `Multiplexer::wait`.
#[derive(Clone, Copy, Debug)]
pub struct Readiness {
    pub tag: usize,
    pub readable: bool,
    pub writable: bool,
    pub hup: bool,
    pub error: bool,
}

impl Readiness {
    fn from_event(tag: usize, ready: Ready) -> Readiness {
        let unix = UnixReady::from(ready);
        Readiness {
            tag,
            readable: ready.is_readable(),
            writable: ready.is_writable(),
            hup: unix.is_hup(),
            error: unix.is_error(),
        }
    }
}


pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    pub fn new(capacity: usize) -> Result<Multiplexer> {
        let poll = Poll::new().map_err(Error::ResourceExhausted)?;
        let events = Events::with_capacity(capacity);
        Ok(Multiplexer{ poll, events })
    }

    pub fn register<E>(&self, source: &E, tag: usize, interest: Interest)
        -> Result<()>
        where E: Evented + ?Sized
    {
        debug!("register tag {} for {:?}", tag, interest);
        self.poll.register(source, Token(tag), interest.ready(),
                           PollOpt::level())
            .map_err(Error::RegistrationFailed)
    }

    /// Toggles write interest on top of read interest.
    pub fn modify<E>(&self, source: &E, tag: usize, writable: bool)
        -> Result<()>
        where E: Evented + ?Sized
    {
        let interest = if writable { Interest::ReadWrite } else { Interest::Read };
        self.reregister(source, tag, interest)
    }

    pub fn reregister<E>(&self, source: &E, tag: usize, interest: Interest)
        -> Result<()>
        where E: Evented + ?Sized
    {
        debug!("reregister tag {} for {:?}", tag, interest);
        self.poll.reregister(source, Token(tag), interest.ready(),
                             PollOpt::level())
            .map_err(Error::RegistrationFailed)
    }

    /// Stops watching `source`. Safe on a descriptor that is not registered.
    pub fn deregister<E>(&self, source: &E)
        where E: Evented + ?Sized
    {
        if let Err(err) = self.poll.deregister(source) {
            debug!("deregister ignored: {}", err);
        }
    }

    /// Blocks until a watched descriptor is ready or `timeout` elapses.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(_) => (),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(Vec::new());
            },
            Err(err) => return Err(Error::Io(err)),
        }

        Ok(self.events.iter().map(|event| {
            let Token(tag) = event.token();
            Readiness::from_event(tag, event.readiness())
        }).collect())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn interest_from_flags() {
        assert_eq!(Interest::new(true, false), Some(Interest::Read));
        assert_eq!(Interest::new(true, true), Some(Interest::ReadWrite));
        assert_eq!(Interest::new(false, true), Some(Interest::Write));
        assert_eq!(Interest::new(false, false), None);
    }

    #[test]
    fn wait_reports_tag_of_readable_descriptor() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (mut client, server) = stream_pair();
        let server = mio::net::TcpStream::from_stream(server).unwrap();

        mux.register(&server, 7, Interest::Read).unwrap();
        client.write_all(b"ping").unwrap();

        let ready = mux.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].tag, 7);
        assert!(ready[0].readable);
    }

    #[test]
    fn modify_adds_write_interest() {
        let mut mux = Multiplexer::new(16).unwrap();
        let (_client, server) = stream_pair();
        let server = mio::net::TcpStream::from_stream(server).unwrap();

        mux.register(&server, 3, Interest::Read).unwrap();
        mux.modify(&server, 3, true).unwrap();

        let ready = mux.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(ready.iter().any(|r| r.tag == 3 && r.writable));
    }

    #[test]
    fn double_register_fails() {
        let mux = Multiplexer::new(16).unwrap();
        let (_client, server) = stream_pair();
        let server = mio::net::TcpStream::from_stream(server).unwrap();

        mux.register(&server, 1, Interest::Read).unwrap();
        match mux.register(&server, 2, Interest::Read) {
            Err(Error::RegistrationFailed(_)) => (),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn deregister_twice_is_harmless() {
        let mux = Multiplexer::new(16).unwrap();
        let (_client, server) = stream_pair();
        let server = mio::net::TcpStream::from_stream(server).unwrap();

        mux.register(&server, 1, Interest::Read).unwrap();
        mux.deregister(&server);
        mux.deregister(&server);
    }
}
