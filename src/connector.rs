use std::io;
use std::net::{SocketAddr, SocketAddrV4};

use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};


/// Result of a non-blocking connect that was not rejected outright.
pub enum Outbound {
    Established(TcpStream),
    Pending(TcpStream),
}

fn in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
        || err.kind() == io::ErrorKind::WouldBlock
}

/// Opens a non-blocking IPv4 stream to `destination`. A connect that the
/// kernel rejects right away closes the socket and fails with `Establish`.
pub fn connect(destination: SocketAddrV4) -> Result<Outbound> {
    let addr = SocketAddr::V4(destination);
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(Error::ResourceExhausted)?;
    socket.set_nonblocking(true)?;

    let established = match socket.connect(&addr.into()) {
        Ok(()) => true,
        Err(ref err) if in_progress(err) => false,
        Err(err) => return Err(Error::Establish{ addr, source: err }),
    };

    let stream = TcpStream::from_stream(socket.into())?;
    if established {
        Ok(Outbound::Established(stream))
    } else {
        Ok(Outbound::Pending(stream))
    }
}

/// Outcome of a pending connect once its socket reported readiness:
/// `Ok(true)` when connected, `Ok(false)` when the wakeup was spurious.
pub fn finish(stream: &TcpStream, destination: SocketAddrV4) -> Result<bool> {
    let addr = SocketAddr::V4(destination);
    match stream.take_error() {
        Ok(None) => (),
        Ok(Some(err)) | Err(err) => return Err(Error::Establish{ addr, source: err }),
    }

    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(ref err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(err) => Err(Error::Establish{ addr, source: err }),
    }
}
