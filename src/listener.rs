use std::io;
use std::net::SocketAddr;

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::error::{Error, Result};


/// Binds the port redirect rules deliver connections to.
pub fn bind(cfg: &Config) -> Result<TcpListener> {
    let addr = SocketAddr::V4(cfg.listen);
    let bind_err = |source: io::Error| Error::Bind{ addr, source };

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(Error::ResourceExhausted)?;

    if cfg.transparent {
        socket.set_ip_transparent(true).map_err(bind_err)?;
    }
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(cfg.backlog).map_err(bind_err)?;

    let listener = TcpListener::from_std(socket.into())?;
    info!("listening on {} (transparent: {})", listener.local_addr()?,
          cfg.transparent);
    Ok(listener)
}
