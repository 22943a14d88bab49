//! Recovery of the destination a redirected client originally dialed.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use byteorder::{ByteOrder, NativeEndian, NetworkEndian};
use mio::net::TcpStream;

use crate::error::{Error, Result};


pub trait Resolver {
    fn resolve(&self, client: &TcpStream) -> Result<SocketAddrV4>;
}


fn peer_name(client: &TcpStream) -> String {
    match client.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "<unknown peer>".to_string(),
    }
}


/// Size of `struct sockaddr_in`.
const SOCKADDR_IN_LEN: usize = 16;

/// Decodes a raw `sockaddr_in`: native-order family, then the port and the
/// address in network order.
pub fn decode_sockaddr_in(raw: &[u8]) -> Option<SocketAddrV4> {
    if raw.len() < 8 {
        return None;
    }
    if NativeEndian::read_u16(&raw[0..2]) != libc::AF_INET as u16 {
        return None;
    }
    let port = NetworkEndian::read_u16(&raw[2..4]);
    let addr = Ipv4Addr::from(NetworkEndian::read_u32(&raw[4..8]));
    Some(SocketAddrV4::new(addr, port))
}


/// Asks netfilter for the pre-NAT destination (`SO_ORIGINAL_DST`).
#[derive(Clone, Copy, Debug, Default)]
pub struct OriginalDst;

#[cfg(target_os = "linux")]
mod netfilter {
    use std::io;
    use std::mem;
    use std::os::unix::io::RawFd;

    use super::SOCKADDR_IN_LEN;

    /// From `linux/netfilter_ipv4.h`.
    const SO_ORIGINAL_DST: libc::c_int = 80;

    pub fn original_dst(fd: RawFd) -> io::Result<[u8; SOCKADDR_IN_LEN]> {
        let mut raw = [0u8; SOCKADDR_IN_LEN];
        let mut len = mem::size_of_val(&raw) as libc::socklen_t;

        let ret = unsafe {
            libc::getsockopt(fd, libc::SOL_IP, SO_ORIGINAL_DST,
                             raw.as_mut_ptr() as *mut libc::c_void, &mut len)
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(raw)
    }
}

impl Resolver for OriginalDst {
    #[cfg(target_os = "linux")]
    fn resolve(&self, client: &TcpStream) -> Result<SocketAddrV4> {
        use std::os::unix::io::AsRawFd;

        let raw = netfilter::original_dst(client.as_raw_fd()).map_err(|err|
            match err.raw_os_error() {
                Some(libc::ENOPROTOOPT) | Some(libc::ENOENT) =>
                    Error::resolution(peer_name(client),
                                      "no redirect metadata"),
                _ => Error::resolution(peer_name(client), err),
            }
        )?;

        decode_sockaddr_in(&raw).ok_or_else(||
            Error::resolution(peer_name(client), "not an IPv4 destination"))
    }

    #[cfg(not(target_os = "linux"))]
    fn resolve(&self, client: &TcpStream) -> Result<SocketAddrV4> {
        Err(Error::resolution(peer_name(client),
                              "SO_ORIGINAL_DST is only available on Linux"))
    }
}


/// A fixed rule table: connections arriving on a local address go to the
/// destination registered for it.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    rules: HashMap<SocketAddr, SocketAddrV4>,
}

impl StaticResolver {
    pub fn new() -> StaticResolver {
        StaticResolver::default()
    }

    pub fn route(mut self, local: SocketAddr, destination: SocketAddrV4)
        -> StaticResolver
    {
        self.insert(local, destination);
        self
    }

    pub fn insert(&mut self, local: SocketAddr, destination: SocketAddrV4) {
        self.rules.insert(local, destination);
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, client: &TcpStream) -> Result<SocketAddrV4> {
        let local = client.local_addr()?;
        self.rules.get(&local).cloned().ok_or_else(||
            Error::resolution(peer_name(client),
                              format!("no rule for {}", local)))
    }
}
