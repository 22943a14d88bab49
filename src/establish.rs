use std::net::SocketAddrV4;
use std::rc::Rc;
use std::time::Instant;

use mio::net::TcpStream;

use crate::connector::{self, Outbound};
use crate::endpoint::{Connecting, Endpoint, Relay};
use crate::error::Result;
use crate::evloop::EventLoop;
use crate::mux::Interest;


impl EventLoop {
    /// Dials `destination` on behalf of `client`. A rejected connect leaves
    /// no record behind and drops (closes) the client.
    pub(crate) fn establish(&mut self, client: TcpStream,
                            destination: SocketAddrV4) -> Result<()>
    {
        match connector::connect(destination)? {
            Outbound::Established(outbound) => {
                let (up, down) = self.pair(Rc::new(outbound), Rc::new(client))?;
                info!("connected to {} (relays {} and {})", destination, up, down);
            },
            Outbound::Pending(outbound) => {
                let deadline = self.connect_timeout.map(|t| Instant::now() + t);
                let connecting = Connecting {
                    outbound: Rc::new(outbound),
                    client: Rc::new(client),
                    destination,
                    deadline,
                };
                let id = self.insert(Endpoint::Connecting(connecting),
                                     Interest::ReadWrite)?;
                info!("connecting to {} (record {})", destination, id);
            },
        }
        Ok(())
    }

    /// Registers both directions of an established connection.
    fn pair(&mut self, outbound: Rc<TcpStream>, client: Rc<TcpStream>)
        -> Result<(usize, usize)>
    {
        let down = self.insert_relay(Relay::new(outbound.clone(),
                                                client.clone()))?;
        let up = match self.insert_relay(Relay::new(client, outbound)) {
            Ok(id) => id,
            Err(err) => {
                self.discard(down);
                return Err(err);
            }
        };
        self.link(up, down);
        Ok((up, down))
    }

    pub(crate) fn complete_connect(&mut self, id: usize) {
        let status = match self.endpoints.get(id) {
            Some(Endpoint::Connecting(c)) =>
                connector::finish(&c.outbound, c.destination),
            _ => return,
        };

        match status {
            Ok(false) => trace!("record {} still connecting", id),
            Ok(true) => {
                if let Err(err) = self.promote(id) {
                    warn!("relay setup for record {} failed: {}", id, err);
                }
            },
            Err(err) => {
                warn!("{}", err);
                self.discard(id);
            },
        }
    }

    /// Turns a completed connect into two relays. The connecting record
    /// keeps its id and becomes the destination-to-client direction.
    fn promote(&mut self, id: usize) -> Result<()> {
        let (outbound, client, destination) = match self.endpoints.get(id) {
            Some(Endpoint::Connecting(c)) =>
                (c.outbound.clone(), c.client.clone(), c.destination),
            _ => return Ok(()),
        };

        let mut down = Relay::new(outbound.clone(), client.clone());
        down.interest = Some(Interest::Read);
        self.endpoints[id] = Endpoint::Relaying(down);

        if let Err(err) = self.mux.modify(&*outbound, id, false) {
            self.discard(id);
            return Err(err);
        }

        let up = match self.insert_relay(Relay::new(client, outbound)) {
            Ok(up) => up,
            Err(err) => {
                self.discard(id);
                return Err(err);
            }
        };
        self.link(up, id);
        info!("connected to {} (relays {} and {})", destination, up, id);
        Ok(())
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if self.connect_timeout.is_none() {
            return None;
        }
        self.endpoints.iter().filter_map(|(_, endpoint)| match endpoint {
            Endpoint::Connecting(c) => c.deadline,
            _ => None,
        }).min()
    }

    /// Fails every pending connect whose deadline passed by `now`.
    pub(crate) fn expire_connects(&mut self, now: Instant) {
        let expired: Vec<(usize, SocketAddrV4)> = self.endpoints.iter()
            .filter_map(|(id, endpoint)| match endpoint {
                Endpoint::Connecting(c) if c.deadline.map_or(false, |d| d <= now) =>
                    Some((id, c.destination)),
                _ => None,
            }).collect();

        for (id, destination) in expired {
            warn!("connect to {} timed out", destination);
            self.discard(id);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use socket2::{Domain, Socket, Type};

    use crate::config::Config;
    use crate::endpoint::{Connecting, Endpoint, RoleCounts};
    use crate::evloop::EventLoop;
    use crate::mux::Interest;
    use crate::resolver::StaticResolver;

    fn evloop(connect_timeout: Option<Duration>) -> EventLoop {
        let cfg = Config {
            listen: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            transparent: false,
            connect_timeout,
            ..Config::default()
        };
        EventLoop::new(&cfg, Box::new(StaticResolver::new())).unwrap()
    }

    fn v4(addr: SocketAddr) -> SocketAddrV4 {
        match addr {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        }
    }

    /// An accepted client stream plus the test's end of it.
    fn client() -> (std::net::TcpStream, mio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let far = std::net::TcpStream::connect(listener.local_addr().unwrap())
            .unwrap();
        let (near, _) = listener.accept().unwrap();
        (far, mio::net::TcpStream::from_stream(near).unwrap())
    }

    fn settle(evloop: &mut EventLoop) {
        for _ in 0..50 {
            if evloop.roles().connecting == 0 {
                return;
            }
            evloop.turn(Some(Duration::from_millis(100))).unwrap();
        }
    }

    /// `(id, interest, peer)` of every relay, in arena order.
    fn relays(evloop: &EventLoop) -> Vec<(usize, Option<Interest>, Option<usize>)> {
        evloop.endpoints.iter()
            .map(|(id, endpoint)| match endpoint {
                Endpoint::Relaying(r) => (id, r.interest, r.peer),
                _ => panic!("record {} is not relaying", id),
            }).collect()
    }

    #[test]
    fn immediate_connect_registers_two_read_only_relays() {
        let mut evloop = evloop(None);
        let (_server, outbound) = client();
        let (_far, near) = client();

        let (up, down) = evloop.pair(Rc::new(outbound), Rc::new(near)).unwrap();

        assert_eq!(evloop.roles(),
                   RoleCounts{ listening: 0, connecting: 0, relaying: 2 });
        let mut expected = vec![(down, Some(Interest::Read), Some(up)),
                                (up, Some(Interest::Read), Some(down))];
        expected.sort_by_key(|&(id, _, _)| id);
        assert_eq!(relays(&evloop), expected);
    }

    #[test]
    fn pending_connect_is_a_single_connecting_record() {
        let mut evloop = evloop(None);
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_far, near) = client();

        evloop.establish(near, v4(dest.local_addr().unwrap())).unwrap();

        assert_eq!(evloop.roles(),
                   RoleCounts{ listening: 0, connecting: 1, relaying: 0 });
    }

    #[test]
    fn promoted_connect_drops_write_interest() {
        let mut evloop = evloop(None);
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_far, near) = client();

        evloop.establish(near, v4(dest.local_addr().unwrap())).unwrap();
        settle(&mut evloop);

        let relays = relays(&evloop);
        assert_eq!(relays.len(), 2);
        for &(_, interest, _) in relays.iter() {
            assert_eq!(interest, Some(Interest::Read));
        }
        // Both sockets are writable; with read-only registrations and no
        // data in flight the loop stays quiet.
        assert_eq!(evloop.turn(Some(Duration::from_millis(50))).unwrap(), 0);
    }

    #[test]
    fn completed_connect_yields_two_linked_relays() {
        let mut evloop = evloop(None);
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_far, near) = client();

        evloop.establish(near, v4(dest.local_addr().unwrap())).unwrap();
        settle(&mut evloop);

        assert_eq!(evloop.roles(),
                   RoleCounts{ listening: 0, connecting: 0, relaying: 2 });
        let peers = relays(&evloop);
        assert_eq!(peers[0].2, Some(peers[1].0));
        assert_eq!(peers[1].2, Some(peers[0].0));
    }

    #[test]
    fn synchronous_failure_creates_no_record() {
        let mut evloop = evloop(None);
        let (_far, near) = client();

        assert!(evloop.establish(near, "255.255.255.255:80".parse().unwrap())
                .is_err());
        assert_eq!(evloop.roles().total(), 0);
    }

    #[test]
    fn pending_connect_times_out() {
        let mut evloop = evloop(Some(Duration::from_millis(1)));
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_far, near) = client();

        evloop.establish(near, v4(dest.local_addr().unwrap())).unwrap();
        assert_eq!(evloop.roles().connecting, 1);

        std::thread::sleep(Duration::from_millis(5));
        evloop.expire_connects(Instant::now());
        assert_eq!(evloop.roles().total(), 0);
    }

    #[test]
    fn stalled_connect_expires_while_the_loop_turns() {
        let timeout = Duration::from_millis(30);
        let mut evloop = evloop(Some(timeout));
        let (mut far, near) = client();

        // Never connected, so the connect can neither finish nor fail.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let stalled = mio::net::TcpStream::from_stream(socket.into()).unwrap();
        let started = Instant::now();
        let connecting = Connecting {
            outbound: Rc::new(stalled),
            client: Rc::new(near),
            destination: "127.0.0.1:9".parse().unwrap(),
            deadline: Some(started + timeout),
        };
        evloop.insert(Endpoint::Connecting(connecting), Interest::ReadWrite)
            .unwrap();
        assert!(evloop.next_deadline().is_some());

        while evloop.roles().connecting == 1
            && started.elapsed() < Duration::from_secs(5)
        {
            evloop.turn(None).unwrap();
        }

        assert_eq!(evloop.roles().total(), 0);
        assert!(started.elapsed() >= timeout);
        far.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(far.read(&mut [0u8; 16]).unwrap(), 0);
    }

    #[test]
    fn deadline_bounds_wait_only_when_enabled() {
        let mut plain = evloop(None);
        let dest = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_far, near) = client();
        plain.establish(near, v4(dest.local_addr().unwrap())).unwrap();
        assert!(plain.next_deadline().is_none());
    }
}
