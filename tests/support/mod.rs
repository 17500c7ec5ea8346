//! An in-memory [`Socket`] substrate for driving two or more hosts through a
//! full handshake/transfer without real sockets, running in-process and
//! single-threaded so scenarios are deterministic.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use rudp_host::socket::Socket;
use rudp_host::{Event, Host, HostConfig, PeerId};

#[derive(Default)]
struct LinkState {
    drop_every_other: bool,
    drop_counter: Cell<usize>,
    duplicate: usize,
}

/// A shared virtual network: routes datagrams between [`MemorySocket`]s
/// registered under distinct addresses, with optional per-direction loss and
/// duplication for exercising retransmission and replay handling.
#[derive(Default)]
pub struct Network {
    inboxes: RefCell<HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>>,
    links: RefCell<HashMap<(SocketAddr, SocketAddr), LinkState>>,
}

impl Network {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Attaches a [`MemorySocket`] bound to `address`.
    pub fn socket(self: &Rc<Self>, address: SocketAddr) -> MemorySocket {
        self.inboxes.borrow_mut().entry(address).or_default();
        MemorySocket { address, net: self.clone() }
    }

    /// Drops every other datagram sent from `from` to `to`.
    pub fn drop_every_other(&self, from: SocketAddr, to: SocketAddr) {
        self.links.borrow_mut().entry((from, to)).or_default().drop_every_other = true;
    }

    /// Drops every datagram sent from `from` to `to` (used to simulate a
    /// severed link for timeout scenarios).
    pub fn sever(&self, from: SocketAddr, to: SocketAddr) {
        let mut links = self.links.borrow_mut();
        let link = links.entry((from, to)).or_default();
        link.drop_every_other = false;
        link.duplicate = usize::MAX;
    }

    /// Delivers `factor` copies of every datagram sent from `from` to `to`.
    pub fn duplicate(&self, from: SocketAddr, to: SocketAddr, factor: usize) {
        self.links.borrow_mut().entry((from, to)).or_default().duplicate = factor;
    }

    fn send(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let mut links = self.links.borrow_mut();
        let link = links.entry((from, to)).or_default();

        if link.duplicate == usize::MAX {
            return; // severed
        }

        if link.drop_every_other {
            let n = link.drop_counter.get();
            link.drop_counter.set(n + 1);
            if n % 2 == 1 {
                return;
            }
        }

        let copies = link.duplicate.max(1);
        let mut inboxes = self.inboxes.borrow_mut();
        let inbox = inboxes.entry(to).or_default();
        for _ in 0..copies {
            inbox.push_back((from, data.to_vec()));
        }
    }

    fn recv(&self, at: SocketAddr) -> Option<(SocketAddr, Vec<u8>)> {
        self.inboxes.borrow_mut().get_mut(&at).and_then(|q| q.pop_front())
    }

    fn has_pending(&self, at: SocketAddr) -> bool {
        self.inboxes.borrow().get(&at).map(|q| !q.is_empty()).unwrap_or(false)
    }
}

/// A [`Socket`] implementation backed by a shared in-memory [`Network`]
/// instead of a real kernel socket.
pub struct MemorySocket {
    address: SocketAddr,
    net: Rc<Network>,
}

impl Socket for MemorySocket {
    fn send(&mut self, address: SocketAddr, data: &[u8]) -> io::Result<usize> {
        self.net.send(self.address, address, data);
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.net.recv(self.address) {
            Some((from, data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Some((n, from)))
            }
            None => Ok(None),
        }
    }

    fn wait(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(self.net.has_pending(self.address))
    }
}

/// Runs `Host::service(Duration::ZERO)` on both hosts in lockstep until
/// `done` returns `true` or `max_ticks` elapses, collecting every emitted
/// event from each host along the way. Returns `false` if `max_ticks` was
/// exhausted first.
pub fn pump<F>(
    a: &mut Host<MemorySocket>,
    b: &mut Host<MemorySocket>,
    a_events: &mut Vec<Event>,
    b_events: &mut Vec<Event>,
    max_ticks: usize,
    mut done: F,
) -> bool
where
    F: FnMut(&[Event], &[Event]) -> bool,
{
    for _ in 0..max_ticks {
        while let Some(event) = a.service(Duration::ZERO).unwrap() {
            a_events.push(event);
        }
        while let Some(event) = b.service(Duration::ZERO).unwrap() {
            b_events.push(event);
        }
        if done(a_events, b_events) {
            return true;
        }
    }
    false
}

/// Builds two hosts on a shared [`Network`], connects A to B with
/// `channel_count` channels, and pumps both until the handshake completes on
/// both ends. Returns the hosts, their peer handles, and the network (kept
/// alive so later link-shaping calls can still reach it).
pub fn connected_pair(channel_count: u32) -> (Host<MemorySocket>, Host<MemorySocket>, PeerId, PeerId, Rc<Network>, SocketAddr, SocketAddr) {
    let _ = env_logger::builder().is_test(true).try_init();

    let net = Network::new();
    let addr_a: SocketAddr = "10.0.0.1:9000".parse().unwrap();
    let addr_b: SocketAddr = "10.0.0.2:9000".parse().unwrap();

    let mut host_a = Host::create(net.socket(addr_a), HostConfig::default()).unwrap();
    let mut host_b = Host::create(net.socket(addr_b), HostConfig::default()).unwrap();

    let peer_a = host_a.connect(addr_b, channel_count, 0).unwrap();

    let mut a_events = Vec::new();
    let mut b_events = Vec::new();
    let mut peer_b = None;

    pump(&mut host_a, &mut host_b, &mut a_events, &mut b_events, 64, |a_ev, b_ev| {
        let a_connected = a_ev.iter().any(|e| matches!(e, Event::Connect(_)));
        if let Some(Event::Connect(id)) = b_ev.iter().find(|e| matches!(e, Event::Connect(_))) {
            peer_b = Some(*id);
        }
        a_connected && peer_b.is_some()
    });

    let peer_b = peer_b.expect("handshake did not complete within the tick budget");
    (host_a, host_b, peer_a, peer_b, net, addr_a, addr_b)
}
