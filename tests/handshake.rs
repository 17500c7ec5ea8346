mod support;

use rudp_host::PeerState;

#[test]
fn handshake_establishes_both_peers_with_negotiated_channels() {
    let (host_a, host_b, peer_a, peer_b, _net, addr_a, addr_b) = support::connected_pair(2);

    let a = host_a.peer(peer_a).unwrap();
    let b = host_b.peer(peer_b).unwrap();

    assert_eq!(a.state(), PeerState::Connected);
    assert_eq!(b.state(), PeerState::Connected);
    assert_eq!(a.channel_count(), 2);
    assert_eq!(b.channel_count(), 2);
    assert_eq!(b.address(), addr_a);
    assert_eq!(a.address(), addr_b);
}
