mod support;

use std::time::Duration;

use rudp_host::{Event, Packet};

#[test]
fn reliable_send_is_delivered_and_acked() {
    let (mut host_a, mut host_b, peer_a, peer_b, _net, _addr_a, _addr_b) = support::connected_pair(1);

    host_a.peer_mut(peer_a).unwrap().send(0, Packet::reliable(b"hello".to_vec())).unwrap();

    let mut a_events = Vec::new();
    let mut b_events = Vec::new();

    let delivered = support::pump(&mut host_a, &mut host_b, &mut a_events, &mut b_events, 32, |_, b_ev| {
        b_ev.iter().any(|e| matches!(e, Event::Receive { .. }))
    });
    assert!(delivered, "B never received the packet");

    match b_events.iter().find(|e| matches!(e, Event::Receive { .. })).unwrap() {
        Event::Receive { peer, channel, packet } => {
            assert_eq!(*peer, peer_b);
            assert_eq!(*channel, 0);
            assert_eq!(packet.data(), b"hello");
        }
        _ => unreachable!(),
    }

    // Give the ack one more round trip to land and drain the send queue.
    for _ in 0..4 {
        host_a.service(Duration::ZERO).unwrap();
        host_b.service(Duration::ZERO).unwrap();
    }
    let peer_a_ref = host_a.peer(peer_a).unwrap();
    assert!(peer_a_ref.sent_reliable.is_empty());
    assert!(peer_a_ref.outgoing_reliable.is_empty());
}
