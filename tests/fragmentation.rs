mod support;

use rudp_host::{Event, Packet};

#[test]
fn large_reliable_packet_reassembles_across_fragments() {
    let (mut host_a, mut host_b, peer_a, _peer_b, _net, _addr_a, _addr_b) = support::connected_pair(1);

    let payload: Vec<u8> = (0..6000u32).map(|i| (i % 256) as u8).collect();
    host_a.peer_mut(peer_a).unwrap().send(0, Packet::reliable(payload.clone())).unwrap();

    let mut a_events = Vec::new();
    let mut b_events = Vec::new();
    let delivered = support::pump(&mut host_a, &mut host_b, &mut a_events, &mut b_events, 64, |_, b_ev| {
        b_ev.iter().any(|e| matches!(e, Event::Receive { .. }))
    });
    assert!(delivered);

    match b_events.iter().find(|e| matches!(e, Event::Receive { .. })).unwrap() {
        Event::Receive { packet, .. } => assert_eq!(packet.data(), payload.as_slice()),
        _ => unreachable!(),
    }
}
