mod support;

use rudp_host::{Event, Packet};

#[test]
fn reliable_packets_survive_fifty_percent_loss() {
    let (mut host_a, mut host_b, peer_a, _peer_b, net, addr_a, addr_b) = support::connected_pair(1);
    net.drop_every_other(addr_b, addr_a);

    for i in 0..20u8 {
        host_a.peer_mut(peer_a).unwrap().send(0, Packet::reliable(vec![i; 8])).unwrap();
    }

    let mut a_events = Vec::new();
    let mut b_events = Vec::new();
    support::pump(&mut host_a, &mut host_b, &mut a_events, &mut b_events, 2000, |_, b_ev| {
        b_ev.iter().filter(|e| matches!(e, Event::Receive { .. })).count() >= 20
    });

    let received: Vec<u8> = b_events
        .iter()
        .filter_map(|e| match e {
            Event::Receive { packet, .. } => Some(packet.data()[0]),
            _ => None,
        })
        .collect();
    assert_eq!(received.len(), 20);
    for i in 0..20u8 {
        assert!(received.contains(&i), "packet {} never arrived", i);
    }

    let peer_a_ref = host_a.peer(peer_a).unwrap();
    assert!(peer_a_ref.packet_loss() > 0 || !peer_a_ref.sent_reliable.is_empty(), "loss on the ack path should be observable");
}
