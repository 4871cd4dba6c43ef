use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use etherparse::{PacketBuilder, SlicedPacket, TransportSlice};
use napt_rs::nat::{
    ConnectionManager, DropReason, MacAddr, ManualClock, NatConfig, NatCounters, NatOptions,
    PortConfig, PortRange, Protocol, Translator, Tuple, Verdict,
};
use napt_rs::net::checksum::{update_checksums, verify_checksums};

const PUBLIC_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const UPSTREAM_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0xfe];
const PRIVATE_MAC: [u8; 6] = [0x02, 0, 0, 0, 1, 0x01];
const HOST_MAC: [u8; 6] = [0x02, 0, 0, 0, 1, 0x05];

const PUBLIC_IP: [u8; 4] = [203, 0, 113, 1];
const SERVER_IP: [u8; 4] = [198, 51, 100, 7];

struct Nat {
    translator: Translator,
    clock: Arc<ManualClock>,
    counters: Arc<NatCounters>,
}

fn nat() -> Nat {
    let config = NatConfig::new(
        PortConfig {
            mac: MacAddr::new(PUBLIC_MAC),
            dst_mac: MacAddr::new(UPSTREAM_MAC),
            address: Some(Ipv4Addr::from(PUBLIC_IP)),
        },
        PortConfig {
            mac: MacAddr::new(PRIVATE_MAC),
            dst_mac: MacAddr::new(HOST_MAC),
            address: None,
        },
    )
    .with_options(NatOptions {
        connection_timeout_secs: 60,
        port_range: PortRange::new(40000, 65499),
        ..NatOptions::default()
    });
    let clock = Arc::new(ManualClock::new());
    let counters = Arc::new(NatCounters::new());
    let manager = Arc::new(ConnectionManager::new(
        &config.options,
        clock.clone(),
        counters.clone(),
    ));
    Nat {
        translator: Translator::new(config, manager).expect("valid config"),
        clock,
        counters,
    }
}

fn tcp_out(src: [u8; 4], port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(HOST_MAC, PRIVATE_MAC)
        .ipv4(src, SERVER_IP, 64)
        .tcp(port, 443, 1000, 64240)
        .syn();
    let mut frame = Vec::new();
    builder.write(&mut frame, &[]).unwrap();
    frame
}

fn tcp_in(dst_port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(UPSTREAM_MAC, PUBLIC_MAC)
        .ipv4(SERVER_IP, PUBLIC_IP, 64)
        .tcp(443, dst_port, 5000, 64240)
        .syn()
        .ack(1001);
    let mut frame = Vec::new();
    builder.write(&mut frame, &[]).unwrap();
    frame
}

fn udp_out(src: [u8; 4], port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(HOST_MAC, PRIVATE_MAC)
        .ipv4(src, SERVER_IP, 64)
        .udp(port, 53);
    let mut frame = Vec::new();
    builder.write(&mut frame, b"query").unwrap();
    frame
}

/// (source, destination) as seen on the wire after translation.
fn endpoints(frame: &[u8]) -> (Tuple, Tuple) {
    let sliced = SlicedPacket::from_ethernet(frame).expect("parsable frame");
    let ip = match sliced.net {
        Some(etherparse::NetSlice::Ipv4(ip)) => ip,
        other => panic!("not ipv4: {:?}", other),
    };
    let src = Ipv4Addr::from(ip.header().source());
    let dst = Ipv4Addr::from(ip.header().destination());
    let (sport, dport) = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (udp.source_port(), udp.destination_port()),
        Some(TransportSlice::Icmpv4(icmp)) => {
            let id = u16::from_be_bytes([icmp.slice()[4], icmp.slice()[5]]);
            (id, id)
        }
        other => panic!("unexpected transport: {:?}", other),
    };
    (Tuple::from_ip(src, sport), Tuple::from_ip(dst, dport))
}

#[test]
fn tcp_connection_round_trip() {
    let nat = nat();

    let mut syn = tcp_out([10, 0, 0, 5], 5000);
    assert_eq!(nat.translator.egress(&mut syn), Verdict::Accept);
    let (src, dst) = endpoints(&syn);
    assert_eq!(src, Tuple::from_ip(Ipv4Addr::from(PUBLIC_IP), 40000));
    assert_eq!(dst, Tuple::from_ip(Ipv4Addr::from(SERVER_IP), 443));
    assert_eq!(&syn[0..6], &UPSTREAM_MAC);
    assert_eq!(&syn[6..12], &PUBLIC_MAC);

    let mut syn_ack = tcp_in(40000);
    assert_eq!(nat.translator.ingress(&mut syn_ack), Verdict::Accept);
    let (_, dst) = endpoints(&syn_ack);
    assert_eq!(dst, Tuple::from_ip(Ipv4Addr::new(10, 0, 0, 5), 5000));
    assert_eq!(&syn_ack[0..6], &HOST_MAC);
    assert_eq!(&syn_ack[6..12], &PRIVATE_MAC);

    assert_eq!(nat.counters.snapshot().bindings_created, 1);
}

#[test]
fn icmp_echo_identifier_is_restored() {
    let nat = nat();

    let builder = PacketBuilder::ethernet2(HOST_MAC, PRIVATE_MAC)
        .ipv4([10, 0, 0, 9], SERVER_IP, 64)
        .icmpv4_echo_request(77, 1);
    let mut request = Vec::new();
    builder.write(&mut request, b"ping").unwrap();
    assert!(nat.translator.translate_egress(&mut request));
    let (src, _) = endpoints(&request);
    assert_eq!(src.ip(), Ipv4Addr::from(PUBLIC_IP));
    let public_id = src.port;

    let builder = PacketBuilder::ethernet2(UPSTREAM_MAC, PUBLIC_MAC)
        .ipv4(SERVER_IP, PUBLIC_IP, 64)
        .icmpv4_echo_reply(public_id, 1);
    let mut reply = Vec::new();
    builder.write(&mut reply, b"ping").unwrap();

    nat.clock.advance(Duration::from_secs(30));
    assert!(nat.translator.translate_ingress(&mut reply));
    let (_, dst) = endpoints(&reply);
    assert_eq!(dst, Tuple::from_ip(Ipv4Addr::new(10, 0, 0, 9), 77));

    update_checksums(&mut reply).unwrap();
    assert!(verify_checksums(&reply));
}

#[test]
fn expired_binding_drops_then_rebinds() {
    let nat = nat();

    let mut out = tcp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut out));

    nat.clock.advance(Duration::from_secs(61));
    let mut late = tcp_in(40000);
    assert_eq!(
        nat.translator.ingress(&mut late),
        Verdict::Drop(DropReason::Expired)
    );

    let mut again = tcp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut again));
    let (src, _) = endpoints(&again);
    assert_eq!(src.ip(), Ipv4Addr::from(PUBLIC_IP));

    let mut reply = tcp_in(src.port);
    assert!(nat.translator.translate_ingress(&mut reply));

    let snap = nat.counters.snapshot();
    assert_eq!(snap.bindings_created, 2);
    assert_eq!(snap.bindings_evicted, 1);
    assert_eq!(snap.dropped(DropReason::Expired), 1);
}

#[test]
fn timeout_boundary_is_exclusive() {
    let nat = nat();
    let mut out = tcp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut out));

    nat.clock.advance(Duration::from_secs(60));
    let mut reply = tcp_in(40000);
    assert!(nat.translator.translate_ingress(&mut reply));
}

#[test]
fn unsolicited_inbound_is_dropped() {
    let nat = nat();
    for port in [1024, 40000, 65499] {
        let mut frame = tcp_in(port);
        let before = frame.clone();
        assert_eq!(
            nat.translator.ingress(&mut frame),
            Verdict::Drop(DropReason::NoBinding)
        );
        assert_eq!(frame, before);
    }
    assert_eq!(nat.counters.snapshot().bindings_created, 0);
}

#[test]
fn protocols_do_not_share_bindings() {
    let nat = nat();

    let mut tcp = tcp_out([10, 0, 0, 5], 5000);
    let mut udp = udp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut tcp));
    assert!(nat.translator.translate_egress(&mut udp));

    // each protocol has its own port space, both start at the range head
    assert_eq!(endpoints(&tcp).0.port, 40000);
    assert_eq!(endpoints(&udp).0.port, 40000);

    let manager = nat.translator.manager();
    assert_eq!(manager.active_bindings(Protocol::Tcp), 1);
    assert_eq!(manager.active_bindings(Protocol::Udp), 1);
    assert_eq!(manager.active_bindings(Protocol::Icmp), 0);

    // a UDP reply only finds the UDP binding
    manager.evict(Protocol::Udp, 40000, napt_rs::nat::EvictReason::Swept);
    let mut tcp_reply = tcp_in(40000);
    assert!(nat.translator.translate_ingress(&mut tcp_reply));
}

#[test]
fn repeated_egress_reuses_binding() {
    let nat = nat();
    let mut ports = Vec::new();
    for _ in 0..5 {
        let mut frame = udp_out([10, 0, 0, 5], 5000);
        assert!(nat.translator.translate_egress(&mut frame));
        ports.push(endpoints(&frame).0.port);
        nat.clock.advance(Duration::from_secs(50));
    }
    assert!(ports.iter().all(|&p| p == 40000));
    assert_eq!(nat.counters.snapshot().bindings_created, 1);

    let private = Tuple::from_ip(Ipv4Addr::new(10, 0, 0, 5), 5000);
    let public = Tuple::from_ip(Ipv4Addr::from(PUBLIC_IP), 40000);
    let manager = nat.translator.manager();
    assert_eq!(manager.lookup(Protocol::Udp, &private), Some(public));
    assert_eq!(manager.lookup(Protocol::Udp, &public), Some(private));
}

#[test]
fn egress_traffic_keeps_binding_alive_for_replies() {
    let nat = nat();
    let manager = nat.translator.manager();
    let last_used = || manager.registry().last_used(Protocol::Udp, 40000);

    let mut first = udp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut first));
    let t0 = last_used();

    nat.clock.advance(Duration::from_secs(50));
    let mut second = udp_out([10, 0, 0, 5], 5000);
    assert!(nat.translator.translate_egress(&mut second));
    let t1 = last_used();
    assert!(t1 > t0);
    assert_eq!(t1, Duration::from_secs(50).as_nanos() as u64);

    // 100s after the binding was made, 50s after the last egress
    nat.clock.advance(Duration::from_secs(50));
    let builder = PacketBuilder::ethernet2(UPSTREAM_MAC, PUBLIC_MAC)
        .ipv4(SERVER_IP, PUBLIC_IP, 64)
        .udp(53, 40000);
    let mut reply = Vec::new();
    builder.write(&mut reply, b"answer").unwrap();
    assert_eq!(nat.translator.ingress(&mut reply), Verdict::Accept);
    assert!(last_used() > t1);
    assert_eq!(nat.counters.snapshot().bindings_evicted, 0);
}

#[test]
fn concurrent_hosts_get_distinct_ports() {
    let nat = Arc::new(nat());
    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let nat = nat.clone();
            thread::spawn(move || {
                let mut ports = Vec::new();
                for host in 0..100u16 {
                    let mut frame = udp_out([10, 0, t, (host % 250) as u8 + 1], 1000 + host);
                    assert!(nat.translator.translate_egress(&mut frame));
                    ports.push(endpoints(&frame).0.port);
                }
                ports
            })
        })
        .collect();

    let mut all: Vec<u16> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 800);
    assert_eq!(
        nat.translator.manager().active_bindings(Protocol::Udp),
        800
    );
}
