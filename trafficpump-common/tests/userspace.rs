//! Integration tests for the userspace helpers (requires `user` feature).

use std::net::Ipv4Addr;

use trafficpump_common::*;

fn as_bytes(event: &ConnectionEvent) -> Vec<u8> {
    // SAFETY: ConnectionEvent is repr(C) with explicit padding.
    unsafe {
        std::slice::from_raw_parts(
            (event as *const ConnectionEvent).cast::<u8>(),
            size_of::<ConnectionEvent>(),
        )
    }
    .to_vec()
}

// ---- decoding ----

#[test]
fn from_bytes_round_trips_record() {
    let mut e = ConnectionEvent::new();
    e.timestamp = 123_456_789;
    e.pid = 77;
    e.uid = 1000;
    e.syscall_id = 42;
    e.comm[..4].copy_from_slice(b"curl");
    e.daddr = 0x5db8_d822;
    e.dport = 443;

    assert_eq!(ConnectionEvent::from_bytes(&as_bytes(&e)), Some(e));
}

#[test]
fn from_bytes_rejects_short_record() {
    let bytes = as_bytes(&ConnectionEvent::new());
    assert_eq!(ConnectionEvent::from_bytes(&bytes[..bytes.len() - 1]), None);
    assert_eq!(ConnectionEvent::from_bytes(&[]), None);
}

#[test]
fn from_bytes_unaligned() {
    let mut e = ConnectionEvent::new();
    e.pid = 9;
    let mut bytes = vec![0u8];
    bytes.extend(as_bytes(&e));
    assert_eq!(ConnectionEvent::from_bytes(&bytes[1..]).map(|e| e.pid), Some(9));
}

// ---- addresses ----

#[test]
fn addresses_are_host_order() {
    let mut e = ConnectionEvent::new();
    e.saddr = 0xc0a8_0001;
    e.daddr = 0xc0a8_0132;
    assert_eq!(e.source_ip(), Ipv4Addr::new(192, 168, 0, 1));
    assert_eq!(e.dest_ip(), Ipv4Addr::new(192, 168, 1, 50));
}

#[test]
fn unknown_addresses_are_unspecified() {
    let e = ConnectionEvent::new();
    assert_eq!(e.source_ip(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(e.dest_ip(), Ipv4Addr::UNSPECIFIED);
}

// ---- process_name() ----

#[test]
fn process_name_normal() {
    let mut e = ConnectionEvent::new();
    let name = b"curl\0";
    e.comm[..name.len()].copy_from_slice(name);
    assert_eq!(e.process_name(), "curl");
}

#[test]
fn process_name_full_length() {
    let mut e = ConnectionEvent::new();
    e.comm = *b"0123456789abcdef";
    assert_eq!(e.process_name(), "0123456789abcdef");
}

#[test]
fn process_name_empty() {
    assert_eq!(ConnectionEvent::new().process_name(), "");
}

#[test]
fn process_name_invalid_utf8() {
    let mut e = ConnectionEvent::new();
    e.comm[0] = 0xFF;
    e.comm[1] = 0xFE;
    assert_eq!(e.process_name(), "<invalid>");
}

// ---- syscall names ----

#[test]
fn syscall_names() {
    let mut e = ConnectionEvent::new();
    for (id, name) in [
        (42, "connect"),
        (43, "accept"),
        (288, "accept4"),
        (142, "tcp_connect"),
        (7, "unknown"),
    ] {
        e.syscall_id = id;
        assert_eq!(e.syscall_name(), name);
    }
}

// ---- ring + handlers, end to end ----

struct Task1;

impl Task for Task1 {
    fn ktime_ns(&self) -> u64 {
        5
    }
    fn pid(&self) -> u32 {
        1
    }
    fn uid(&self) -> u32 {
        0
    }
    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        *b"nginx\0\0\0\0\0\0\0\0\0\0\0"
    }
}

struct NoMemory;

impl UserMemory for NoMemory {
    fn read(&self, _: u64, _: &mut [u8]) -> Result<(), AddressReadFailure> {
        Err(AddressReadFailure)
    }
}

#[test]
fn accept_event_decodes_through_ring() {
    let (producer, mut consumer) = ring::channel(RING_BUF_BYTES as usize);
    handle(&producer, &Task1, &NoMemory, Capture::Accept).unwrap();

    let event = consumer.pop().unwrap();
    let decoded = ConnectionEvent::from_bytes(&as_bytes(&event)).unwrap();
    assert_eq!(decoded.process_name(), "nginx");
    assert_eq!(decoded.syscall_name(), "accept");
    assert_eq!(decoded.family, AF_INET);
    assert_eq!((decoded.sport, decoded.dport), (0, 0));
}
