//! Event construction shared by every probe.
//!
//! All four entry points run the same skeleton: resolve the network fields
//! (the only step that touches foreign memory), reserve a slot, stamp the
//! caller's identity, tag the record, commit. They differ only in the
//! [`Capture`] they pass in.

use crate::{
    AF_INET, TASK_COMM_LEN,
    channel::{EventChannel, EventSlot},
    classify::classify,
    memory::{AddressReadFailure, SockAddrIn, UserMemory},
};

/// Which hook produced an event; the discriminant is the wire `syscall_id`.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// `sys_enter_connect`
    Connect = 42,
    /// `sys_enter_accept`
    Accept = 43,
    /// kprobe on `tcp_v4_connect`; not a real syscall number
    TcpConnect = 142,
    /// `sys_enter_accept4`
    Accept4 = 288,
}

impl Probe {
    pub const ALL: [Probe; 4] = [
        Probe::Connect,
        Probe::Accept,
        Probe::TcpConnect,
        Probe::Accept4,
    ];

    #[inline(always)]
    pub const fn syscall_id(self) -> u16 {
        self as u16
    }

    pub const fn from_syscall_id(id: u16) -> Option<Self> {
        match id {
            42 => Some(Probe::Connect),
            43 => Some(Probe::Accept),
            142 => Some(Probe::TcpConnect),
            288 => Some(Probe::Accept4),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Probe::Connect => "connect",
            Probe::Accept => "accept",
            Probe::TcpConnect => "tcp_connect",
            Probe::Accept4 => "accept4",
        }
    }
}

/// Why an event was not produced. Never reported to the traced process.
///
/// The discriminant indexes the `DROPS` per-CPU counters.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dropped {
    /// The sockaddr argument could not be copied.
    AddressRead = 0,
    /// No room left in the ring buffer.
    BufferFull = 1,
    /// Not an IPv4 sockaddr. Suppressed rather than failed.
    UnsupportedFamily = 2,
}

impl Dropped {
    pub const COUNT: u32 = 3;

    pub const ALL: [Dropped; 3] = [
        Dropped::AddressRead,
        Dropped::BufferFull,
        Dropped::UnsupportedFamily,
    ];

    #[inline(always)]
    pub const fn index(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Dropped::AddressRead => "address_read",
            Dropped::BufferFull => "buffer_full",
            Dropped::UnsupportedFamily => "unsupported_family",
        }
    }
}

impl From<AddressReadFailure> for Dropped {
    fn from(_: AddressReadFailure) -> Self {
        Dropped::AddressRead
    }
}

/// Identity of the task the probe fired in.
pub trait Task {
    /// Monotonic clock, nanoseconds.
    fn ktime_ns(&self) -> u64;
    /// Thread group id.
    fn pid(&self) -> u32;
    fn uid(&self) -> u32;
    fn comm(&self) -> [u8; TASK_COMM_LEN];
}

/// Network half of a record, host byte order, `0` for unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
}

impl Endpoints {
    pub const UNKNOWN: Endpoints = Endpoints {
        saddr: 0,
        daddr: 0,
        sport: 0,
        dport: 0,
    };

    /// Destination as seen at connect time. The source address is guessed
    /// with [`classify`]; the source port is assigned by the kernel later and
    /// stays unknown.
    #[inline(always)]
    pub const fn outbound(daddr: u32, dport: u16) -> Self {
        Endpoints {
            saddr: classify(daddr),
            daddr,
            sport: 0,
            dport,
        }
    }
}

/// Arguments captured by each hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    Connect { sockaddr: u64 },
    TcpConnect,
    Accept,
    Accept4,
}

impl Capture {
    /// Connect capture from the raw read of the tracepoint's sockaddr
    /// argument. A failed read is accounted like any other address fault.
    #[inline(always)]
    pub fn connect<E>(sockaddr: Result<u64, E>) -> Result<Self, Dropped> {
        match sockaddr {
            Ok(sockaddr) => Ok(Capture::Connect { sockaddr }),
            Err(_) => Err(Dropped::AddressRead),
        }
    }

    #[inline(always)]
    pub const fn probe(&self) -> Probe {
        match self {
            Capture::Connect { .. } => Probe::Connect,
            Capture::TcpConnect => Probe::TcpConnect,
            Capture::Accept => Probe::Accept,
            Capture::Accept4 => Probe::Accept4,
        }
    }

    /// Resolves the network fields for this hook.
    ///
    /// Accept peers are only known on syscall exit, and the `tcp_v4_connect`
    /// socket is not decoded, so only connect carries an address.
    #[inline(always)]
    pub fn endpoints<M: UserMemory>(&self, memory: &M) -> Result<Endpoints, Dropped> {
        match *self {
            Capture::Connect { sockaddr } => connect_endpoints(memory, sockaddr),
            Capture::TcpConnect | Capture::Accept | Capture::Accept4 => Ok(Endpoints::UNKNOWN),
        }
    }
}

#[inline(always)]
fn connect_endpoints<M: UserMemory>(memory: &M, sockaddr: u64) -> Result<Endpoints, Dropped> {
    let sin = SockAddrIn::read(memory, sockaddr)?;
    if sin.sin_family != AF_INET {
        return Err(Dropped::UnsupportedFamily);
    }
    Ok(Endpoints::outbound(sin.addr(), sin.port()))
}

/// Runs one probe invocation end to end.
#[inline(always)]
pub fn handle<C, T, M>(channel: &C, task: &T, memory: &M, capture: Capture) -> Result<(), Dropped>
where
    C: EventChannel,
    T: Task,
    M: UserMemory,
{
    let endpoints = capture.endpoints(memory)?;
    emit(channel, task, capture.probe(), endpoints)
}

/// Fills one reserved record and commits it. Nothing between reserve and
/// commit can fail.
#[inline(always)]
pub fn emit<C, T>(channel: &C, task: &T, probe: Probe, endpoints: Endpoints) -> Result<(), Dropped>
where
    C: EventChannel,
    T: Task,
{
    let mut slot = channel.reserve().ok_or(Dropped::BufferFull)?;

    let event = slot.init();
    event.timestamp = task.ktime_ns();
    event.pid = task.pid();
    event.uid = task.uid();
    event.comm = task.comm();
    event.syscall_id = probe.syscall_id();
    event.saddr = endpoints.saddr;
    event.daddr = endpoints.daddr;
    event.sport = endpoints.sport;
    event.dport = endpoints.dport;

    slot.commit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::{ConnectionEvent, ring};

    const SOCKADDR_AT: u64 = 0x7ffd_1000;

    struct FakeTask {
        pid: u32,
        uid: u32,
        comm: &'static str,
    }

    impl Task for FakeTask {
        fn ktime_ns(&self) -> u64 {
            1_000
        }

        fn pid(&self) -> u32 {
            self.pid
        }

        fn uid(&self) -> u32 {
            self.uid
        }

        fn comm(&self) -> [u8; TASK_COMM_LEN] {
            let mut comm = [0u8; TASK_COMM_LEN];
            let len = self.comm.len().min(TASK_COMM_LEN);
            comm[..len].copy_from_slice(&self.comm.as_bytes()[..len]);
            comm
        }
    }

    /// One mapped `sockaddr_in` at `SOCKADDR_AT`; every other address faults.
    struct FakeMemory([u8; 16]);

    impl FakeMemory {
        fn sockaddr(family: u16, addr: Ipv4Addr, port: u16) -> Self {
            let mut raw = [0u8; 16];
            raw[0..2].copy_from_slice(&family.to_ne_bytes());
            raw[2..4].copy_from_slice(&port.to_be_bytes());
            raw[4..8].copy_from_slice(&addr.octets());
            FakeMemory(raw)
        }
    }

    impl UserMemory for FakeMemory {
        fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), AddressReadFailure> {
            if address != SOCKADDR_AT || buf.len() > self.0.len() {
                return Err(AddressReadFailure);
            }
            buf.copy_from_slice(&self.0[..buf.len()]);
            Ok(())
        }
    }

    fn curl() -> FakeTask {
        FakeTask {
            pid: 4242,
            uid: 1000,
            comm: "curl",
        }
    }

    fn connect() -> Capture {
        Capture::Connect {
            sockaddr: SOCKADDR_AT,
        }
    }

    fn run(memory: &FakeMemory, capture: Capture) -> (Result<(), Dropped>, Vec<ConnectionEvent>) {
        let (producer, mut consumer) = ring::channel(4096);
        let result = handle(&producer, &curl(), memory, capture);
        (result, consumer.drain())
    }

    #[test]
    fn test_connect_public_destination() {
        let memory = FakeMemory::sockaddr(AF_INET, Ipv4Addr::new(93, 184, 216, 34), 443);
        let (result, events) = run(&memory, connect());

        assert_eq!(result, Ok(()));
        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.syscall_id, 42);
        assert_eq!(Ipv4Addr::from(event.daddr), Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(event.dport, 443);
        assert_eq!(event.saddr, 0);
        assert_eq!(event.sport, 0);
        assert_eq!(&event.comm[..5], b"curl\0");
        assert_eq!(event.pid, 4242);
        assert_eq!(event.uid, 1000);
        assert_eq!(event.timestamp, 1_000);
        assert_eq!(event.family, AF_INET);
    }

    #[test]
    fn test_connect_private_destination() {
        let memory = FakeMemory::sockaddr(AF_INET, Ipv4Addr::new(192, 168, 1, 50), 22);
        let (result, events) = run(&memory, connect());

        assert_eq!(result, Ok(()));
        let event = events[0];
        assert_eq!(Ipv4Addr::from(event.saddr), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(Ipv4Addr::from(event.daddr), Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(event.dport, 22);
        assert_eq!(event.sport, 0);
    }

    #[test]
    fn test_connect_loopback() {
        let memory = FakeMemory::sockaddr(AF_INET, Ipv4Addr::LOCALHOST, 5432);
        let (_, events) = run(&memory, connect());

        assert_eq!(Ipv4Addr::from(events[0].saddr), Ipv4Addr::LOCALHOST);
        assert_eq!(Ipv4Addr::from(events[0].daddr), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_connect_invalid_pointer_emits_nothing() {
        let memory = FakeMemory::sockaddr(AF_INET, Ipv4Addr::new(1, 1, 1, 1), 53);
        let capture = Capture::Connect {
            sockaddr: 0xdead_0000,
        };
        let (result, events) = run(&memory, capture);

        assert_eq!(result, Err(Dropped::AddressRead));
        assert!(events.is_empty());
    }

    #[test]
    fn test_connect_null_pointer_emits_nothing() {
        let memory = FakeMemory::sockaddr(AF_INET, Ipv4Addr::new(1, 1, 1, 1), 53);
        let capture = Capture::Connect { sockaddr: 0 };
        let (result, events) = run(&memory, capture);

        assert_eq!(result, Err(Dropped::AddressRead));
        assert!(events.is_empty());
    }

    #[test]
    fn test_connect_other_families_suppressed() {
        // AF_UNIX, AF_INET6
        for family in [1u16, 10] {
            let memory = FakeMemory::sockaddr(family, Ipv4Addr::new(10, 0, 0, 5), 80);
            let (result, events) = run(&memory, connect());

            assert_eq!(result, Err(Dropped::UnsupportedFamily));
            assert!(events.is_empty());
        }
    }

    #[test]
    fn test_connect_reads_full_sockaddr() {
        // addrlen is never consulted, a whole sockaddr_in is always copied
        struct Recording(FakeMemory, core::cell::Cell<usize>);

        impl UserMemory for Recording {
            fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), AddressReadFailure> {
                self.1.set(buf.len());
                self.0.read(address, buf)
            }
        }

        let memory = Recording(
            FakeMemory::sockaddr(AF_INET, Ipv4Addr::new(93, 184, 216, 34), 443),
            core::cell::Cell::new(0),
        );
        let (producer, mut consumer) = ring::channel(4096);
        let result = handle(&producer, &curl(), &memory, connect());
        let events = consumer.drain();

        assert_eq!(memory.1.get(), 16);
        assert_eq!(result, Ok(()));
        assert_eq!(events.len(), 1);
        assert_eq!(Ipv4Addr::from(events[0].daddr), Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(events[0].dport, 443);
    }

    #[test]
    fn test_connect_argument_read() {
        assert_eq!(
            Capture::connect::<i64>(Ok(SOCKADDR_AT)),
            Ok(Capture::Connect {
                sockaddr: SOCKADDR_AT
            })
        );
        assert_eq!(
            Capture::connect(Err::<u64, i64>(-14)),
            Err(Dropped::AddressRead)
        );
    }

    #[test]
    fn test_connect_truncated_sockaddr_is_read_failure() {
        // the mapping ends 8 bytes past the pointer
        struct EightBytes;

        impl UserMemory for EightBytes {
            fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), AddressReadFailure> {
                if address != SOCKADDR_AT || buf.len() > 8 {
                    return Err(AddressReadFailure);
                }
                buf.fill(0);
                buf[..2].copy_from_slice(&AF_INET.to_ne_bytes());
                Ok(())
            }
        }

        let (producer, mut consumer) = ring::channel(4096);
        let result = handle(&producer, &curl(), &EightBytes, connect());

        assert_eq!(result, Err(Dropped::AddressRead));
        assert!(consumer.drain().is_empty());
    }

    #[test]
    fn test_identity_only_probes() {
        // memory is never consulted for these
        let memory = FakeMemory([0xff; 16]);
        for (capture, id) in [
            (Capture::Accept, 43),
            (Capture::Accept4, 288),
            (Capture::TcpConnect, 142),
        ] {
            let (result, events) = run(&memory, capture);

            assert_eq!(result, Ok(()));
            let event = events[0];
            assert_eq!(event.syscall_id, id);
            assert_eq!(event.family, AF_INET);
            assert_eq!(event.saddr, 0);
            assert_eq!(event.daddr, 0);
            assert_eq!(event.sport, 0);
            assert_eq!(event.dport, 0);
            assert_eq!(event.pid, 4242);
        }
    }

    #[test]
    fn test_full_channel_drops() {
        let (producer, mut consumer) = ring::channel(size_of::<ConnectionEvent>());
        let memory = FakeMemory([0; 16]);

        assert_eq!(handle(&producer, &curl(), &memory, Capture::Accept), Ok(()));
        assert_eq!(
            handle(&producer, &curl(), &memory, Capture::Accept4),
            Err(Dropped::BufferFull)
        );

        let events = consumer.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].syscall_id, Probe::Accept.syscall_id());
        assert_eq!(consumer.dropped(), 1);
    }

    #[test]
    fn test_syscall_ids() {
        for probe in Probe::ALL {
            assert_eq!(Probe::from_syscall_id(probe.syscall_id()), Some(probe));
        }
        assert_eq!(Probe::from_syscall_id(0), None);
        assert_eq!(Probe::from_syscall_id(41), None);
    }

    #[test]
    fn test_drop_indices_are_dense() {
        for (i, reason) in Dropped::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i as u32);
        }
        assert_eq!(Dropped::ALL.len() as u32, Dropped::COUNT);
    }
}
