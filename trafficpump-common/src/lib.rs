//! Types shared by the trafficpump eBPF probes and the userspace consumer.
//!
//! The probes and the consumer agree on exactly one thing: the byte layout of
//! [`ConnectionEvent`]. Everything else in this crate is logic the probes run
//! in the kernel, written against small traits so it can also be exercised
//! on the host.
//!
//! - `no_std` by default, for `trafficpump-ebpf`.
//! - The `user` feature adds `std` decoding helpers, plus the host-side
//!   [`ring`] channel used to drive the handlers outside the kernel.

#![cfg_attr(not(any(test, feature = "user")), no_std)]

pub mod byteorder;
pub mod channel;
pub mod classify;
pub mod memory;
pub mod probe;

#[cfg(any(test, feature = "user"))]
pub mod ring;

#[cfg(feature = "user")]
pub mod userspace;

pub use channel::{EventChannel, EventSlot};
pub use classify::classify;
pub use memory::{AddressReadFailure, SockAddrIn, UserMemory};
pub use probe::{Capture, Dropped, Endpoints, Probe, Task, emit, handle};

/// Length of the kernel's `task->comm`.
pub const TASK_COMM_LEN: usize = 16;

/// `AF_INET`. The only family an event is ever built for.
pub const AF_INET: u16 = 2;

/// Size of the `EVENTS` ring buffer.
pub const RING_BUF_BYTES: u32 = 256 * 1024;

/// Name of the ring buffer map carrying [`ConnectionEvent`]s.
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the per-CPU drop counter map, indexed by [`Dropped`].
pub const DROPS_MAP: &str = "DROPS";

/// One captured connect/accept.
///
/// Addresses and ports are stored in host byte order; `0` means unknown.
/// The padding fields are explicit so that no uninitialised byte ever
/// reaches the ring buffer.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(any(test, feature = "user"), derive(Debug))]
pub struct ConnectionEvent {
    /// `bpf_ktime_get_ns()` at capture, only meaningful as a delta.
    pub timestamp: u64,
    /// Thread group id of the caller.
    pub pid: u32,
    pub uid: u32,
    /// See [`Probe`].
    pub syscall_id: u16,
    pub comm: [u8; TASK_COMM_LEN],
    pub _pad: [u8; 2],
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub family: u16,
    pub _pad2: [u8; 6],
}

impl Default for ConnectionEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionEvent {
    /// An empty IPv4 record with every network field unknown.
    pub const fn new() -> Self {
        ConnectionEvent {
            timestamp: 0,
            pid: 0,
            uid: 0,
            syscall_id: 0,
            comm: [0; TASK_COMM_LEN],
            _pad: [0; 2],
            saddr: 0,
            daddr: 0,
            sport: 0,
            dport: 0,
            family: AF_INET,
            _pad2: [0; 6],
        }
    }
}
