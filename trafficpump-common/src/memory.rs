//! Reads from the traced process' address space.
//!
//! Syscall pointer arguments are controlled by the traced process and may
//! point anywhere, null included. They are only ever handed to a
//! [`UserMemory`] implementation, which wraps the platform's fault-tolerant
//! copy (`bpf_probe_read_user` in the probes).

use crate::byteorder::{ntohl, ntohs};

/// `sizeof(struct sockaddr_in)`, including `sin_zero`.
pub const SOCKADDR_IN_LEN: usize = 16;

/// The foreign copy faulted. The in-flight event must be abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressReadFailure;

pub trait UserMemory {
    /// Copies `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// On failure the contents of `buf` are unspecified.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), AddressReadFailure>;

    /// Fixed-size variant of [`UserMemory::read`]. Rejects null without
    /// attempting the copy.
    #[inline(always)]
    fn read_array<const N: usize>(&self, address: u64) -> Result<[u8; N], AddressReadFailure> {
        if address == 0 {
            return Err(AddressReadFailure);
        }
        let mut buf = [0u8; N];
        self.read(address, &mut buf)?;
        Ok(buf)
    }
}

/// `struct sockaddr_in` as passed to `connect(2)`.
///
/// `sin_port` and `sin_addr` are kept in wire order, exactly as they were copied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockAddrIn {
    pub sin_family: u16,
    pub sin_port: u16,
    pub sin_addr: u32,
}

impl SockAddrIn {
    #[inline(always)]
    pub const fn parse(raw: &[u8; SOCKADDR_IN_LEN]) -> Self {
        SockAddrIn {
            sin_family: u16::from_ne_bytes([raw[0], raw[1]]),
            sin_port: u16::from_ne_bytes([raw[2], raw[3]]),
            sin_addr: u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    #[inline(always)]
    pub fn read<M: UserMemory>(memory: &M, address: u64) -> Result<Self, AddressReadFailure> {
        memory.read_array::<SOCKADDR_IN_LEN>(address).map(|raw| Self::parse(&raw))
    }

    /// Destination port in host order.
    #[inline(always)]
    pub const fn port(&self) -> u16 {
        ntohs(self.sin_port)
    }

    /// Destination address in host order.
    #[inline(always)]
    pub const fn addr(&self) -> u32 {
        ntohl(self.sin_addr)
    }
}
