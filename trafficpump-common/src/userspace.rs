//! Consumer-side helpers for [`ConnectionEvent`] (requires `user`).

use std::net::Ipv4Addr;

use crate::{ConnectionEvent, Probe};

impl ConnectionEvent {
    /// Decodes a record as read from the ring buffer.
    ///
    /// Returns `None` when `bytes` is shorter than a record. Trailing bytes
    /// are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<Self>() {
            return None;
        }
        // SAFETY: length checked above; every bit pattern is a valid
        // ConnectionEvent and the read tolerates any alignment.
        Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<Self>()) })
    }

    /// Process name up to the first NUL.
    pub fn process_name(&self) -> &str {
        let len = self
            .comm
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.comm.len());
        std::str::from_utf8(&self.comm[..len]).unwrap_or("<invalid>")
    }

    pub fn probe(&self) -> Option<Probe> {
        Probe::from_syscall_id(self.syscall_id)
    }

    /// `"connect"`, `"accept"`, ... or `"unknown"` for an unrecognised id.
    pub fn syscall_name(&self) -> &'static str {
        self.probe().map_or("unknown", Probe::name)
    }

    /// Inferred source; `0.0.0.0` when unknown.
    pub fn source_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.saddr)
    }

    /// Destination; `0.0.0.0` when unknown.
    pub fn dest_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.daddr)
    }
}
