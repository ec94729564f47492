//! Network/host byte order conversions.
//!
//! Wire values (`sin_port`, `sin_addr`) are big-endian. These are thin `const`
//! wrappers so the probes read the same as the protocol headers they decode.

#[inline(always)]
pub const fn ntohs(net: u16) -> u16 {
    u16::from_be(net)
}

#[inline(always)]
pub const fn ntohl(net: u32) -> u32 {
    u32::from_be(net)
}

#[inline(always)]
pub const fn htons(host: u16) -> u16 {
    host.to_be()
}

#[inline(always)]
pub const fn htonl(host: u32) -> u32 {
    host.to_be()
}
