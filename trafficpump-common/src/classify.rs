//! Source-address guess for outbound connects.
//!
//! `sys_enter_connect` only carries the destination; the kernel picks the
//! source later during routing. The guess below assumes the caller sits on
//! the same private network as its peer and reports that network's `.1`
//! address. It is metadata, not ground truth.

/// 127.0.0.1
pub const LOOPBACK: u32 = 0x7f00_0001;

const NET_10: u32 = 0x0a00_0000;
const MASK_10: u32 = 0xff00_0000;
const GW_10: u32 = 0x0a00_0001;

const NET_192_168: u32 = 0xc0a8_0000;
const MASK_192_168: u32 = 0xffff_0000;
const GW_192_168: u32 = 0xc0a8_0001;

const NET_172_16: u32 = 0xac10_0000;
const MASK_172_16: u32 = 0xfff0_0000;
const GW_172_16: u32 = 0xac10_0001;

/// Infers a probable source address from `daddr` (host byte order).
/// Returns `0` when nothing can be inferred.
#[inline(always)]
pub const fn classify(daddr: u32) -> u32 {
    if daddr == LOOPBACK {
        LOOPBACK
    } else if daddr & MASK_10 == NET_10 {
        GW_10
    } else if daddr & MASK_192_168 == NET_192_168 {
        GW_192_168
    } else if daddr & MASK_172_16 == NET_172_16 {
        GW_172_16
    } else {
        0
    }
}
