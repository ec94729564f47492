#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

mod helpers;

use aya_ebpf::{
    macros::{kprobe, map, tracepoint},
    maps::{PerCpuArray, RingBuf},
    programs::{ProbeContext, TracePointContext},
};
use aya_log_ebpf::debug;

use trafficpump_common::{Capture, Dropped, RING_BUF_BYTES, handle};

use crate::helpers::{CurrentTask, EventRing, UserSpace};

#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUF_BYTES, 0);

#[map]
static DROPS: PerCpuArray<u64> = PerCpuArray::with_max_entries(Dropped::COUNT, 0);

// trace_event_raw_sys_enter: common header (8), syscall nr (8), then args[6]
const ARG_SOCKADDR: usize = 16 + 8;

#[tracepoint]
pub fn trace_connect(ctx: TracePointContext) -> u32 {
    match Capture::connect(unsafe { ctx.read_at::<u64>(ARG_SOCKADDR) }) {
        Ok(connect) => {
            if capture(connect) {
                debug!(&ctx, "connect captured");
            }
        }
        Err(reason) => count_drop(reason),
    }
    0
}

#[kprobe]
pub fn kprobe_tcp_v4_connect(ctx: ProbeContext) -> u32 {
    if capture(Capture::TcpConnect) {
        debug!(&ctx, "tcp_v4_connect captured");
    }
    0
}

#[tracepoint]
pub fn trace_accept(ctx: TracePointContext) -> u32 {
    if capture(Capture::Accept) {
        debug!(&ctx, "accept captured");
    }
    0
}

#[tracepoint]
pub fn trace_accept4(ctx: TracePointContext) -> u32 {
    if capture(Capture::Accept4) {
        debug!(&ctx, "accept4 captured");
    }
    0
}

/// Builds and submits one event, returning whether it was emitted. Failures
/// only bump the drop counter; the traced syscall is never affected.
#[inline(always)]
fn capture(capture: Capture) -> bool {
    match handle(&EventRing(&EVENTS), &CurrentTask, &UserSpace, capture) {
        Ok(()) => true,
        Err(reason) => {
            count_drop(reason);
            false
        }
    }
}

#[inline(always)]
fn count_drop(reason: Dropped) {
    if let Some(counter) = DROPS.get_ptr_mut(reason.index()) {
        // per-CPU slot, no concurrent writer
        unsafe { *counter += 1 };
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

// bpf_probe_read_user is GPL-only
#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";
