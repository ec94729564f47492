//! Kernel-helper backed implementations of the capture traits.

use core::mem::MaybeUninit;

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid,
        bpf_probe_read_user_buf, generated::bpf_ktime_get_ns,
    },
    maps::{RingBuf, ring_buf::RingBufEntry},
};
use trafficpump_common::{
    AddressReadFailure, ConnectionEvent, EventChannel, EventSlot, TASK_COMM_LEN, Task, UserMemory,
};

/// The task the probe fired in.
pub struct CurrentTask;

impl Task for CurrentTask {
    #[inline(always)]
    fn ktime_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }

    #[inline(always)]
    fn pid(&self) -> u32 {
        (bpf_get_current_pid_tgid() >> 32) as u32
    }

    #[inline(always)]
    fn uid(&self) -> u32 {
        (bpf_get_current_uid_gid() & 0xFFFF_FFFF) as u32
    }

    #[inline(always)]
    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0; TASK_COMM_LEN])
    }
}

/// Address space of the current task, read with `bpf_probe_read_user`.
pub struct UserSpace;

impl UserMemory for UserSpace {
    #[inline(always)]
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), AddressReadFailure> {
        unsafe { bpf_probe_read_user_buf(address as *const u8, buf) }
            .map_err(|_| AddressReadFailure)
    }
}

pub struct EventRing(pub &'static RingBuf);

impl EventChannel for EventRing {
    type Slot<'a> = RingSlot;

    #[inline(always)]
    fn reserve(&self) -> Option<RingSlot> {
        self.0.reserve::<ConnectionEvent>(0).map(RingSlot)
    }
}

pub struct RingSlot(RingBufEntry<ConnectionEvent>);

impl EventSlot for RingSlot {
    #[inline(always)]
    fn init(&mut self) -> &mut ConnectionEvent {
        let uninit: &mut MaybeUninit<ConnectionEvent> = &mut self.0;
        uninit.write(ConnectionEvent::new())
    }

    #[inline(always)]
    fn commit(self) {
        self.0.submit(0);
    }
}
