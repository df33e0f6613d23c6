use std::{
    sync::{
        atomic::{AtomicI64, Ordering::Relaxed},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Local wall clock in milliseconds since the unix epoch.
pub fn local_time_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// Offset between the sequencer's clock and ours, from one request/response:
/// `offset = p1 - (t1 + t2) / 2`.
pub fn estimate_offset(sent_millis: i64, master_millis: i64, received_millis: i64) -> i64 {
    master_millis - (sent_millis + received_millis) / 2
}

/// Offset shared between a reactor (which measures it) and the owner context
/// (which stamps actions with it).
#[derive(Debug, Clone, Default)]
pub struct MasterClock {
    offset: Arc<AtomicI64>,
}

impl MasterClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset_millis(&self) -> i64 {
        self.offset.load(Relaxed)
    }

    pub fn set_offset_millis(&self, offset: i64) {
        self.offset.store(offset, Relaxed);
    }

    /// Local time corrected to the sequencer's clock.
    pub fn now_millis(&self) -> i64 {
        local_time_millis() + self.offset_millis()
    }
}
