use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// What the background workers are doing. Cutting and saving exclude each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PuzzleStatus {
    Idle = 0,
    Cutting = 1,
    Saving = 2,
}

impl PuzzleStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PuzzleStatus::Cutting,
            2 => PuzzleStatus::Saving,
            _ => PuzzleStatus::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusFlag(AtomicU8);

static PROCESS_STATUS: OnceLock<Arc<StatusFlag>> = OnceLock::new();

impl StatusFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The flag shared by everything in this process.
    pub fn process() -> Arc<Self> {
        PROCESS_STATUS.get_or_init(StatusFlag::new).clone()
    }

    pub fn current(&self) -> PuzzleStatus {
        PuzzleStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves Idle to `status`; the returned guard moves it back when dropped.
    pub fn try_begin(self: &Arc<Self>, status: PuzzleStatus) -> Option<StatusGuard> {
        if status == PuzzleStatus::Idle {
            return None;
        }
        self.0
            .compare_exchange(
                PuzzleStatus::Idle as u8,
                status as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()?;
        Some(StatusGuard {
            flag: Arc::clone(self),
            status,
        })
    }
}

#[derive(Debug)]
pub struct StatusGuard {
    flag: Arc<StatusFlag>,
    status: PuzzleStatus,
}

impl StatusGuard {
    pub fn status(&self) -> PuzzleStatus {
        self.status
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.flag.0.store(PuzzleStatus::Idle as u8, Ordering::SeqCst);
    }
}
