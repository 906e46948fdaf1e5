//! # Hook ABI (kernel-side producer ↔ userspace engine)
//!
//! Constants and the fixed-layout record shared between whatever observes
//! scheduler sleep/wake transitions and the aggregation engine in `lattop`.
//! `HookEvent` uses `#[repr(C)]` so a producer written against the same
//! header can emit records the engine reads back byte for byte.
//!
//! ## Key Types
//!
//! - [`HookEvent`] - One sleep-enter or wake-exit transition
//!
//! Records are encoded in native byte order: producer and consumer are
//! expected to run on the same machine.

#![no_std]

// ============================================================================
// Stack Capture Limits
// ============================================================================

/// Maximum number of return addresses captured per sleep.
pub const MAX_STACK_DEPTH: usize = 32;

/// Terminates a captured stack when fewer than `MAX_STACK_DEPTH` frames exist.
pub const STACK_END: u64 = u64::MAX;

/// Length of the process-name snapshot (matches the kernel's `TASK_COMM_LEN`).
pub const TASK_COMM_LEN: usize = 16;

// ============================================================================
// Hook Kinds
// ============================================================================

/// Thread is about to leave the run queue (goes to sleep).
///
/// Carries the captured stack in `entries`.
pub const HOOK_SLEEP_ENTER: u32 = 1;

/// Thread has just been placed back on a run queue.
///
/// Carries the process-name snapshot in `comm`; `entries` is ignored.
pub const HOOK_WAKE_EXIT: u32 = 2;

/// Encoded size of one [`HookEvent`].
pub const HOOK_EVENT_SIZE: usize = core::mem::size_of::<HookEvent>();

// ============================================================================
// Shared Data Structures
// ============================================================================

/// One scheduler transition as written by a hook producer.
///
/// **Size**: 296 bytes, no implicit padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookEvent {
    /// `HOOK_SLEEP_ENTER` or `HOOK_WAKE_EXIT`
    pub kind: u32,

    /// Thread ID of the task making the transition
    pub tid: u32,

    /// Monotonic cycle counter at the transition
    pub timestamp: u64,

    /// Process name, NUL-padded
    pub comm: [u8; TASK_COMM_LEN],

    /// Number of valid entries in `entries` (sentinel included)
    pub nr_entries: u32,

    /// Padding for 8-byte alignment of `entries`
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 4],

    /// Captured return addresses, innermost first
    pub entries: [u64; MAX_STACK_DEPTH],
}

impl Default for HookEvent {
    fn default() -> Self {
        Self {
            kind: 0,
            tid: 0,
            timestamp: 0,
            comm: [0; TASK_COMM_LEN],
            nr_entries: 0,
            _padding: [0; 4],
            entries: [0; MAX_STACK_DEPTH],
        }
    }
}

impl HookEvent {
    /// Process name bytes up to the first NUL.
    #[must_use]
    pub fn comm_bytes(&self) -> &[u8] {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        &self.comm[..end]
    }

    /// Valid stack entries, clamped to `MAX_STACK_DEPTH`.
    #[must_use]
    pub fn frames(&self) -> &[u64] {
        let len = (self.nr_entries as usize).min(MAX_STACK_DEPTH);
        &self.entries[..len]
    }

    /// Write the record into `out` using the `#[repr(C)]` field layout.
    pub fn encode(&self, out: &mut [u8; HOOK_EVENT_SIZE]) {
        out[0..4].copy_from_slice(&self.kind.to_ne_bytes());
        out[4..8].copy_from_slice(&self.tid.to_ne_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_ne_bytes());
        out[16..32].copy_from_slice(&self.comm);
        out[32..36].copy_from_slice(&self.nr_entries.to_ne_bytes());
        out[36..40].copy_from_slice(&self._padding);
        for (i, entry) in self.entries.iter().enumerate() {
            let at = 40 + i * 8;
            out[at..at + 8].copy_from_slice(&entry.to_ne_bytes());
        }
    }

    /// Read a record back from its `#[repr(C)]` byte layout.
    ///
    /// Returns `None` if `bytes` is shorter than `HOOK_EVENT_SIZE`.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HOOK_EVENT_SIZE {
            return None;
        }

        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            u32::from_ne_bytes(raw)
        };
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_ne_bytes(raw)
        };

        let mut event = Self {
            kind: u32_at(0),
            tid: u32_at(4),
            timestamp: u64_at(8),
            nr_entries: u32_at(32),
            ..Self::default()
        };
        event.comm.copy_from_slice(&bytes[16..32]);
        for (i, entry) in event.entries.iter_mut().enumerate() {
            *entry = u64_at(40 + i * 8);
        }
        Some(event)
    }
}
