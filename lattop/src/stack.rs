//! Call-stack capture collaborator.
//!
//! Walking a thread's frames is platform work that lives outside the
//! engine. Whatever does it implements [`StackCapture`]; the engine hands
//! it a zeroed buffer and terminates the result itself.

use lattop_common::STACK_END;

use crate::domain::Tid;
use crate::model::StackTrace;

/// Fills a bounded trace with the calling thread's return addresses.
///
/// Implementations must not block and must stop once `trace` is full.
pub trait StackCapture {
    fn capture(&self, tid: Tid, trace: &mut StackTrace);
}

/// Replays addresses captured elsewhere (a trace file, a hook record).
#[derive(Debug, Clone, Copy)]
pub struct RecordedStack<'a>(pub &'a [u64]);

impl StackCapture for RecordedStack<'_> {
    fn capture(&self, _tid: Tid, trace: &mut StackTrace) {
        for &addr in self.0 {
            if addr == STACK_END || !trace.push(addr) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattop_common::MAX_STACK_DEPTH;

    #[test]
    fn test_recorded_stack_copies_frames() {
        let mut trace = StackTrace::new();
        RecordedStack(&[0x1, 0x2, 0x3]).capture(Tid(1), &mut trace);
        assert_eq!(trace.entries(), &[0x1, 0x2, 0x3]);
    }

    #[test]
    fn test_recorded_stack_stops_when_full() {
        let frames = vec![0xabc; MAX_STACK_DEPTH + 8];
        let mut trace = StackTrace::new();
        RecordedStack(&frames).capture(Tid(1), &mut trace);
        assert!(trace.is_full());
    }
}
