//! Instruction history ring for post-mortem inspection.
//!
//! When enabled, every fetch records the instruction address, IR, LAC,
//! and MQ; memory-reference instructions additionally record the
//! predicted effective address and operand. The ring holds between 64
//! and 65 536 entries and is disabled at capacity zero.

use crate::CpuError;
use std::fmt::Write as _;

/// Smallest non-zero history capacity.
pub const HIST_MIN: usize = 64;

/// Largest history capacity.
pub const HIST_MAX: usize = 65536;

/// One recorded instruction.
#[derive(Debug, Clone, Copy)]
pub struct HistEntry {
    /// Full 15-bit address the instruction was fetched from.
    pub pc: u32,
    /// Instruction register.
    pub ir: u16,
    /// Link and accumulator at fetch.
    pub lac: u32,
    /// Multiplier-quotient at fetch.
    pub mq: u16,
    /// Effective address and operand, for memory-reference instructions.
    pub mem: Option<(u32, u16)>,
}

/// Circular instruction history.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<Option<HistEntry>>,
    head: usize,
}

impl History {
    /// Creates a disabled history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when recording is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Configured capacity (0 when disabled).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Reconfigures the ring. Zero disables recording; any other length
    /// must lie in 64..=65536. The previous buffer is discarded.
    ///
    /// # Errors
    ///
    /// [`CpuError::InvalidHistoryLength`] for out-of-range lengths.
    pub fn resize(&mut self, capacity: usize) -> Result<(), CpuError> {
        if capacity != 0 && !(HIST_MIN..=HIST_MAX).contains(&capacity) {
            return Err(CpuError::InvalidHistoryLength(capacity));
        }
        self.entries = vec![None; capacity];
        self.head = 0;
        Ok(())
    }

    /// Clears recorded entries without changing the capacity.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.head = 0;
    }

    /// Records one instruction. The ring index advances monotonically
    /// modulo the capacity.
    pub(crate) fn record(&mut self, entry: HistEntry) {
        if self.entries.is_empty() {
            return;
        }
        self.head = (self.head + 1) % self.entries.len();
        self.entries[self.head] = Some(entry);
    }

    /// Most recent entries, oldest first, up to `count`.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<HistEntry> {
        let capacity = self.entries.len();
        if capacity == 0 {
            return Vec::new();
        }
        let count = count.min(capacity);
        let mut out = Vec::with_capacity(count);
        for k in 0..count {
            let index = (self.head + capacity - count + 1 + k) % capacity;
            if let Some(entry) = self.entries[index] {
                out.push(entry);
            }
        }
        out
    }

    /// Formats the most recent `count` entries (all when `None`) in the
    /// front-panel dump layout.
    ///
    /// # Errors
    ///
    /// [`CpuError::HistoryDisabled`] when no ring is configured;
    /// [`CpuError::InvalidHistoryLength`] when `count` is zero or
    /// exceeds the capacity.
    pub fn show(&self, count: Option<usize>) -> Result<String, CpuError> {
        if self.entries.is_empty() {
            return Err(CpuError::HistoryDisabled);
        }
        let capacity = self.entries.len();
        let count = count.unwrap_or(capacity);
        if count == 0 || count > capacity {
            return Err(CpuError::InvalidHistoryLength(count));
        }
        let mut out = String::from("PC     L AC    MQ    ea     IR\n\n");
        for entry in self.recent(count) {
            let link = (entry.lac >> 12) & 1;
            write!(
                out,
                "{:05o}  {} {:04o}  {:04o}  ",
                entry.pc & 0o77777,
                link,
                entry.lac & 0o7777,
                entry.mq
            )
            .expect("formatting to String cannot fail");
            if let Some((ea, _)) = entry.mem {
                write!(out, "{ea:05o}  ").expect("formatting to String cannot fail");
            } else {
                out.push_str("       ");
            }
            write!(out, "{:04o}", entry.ir).expect("formatting to String cannot fail");
            if let Some((_, opnd)) = entry.mem {
                if entry.ir < 0o4000 {
                    write!(out, "  [{opnd:04o}]").expect("formatting to String cannot fail");
                }
            }
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pc: u32, ir: u16) -> HistEntry {
        HistEntry {
            pc,
            ir,
            lac: 0,
            mq: 0,
            mem: None,
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let mut hist = History::new();
        assert!(!hist.enabled());
        hist.record(entry(0o200, 0o7000));
        assert!(hist.recent(16).is_empty());
        assert!(matches!(hist.show(None), Err(CpuError::HistoryDisabled)));
    }

    #[test]
    fn test_capacity_bounds() {
        let mut hist = History::new();
        assert!(hist.resize(32).is_err());
        assert!(hist.resize(HIST_MAX + 1).is_err());
        assert!(hist.resize(HIST_MIN).is_ok());
        assert!(hist.resize(0).is_ok());
        assert!(!hist.enabled());
    }

    #[test]
    fn test_ring_wraps_and_orders_oldest_first() {
        let mut hist = History::new();
        hist.resize(64).unwrap();
        for i in 0..70u32 {
            hist.record(entry(0o200 + i, 0o7000));
        }
        let recent = hist.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].pc, 0o200 + 67);
        assert_eq!(recent[2].pc, 0o200 + 69);
    }

    #[test]
    fn test_show_formats_memref_operand() {
        let mut hist = History::new();
        hist.resize(64).unwrap();
        hist.record(HistEntry {
            pc: 0o200,
            ir: 0o1201, // TAD
            lac: 0o10005,
            mq: 0o0006,
            mem: Some((0o201, 0o0003)),
        });
        let dump = hist.show(Some(1)).unwrap();
        assert!(dump.contains("00200  1 0005  0006  00201  1201  [0003]"));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut hist = History::new();
        hist.resize(64).unwrap();
        hist.record(entry(0o200, 0o7402));
        hist.clear();
        assert_eq!(hist.capacity(), 64);
        assert!(hist.recent(64).is_empty());
    }
}
