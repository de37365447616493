//! Delta-encoded VLQ line table: maps bytecode offsets to source lines.
//!
//! Each entry is 2 VLQ values:
//! - `delta_pc` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)

/// Accumulates line entries while a function is compiled.
#[derive(Debug, Default)]
pub struct LineTableBuilder {
    entries: Vec<(u32, u32)>, // (pc, line)
}

impl LineTableBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record that code emitted from `pc` on belongs to `line`.
    /// Consecutive entries for the same line collapse; a second entry at the
    /// same pc replaces the first.
    pub fn add(&mut self, pc: u32, line: u32) {
        match self.entries.last_mut() {
            Some((_, last_line)) if *last_line == line => {}
            Some((last_pc, last_line)) if *last_pc == pc => *last_line = line,
            _ => self.entries.push((pc, line)),
        }
    }

    /// Forget entries for code at or after `pc` (the code was rewound).
    pub fn truncate(&mut self, pc: u32) {
        while self.entries.last().is_some_and(|&(p, _)| p >= pc) {
            self.entries.pop();
        }
    }

    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut prev_pc: u32 = 0;
        let mut prev_line: i64 = 0;

        for (pc, line) in &self.entries {
            encode_unsigned_vlq(pc - prev_pc, &mut buf);
            encode_unsigned_vlq(zigzag_encode(*line as i64 - prev_line), &mut buf);
            prev_pc = *pc;
            prev_line = *line as i64;
        }

        buf
    }
}

/// Source line of the last entry with `pc <= target_pc`.
pub fn line_for_pc(encoded: &[u8], target_pc: u32) -> Option<u32> {
    let mut pos = 0;
    let mut pc: u32 = 0;
    let mut line: i64 = 0;
    let mut best = None;

    while pos < encoded.len() {
        pc += decode_unsigned_vlq(encoded, &mut pos)?;
        line += zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);
        if pc > target_pc {
            break;
        }
        best = Some(line as u32);
    }

    best
}

// ── VLQ helpers ─────────────────────────────────────────────────────

fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table() {
        let encoded = LineTableBuilder::new().finish();
        assert!(encoded.is_empty());
        assert_eq!(line_for_pc(&encoded, 0), None);
    }

    #[test]
    fn lookup_picks_last_entry_at_or_before_pc() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 1);
        builder.add(3, 2);
        builder.add(10, 7);
        builder.add(21, 4);
        let encoded = builder.finish();

        assert_eq!(line_for_pc(&encoded, 0), Some(1));
        assert_eq!(line_for_pc(&encoded, 2), Some(1));
        assert_eq!(line_for_pc(&encoded, 3), Some(2));
        assert_eq!(line_for_pc(&encoded, 20), Some(7));
        assert_eq!(line_for_pc(&encoded, 400), Some(4));
    }

    #[test]
    fn same_line_entries_collapse() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 5);
        builder.add(3, 5);
        builder.add(6, 5);
        assert_eq!(builder.entries.len(), 1);
    }

    #[test]
    fn truncate_drops_rewound_entries() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 1);
        builder.add(4, 2);
        builder.add(8, 3);
        builder.truncate(4);
        builder.add(4, 6);
        let encoded = builder.finish();
        assert_eq!(line_for_pc(&encoded, 5), Some(6));
        assert_eq!(line_for_pc(&encoded, 0), Some(1));
    }

    #[test]
    fn same_pc_entry_is_replaced() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 1);
        builder.add(0, 9);
        let encoded = builder.finish();
        assert_eq!(line_for_pc(&encoded, 0), Some(9));
    }

    #[test]
    fn zigzag_handles_negative_deltas() {
        for v in [-1000, -1, 0, 1, 1000, i32::MAX as i64, i32::MIN as i64] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn long_functions_stay_compact() {
        let mut builder = LineTableBuilder::new();
        for i in 0..200u32 {
            builder.add(i * 7, i + 1);
        }
        assert!(builder.finish().len() < 500);
    }
}
