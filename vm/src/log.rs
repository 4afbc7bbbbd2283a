use std::fmt::Write;

use crate::stack::Stack;

/// Text log of VM execution, collected per run.
///
/// Levels are cumulative:
/// - `0`: instruction lines, but only the tail of the log is kept;
/// - `1`: all instruction lines;
/// - `2`: plus a stack dump before each instruction;
/// - `3`: plus remaining gas before each instruction.
#[derive(Debug, Clone)]
pub struct VmLog {
    level: u8,
    buf: String,
    truncated: bool,
}

impl VmLog {
    /// How many trailing characters level 0 keeps.
    pub const TAIL_LEN: usize = 256;

    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(3),
            buf: String::new(),
            truncated: false,
        }
    }

    #[inline]
    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn write_line(&mut self, args: std::fmt::Arguments<'_>) {
        _ = writeln!(&mut self.buf, "{args}");
        if self.level == 0 && self.buf.len() > Self::TAIL_LEN * 2 {
            self.shrink_to_tail();
        }
    }

    pub fn write_stack(&mut self, stack: &Stack) {
        if self.level >= 2 {
            _ = writeln!(&mut self.buf, "stack: {}", stack.display_dump());
        }
    }

    pub fn write_gas_remaining(&mut self, remaining: u64) {
        if self.level >= 3 {
            _ = writeln!(&mut self.buf, "gas remaining: {remaining}");
        }
    }

    fn shrink_to_tail(&mut self) {
        let mut start = self.buf.len() - Self::TAIL_LEN;
        while !self.buf.is_char_boundary(start) {
            start += 1;
        }
        self.buf.drain(..start);
        self.truncated = true;
    }

    pub fn finish(mut self) -> String {
        if self.level == 0 && self.buf.len() > Self::TAIL_LEN {
            self.shrink_to_tail();
        }
        if self.truncated {
            format!("...{}", self.buf)
        } else {
            self.buf
        }
    }
}

impl Default for VmLog {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_keeps_only_the_tail() {
        let mut log = VmLog::new(0);
        for i in 0..100 {
            log.write_line(format_args!("execute PUSHINT {i}"));
        }
        let text = log.finish();
        assert!(text.len() <= VmLog::TAIL_LEN + 3);
        assert!(text.starts_with("..."));
        assert!(text.contains("execute PUSHINT 99"));
    }

    #[test]
    fn level_one_keeps_everything() {
        let mut log = VmLog::new(1);
        for i in 0..100 {
            log.write_line(format_args!("execute PUSHINT {i}"));
        }
        let text = log.finish();
        assert!(text.contains("execute PUSHINT 0\n"));
        assert!(text.contains("execute PUSHINT 99\n"));
    }
}
