//! A small process exit-code type plus an accumulator for combining the
//! exit codes of many concurrently-running jobs into one, the way
//! `maelstrom-run`'s `JobTracker` does for its `ExitCodeAccumulator`.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitCode(u8);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);

    pub fn code(self) -> u8 {
        self.0
    }
}

impl From<u8> for ExitCode {
    fn from(code: u8) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.0)
    }
}

/// Accumulates the worst (non-zero wins) exit code seen across many jobs.
#[derive(Default)]
pub struct ExitCodeAccumulator(AtomicU8);

impl ExitCodeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, code: ExitCode) {
        if code != ExitCode::SUCCESS {
            // Any single non-zero code is enough; we don't try to rank them.
            self.0.store(code.0.max(1), Ordering::Release);
        }
    }

    pub fn get(&self) -> ExitCode {
        ExitCode(self.0.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_latches_on_first_failure() {
        let accum = ExitCodeAccumulator::new();
        assert_eq!(accum.get(), ExitCode::SUCCESS);
        accum.add(ExitCode::SUCCESS);
        assert_eq!(accum.get(), ExitCode::SUCCESS);
        accum.add(ExitCode::from(1));
        accum.add(ExitCode::SUCCESS);
        assert_eq!(accum.get(), ExitCode::FAILURE);
    }
}
