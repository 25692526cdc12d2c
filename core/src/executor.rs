//! Backend seam
//!
//! The pool never talks to a graphics API. [`DrawExecutor`] receives state
//! changes and finalized batches in order; implementations translate them
//! into real API calls (or, for [`CountingExecutor`], just tally them).

use crate::arena::FrameArena;
use crate::batch::{BatchView, DrawBatch};
use crate::command::DrawCommand;
use crate::state::StateSignature;

/// Receiver of optimized draw work
pub trait DrawExecutor {
    /// Make `state` current for the following batches
    fn bind_state(&mut self, state: &StateSignature) -> anyhow::Result<()>;

    /// Draw every command in `batch`; returns the number of draws issued
    ///
    /// With `use_indirect`, the batch should be issued as one multi-draw from
    /// [`BatchView::indirect_bytes`].
    fn execute_batch(&mut self, batch: &BatchView<'_>, use_indirect: bool) -> anyhow::Result<u32>;

    fn supports_indirect(&self) -> bool {
        true
    }

    /// Draw one command outside any batch
    ///
    /// Used when optimization failed for the frame. The default wraps the
    /// command in a throwaway batch backed by a scratch arena.
    fn execute_single(&mut self, cmd: &DrawCommand) -> anyhow::Result<u32> {
        let mut arena = FrameArena::scratch();
        let mut batch = DrawBatch::new(u32::MAX, cmd, 1);
        batch.add(cmd.clone())?;
        batch.finalize(&mut arena)?;
        let view = BatchView::new(&batch, &arena)?;
        self.execute_batch(&view, false)
    }
}

/// One call received by a [`CountingExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Bind { shader: u32, full_hash: u64 },
    Batch {
        batch: u32,
        commands: Vec<u64>,
        indirect: bool,
        indirect_bytes: usize,
    },
}

/// Executor that only counts (and optionally records) what it is given
#[derive(Debug, Default)]
pub struct CountingExecutor {
    pub binds: u64,
    pub batches: u64,
    pub indirect_batches: u64,
    pub draws: u64,
    pub record_calls: bool,
    pub calls: Vec<ExecutorCall>,
    pub indirect_supported: Option<bool>,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counting executor that also keeps every call in [`CountingExecutor::calls`]
    pub fn recording() -> Self {
        Self {
            record_calls: true,
            ..Self::default()
        }
    }

    pub fn without_indirect(mut self) -> Self {
        self.indirect_supported = Some(false);
        self
    }

    /// Per-interval reset for callers reusing one executor across frames
    pub fn reset(&mut self) {
        self.binds = 0;
        self.batches = 0;
        self.indirect_batches = 0;
        self.draws = 0;
        self.calls.clear();
    }
}

impl DrawExecutor for CountingExecutor {
    fn bind_state(&mut self, state: &StateSignature) -> anyhow::Result<()> {
        self.binds += 1;
        if self.record_calls {
            self.calls.push(ExecutorCall::Bind {
                shader: state.shader(),
                full_hash: state.full_hash(),
            });
        }
        Ok(())
    }

    fn execute_batch(&mut self, batch: &BatchView<'_>, use_indirect: bool) -> anyhow::Result<u32> {
        self.batches += 1;
        if use_indirect {
            self.indirect_batches += 1;
        }
        let draws = batch.len() as u32;
        self.draws += draws as u64;
        if self.record_calls {
            self.calls.push(ExecutorCall::Batch {
                batch: batch.id(),
                commands: batch.commands().iter().map(DrawCommand::id).collect(),
                indirect: use_indirect,
                indirect_bytes: batch.indirect_bytes().len(),
            });
        }
        Ok(draws)
    }

    fn supports_indirect(&self) -> bool {
        self.indirect_supported.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::IndexType;

    #[test]
    fn test_default_execute_single_goes_through_execute_batch() {
        let cmd = DrawCommand::builder()
            .vertices(3, 0, 6)
            .indexed(4, IndexType::U32, 12, 6)
            .build(42);
        let mut exec = CountingExecutor::recording();
        assert_eq!(exec.execute_single(&cmd).unwrap(), 1);
        assert_eq!(exec.batches, 1);
        assert_eq!(exec.indirect_batches, 0);
        assert_eq!(
            exec.calls,
            vec![ExecutorCall::Batch {
                batch: u32::MAX,
                commands: vec![42],
                indirect: false,
                indirect_bytes: 20,
            }]
        );
    }

    #[test]
    fn test_without_indirect() {
        let exec = CountingExecutor::new().without_indirect();
        assert!(!exec.supports_indirect());
        assert!(CountingExecutor::new().supports_indirect());
    }
}
