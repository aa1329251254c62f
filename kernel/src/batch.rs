// Batch/Commit Controller
//
// Groups consecutive operations into fixed-size batches and tells the
// driver when a batch boundary has been reached. The driver performs
// the commit (or, for read benchmarks, the measurement reset).

/// Controller state after recording an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Batch still has room.
    Accumulating,

    /// Batch is full and must be sealed before the next operation.
    Committing,
}

#[derive(Debug)]
pub struct BatchController {
    batch_size: usize,
    max_batches: Option<usize>,
    in_batch: usize,
    sealed: usize,
}

impl BatchController {
    /// `batch_size` must be non-zero.
    pub fn new(batch_size: usize, max_batches: Option<usize>) -> Self {
        debug_assert!(batch_size > 0, "batch size must be positive");
        Self {
            batch_size,
            max_batches,
            in_batch: 0,
            sealed: 0,
        }
    }

    /// Count one processed operation.
    pub fn record(&mut self) -> BatchState {
        self.in_batch += 1;
        if self.in_batch >= self.batch_size {
            BatchState::Committing
        } else {
            BatchState::Accumulating
        }
    }

    /// Mark the current batch as sealed and reset the counter.
    ///
    /// Returns `false` once the batch cap has been reached; the run must
    /// stop without reading further operations.
    pub fn sealed(&mut self) -> bool {
        self.in_batch = 0;
        self.sealed += 1;
        match self.max_batches {
            Some(max) => self.sealed < max,
            None => true,
        }
    }

    /// Operations recorded since the last seal.
    pub fn pending(&self) -> usize {
        self.in_batch
    }

    pub fn sealed_batches(&self) -> usize {
        self.sealed
    }

    /// Size of the trailing partial batch, if any.
    pub fn take_partial(&self) -> Option<usize> {
        (self.in_batch > 0).then_some(self.in_batch)
    }
}
