//! The executor boundary: step inputs and outputs, the opaque KV cache
//! handle, and the [`StepModel`] trait device executors implement.

pub mod host;
pub mod profile;
pub mod quant;

use std::any::Any;
use std::fmt;

use crate::error::RunnerError;
use crate::mask::{BiasTable, RowMask, VisibilityMask};
use crate::tensor::Tensor;

/// Opaque key/value cache handle threaded through the decode loop.
///
/// The orchestrator never looks inside. Executors downcast to their own
/// cache type, and every step hands back a replacement handle in
/// [`StepOutput`]; the handle that went in is consumed by the forward
/// call and cannot be used again.
pub struct KvCacheHandle {
    inner: Box<dyn Any + Send + Sync>,
}

impl KvCacheHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Box::new(value),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.downcast_mut()
    }

    /// Take the cache back by value. Returns the handle unchanged if the
    /// stored type is not `T`.
    pub fn into_inner<T: Any>(self) -> Result<T, Self> {
        match self.inner.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl fmt::Debug for KvCacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KvCacheHandle")
    }
}

/// Mask selection for one step.
#[derive(Debug, Clone)]
pub enum StepMasks {
    /// Bias matrices keyed by attention kind (dense-bias layout, every
    /// step).
    Bias(BiasTable),
    /// Boolean causal matrix (row-visibility layout, prefill).
    Visibility(VisibilityMask),
    /// Per-step visibility row (row-visibility layout, decode).
    Row(RowMask),
}

/// Argument bundle for one forward call, built fresh every iteration.
#[derive(Debug)]
pub struct StepInput {
    /// Token rows for this step: full prompt rows on prefill, one column
    /// on decode.
    pub tokens: Vec<Vec<u32>>,
    /// Position indices matching `tokens` row for row.
    pub positions: Vec<Vec<u32>>,
    /// Mask selection for this step.
    pub masks: StepMasks,
    /// True only for the first step of a generation call.
    pub is_prefill: bool,
    cache: Option<KvCacheHandle>,
}

impl StepInput {
    pub(crate) fn new(
        tokens: Vec<Vec<u32>>,
        positions: Vec<Vec<u32>>,
        masks: StepMasks,
        is_prefill: bool,
        cache: Option<KvCacheHandle>,
    ) -> Self {
        Self {
            tokens,
            positions,
            masks,
            is_prefill,
            cache,
        }
    }

    /// Take ownership of the incoming cache handle. `None` on prefill.
    pub fn take_cache(&mut self) -> Option<KvCacheHandle> {
        self.cache.take()
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn batch_size(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens per row in this step.
    pub fn step_width(&self) -> usize {
        self.tokens.first().map(Vec::len).unwrap_or(0)
    }
}

/// Result of one forward call.
#[derive(Debug)]
pub struct StepOutput {
    /// `[batch, step width, vocab]` logits.
    pub logits: Tensor,
    /// Replacement cache handle for the next step.
    pub cache: KvCacheHandle,
}

/// A forward executor hosting the model.
///
/// Calls are synchronous and never retried: a forward failure is fatal
/// for the generation call and propagates out of the loop.
pub trait StepModel: Send {
    /// Run one forward pass. Implementations take the cache out of
    /// `input` with [`StepInput::take_cache`] and return a fresh handle
    /// in the output.
    fn forward(&mut self, input: &mut StepInput) -> Result<StepOutput, RunnerError>;

    /// Vocabulary size of the hosted model.
    fn vocab_size(&self) -> usize;
}

impl fmt::Debug for dyn StepModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepModel")
    }
}
