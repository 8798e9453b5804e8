//! Attention mask construction.
//!
//! Two mask families feed the executor. Dense-bias models take additive
//! square matrices where blocked query/key pairs carry a large negative
//! value, looked up per layer kind from a [`BiasTable`]. Row-visibility
//! models take a boolean causal matrix on prefill and a one-row
//! visibility mask per decode step.

use std::sync::Arc;

use half::bf16;

/// Additive bias for blocked attention pairs. Large negative but still
/// finite in bf16, so casting a bias matrix down keeps masked scores out
/// of -inf and the softmax free of NaN.
pub const ATTN_BIAS_SENTINEL: f32 = -3.3895e38;

/// Mapping key for the unwindowed causal bias.
pub const FULL_ATTENTION: &str = "full_attention";
/// Mapping key for the sliding-window causal bias.
pub const SLIDING_ATTENTION: &str = "sliding_attention";

/// Square additive bias matrix over key positions.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionBias {
    size: usize,
    data: Vec<f32>,
}

impl AttentionBias {
    /// Causal bias: row `i` sees columns `0..=i`, every later column is
    /// blocked with [`ATTN_BIAS_SENTINEL`].
    pub fn causal(size: usize) -> Self {
        let mut data = vec![0.0f32; size * size];
        for i in 0..size {
            for j in (i + 1)..size {
                data[i * size + j] = ATTN_BIAS_SENTINEL;
            }
        }
        Self { size, data }
    }

    /// Narrow this bias to a trailing window of `window` key positions.
    ///
    /// Row `i` additionally blocks columns before `max(0, i + 1 - window)`.
    /// A window of at least `size` returns the bias unchanged, and
    /// already-blocked entries stay blocked, so reapplication changes
    /// nothing.
    pub fn with_sliding_window(&self, window: usize) -> Self {
        let mut out = self.clone();
        if window >= self.size {
            return out;
        }
        for i in 0..self.size {
            let start = (i + 1).saturating_sub(window);
            for j in 0..start {
                out.data[i * self.size + j] = ATTN_BIAS_SENTINEL;
            }
        }
        out
    }

    /// Number of key positions per side.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bias at query row `i`, key column `j`.
    ///
    /// # Panics
    /// Panics if either index is out of range.
    pub fn at(&self, i: usize, j: usize) -> f32 {
        assert!(
            i < self.size && j < self.size,
            "index ({}, {}) out of range for bias of size {}",
            i,
            j,
            self.size
        );
        self.data[i * self.size + j]
    }

    /// Row-major matrix data.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Materialize in bf16, the dtype the device consumes.
    pub fn to_bf16(&self) -> Vec<bf16> {
        self.data.iter().map(|&v| bf16::from_f32(v)).collect()
    }
}

/// Per-step bias mapping keyed by attention kind.
///
/// Layers declare which kind they use and the executor looks the matrix
/// up by key. Matrices are shared behind `Arc`, so cloning the table for
/// each step input is cheap.
#[derive(Debug, Clone)]
pub struct BiasTable {
    full: Arc<AttentionBias>,
    sliding: Option<Arc<AttentionBias>>,
}

impl BiasTable {
    /// Build the mapping for `size` key positions. A sliding entry is
    /// included only when `window` is given.
    pub fn build(size: usize, window: Option<usize>) -> Self {
        let full = Arc::new(AttentionBias::causal(size));
        let sliding = window.map(|w| Arc::new(full.with_sliding_window(w)));
        Self { full, sliding }
    }

    pub fn size(&self) -> usize {
        self.full.size()
    }

    pub fn has_sliding(&self) -> bool {
        self.sliding.is_some()
    }

    /// Look up a bias by its mapping key ([`FULL_ATTENTION`] or
    /// [`SLIDING_ATTENTION`]).
    pub fn get(&self, kind: &str) -> Option<&AttentionBias> {
        match kind {
            FULL_ATTENTION => Some(&self.full),
            SLIDING_ATTENTION => self.sliding.as_deref(),
            _ => None,
        }
    }

    /// The unwindowed causal entry.
    pub fn full(&self) -> &AttentionBias {
        &self.full
    }
}

/// Boolean visibility matrix: `true` marks a blocked query/key pair.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityMask {
    size: usize,
    data: Vec<bool>,
}

impl VisibilityMask {
    /// Causal visibility: row `i` blocks every column after `i`.
    pub fn causal(size: usize) -> Self {
        let mut data = vec![false; size * size];
        for i in 0..size {
            for j in (i + 1)..size {
                data[i * size + j] = true;
            }
        }
        Self { size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether query row `i` is blocked from key column `j`.
    ///
    /// # Panics
    /// Panics if either index is out of range.
    pub fn blocked(&self, i: usize, j: usize) -> bool {
        assert!(
            i < self.size && j < self.size,
            "index ({}, {}) out of range for visibility mask of size {}",
            i,
            j,
            self.size
        );
        self.data[i * self.size + j]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }
}

/// One-row decode mask: the first `visible` positions are marked 1, the
/// rest 0.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMask {
    data: Vec<f32>,
}

impl RowMask {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Number of positions marked visible.
    pub fn visible_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == 1.0).count()
    }
}

/// Build the visibility row for one decode step. `visible` counts the
/// stored key positions plus the token being decoded.
///
/// # Panics
/// Panics if `visible` exceeds `size`.
pub fn decode_row_mask(size: usize, visible: usize) -> RowMask {
    assert!(
        visible <= size,
        "visible positions {} exceed mask size {}",
        visible,
        size
    );
    let mut data = vec![0.0f32; size];
    for slot in data.iter_mut().take(visible) {
        *slot = 1.0;
    }
    RowMask { data }
}
