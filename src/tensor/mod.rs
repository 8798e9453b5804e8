//! Dense F32 tensor type used for step logits and raw weights.
//!
//! Provides the core [`Tensor`] type passed across the executor boundary.
//! Quantized weights live in packed form under `model::quant`; this type
//! only carries contiguous row-major f32 data.

use tracing::debug;

/// N-dimensional row-major f32 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<f32>,
}

/// Compute row-major strides from shape.
/// strides[i] = product of shape[i+1..]
fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; shape.len()];
    if shape.is_empty() {
        return strides;
    }
    strides[shape.len() - 1] = 1;
    for i in (0..shape.len() - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

impl Tensor {
    /// Create a tensor from shape and data.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        let n_elements: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            n_elements,
            "Data length {} does not match shape {:?} (expected {})",
            data.len(),
            shape,
            n_elements
        );
        let strides = compute_strides(&shape);
        debug!(?shape, "Created tensor");
        Self {
            shape,
            strides,
            data,
        }
    }

    /// Create a zero-filled tensor.
    pub fn zeros(shape: &[usize]) -> Self {
        let n_elements: usize = shape.iter().product();
        let strides = compute_strides(shape);
        Self {
            shape: shape.to_vec(),
            strides,
            data: vec![0.0f32; n_elements],
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the total number of elements in the tensor.
    pub fn n_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns a reference to the underlying data.
    pub fn as_f32(&self) -> &[f32] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data.
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Returns the number of rows (first dimension) for a 2D tensor.
    ///
    /// # Panics
    /// Panics if the tensor is not 2D.
    pub fn rows(&self) -> usize {
        assert_eq!(
            self.shape.len(),
            2,
            "rows() requires a 2D tensor, got shape {:?}",
            self.shape
        );
        self.shape[0]
    }

    /// Returns the number of columns (second dimension) for a 2D tensor.
    ///
    /// # Panics
    /// Panics if the tensor is not 2D.
    pub fn cols(&self) -> usize {
        assert_eq!(
            self.shape.len(),
            2,
            "cols() requires a 2D tensor, got shape {:?}",
            self.shape
        );
        self.shape[1]
    }

    /// Swap the final two axes, materializing a contiguous copy.
    ///
    /// Leading axes are treated as a batch dimension. This is the layout
    /// step applied to projection weights after loading.
    ///
    /// # Panics
    /// Panics if the tensor has fewer than 2 dimensions.
    pub fn transpose_last_two(&self) -> Tensor {
        assert!(
            self.shape.len() >= 2,
            "transpose_last_two() requires at least 2 dimensions, got shape {:?}",
            self.shape
        );
        let ndim = self.shape.len();
        let rows = self.shape[ndim - 2];
        let cols = self.shape[ndim - 1];
        let batch: usize = self.shape[..ndim - 2].iter().product();

        let mut out = vec![0.0f32; self.data.len()];
        for b in 0..batch {
            let base = b * rows * cols;
            for r in 0..rows {
                for c in 0..cols {
                    out[base + c * rows + r] = self.data[base + r * cols + c];
                }
            }
        }

        let mut shape = self.shape.clone();
        shape.swap(ndim - 2, ndim - 1);
        let strides = compute_strides(&shape);
        Tensor {
            shape,
            strides,
            data: out,
        }
    }
}
