//! Post-load weight transforms.
//!
//! Each quantization method owns the layout work applied to a raw weight
//! after loading. The unquantized path transposes the final two axes into
//! the matmul layout; the quantized paths pack values together with their
//! scales. Executors pick a method at construction and call
//! [`QuantMethod::post_load_transform`] once per weight.

use half::f16;

use crate::error::RunnerError;
use crate::tensor::Tensor;

/// Elements per packing group for 4-bit quantization.
pub const Q4_GROUP: usize = 32;

/// Weight handling selected at executor construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantMethod {
    /// Keep f32 weights, transposed into the matmul layout.
    Unquantized,
    /// Symmetric 8-bit per output channel, scale = amax / 127.
    Int8PerChannel,
    /// Symmetric 4-bit in groups of [`Q4_GROUP`] along the input axis,
    /// scales stored as f16.
    Int4Grouped,
}

impl QuantMethod {
    /// Parse the `model_config.quantize` settings value. Absent means
    /// unquantized.
    pub fn from_name(name: Option<&str>) -> Result<Self, RunnerError> {
        match name {
            None => Ok(QuantMethod::Unquantized),
            Some("int8") => Ok(QuantMethod::Int8PerChannel),
            Some("int4") => Ok(QuantMethod::Int4Grouped),
            Some(other) => Err(RunnerError::InvalidSettings(format!(
                "unknown quantize method '{}'. Options: int8, int4",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuantMethod::Unquantized => "unquantized",
            QuantMethod::Int8PerChannel => "int8",
            QuantMethod::Int4Grouped => "int4",
        }
    }

    /// Transform a raw `[out, in]` projection weight into its prepared
    /// form.
    pub fn post_load_transform(&self, raw: Tensor) -> Result<PreparedWeight, RunnerError> {
        if raw.shape().len() != 2 {
            return Err(RunnerError::Precondition(format!(
                "post-load transform expects a 2-D weight, got shape {:?}",
                raw.shape()
            )));
        }
        match self {
            QuantMethod::Unquantized => Ok(PreparedWeight::Dense(raw.transpose_last_two())),
            QuantMethod::Int8PerChannel => Ok(quantize_int8(&raw)),
            QuantMethod::Int4Grouped => quantize_int4(&raw),
        }
    }
}

fn quantize_int8(raw: &Tensor) -> PreparedWeight {
    let out_dim = raw.rows();
    let in_dim = raw.cols();
    let src = raw.as_f32();

    let mut data = Vec::with_capacity(out_dim * in_dim);
    let mut scales = Vec::with_capacity(out_dim);
    for c in 0..out_dim {
        let row = &src[c * in_dim..(c + 1) * in_dim];
        let amax = row.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        let scale = if amax == 0.0 { 0.0 } else { amax / 127.0 };
        let inv = if scale == 0.0 { 0.0 } else { 1.0 / scale };
        scales.push(scale);
        for &v in row {
            data.push((v * inv).round().clamp(-127.0, 127.0) as i8);
        }
    }
    PreparedWeight::Int8 {
        data,
        scales,
        out_dim,
        in_dim,
    }
}

fn quantize_int4(raw: &Tensor) -> Result<PreparedWeight, RunnerError> {
    let out_dim = raw.rows();
    let in_dim = raw.cols();
    if in_dim % Q4_GROUP != 0 {
        return Err(RunnerError::Precondition(format!(
            "weight input dimension ({}) is not divisible by the 4-bit group size ({})",
            in_dim, Q4_GROUP
        )));
    }
    let src = raw.as_f32();
    let groups = in_dim / Q4_GROUP;

    // Two values per byte, even index in the low nibble. Stored values are
    // nibble - 8, so the neutral byte is 0x88.
    let mut data = Vec::with_capacity(out_dim * in_dim / 2);
    let mut scales = Vec::with_capacity(out_dim * groups);
    for c in 0..out_dim {
        let row = &src[c * in_dim..(c + 1) * in_dim];
        for g in 0..groups {
            let group = &row[g * Q4_GROUP..(g + 1) * Q4_GROUP];
            let amax = group.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
            let scale = if amax == 0.0 { 0.0 } else { amax / 7.0 };
            scales.push(f16::from_f32(scale));
            let inv = if scale == 0.0 { 0.0 } else { 1.0 / scale };
            for pair in group.chunks(2) {
                let low = quantize_nibble(pair[0], inv);
                let high = quantize_nibble(pair[1], inv);
                data.push(low | (high << 4));
            }
        }
    }
    Ok(PreparedWeight::Int4 {
        data,
        scales,
        out_dim,
        in_dim,
    })
}

fn quantize_nibble(v: f32, inv_scale: f32) -> u8 {
    let q = (v * inv_scale).round().clamp(-8.0, 7.0) as i32;
    (q + 8) as u8
}

/// A weight after its post-load transform, ready for host-side products.
#[derive(Debug, Clone)]
pub enum PreparedWeight {
    /// Transposed f32 weight, `[in, out]`.
    Dense(Tensor),
    /// Per-output-channel 8-bit rows with one f32 scale per channel.
    Int8 {
        data: Vec<i8>,
        scales: Vec<f32>,
        out_dim: usize,
        in_dim: usize,
    },
    /// 4-bit packed nibbles with one f16 scale per group of [`Q4_GROUP`].
    Int4 {
        data: Vec<u8>,
        scales: Vec<f16>,
        out_dim: usize,
        in_dim: usize,
    },
}

impl PreparedWeight {
    pub fn in_dim(&self) -> usize {
        match self {
            PreparedWeight::Dense(t) => t.rows(),
            PreparedWeight::Int8 { in_dim, .. } => *in_dim,
            PreparedWeight::Int4 { in_dim, .. } => *in_dim,
        }
    }

    pub fn out_dim(&self) -> usize {
        match self {
            PreparedWeight::Dense(t) => t.cols(),
            PreparedWeight::Int8 { out_dim, .. } => *out_dim,
            PreparedWeight::Int4 { out_dim, .. } => *out_dim,
        }
    }

    /// Product against the pre-transpose orientation: `x` has length
    /// `in_dim`, the result has length `out_dim`. Quantized forms
    /// dequantize on the fly.
    ///
    /// # Panics
    /// Panics if `x.len()` does not match `in_dim`.
    pub fn matvec(&self, x: &[f32]) -> Vec<f32> {
        assert_eq!(
            x.len(),
            self.in_dim(),
            "matvec input length {} does not match weight input dimension {}",
            x.len(),
            self.in_dim()
        );
        match self {
            PreparedWeight::Dense(t) => {
                let in_dim = t.rows();
                let out_dim = t.cols();
                let w = t.as_f32();
                let mut y = vec![0.0f32; out_dim];
                for (k, &xv) in x.iter().enumerate().take(in_dim) {
                    let row = &w[k * out_dim..(k + 1) * out_dim];
                    for (acc, &wv) in y.iter_mut().zip(row) {
                        *acc += xv * wv;
                    }
                }
                y
            }
            PreparedWeight::Int8 {
                data,
                scales,
                out_dim,
                in_dim,
            } => {
                let mut y = vec![0.0f32; *out_dim];
                for c in 0..*out_dim {
                    let row = &data[c * in_dim..(c + 1) * in_dim];
                    let mut acc = 0.0f32;
                    for (&xv, &q) in x.iter().zip(row) {
                        acc += xv * q as f32;
                    }
                    y[c] = scales[c] * acc;
                }
                y
            }
            PreparedWeight::Int4 {
                data,
                scales,
                out_dim,
                in_dim,
            } => {
                let groups = in_dim / Q4_GROUP;
                let bytes_per_row = in_dim / 2;
                let mut y = vec![0.0f32; *out_dim];
                for c in 0..*out_dim {
                    let row = &data[c * bytes_per_row..(c + 1) * bytes_per_row];
                    let mut acc = 0.0f32;
                    for g in 0..groups {
                        let scale = scales[c * groups + g].to_f32();
                        let mut group_acc = 0.0f32;
                        for k in 0..Q4_GROUP {
                            let idx = g * Q4_GROUP + k;
                            let byte = row[idx / 2];
                            let nib = if idx % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                            group_acc += x[idx] * (nib as i32 - 8) as f32;
                        }
                        acc += scale * group_acc;
                    }
                    y[c] = acc;
                }
                y
            }
        }
    }
}
