//! Deterministic host-side executor.
//!
//! Stands in for a device executor so the orchestration loop has
//! something real to drive in tests and smoke runs. A seeded signature
//! matrix projects a per-position fingerprint onto the vocabulary, and a
//! per-row position count plays the role of the KV cache. Outputs are
//! fully deterministic for a given seed.

use tracing::debug;

use crate::error::RunnerError;
use crate::model::profile::AttentionLayout;
use crate::model::quant::{PreparedWeight, QuantMethod};
use crate::model::{KvCacheHandle, StepInput, StepMasks, StepModel, StepOutput};
use crate::tensor::Tensor;

/// xorshift64 scramble, the only randomness the host executor uses.
fn mix(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

fn unit_interval(x: u64) -> f32 {
    ((x >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

/// Host cache: the number of positions stored per row, plus a step
/// counter. A fresh value is boxed into the output handle every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKvState {
    pub rows: Vec<usize>,
    pub steps: usize,
}

pub struct HostModel {
    layout: AttentionLayout,
    vocab_size: usize,
    hidden: usize,
    max_positions: usize,
    seed: u64,
    weight: PreparedWeight,
}

impl HostModel {
    /// Build the executor with a seeded signature matrix prepared through
    /// `quant`.
    ///
    /// # Panics
    /// Panics if `vocab_size` or `hidden` is zero.
    pub fn new(
        layout: AttentionLayout,
        vocab_size: usize,
        hidden: usize,
        max_positions: usize,
        seed: u64,
        quant: QuantMethod,
    ) -> Result<Self, RunnerError> {
        assert!(vocab_size > 0, "vocab_size must be greater than 0");
        assert!(hidden > 0, "hidden must be greater than 0");

        let mut state = if seed == 0 { 1 } else { seed };
        let mut data = Vec::with_capacity(vocab_size * hidden);
        for _ in 0..vocab_size * hidden {
            state = mix(state);
            data.push(unit_interval(state));
        }
        let raw = Tensor::new(vec![vocab_size, hidden], data);
        let weight = quant.post_load_transform(raw)?;

        debug!(
            vocab_size,
            hidden,
            max_positions,
            quant = quant.name(),
            "host executor ready"
        );
        Ok(Self {
            layout,
            vocab_size,
            hidden,
            max_positions,
            seed,
            weight,
        })
    }

    /// Hidden vector for one token occurrence.
    fn fingerprint(&self, token: u32, position: u32, row: usize) -> Vec<f32> {
        let mut state =
            self.seed ^ ((token as u64) << 32) ^ ((position as u64) << 8) ^ row as u64;
        if state == 0 {
            state = 1;
        }
        state = mix(state);
        let mut h = Vec::with_capacity(self.hidden);
        for _ in 0..self.hidden {
            state = mix(state);
            h.push(unit_interval(state));
        }
        h
    }

    fn check_masks(&self, input: &StepInput) -> Result<(), RunnerError> {
        match (&input.masks, self.layout, input.is_prefill) {
            (StepMasks::Bias(table), AttentionLayout::DenseBias { sliding_window }, _) => {
                if table.size() != self.max_positions {
                    return Err(RunnerError::Forward(format!(
                        "bias table sized {} but the executor expects {}",
                        table.size(),
                        self.max_positions
                    )));
                }
                if sliding_window.is_some() && !table.has_sliding() {
                    return Err(RunnerError::Forward(
                        "sliding attention entry missing from the bias table".to_string(),
                    ));
                }
                Ok(())
            }
            (StepMasks::Visibility(mask), AttentionLayout::RowVisibility, true) => {
                if mask.size() != self.max_positions {
                    return Err(RunnerError::Forward(format!(
                        "visibility mask sized {} but the executor expects {}",
                        mask.size(),
                        self.max_positions
                    )));
                }
                Ok(())
            }
            (StepMasks::Row(row), AttentionLayout::RowVisibility, false) => {
                if row.len() != self.max_positions {
                    return Err(RunnerError::Forward(format!(
                        "decode row mask sized {} but the executor expects {}",
                        row.len(),
                        self.max_positions
                    )));
                }
                Ok(())
            }
            (masks, _, _) => Err(RunnerError::Forward(format!(
                "mask selection '{}' does not fit a {} {} step",
                mask_kind(masks),
                layout_name(self.layout),
                if input.is_prefill { "prefill" } else { "decode" }
            ))),
        }
    }
}

fn mask_kind(masks: &StepMasks) -> &'static str {
    match masks {
        StepMasks::Bias(_) => "bias table",
        StepMasks::Visibility(_) => "visibility matrix",
        StepMasks::Row(_) => "decode row",
    }
}

fn layout_name(layout: AttentionLayout) -> &'static str {
    match layout {
        AttentionLayout::DenseBias { .. } => "dense-bias",
        AttentionLayout::RowVisibility => "row-visibility",
    }
}

impl StepModel for HostModel {
    fn forward(&mut self, input: &mut StepInput) -> Result<StepOutput, RunnerError> {
        let batch = input.batch_size();
        let width = input.step_width();
        if batch == 0 || width == 0 {
            return Err(RunnerError::Forward("empty step input".to_string()));
        }
        self.check_masks(input)?;

        let cache = input.take_cache();
        let mut kv = match (input.is_prefill, cache) {
            (true, None) => HostKvState {
                rows: vec![0; batch],
                steps: 0,
            },
            (true, Some(_)) => {
                return Err(RunnerError::Forward(
                    "prefill step arrived with a cache handle".to_string(),
                ))
            }
            (false, Some(handle)) => handle.into_inner::<HostKvState>().map_err(|_| {
                RunnerError::Forward("cache handle was not produced by this executor".to_string())
            })?,
            (false, None) => {
                return Err(RunnerError::Forward(
                    "decode step arrived without a cache handle".to_string(),
                ))
            }
        };
        if kv.rows.len() != batch {
            return Err(RunnerError::Forward(format!(
                "cache tracks {} rows but the step carries {}",
                kv.rows.len(),
                batch
            )));
        }

        let mut logits = vec![0.0f32; batch * width * self.vocab_size];
        for (r, (toks, poss)) in input.tokens.iter().zip(&input.positions).enumerate() {
            if toks.len() != width || poss.len() != width {
                return Err(RunnerError::Forward(format!(
                    "ragged step input: row {} has {} tokens and {} positions, expected {}",
                    r,
                    toks.len(),
                    poss.len(),
                    width
                )));
            }
            for (w, (&tok, &pos)) in toks.iter().zip(poss).enumerate() {
                if pos as usize >= self.max_positions {
                    return Err(RunnerError::Forward(format!(
                        "position {} exceeds the executor capacity {}",
                        pos, self.max_positions
                    )));
                }
                let h = self.fingerprint(tok, pos, r);
                let y = self.weight.matvec(&h);
                let base = (r * width + w) * self.vocab_size;
                logits[base..base + self.vocab_size].copy_from_slice(&y);
            }
            kv.rows[r] += width;
        }
        kv.steps += 1;

        Ok(StepOutput {
            logits: Tensor::new(vec![batch, width, self.vocab_size], logits),
            cache: KvCacheHandle::new(kv),
        })
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
