//! Mutable state threaded through one generation call.

use crate::error::RunnerError;
use crate::model::profile::PositionPolicy;
use crate::model::KvCacheHandle;

use super::policy::PassKind;

/// Loop counters consulted by the termination policy.
///
/// Fresh for every generation call; warm-up and measured passes never
/// share counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationCounters {
    /// Completed loop iterations, prefill included.
    pub steps_so_far: usize,
    /// Tokens credited against the generation budget. Warm-up steps
    /// produce tokens but do not count them here.
    pub new_tokens_produced: usize,
}

impl TerminationCounters {
    pub fn record_step(&mut self, pass: PassKind) {
        self.steps_so_far += 1;
        if pass != PassKind::WarmUp {
            self.new_tokens_produced += 1;
        }
    }
}

/// Per-call decoding state.
///
/// Holds the prompt rows, the growing generated rows (prompt included),
/// the opaque cache handle, and two position trackers: a per-row count of
/// stored positions and a shared visibility cursor that sizes decode row
/// masks. Every completed step grows each row by exactly one token.
#[derive(Debug)]
pub struct GenerationState {
    prompt: Vec<Vec<u32>>,
    generated: Vec<Vec<u32>>,
    cache: Option<KvCacheHandle>,
    positions: Vec<u32>,
    cursor: usize,
    is_prefill: bool,
    steps_completed: usize,
}

impl GenerationState {
    /// Start a generation call from padded prompt rows.
    ///
    /// Rows must be non-empty and share one length; padding happens at
    /// the tokenizer boundary before state construction.
    pub fn new(prompt: Vec<Vec<u32>>) -> Result<Self, RunnerError> {
        if prompt.is_empty() {
            return Err(RunnerError::Generation("prompt batch is empty".to_string()));
        }
        let len = prompt[0].len();
        if len == 0 {
            return Err(RunnerError::Generation(
                "prompt tokenized to empty sequence".to_string(),
            ));
        }
        for (r, row) in prompt.iter().enumerate() {
            if row.len() != len {
                return Err(RunnerError::Generation(format!(
                    "prompt row {} has length {}, expected {} (rows must be padded to one length)",
                    r,
                    row.len(),
                    len
                )));
            }
        }
        let batch = prompt.len();
        Ok(Self {
            generated: prompt.clone(),
            prompt,
            cache: None,
            positions: vec![0; batch],
            cursor: len,
            is_prefill: true,
            steps_completed: 0,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.prompt.len()
    }

    pub fn prompt_len(&self) -> usize {
        self.prompt[0].len()
    }

    pub fn is_prefill(&self) -> bool {
        self.is_prefill
    }

    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }

    /// Positions visible to the next decode step, prompt included.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Stored position count per row.
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// One past the largest position index any row has stored.
    pub fn position_counter(&self) -> usize {
        self.positions.iter().copied().max().unwrap_or(0) as usize
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Full generated rows, prompt prefix included.
    pub fn generated_rows(&self) -> &[Vec<u32>] {
        &self.generated
    }

    pub fn prompt_rows(&self) -> &[Vec<u32>] {
        &self.prompt
    }

    /// Last token of each row, the decode-step input column.
    pub fn last_tokens(&self) -> Vec<u32> {
        self.generated
            .iter()
            .map(|row| row.last().copied().unwrap_or(0))
            .collect()
    }

    pub(crate) fn take_cache(&mut self) -> Option<KvCacheHandle> {
        self.cache.take()
    }

    pub(crate) fn install_cache(&mut self, cache: KvCacheHandle) {
        self.cache = Some(cache);
    }

    #[cfg(test)]
    pub(crate) fn cache_ref(&self) -> Option<&KvCacheHandle> {
        self.cache.as_ref()
    }

    /// Append one token per row.
    pub(crate) fn push_next_tokens(&mut self, next: &[u32]) {
        for (row, &tok) in self.generated.iter_mut().zip(next) {
            row.push(tok);
        }
    }

    /// Close out a step: advance positions per `policy` from the position
    /// indices the step consumed, advance the visibility cursor, and
    /// leave prefill.
    pub(crate) fn complete_step(&mut self, policy: PositionPolicy, step_positions: &[Vec<u32>]) {
        match policy {
            PositionPolicy::RowMax => {
                for (r, row) in step_positions.iter().enumerate() {
                    let seen = row.iter().copied().max().unwrap_or(0);
                    self.positions[r] = seen + 1;
                }
            }
            PositionPolicy::Lockstep => {
                let shared = self.cursor as u32;
                for p in &mut self.positions {
                    *p = shared;
                }
            }
        }
        self.cursor += 1;
        self.is_prefill = false;
        self.steps_completed += 1;
        debug_assert!(self
            .generated
            .iter()
            .zip(&self.prompt)
            .all(|(g, p)| g.len() == p.len() + self.steps_completed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_rows() -> Vec<Vec<u32>> {
        vec![vec![10, 11, 12, 13, 14, 15, 16, 17]; 2]
    }

    #[test]
    fn test_new_state_initial_values() {
        let state = GenerationState::new(prompt_rows()).unwrap();
        assert_eq!(state.batch_size(), 2);
        assert_eq!(state.prompt_len(), 8);
        assert!(state.is_prefill());
        assert_eq!(state.steps_completed(), 0);
        assert_eq!(state.cursor(), 8);
        assert_eq!(state.positions(), &[0, 0]);
        assert_eq!(state.position_counter(), 0);
        assert!(!state.has_cache());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = GenerationState::new(vec![]).unwrap_err();
        assert!(err.to_string().contains("prompt batch is empty"));
    }

    #[test]
    fn test_empty_row_rejected() {
        let err = GenerationState::new(vec![vec![]]).unwrap_err();
        assert!(err.to_string().contains("prompt tokenized to empty sequence"));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = GenerationState::new(vec![vec![1, 2], vec![1]]).unwrap_err();
        assert!(err
            .to_string()
            .contains("prompt row 1 has length 1, expected 2"));
    }

    #[test]
    fn test_counters_per_pass_kind() {
        let mut c = TerminationCounters::default();
        c.record_step(PassKind::WarmUp);
        c.record_step(PassKind::WarmUp);
        assert_eq!(c.steps_so_far, 2);
        assert_eq!(c.new_tokens_produced, 0);

        let mut c = TerminationCounters::default();
        c.record_step(PassKind::Measure);
        c.record_step(PassKind::Measure);
        assert_eq!(c.steps_so_far, 2);
        assert_eq!(c.new_tokens_produced, 2);
    }

    #[test]
    fn test_row_max_position_progression() {
        // Prompt of 8, then three steps. The observable counter must be
        // 8, 9, 10 after the steps, with the cursor one ahead.
        let mut state = GenerationState::new(prompt_rows()).unwrap();

        let prefill_positions: Vec<Vec<u32>> = vec![(0..8).collect(); 2];
        state.push_next_tokens(&[20, 21]);
        state.complete_step(PositionPolicy::RowMax, &prefill_positions);
        assert_eq!(state.position_counter(), 8);
        assert_eq!(state.positions(), &[8, 8]);
        assert_eq!(state.cursor(), 9);
        assert!(!state.is_prefill());

        state.push_next_tokens(&[22, 23]);
        state.complete_step(PositionPolicy::RowMax, &[vec![8], vec![8]]);
        assert_eq!(state.position_counter(), 9);
        assert_eq!(state.cursor(), 10);

        state.push_next_tokens(&[24, 25]);
        state.complete_step(PositionPolicy::RowMax, &[vec![9], vec![9]]);
        assert_eq!(state.position_counter(), 10);
        assert_eq!(state.cursor(), 11);

        assert_eq!(state.steps_completed(), 3);
        assert_eq!(state.generated_rows()[0].len(), 11);
        assert_eq!(state.generated_rows()[0][8..], [20, 22, 24]);
    }

    #[test]
    fn test_lockstep_matches_row_max_on_uniform_batch() {
        let mut row_max = GenerationState::new(prompt_rows()).unwrap();
        let mut lockstep = GenerationState::new(prompt_rows()).unwrap();

        let prefill_positions: Vec<Vec<u32>> = vec![(0..8).collect(); 2];
        row_max.push_next_tokens(&[1, 1]);
        lockstep.push_next_tokens(&[1, 1]);
        row_max.complete_step(PositionPolicy::RowMax, &prefill_positions);
        lockstep.complete_step(PositionPolicy::Lockstep, &prefill_positions);
        assert_eq!(row_max.positions(), lockstep.positions());

        for step in 0..3u32 {
            let decode_positions = vec![vec![8 + step], vec![8 + step]];
            row_max.push_next_tokens(&[2, 2]);
            lockstep.push_next_tokens(&[2, 2]);
            row_max.complete_step(PositionPolicy::RowMax, &decode_positions);
            lockstep.complete_step(PositionPolicy::Lockstep, &decode_positions);
            assert_eq!(row_max.positions(), lockstep.positions(), "step {}", step);
            assert_eq!(row_max.cursor(), lockstep.cursor());
        }
    }

    #[test]
    fn test_last_tokens_follow_appends() {
        let mut state = GenerationState::new(vec![vec![5, 6], vec![7, 8]]).unwrap();
        assert_eq!(state.last_tokens(), vec![6, 8]);
        state.push_next_tokens(&[30, 31]);
        assert_eq!(state.last_tokens(), vec![30, 31]);
    }

    #[test]
    fn test_cache_take_and_install() {
        let mut state = GenerationState::new(vec![vec![1]]).unwrap();
        assert!(state.take_cache().is_none());
        state.install_cache(KvCacheHandle::new(3u8));
        assert!(state.has_cache());
        let handle = state.take_cache().unwrap();
        assert_eq!(handle.downcast_ref::<u8>(), Some(&3));
        assert!(!state.has_cache());
    }
}
