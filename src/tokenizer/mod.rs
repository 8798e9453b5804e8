//! Tokenizer boundary for the generation runner.
//!
//! Defines the [`Tokenizer`] trait the runner drives, plus batch encoding
//! and padding utilities. Prompt rows must share one length before they
//! reach the decode loop; [`pad_sequences`] produces the padded rows and
//! the matching attention masks.

pub mod byte;

pub use byte::ByteTokenizer;

/// A tokenizer that converts text to token IDs and back.
///
/// All implementations must be thread-safe (`Send + Sync`) for concurrent
/// use across multiple threads.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token IDs.
    ///
    /// When `add_special_tokens` is true, implementation-specific special
    /// tokens are added. Generation prompts take a BOS but no EOS.
    fn encode(&self, text: &str, add_special_tokens: bool) -> Vec<u32>;

    /// Decode a sequence of token IDs back into text.
    fn decode(&self, ids: &[u32]) -> String;

    /// Return the total vocabulary size.
    fn vocab_size(&self) -> usize;

    /// Beginning-of-sequence token ID, if applicable.
    fn bos_token_id(&self) -> Option<u32>;

    /// End-of-sequence token ID, if applicable.
    fn eos_token_id(&self) -> Option<u32>;

    /// Padding token ID, if applicable.
    fn pad_token_id(&self) -> Option<u32>;
}

/// Encode a batch of texts using the given tokenizer.
///
/// Each text is encoded independently. Returns one `Vec<u32>` per input text.
pub fn encode_batch(
    tokenizer: &dyn Tokenizer,
    texts: &[&str],
    add_special_tokens: bool,
) -> Vec<Vec<u32>> {
    texts
        .iter()
        .map(|text| tokenizer.encode(text, add_special_tokens))
        .collect()
}

/// Pad a set of token ID sequences to equal length.
///
/// Returns a tuple of `(padded_sequences, attention_masks)`:
/// - `padded_sequences`: each inner `Vec<u32>` is padded with `pad_id` to
///   match the length of the longest sequence.
/// - `attention_masks`: each inner `Vec<u8>` has `1` for real tokens and
///   `0` for padding positions.
///
/// If `sequences` is empty, returns empty vectors.
pub fn pad_sequences(sequences: &[Vec<u32>], pad_id: u32) -> (Vec<Vec<u32>>, Vec<Vec<u8>>) {
    if sequences.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let max_len = sequences.iter().map(|s| s.len()).max().unwrap_or(0);

    let mut padded = Vec::with_capacity(sequences.len());
    let mut masks = Vec::with_capacity(sequences.len());

    for seq in sequences {
        let real_len = seq.len();

        let mut padded_seq = Vec::with_capacity(max_len);
        padded_seq.extend_from_slice(seq);
        padded_seq.resize(max_len, pad_id);

        let mut mask = Vec::with_capacity(max_len);
        mask.resize(real_len, 1u8);
        mask.resize(max_len, 0u8);

        padded.push(padded_seq);
        masks.push(mask);
    }

    (padded, masks)
}
