//! Byte-level tokenizer.
//!
//! Every UTF-8 byte is one token, offset past three special IDs. No
//! vocabulary file is needed, which makes this the default tokenizer for
//! host smoke runs where output quality is irrelevant.

use super::Tokenizer;

/// First byte token; IDs below this are specials (pad, bos, eos).
pub const BYTE_OFFSET: u32 = 3;

const PAD_ID: u32 = 0;
const BOS_ID: u32 = 1;
const EOS_ID: u32 = 2;

/// Tokenizer mapping byte `b` to ID `b + BYTE_OFFSET`.
#[derive(Debug, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub fn new() -> Self {
        ByteTokenizer
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special_tokens {
            ids.push(BOS_ID);
        }
        ids.extend(text.bytes().map(|b| b as u32 + BYTE_OFFSET));
        ids
    }

    fn decode(&self, ids: &[u32]) -> String {
        let bytes: Vec<u8> = ids
            .iter()
            .filter_map(|&id| {
                if (BYTE_OFFSET..BYTE_OFFSET + 256).contains(&id) {
                    Some((id - BYTE_OFFSET) as u8)
                } else {
                    None // specials and clamp artifacts are dropped
                }
            })
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn vocab_size(&self) -> usize {
        256 + BYTE_OFFSET as usize
    }

    fn bos_token_id(&self) -> Option<u32> {
        Some(BOS_ID)
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS_ID)
    }

    fn pad_token_id(&self) -> Option<u32> {
        Some(PAD_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{encode_batch, pad_sequences};

    #[test]
    fn test_ascii_round_trip() {
        let tok = ByteTokenizer::new();
        let ids = tok.encode("ab c", false);
        assert_eq!(ids, vec![b'a' as u32 + 3, b'b' as u32 + 3, b' ' as u32 + 3, b'c' as u32 + 3]);
        assert_eq!(tok.decode(&ids), "ab c");
    }

    #[test]
    fn test_multibyte_round_trip() {
        let tok = ByteTokenizer::new();
        let text = "héllo déjà"; // multi-byte UTF-8
        let ids = tok.encode(text, false);
        assert!(ids.len() > text.chars().count());
        assert_eq!(tok.decode(&ids), text);
    }

    #[test]
    fn test_bos_prepended() {
        let tok = ByteTokenizer::new();
        let ids = tok.encode("x", true);
        assert_eq!(ids[0], tok.bos_token_id().unwrap());
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_decode_skips_specials() {
        let tok = ByteTokenizer::new();
        let ids = vec![1, b'h' as u32 + 3, 0, b'i' as u32 + 3, 2];
        assert_eq!(tok.decode(&ids), "hi");
    }

    #[test]
    fn test_decode_skips_out_of_range() {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.decode(&[b'a' as u32 + 3, 9999]), "a");
    }

    #[test]
    fn test_vocab_size() {
        let tok = ByteTokenizer::new();
        assert_eq!(tok.vocab_size(), 259);
    }

    #[test]
    fn test_batch_and_pad() {
        let tok = ByteTokenizer::new();
        let encoded = encode_batch(&tok, &["abc", "a"], false);
        let (padded, masks) = pad_sequences(&encoded, tok.pad_token_id().unwrap());
        assert_eq!(padded[1], vec![b'a' as u32 + 3, 0, 0]);
        assert_eq!(masks[1], vec![1, 0, 0]);
        // Padding decodes to nothing.
        assert_eq!(tok.decode(&padded[1]), "a");
    }
}
