//! WordPiece tokenization for the local embedding model.
//!
//! Three stages, matching what the model was trained with:
//!
//! 1. **Basic tokenization** — lowercase, surround punctuation and symbols
//!    with spaces, split on whitespace.
//! 2. **Subword tokenization** — greedy longest-prefix lookup against the
//!    vocabulary, continuation pieces prefixed with `##`; unsegmentable or
//!    over-long words collapse to `[UNK]`.
//! 3. **Encoding** — fixed-length `[CLS] ids [SEP] [PAD]*` arrays with a
//!    matching attention mask and all-zero token types.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Words longer than this become a single `[UNK]` without a subword scan.
const MAX_WORD_CHARS: usize = 200;

/// Fixed-length model input: three parallel arrays of the same length.
#[derive(Debug, Clone)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

/// WordPiece vocabulary: token text → id, one token per line of
/// `vocab.txt`, ids assigned by line number.
pub struct Vocabulary {
    tokens: HashMap<String, i64>,
    cls_id: i64,
    sep_id: i64,
    pad_id: i64,
    unk_id: i64,
}

impl Vocabulary {
    /// Load a vocabulary file (one token per line).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary: {}", path.display()))?;
        Self::from_lines(content.lines())
    }

    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut tokens = HashMap::new();
        for (i, line) in lines.enumerate() {
            let token = line.trim_end_matches(['\r', '\n']);
            if !token.is_empty() {
                tokens.insert(token.to_string(), i as i64);
            }
        }

        let special = |name: &str| -> Result<i64> {
            tokens
                .get(name)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("vocabulary is missing the {} token", name))
        };

        if tokens.is_empty() {
            bail!("vocabulary is empty");
        }

        Ok(Self {
            cls_id: special(CLS_TOKEN)?,
            sep_id: special(SEP_TOKEN)?,
            pad_id: special(PAD_TOKEN)?,
            unk_id: special(UNK_TOKEN)?,
            tokens,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn id(&self, token: &str) -> Option<i64> {
        self.tokens.get(token).copied()
    }

    /// Tokenize and encode `text` into fixed-length arrays of `seq_len`.
    /// Subword ids are truncated to `seq_len - 2` to leave room for
    /// `[CLS]` and `[SEP]`.
    pub fn encode(&self, text: &str, seq_len: usize) -> Encoding {
        let mut subword_ids = Vec::new();
        for word in basic_tokenize(text) {
            for piece in self.wordpiece(&word) {
                subword_ids.push(piece);
            }
        }
        subword_ids.truncate(seq_len.saturating_sub(2));

        let mut input_ids = Vec::with_capacity(seq_len);
        input_ids.push(self.cls_id);
        input_ids.extend_from_slice(&subword_ids);
        input_ids.push(self.sep_id);

        let used = input_ids.len();
        input_ids.resize(seq_len, self.pad_id);

        let mut attention_mask = vec![1i64; used];
        attention_mask.resize(seq_len, 0);

        Encoding {
            input_ids,
            attention_mask,
            token_type_ids: vec![0i64; seq_len],
        }
    }

    /// Greedy longest-prefix segmentation of one basic token. A word that
    /// cannot be fully segmented (or exceeds [`MAX_WORD_CHARS`]) yields a
    /// single `[UNK]` id.
    fn wordpiece(&self, word: &str) -> Vec<i64> {
        let chars: Vec<char> = word.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() > MAX_WORD_CHARS {
            return vec![self.unk_id];
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let mut matched: Option<i64> = None;
            let mut end = chars.len();

            while end > start {
                let mut candidate: String = chars[start..end].iter().collect();
                if start > 0 {
                    candidate = format!("##{}", candidate);
                }
                if let Some(id) = self.id(&candidate) {
                    matched = Some(id);
                    break;
                }
                end -= 1;
            }

            match matched {
                Some(id) => {
                    pieces.push(id);
                    start = end;
                }
                None => return vec![self.unk_id],
            }
        }

        pieces
    }
}

/// Lowercase, surround punctuation/symbols with spaces, split on
/// whitespace.
///
/// Punctuation covers ASCII 33–47, 58–64, 91–96, 123–126 plus any other
/// non-alphanumeric, non-whitespace, non-control character (the Unicode
/// punctuation and symbol categories for practical purposes).
pub fn basic_tokenize(text: &str) -> Vec<String> {
    let mut spaced = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if is_punctuation(c) {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced.split_whitespace().map(String::from).collect()
}

fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        let b = c as u8;
        (33..=47).contains(&b) || (58..=64).contains(&b) || (91..=96).contains(&b)
            || (123..=126).contains(&b)
    } else {
        !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control()
    }
}
