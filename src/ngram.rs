//! Owned n-grams and the count maps keyed by them
//!
//! Count maps are [`IndexMap`]s: iteration follows insertion order, which is
//! what makes two runs over the same stream produce byte-identical output
//! tables, and the [`Equivalent`] machinery lets the hot counting loops look
//! up an owned [`Ngram`] key by a borrowed token slice without allocating.

use crate::constants::NGRAM_MAX_WIDTH;
use indexmap::{Equivalent, IndexMap};
use std::fmt;
use std::hash::{Hash, Hasher};

/// An immutable ordered tuple of 1 to [`NGRAM_MAX_WIDTH`] tokens
///
/// Equality and hashing cover the full token sequence. The hash feeds each
/// token followed by a separator byte so that e.g. ["ab"] and ["a", "b"]
/// cannot collide by concatenation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ngram(Box<[Box<str>]>);
//
impl Ngram {
    pub fn new(tokens: &[&str]) -> Self {
        debug_assert!(
            (1..=NGRAM_MAX_WIDTH).contains(&tokens.len()),
            "n-gram width must be between 1 and {NGRAM_MAX_WIDTH}"
        );
        Self(tokens.iter().map(|token| Box::from(*token)).collect())
    }

    /// Width of this n-gram
    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(Box::as_ref)
    }
}
//
impl Hash for Ngram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for token in self.0.iter() {
            state.write(token.as_bytes());
            state.write_u8(0xff);
        }
    }
}
//
impl fmt::Display for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
        }
        Ok(())
    }
}

/// Borrowed view of an n-gram, for map lookups straight from a window subview
///
/// Hashes and compares exactly like the [`Ngram`] holding the same tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TokenSlice<'a>(pub &'a [&'a str]);
//
impl Hash for TokenSlice<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for token in self.0 {
            state.write(token.as_bytes());
            state.write_u8(0xff);
        }
    }
}
//
impl Equivalent<Ngram> for TokenSlice<'_> {
    fn equivalent(&self, key: &Ngram) -> bool {
        self.0.len() == key.0.len()
            && self
                .0
                .iter()
                .zip(key.0.iter())
                .all(|(lhs, rhs)| *lhs == rhs.as_ref())
    }
}

/// Insertion-ordered map from n-gram to per-n-gram payload
pub type NgramMap<T> = IndexMap<Ngram, T, ahash::RandomState>;

/// One count map per width, addressed by `width - 1`
pub type WidthMaps<T> = [NgramMap<T>; NGRAM_MAX_WIDTH];

/// Fresh empty maps for every width
pub fn width_maps<T>() -> WidthMaps<T> {
    std::array::from_fn(|_| NgramMap::default())
}
