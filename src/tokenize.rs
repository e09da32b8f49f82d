//! Streaming tokenizer and sliding n-gram window
//!
//! A single left-to-right scan over a message yields, at every accepted token
//! position, all n-gram widths ending at that position: each accepted token is
//! pushed into a 5-slot sliding [`NgramWindow`], the caller's callback then
//! observes the window state, and [`NgramWindow::subview`] extracts the
//! trailing W tokens in O(1).

use crate::constants::{NGRAM_MAX_WIDTH, SNOWFLAKE_MAX_LENGTH, SNOWFLAKE_MIN_LENGTH};

/// Characters that cannot start a token
///
/// This is [`TOKEN_INTERIOR_DELIMITERS`] plus `'`, `-` and `+`, which are
/// allowed inside a token ("isn't", "c++") but never lead one.
const TOKEN_START_DELIMITERS: &str = " \t\n\r\x0b!\"#$%&()*,./:;<=>?@[\\]^`{|}~'-+";

/// Characters that terminate a token once one has started
const TOKEN_INTERIOR_DELIMITERS: &str = " \t\n\r\x0b!\"#$%&()*,./:;<=>?@[\\]^`{|}~";

/// Characters stripped from the end of a token candidate
const NOT_AT_TOKEN_END: [char; 2] = ['\'', '-'];

/// Truth that a token looks like a platform object id: 17 to 19 decimal
/// digits. Such tokens are masked from the corpus and break n-gram continuity.
pub fn looks_like_snowflake(token: &str) -> bool {
    (SNOWFLAKE_MIN_LENGTH..=SNOWFLAKE_MAX_LENGTH).contains(&token.len())
        && token.bytes().all(|b| b.is_ascii_digit())
}

/// Sliding window over the most recent tokens of a message
///
/// Holds at most [`NGRAM_MAX_WIDTH`] tokens; once full, a push evicts the
/// oldest. The contents always reflect every token accepted since the last
/// [`clear`](Self::clear).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NgramWindow<'a> {
    tokens: [&'a str; NGRAM_MAX_WIDTH],
    len: usize,
}
//
impl<'a> NgramWindow<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens pushed since the last clear, saturating at the
    /// window capacity
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a token, evicting the oldest one if the window is full
    pub fn push(&mut self, token: &'a str) {
        if self.len == NGRAM_MAX_WIDTH {
            self.tokens.copy_within(1.., 0);
            self.tokens[NGRAM_MAX_WIDTH - 1] = token;
        } else {
            self.tokens[self.len] = token;
            self.len += 1;
        }
    }

    /// Forget all tokens, breaking n-gram continuity at this point
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The trailing `width` tokens, or `None` if fewer than `width` tokens
    /// have been pushed since the last clear
    pub fn subview(&self, width: usize) -> Option<&[&'a str]> {
        debug_assert!(width >= 1, "zero-width n-grams are meaningless");
        if width > self.len {
            None
        } else {
            Some(&self.tokens[self.len - width..self.len])
        }
    }
}

/// Split a message into tokens, invoking `callback` with the window state
/// after each accepted token
///
/// Token extents are defined by the two delimiter tables above; trailing
/// apostrophes and hyphens are stripped from each candidate, and a candidate
/// left empty by that strip is dropped without touching the window. Snowflake
/// lookalikes clear the window and are never emitted. Input without any
/// acceptable token yields zero callback invocations.
pub fn tokenize<'a>(text: &'a str, mut callback: impl FnMut(&NgramWindow<'a>)) {
    let mut window = NgramWindow::new();
    let mut cursor = 0;
    while cursor < text.len() {
        let Some(start) = text[cursor..]
            .find(|c| !TOKEN_START_DELIMITERS.contains(c))
            .map(|offset| cursor + offset)
        else {
            break;
        };
        let end = text[start..]
            .find(|c| TOKEN_INTERIOR_DELIMITERS.contains(c))
            .map(|offset| start + offset)
            .unwrap_or(text.len());
        cursor = end;
        let token = text[start..end].trim_end_matches(NOT_AT_TOKEN_END.as_slice());
        if token.is_empty() {
            continue;
        }
        if looks_like_snowflake(token) {
            window.clear();
            continue;
        }
        window.push(token);
        callback(&window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect the subview of every emitted window position at one width
    fn subviews_at(text: &str, width: usize) -> Vec<Option<Vec<String>>> {
        let mut output = Vec::new();
        tokenize(text, |window| {
            output.push(
                window
                    .subview(width)
                    .map(|tokens| tokens.iter().map(|t| t.to_string()).collect()),
            );
        });
        output
    }

    fn grams(tokens: &[&str]) -> Option<Vec<String>> {
        Some(tokens.iter().map(|t| t.to_string()).collect())
    }

    const INPUT: &str = "foo bar. is c++ isn't [foo]";

    #[test]
    fn unigrams() {
        assert_eq!(
            subviews_at(INPUT, 1),
            vec![
                grams(&["foo"]),
                grams(&["bar"]),
                grams(&["is"]),
                grams(&["c++"]),
                grams(&["isn't"]),
                grams(&["foo"]),
            ]
        );
    }

    #[test]
    fn bigrams() {
        assert_eq!(
            subviews_at(INPUT, 2),
            vec![
                None,
                grams(&["foo", "bar"]),
                grams(&["bar", "is"]),
                grams(&["is", "c++"]),
                grams(&["c++", "isn't"]),
                grams(&["isn't", "foo"]),
            ]
        );
    }

    #[test]
    fn trigrams() {
        assert_eq!(
            subviews_at(INPUT, 3),
            vec![
                None,
                None,
                grams(&["foo", "bar", "is"]),
                grams(&["bar", "is", "c++"]),
                grams(&["is", "c++", "isn't"]),
                grams(&["c++", "isn't", "foo"]),
            ]
        );
    }

    #[test]
    fn five_grams() {
        assert_eq!(
            subviews_at(INPUT, 5),
            vec![
                None,
                None,
                None,
                None,
                grams(&["foo", "bar", "is", "c++", "isn't"]),
                grams(&["bar", "is", "c++", "isn't", "foo"]),
            ]
        );
    }

    #[test]
    fn window_slides_past_capacity() {
        assert_eq!(
            subviews_at("a b c d e f g", 5).last().unwrap(),
            &grams(&["c", "d", "e", "f", "g"])
        );
    }

    #[test]
    fn snowflake_clears_window_and_is_never_emitted() {
        let output = subviews_at("foo 597216680271282192 bar", 1);
        assert_eq!(output, vec![grams(&["foo"]), grams(&["bar"])]);
        // Continuity is broken: no bigram spans the masked token
        let output = subviews_at("foo 597216680271282192 bar", 2);
        assert_eq!(output, vec![None, None]);
    }

    #[test]
    fn snowflake_length_bounds() {
        assert!(looks_like_snowflake("59721668027128219")); // 17 digits
        assert!(looks_like_snowflake("5972166802712821921")); // 19 digits
        assert!(!looks_like_snowflake("5972166802712821")); // 16 digits
        assert!(!looks_like_snowflake("59721668027128219212")); // 20 digits
        assert!(!looks_like_snowflake("59721668027128219x"));
        // Digit count in bytes, so multi-byte text of snowflake byte length
        // must not be masked
        assert!(!looks_like_snowflake("ééééééééé"));
    }

    #[test]
    fn sixteen_digit_number_is_an_ordinary_token() {
        assert_eq!(
            subviews_at("foo 5972166802712821 bar", 3).last().unwrap(),
            &grams(&["foo", "5972166802712821", "bar"])
        );
    }

    #[test]
    fn trailing_apostrophes_and_hyphens_are_stripped() {
        assert_eq!(subviews_at("rock-' on", 1)[0], grams(&["rock"]));
        assert_eq!(subviews_at("well-known' thing", 1)[0], grams(&["well-known"]));
    }

    #[test]
    fn no_acceptable_tokens_means_no_callbacks() {
        assert!(subviews_at("", 1).is_empty());
        assert!(subviews_at("  \t\r\n .,;!?", 1).is_empty());
        assert!(subviews_at("+-'", 1).is_empty());
    }

    #[test]
    fn subview_matches_trailing_tokens_everywhere() {
        let mut emitted: Vec<String> = Vec::new();
        tokenize("one two three four five six seven", |window| {
            emitted.push(window.subview(1).unwrap()[0].to_string());
            for width in 1..=NGRAM_MAX_WIDTH {
                let expected: Vec<&str> = emitted
                    .iter()
                    .rev()
                    .take(width)
                    .rev()
                    .map(String::as_str)
                    .collect();
                match window.subview(width) {
                    Some(tokens) => assert_eq!(tokens, &expected[..]),
                    None => assert!(emitted.len() < width),
                }
            }
        });
        assert_eq!(emitted.len(), 7);
    }
}
