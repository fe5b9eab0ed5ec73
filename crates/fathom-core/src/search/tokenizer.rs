//! Tokenization strategies for the lexical index.
//!
//! A [`TokenizerKind`] is a closed set of named strategies, each with a
//! stable tag that is written into lexical snapshots. The selector is
//! resolved once when an index is built; one index tokenizes its whole
//! corpus and every query with the same strategy.
//!
//! | tag           | behaviour                                                    |
//! |---------------|--------------------------------------------------------------|
//! | `whitespace`  | lowercase, split on Unicode whitespace                       |
//! | `word`        | lowercase, split on non-alphanumeric characters              |
//! | `english`     | `bm25` default tokenizer: normalization, stop words, stemming |
//! | `char_bigram` | lowercase character bigrams per word (CJK, Korean and other agglutinative text) |

use super::types::SearchError;
use bm25::{DefaultTokenizer, Language, Tokenizer as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named tokenization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TokenizerKind {
    /// Split on whitespace only
    Whitespace,
    /// Split on anything that is not a letter or digit
    #[default]
    Word,
    /// English normalization, stop-word removal and Snowball stemming
    English,
    /// Overlapping two-character shingles within each word
    CharBigram,
}

impl TokenizerKind {
    /// Every strategy, in tag order.
    pub const ALL: [TokenizerKind; 4] = [
        TokenizerKind::Whitespace,
        TokenizerKind::Word,
        TokenizerKind::English,
        TokenizerKind::CharBigram,
    ];

    /// Stable tag persisted in snapshots.
    pub fn tag(self) -> &'static str {
        match self {
            TokenizerKind::Whitespace => "whitespace",
            TokenizerKind::Word => "word",
            TokenizerKind::English => "english",
            TokenizerKind::CharBigram => "char_bigram",
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for TokenizerKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenizerKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = TokenizerKind::ALL.iter().map(|k| k.tag()).collect();
                SearchError::Configuration(format!(
                    "unknown tokenizer '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

impl TryFrom<String> for TokenizerKind {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenizerKind> for String {
    fn from(kind: TokenizerKind) -> Self {
        kind.tag().to_string()
    }
}

/// A resolved tokenizer.
///
/// Cheap to construct for every strategy except `english`, which builds
/// the stop-word list and stemmer once and reuses them.
pub struct Tokenizer {
    kind: TokenizerKind,
    english: Option<DefaultTokenizer>,
}

impl Tokenizer {
    /// Resolves a strategy.
    pub fn new(kind: TokenizerKind) -> Self {
        let english = match kind {
            TokenizerKind::English => Some(DefaultTokenizer::new(Language::English)),
            _ => None,
        };
        Self { kind, english }
    }

    /// Resolves a strategy by tag; unknown tags are a configuration error.
    pub fn from_selector(selector: &str) -> Result<Self, SearchError> {
        Ok(Self::new(selector.parse()?))
    }

    /// The strategy this tokenizer implements.
    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    /// Splits `text` into ordered tokens.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self.kind {
            TokenizerKind::Whitespace => text.split_whitespace().map(str::to_lowercase).collect(),
            TokenizerKind::Word => words(text).map(str::to_lowercase).collect(),
            TokenizerKind::English => match &self.english {
                Some(tokenizer) => tokenizer.tokenize(text),
                None => DefaultTokenizer::new(Language::English).tokenize(text),
            },
            TokenizerKind::CharBigram => words(text).flat_map(char_bigrams).collect(),
        }
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer").field("kind", &self.kind).finish()
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn char_bigrams(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.to_lowercase().chars().collect();
    if chars.len() < 2 {
        return vec![chars.into_iter().collect()];
    }
    chars.windows(2).map(|pair| pair.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in TokenizerKind::ALL {
            assert_eq!(kind.tag().parse::<TokenizerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_selector_is_configuration_error() {
        let err = Tokenizer::from_selector("kiwi").unwrap_err();
        assert!(matches!(err, SearchError::Configuration(_)));
        assert!(err.to_string().contains("kiwi"));
    }

    #[test]
    fn test_whitespace_keeps_punctuation() {
        let tokenizer = Tokenizer::new(TokenizerKind::Whitespace);
        assert_eq!(tokenizer.tokenize("Hello, World!"), vec!["hello,", "world!"]);
    }

    #[test]
    fn test_word_splits_on_punctuation() {
        let tokenizer = Tokenizer::new(TokenizerKind::Word);
        assert_eq!(
            tokenizer.tokenize("Hello, World! rust-lang 2024"),
            vec!["hello", "world", "rust", "lang", "2024"]
        );
        assert!(tokenizer.tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_english_stems_and_drops_stop_words() {
        let tokenizer = Tokenizer::new(TokenizerKind::English);
        let tokens = tokenizer.tokenize("The dogs");
        assert!(tokens.contains(&"dog".to_string()), "tokens: {tokens:?}");
        assert!(!tokens.contains(&"the".to_string()));
    }

    #[test]
    fn test_char_bigrams() {
        let tokenizer = Tokenizer::new(TokenizerKind::CharBigram);
        assert_eq!(tokenizer.tokenize("Rust a"), vec!["ru", "us", "st", "a"]);
        assert_eq!(tokenizer.tokenize("검색엔진"), vec!["검색", "색엔", "엔진"]);
    }

    #[test]
    fn test_deterministic() {
        for kind in TokenizerKind::ALL {
            let tokenizer = Tokenizer::new(kind);
            let text = "Hybrid retrieval: BM25 meets vectors.";
            assert_eq!(tokenizer.tokenize(text), tokenizer.tokenize(text));
        }
    }
}
