//! One-time enrollment credential types.
//!
//! A credential is three token identifiers. Identifiers never leave the store;
//! devices and operators only ever see the corresponding words.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Smallest valid token identifier.
pub const TOKEN_ID_MIN: u16 = 1;

/// Largest valid token identifier. Matches the size of the word list.
pub const TOKEN_ID_MAX: u16 = 2048;

/// Number of distinct token identifiers.
pub const TOKEN_SPACE: usize = (TOKEN_ID_MAX - TOKEN_ID_MIN + 1) as usize;

/// Identifier of one word in the token word list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct TokenId(u16);

impl TokenId {
    /// Returns `None` when `id` is outside `1..=2048`.
    pub fn new(id: u16) -> Option<Self> {
        (TOKEN_ID_MIN..=TOKEN_ID_MAX).contains(&id).then_some(Self(id))
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for TokenId {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("token id {value} out of range"))
    }
}

impl From<TokenId> for u16 {
    fn from(id: TokenId) -> Self {
        id.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a token within a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPosition {
    One,
    Two,
    Three,
}

impl TokenPosition {
    /// Column holding this position in the credential table.
    pub fn column(&self) -> &'static str {
        match self {
            Self::One => "token_one",
            Self::Two => "token_two",
            Self::Three => "token_three",
        }
    }
}

impl fmt::Display for TokenPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// The three identifiers of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenTriple {
    pub one: TokenId,
    pub two: TokenId,
    pub three: TokenId,
}

impl TokenTriple {
    pub fn get(&self, position: TokenPosition) -> TokenId {
        match position {
            TokenPosition::One => self.one,
            TokenPosition::Two => self.two,
            TokenPosition::Three => self.three,
        }
    }
}

/// The three words handed to the operator. Secret: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWords {
    pub one: String,
    pub two: String,
    pub three: String,
}

impl TokenWords {
    pub fn new(one: impl Into<String>, two: impl Into<String>, three: impl Into<String>) -> Self {
        Self {
            one: one.into(),
            two: two.into(),
            three: three.into(),
        }
    }

    pub fn get(&self, position: TokenPosition) -> &str {
        match position {
            TokenPosition::One => &self.one,
            TokenPosition::Two => &self.two,
            TokenPosition::Three => &self.three,
        }
    }
}

impl fmt::Debug for TokenWords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenWords").finish_non_exhaustive()
    }
}

/// Canonical form of a presented word: trimmed and lowercased.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}
