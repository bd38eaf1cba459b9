use std::fmt;

use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

const RUN_ID_LEN: usize = 10;

/// Per-run correlation id attached to every log record and error of a run.
///
/// This is a diagnostic tag only. It is generated from a non-cryptographic
/// source and must never be used as an authentication or capability token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn generate() -> Self {
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(RUN_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
