// ============================================================
// Layer 3 — Lookup Errors
// ============================================================
// Trainers, datasets and lr policies are all chosen by name at
// run time. A typo must fail loudly and tell the user what the
// valid names are, so each registry returns this error instead
// of a bare string.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown trainer '{name}' (known: {known})")]
    UnknownTrainer { name: String, known: String },

    #[error("unknown dataset '{name}' (known: {known})")]
    UnknownDataset { name: String, known: String },

    #[error("unknown lr policy '{name}' (known: {known})")]
    UnknownLrPolicy { name: String, known: String },
}

impl LookupError {
    pub fn trainer(name: &str, known: &[&str]) -> Self {
        Self::UnknownTrainer { name: name.to_string(), known: known.join(", ") }
    }

    pub fn dataset(name: &str, known: &[&str]) -> Self {
        Self::UnknownDataset { name: name.to_string(), known: known.join(", ") }
    }

    pub fn lr_policy(name: &str, known: &[&str]) -> Self {
        Self::UnknownLrPolicy { name: name.to_string(), known: known.join(", ") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lists_known_names() {
        let err = LookupError::trainer("fancy", &["default", "accumulate"]);
        assert_eq!(
            err.to_string(),
            "unknown trainer 'fancy' (known: default, accumulate)"
        );
    }
}
