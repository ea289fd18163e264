// src/error.rs
//! Failure classes shared by every stage. Each per-stage error maps onto one
//! class, and the class decides what happens to the item.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup or rate limit: retry later or fall back.
    TransientProvider,
    /// Bad credentials or missing rights: drop the item, keep running.
    PermanentAuth,
    /// Item not eligible: silent drop.
    ValidationSkip,
    /// Unreadable state file: continue from safe defaults.
    DataCorruption,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientProvider => "transient_provider",
            Self::PermanentAuth => "permanent_auth",
            Self::ValidationSkip => "validation_skip",
            Self::DataCorruption => "data_corruption",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can say which class it belongs to.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for crate::store::StoreError {
    fn class(&self) -> ErrorClass {
        ErrorClass::DataCorruption
    }
}

impl Classify for crate::ingest::SkipReason {
    fn class(&self) -> ErrorClass {
        ErrorClass::ValidationSkip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SkipReason;
    use crate::publish::PublishError;
    use crate::store::StoreError;
    use std::time::Duration;

    #[test]
    fn each_stage_error_lands_in_its_class() {
        let corrupt = StoreError::Corrupt {
            path: "seen.json".into(),
            source: serde_json::from_str::<u8>("{").unwrap_err(),
        };
        assert_eq!(corrupt.class(), ErrorClass::DataCorruption);
        assert_eq!(corrupt.class().to_string(), "data_corruption");

        assert_eq!(
            PublishError::RateLimited(Duration::from_secs(3)).class(),
            ErrorClass::TransientProvider
        );
        assert_eq!(
            PublishError::Forbidden("bot was kicked".into()).class(),
            ErrorClass::PermanentAuth
        );
        assert_eq!(
            PublishError::Api {
                code: 400,
                description: "wrong file id".into()
            }
            .class(),
            ErrorClass::ValidationSkip
        );
        assert_eq!(SkipReason::Forwarded.class(), ErrorClass::ValidationSkip);
    }
}
