//! Error types for the persistent collections.
//!
//! Every error here is a local, synchronous, non-retryable logic error.
//! A failing operation never leaves a partial state behind: the value the
//! caller started from (and the transient handle, if any) is unchanged.

/// Errors returned by collection and transient operations.
///
/// # Examples
///
/// ```rust
/// use trellis::{CollectionError, PersistentVector};
///
/// let vector: PersistentVector<i32> = PersistentVector::new();
/// assert_eq!(vector.pop_back().unwrap_err(), CollectionError::EmptyCollection);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// An index was outside the valid range for the operation.
    IndexOutOfRange {
        /// The index that was requested.
        index: usize,
        /// The length of the vector at the time of the call.
        length: usize,
    },
    /// `pop_back`/`pop` was called on an empty vector.
    EmptyCollection,
    /// `insert_if_absent` found the key already present.
    KeyAlreadyPresent,
    /// A mutating operation (or a second seal) was attempted on a transient
    /// handle that has already been sealed by `persistent`.
    ClosedTransient,
}

impl std::fmt::Display for CollectionError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexOutOfRange { index, length } => {
                write!(
                    formatter,
                    "index {index} out of range for vector of length {length}"
                )
            }
            Self::EmptyCollection => write!(formatter, "cannot pop an empty vector"),
            Self::KeyAlreadyPresent => write!(formatter, "key already present"),
            Self::ClosedTransient => {
                write!(formatter, "transient used after persistent call")
            }
        }
    }
}

impl std::error::Error for CollectionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_out_of_range_display() {
        let error = CollectionError::IndexOutOfRange {
            index: 10,
            length: 3,
        };
        assert_eq!(
            format!("{error}"),
            "index 10 out of range for vector of length 3"
        );
    }

    #[test]
    fn test_empty_collection_display() {
        let error = CollectionError::EmptyCollection;
        assert_eq!(format!("{error}"), "cannot pop an empty vector");
    }

    #[test]
    fn test_key_already_present_display() {
        let error = CollectionError::KeyAlreadyPresent;
        assert_eq!(format!("{error}"), "key already present");
    }

    #[test]
    fn test_closed_transient_display() {
        let error = CollectionError::ClosedTransient;
        assert_eq!(format!("{error}"), "transient used after persistent call");
    }

    #[test]
    fn test_error_equality() {
        let error1 = CollectionError::IndexOutOfRange {
            index: 1,
            length: 0,
        };
        let error2 = CollectionError::IndexOutOfRange {
            index: 1,
            length: 0,
        };
        assert_eq!(error1, error2);
        assert_ne!(error1, CollectionError::EmptyCollection);
    }
}
