//! Revisions and the version bound.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Anything that can order revisions.
///
/// Blanket-implemented, so counters (`u64`), signed stamps (`i64`),
/// lexically ordered strings, and timestamp types all qualify without
/// ceremony. The only requirement is a total order. In-process code always
/// compares decoded versions with that order.
pub trait Version:
    Ord + Clone + fmt::Debug + fmt::Display + Serialize + DeserializeOwned
{
}

impl<T> Version for T where
    T: Ord + Clone + fmt::Debug + fmt::Display + Serialize + DeserializeOwned
{
}

/// A [`Version`] whose serialized form sorts exactly like the version.
///
/// Stores that compare encoded versions themselves (JSONB, document
/// databases) can only answer as-of reads for these. Integers qualify.
/// Strings do not, since databases compare them under a collation, and
/// neither do timestamps: `"12:00:20.5Z"` sorts before `"12:00:20Z"`.
pub trait OrderedEncoding: Version {
    /// The serialized form of the version, as found in stored documents.
    fn sort_key(&self) -> Value;
}

macro_rules! ordered_integers {
    ($($t:ty),*) => {
        $(
            impl OrderedEncoding for $t {
                fn sort_key(&self) -> Value {
                    Value::from(*self)
                }
            }
        )*
    };
}

ordered_integers!(u8, u16, u32, u64, i8, i16, i32, i64);

/// An immutable (value, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision<T, V> {
    version: V,
    value: T,
}

impl<T, V> Revision<T, V> {
    /// Create a new revision.
    pub fn new(value: T, version: V) -> Self {
        Self { version, value }
    }

    /// The version this value was recorded at.
    pub fn version(&self) -> &V {
        &self.version
    }

    /// The recorded value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the revision, keeping only the value.
    pub fn into_value(self) -> T {
        self.value
    }
}
