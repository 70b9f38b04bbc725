//! Serde helpers for reading declarations of support as leniently as browsers do.

use serde::{Deserialize, Deserializer};

/// Read a member of a declaration of support, falling back to its default when it holds a JSON
/// value of another type.
///
/// Support documents are hand written and deployed by every kind of site. A `"authority": 42`
/// is read as if there was no `authority` at all, so the remaining members still decide what the
/// document means.
pub fn default_if_mistyped<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(T::deserialize(de).unwrap_or_default())
}
