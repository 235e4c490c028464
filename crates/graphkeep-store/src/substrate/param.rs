//! Placeholder-bound parameter values (spec §6 "Substrate").

/// A single bound parameter value. Kept as a closed enum (rather than a
/// generic `impl Encode`) so driver/query code can build parameter lists
/// without fighting sqlx's per-backend `Encode`/`Type` bounds at every call
/// site — the binding happens once, centrally, in [`super::Tx::bind_all`].
#[derive(Debug, Clone)]
pub enum Param {
    Bytes(Vec<u8>),
    I64(i64),
    Str(String),
    Bool(bool),
    Null,
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(v)
    }
}

impl From<&[u8]> for Param {
    fn from(v: &[u8]) -> Self {
        Param::Bytes(v.to_vec())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::I64(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::I64(i64::from(v))
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Str(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Str(v.to_string())
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

/// Builds a `(?, ?, …)` placeholder group for an `IN (…)` clause, or a
/// row-grouped `(?,?),(?,?),…` placeholder list for a multi-row `INSERT`.
#[must_use]
pub fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}

/// Builds row-grouped placeholders for a multi-row `INSERT … VALUES`.
#[must_use]
pub fn row_placeholders(rows: usize, cols_per_row: usize) -> String {
    let one_row = format!("({})", placeholders(cols_per_row));
    std::iter::repeat(one_row.as_str())
        .take(rows)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_join_with_commas() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
    }

    #[test]
    fn row_placeholders_group_per_row() {
        assert_eq!(row_placeholders(2, 3), "(?, ?, ?), (?, ?, ?)");
    }
}
