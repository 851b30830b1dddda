use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Column does not exist: {column}")]
    MissingColumn { column: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when the failure comes from one of `columns` being absent in the
    /// current schema.
    pub fn is_missing_any(&self, columns: &[&str]) -> bool {
        match self {
            StoreError::MissingColumn { column } => columns.iter().any(|c| column.contains(c)),
            StoreError::Status { message, .. } => {
                message.contains("does not exist") && columns.iter().any(|c| message.contains(c))
            }
            _ => false,
        }
    }
}

/// Result of one fetcher read.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Rows(T),
    Empty,
    Failed(StoreError),
}

impl<T> FetchOutcome<Vec<T>> {
    pub fn from_rows(rows: Vec<T>) -> Self {
        if rows.is_empty() {
            FetchOutcome::Empty
        } else {
            FetchOutcome::Rows(rows)
        }
    }

    /// Collapse to a plain collection; `Empty` and `Failed` both yield nothing.
    pub fn into_rows(self) -> Vec<T> {
        match self {
            FetchOutcome::Rows(rows) => rows,
            FetchOutcome::Empty | FetchOutcome::Failed(_) => Vec::new(),
        }
    }

    /// Transform the rows of a successful read. A transform that filters
    /// everything out turns `Rows` into `Empty`.
    pub fn map_rows<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> FetchOutcome<Vec<U>> {
        match self {
            FetchOutcome::Rows(rows) => FetchOutcome::from_rows(f(rows)),
            FetchOutcome::Empty => FetchOutcome::Empty,
            FetchOutcome::Failed(err) => FetchOutcome::Failed(err),
        }
    }
}

impl<T> FetchOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Rows(value) => FetchOutcome::Rows(f(value)),
            FetchOutcome::Empty => FetchOutcome::Empty,
            FetchOutcome::Failed(err) => FetchOutcome::Failed(err),
        }
    }

    /// Single-row reads: the row if one was found.
    pub fn into_option(self) -> Option<T> {
        match self {
            FetchOutcome::Rows(row) => Some(row),
            FetchOutcome::Empty | FetchOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_detection() {
        let err = StoreError::MissingColumn { column: "stock_opportunities_v2.evidence_ids".into() };
        assert!(err.is_missing_any(&["evidence_ids", "path_ids"]));
        assert!(!err.is_missing_any(&["counter_view"]));

        let err = StoreError::Status {
            status: 400,
            message: "column stock_opportunities_v2.path_ids does not exist".into(),
        };
        assert!(err.is_missing_any(&["path_ids"]));

        let err = StoreError::Http("connection refused".into());
        assert!(!err.is_missing_any(&["path_ids"]));
    }

    #[test]
    fn test_outcome_collapse() {
        assert_eq!(FetchOutcome::from_rows(Vec::<i32>::new()), FetchOutcome::Empty);
        assert_eq!(FetchOutcome::from_rows(vec![1]), FetchOutcome::Rows(vec![1]));
        let failed: FetchOutcome<Vec<i32>> = FetchOutcome::Failed(StoreError::Unavailable("offline".into()));
        assert!(matches!(failed, FetchOutcome::Failed(_)));
        assert!(failed.into_rows().is_empty());
    }

    #[test]
    fn test_map_rows_renormalizes() {
        let outcome = FetchOutcome::from_rows(vec![1, 2, 3]);
        assert_eq!(outcome.clone().map_rows(|rows| rows.into_iter().filter(|n| *n > 1).collect::<Vec<_>>()), FetchOutcome::Rows(vec![2, 3]));
        assert_eq!(outcome.map_rows(|_| Vec::<i32>::new()), FetchOutcome::Empty);
    }
}
