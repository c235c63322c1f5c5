//! The unit of replication: one timestamped write to one cell.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TimestampError;
use crate::timestamp::{Timestamp, TimestampConfig};

/// One write of `value` to `table[row][column]` at `timestamp`.
///
/// The timestamp travels in its serialized form so fragments can be stored
/// and compared without knowing the layout; use
/// [`parse_timestamp`](Fragment::parse_timestamp) to get the structured
/// value back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Document the cell belongs to.
    pub document_id: String,
    /// Serialized [`Timestamp`] of the write.
    pub timestamp: String,
    /// Table name.
    pub table: String,
    /// Row id.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Written value.
    pub value: Value,
}

impl Fragment {
    /// Build a fragment stamped with `timestamp`.
    pub fn new(
        document_id: impl Into<String>,
        timestamp: &Timestamp,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            timestamp: timestamp.to_string(),
            table: table.into(),
            row: row.into(),
            column: column.into(),
            value,
        }
    }

    /// Parse the fragment's timestamp under `config`.
    pub fn parse_timestamp(&self, config: &TimestampConfig) -> Result<Timestamp, TimestampError> {
        Timestamp::parse(&self.timestamp, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_camel_case() {
        let config = TimestampConfig::default();
        let ts = Timestamp::new(1000, 1, "aaaaaaaaaaaaaaaa", config).unwrap();
        let f = Fragment::new("doc", &ts, "todos", "r1", "title", json!("milk"));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["documentId"], "doc");
        assert_eq!(v["timestamp"], ts.to_string());
        assert_eq!(v["value"], "milk");
        assert_eq!(f.parse_timestamp(&config).unwrap(), ts);
    }

    #[test]
    fn malformed_timestamp_is_reported() {
        let config = TimestampConfig::default();
        let ts = Timestamp::new(1000, 1, "aaaaaaaaaaaaaaaa", config).unwrap();
        let mut f = Fragment::new("doc", &ts, "t", "r", "c", Value::Null);
        f.timestamp.truncate(10);
        assert!(matches!(
            f.parse_timestamp(&config),
            Err(TimestampError::InvalidFormat { .. })
        ));
    }
}
