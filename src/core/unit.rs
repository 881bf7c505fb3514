// Logical units handed to parsers and discovery hooks, plus the decoded tabular/columnar shapes.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-name to value mapping for a single tabular row.
pub type Row = Map<String, Value>;

/// The smallest span a reader hands downstream.
///
/// Byte and text readers produce `Bytes`; csv readers produce whichever variant the
/// configured granularity and shape select; columnar readers produce `Columns`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Unit<'a> {
    Bytes(&'a [u8]),
    Batch(&'a TabularBatch),
    Row(&'a Row),
    Columns(&'a ColumnarBatch),
}

impl<'a> Unit<'a> {
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Unit::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_batch(&self) -> Option<&'a TabularBatch> {
        match self {
            Unit::Batch(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&'a Row> {
        match self {
            Unit::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_columns(&self) -> Option<&'a ColumnarBatch> {
        match self {
            Unit::Columns(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Unit::Bytes(_) => "bytes",
            Unit::Batch(_) => "batch",
            Unit::Row(_) => "row",
            Unit::Columns(_) => "columns",
        }
    }
}

/// A decoded multi-row span of delimited text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularBatch {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.rows.get(index).map(|values| zip_row(&self.columns, values))
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .iter()
            .map(|values| zip_row(&columns, values))
            .collect()
    }
}

fn zip_row(columns: &[String], values: &[Value]) -> Row {
    columns
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// A decoded columnar block: equally sized named columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnarBatch {
    columns: Vec<Column>,
    row_count: usize,
}

impl ColumnarBatch {
    /// Builds a batch, rejecting columns whose length disagrees with the first one.
    pub fn new(columns: Vec<Column>) -> Result<Self, (String, usize, usize)> {
        let row_count = columns.first().map_or(0, |column| column.values.len());
        for column in &columns {
            if column.values.len() != row_count {
                return Err((column.name.clone(), column.values.len(), row_count));
            }
        }
        Ok(Self { columns, row_count })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn num_rows(&self) -> usize {
        self.row_count
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.row_count).map(move |index| {
            self.columns
                .iter()
                .map(|column| (column.name.clone(), column.values[index].clone()))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, ColumnarBatch, TabularBatch, Unit};
    use serde_json::json;

    #[test]
    fn columnar_batch_rejects_ragged_columns() {
        let err = ColumnarBatch::new(vec![
            Column {
                name: "bid".to_string(),
                values: vec![json!(1.0), json!(1.1)],
            },
            Column {
                name: "ask".to_string(),
                values: vec![json!(1.2)],
            },
        ])
        .unwrap_err();
        assert_eq!(err, ("ask".to_string(), 1, 2));
    }

    #[test]
    fn columnar_rows_follow_column_order() {
        let batch = ColumnarBatch::new(vec![
            Column {
                name: "id".to_string(),
                values: vec![json!("x"), json!("y")],
            },
            Column {
                name: "px".to_string(),
                values: vec![json!(1), json!(2)],
            },
        ])
        .expect("batch");
        let rows: Vec<_> = batch.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], "y");
        assert_eq!(rows[1]["px"], 2);
        assert_eq!(batch.column("px").map(|c| c.values.len()), Some(2));
    }

    #[test]
    fn tabular_rows_zip_header() {
        let batch = TabularBatch {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![json!(1), json!("z")]],
        };
        assert_eq!(batch.column_index("b"), Some(1));
        let row = batch.row(0).expect("row");
        assert_eq!(row["b"], "z");
        assert_eq!(batch.into_rows()[0]["a"], 1);
    }

    #[test]
    fn unit_accessors_match_variant() {
        let unit = Unit::Bytes(b"abc");
        assert_eq!(unit.as_bytes(), Some(&b"abc"[..]));
        assert!(unit.as_row().is_none());
        assert_eq!(unit.kind_name(), "bytes");
    }
}
