use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute tag marking a stored object as a wrapped raw array.
pub const NDARRAY_CLASS: &str = "ndarray";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(values) => values.len(),
            ColumnData::Int(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Out-of-range reads yield NaN, so a ragged table from a corrupt
    // file degrades instead of panicking.
    fn value_as_f64(&self, index: usize) -> f64 {
        match self {
            ColumnData::Float(values) => values.get(index).copied().unwrap_or(f64::NAN),
            ColumnData::Int(values) => values.get(index).map(|&v| v as f64).unwrap_or(f64::NAN),
            ColumnData::Text(_) => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn rows(&self) -> usize {
        self.columns.first().map(|column| column.data.len()).unwrap_or(0)
    }
}

/// A raw numeric array: row-major data plus its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    /// Builds a tensor, checking that the shape accounts for every element.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        let expected: usize = shape.iter().product();
        if expected == data.len() {
            Some(Self { shape, data })
        } else {
            None
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Self { shape, data }
    }
}

/// Everything the material store can hold under one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    Tensor(Tensor),
    Table(Table),
    Sheets(Vec<Table>),
    Json(Value),
}

impl StoredValue {
    pub fn class_name(&self) -> &'static str {
        match self {
            StoredValue::Tensor(_) => "Tensor",
            StoredValue::Table(_) => "Table",
            StoredValue::Sheets(_) => "Sheets",
            StoredValue::Json(_) => "Json",
        }
    }

    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            StoredValue::Tensor(tensor) => Some(tensor.shape.clone()),
            StoredValue::Table(table) => Some(vec![table.rows(), table.columns.len()]),
            StoredValue::Sheets(sheets) => {
                let first = sheets.first()?;
                Some(vec![sheets.len(), first.rows(), first.columns.len()])
            }
            StoredValue::Json(_) => None,
        }
    }
}

/// Optional self-description, consumed by the tracking layer when it
/// records a per-variable summary. Types without a useful summary return
/// `None` and the caller falls back to shape information.
pub trait Describe {
    fn describe(&self) -> Option<String>;
}

impl Describe for StoredValue {
    fn describe(&self) -> Option<String> {
        match self {
            StoredValue::Table(table) => Some(format!(
                "Table: {} columns x {} rows",
                table.columns.len(),
                table.rows()
            )),
            StoredValue::Sheets(sheets) => {
                let (rows, cols) = sheets
                    .first()
                    .map(|sheet| (sheet.rows(), sheet.columns.len()))
                    .unwrap_or((0, 0));
                Some(format!(
                    "Sheets: {} sheets of {cols} columns x {rows} rows",
                    sheets.len()
                ))
            }
            StoredValue::Tensor(_) | StoredValue::Json(_) => None,
        }
    }
}

/// Wraps a raw array into the nearest columnar shape: rank 0-1 becomes a
/// single-column table, rank 2 a table with one column per array column,
/// and rank 3 and above a stack of sheets indexed by the leading axis.
pub fn wrap_tensor(tensor: &Tensor) -> StoredValue {
    match tensor.shape.len() {
        0 | 1 => StoredValue::Table(table_from_block(&tensor.data, tensor.data.len(), 1)),
        2 => StoredValue::Table(table_from_block(
            &tensor.data,
            tensor.shape[0],
            tensor.shape[1],
        )),
        _ => {
            let sheet_count = tensor.shape[0];
            let rows = tensor.shape[1];
            let cols: usize = tensor.shape[2..].iter().product();
            let sheet_len = rows * cols;
            let sheets = (0..sheet_count)
                .map(|index| {
                    let block = &tensor.data[index * sheet_len..(index + 1) * sheet_len];
                    table_from_block(block, rows, cols)
                })
                .collect();
            StoredValue::Sheets(sheets)
        }
    }
}

/// Reverses [`wrap_tensor`]: rebuilds a tensor whose row-major element
/// sequence matches the wrapped original. The recovered shape is the
/// wrapping shape (a rank-1 array comes back as an n-by-1 tensor).
pub fn unwrap_value(value: StoredValue) -> StoredValue {
    match value {
        StoredValue::Table(table) => StoredValue::Tensor(tensor_from_table(&table)),
        StoredValue::Sheets(sheets) => {
            let (rows, cols) = sheets
                .first()
                .map(|sheet| (sheet.rows(), sheet.columns.len()))
                .unwrap_or((0, 0));
            let mut data = Vec::with_capacity(sheets.len() * rows * cols);
            for sheet in &sheets {
                data.extend(tensor_from_table(sheet).data);
            }
            StoredValue::Tensor(Tensor {
                shape: vec![sheets.len(), rows, cols],
                data,
            })
        }
        other => other,
    }
}

fn table_from_block(data: &[f64], rows: usize, cols: usize) -> Table {
    let mut columns = Vec::with_capacity(cols);
    for col in 0..cols {
        let mut values = Vec::with_capacity(rows);
        for row in 0..rows {
            values.push(data[row * cols + col]);
        }
        columns.push(Column {
            name: col.to_string(),
            data: ColumnData::Float(values),
        });
    }
    Table { columns }
}

fn tensor_from_table(table: &Table) -> Tensor {
    let rows = table.rows();
    let cols = table.columns.len();
    let mut data = vec![0.0; rows * cols];
    for (col, column) in table.columns.iter().enumerate() {
        for row in 0..rows {
            data[row * cols + col] = column.data.value_as_f64(row);
        }
    }
    Tensor {
        shape: vec![rows, cols],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_tensor(shape: Vec<usize>) -> Tensor {
        let len: usize = shape.iter().product();
        Tensor::new(shape, (0..len).map(|v| v as f64).collect()).expect("valid shape")
    }

    #[test]
    fn rank_one_wraps_to_single_column() {
        let tensor = range_tensor(vec![5]);
        let wrapped = wrap_tensor(&tensor);
        match &wrapped {
            StoredValue::Table(table) => {
                assert_eq!(table.columns.len(), 1);
                assert_eq!(table.rows(), 5);
            }
            other => panic!("expected table, got {other:?}"),
        }
        match unwrap_value(wrapped) {
            StoredValue::Tensor(recovered) => assert_eq!(recovered.data, tensor.data),
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn rank_two_round_trips_exactly() {
        let tensor = range_tensor(vec![3, 4]);
        match unwrap_value(wrap_tensor(&tensor)) {
            StoredValue::Tensor(recovered) => {
                assert_eq!(recovered.shape, vec![3, 4]);
                assert_eq!(recovered.data, tensor.data);
            }
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn rank_three_wraps_to_sheets_and_preserves_elements() {
        let tensor = range_tensor(vec![2, 3, 4]);
        let wrapped = wrap_tensor(&tensor);
        match &wrapped {
            StoredValue::Sheets(sheets) => {
                assert_eq!(sheets.len(), 2);
                assert_eq!(sheets[0].rows(), 3);
                assert_eq!(sheets[0].columns.len(), 4);
            }
            other => panic!("expected sheets, got {other:?}"),
        }
        match unwrap_value(wrapped) {
            StoredValue::Tensor(recovered) => {
                assert_eq!(recovered.shape, vec![2, 3, 4]);
                assert_eq!(recovered.data, tensor.data);
            }
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn rank_four_collapses_trailing_axes() {
        let tensor = range_tensor(vec![2, 3, 2, 2]);
        match unwrap_value(wrap_tensor(&tensor)) {
            StoredValue::Tensor(recovered) => {
                assert_eq!(recovered.shape, vec![2, 3, 4]);
                assert_eq!(recovered.data, tensor.data);
            }
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_none());
    }

    #[test]
    fn ragged_table_unwraps_without_panicking() {
        let table = Table {
            columns: vec![
                Column {
                    name: "0".to_string(),
                    data: ColumnData::Float(vec![1.0, 2.0, 3.0]),
                },
                Column {
                    name: "1".to_string(),
                    data: ColumnData::Float(vec![4.0]),
                },
            ],
        };
        match unwrap_value(StoredValue::Table(table)) {
            StoredValue::Tensor(tensor) => {
                assert_eq!(tensor.shape, vec![3, 2]);
                assert_eq!(tensor.data[1], 4.0);
                assert!(tensor.data[3].is_nan());
                assert!(tensor.data[5].is_nan());
            }
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn describe_reports_table_dimensions() {
        let wrapped = wrap_tensor(&range_tensor(vec![3, 4]));
        assert_eq!(wrapped.describe().as_deref(), Some("Table: 4 columns x 3 rows"));
        let tensor = StoredValue::Tensor(range_tensor(vec![3]));
        assert!(tensor.describe().is_none());
        assert_eq!(tensor.shape(), Some(vec![3]));
    }
}
