//! Schemas, partial rows and row-operation sizing.
//!
//! A [`PartialRow`] is the in-memory form of a single row under construction:
//! a cell per column plus two bitmaps, one saying which columns were set and
//! one saying which of those are null. Write operations keep one so their
//! serialized size can be estimated before they are buffered.
//!
//! ```text
//! [ op kind: 1 byte ][ isset bitmap ][ null bitmap? ][ cell ][ cell ] ...
//! ```
//!
//! Variable-length cells occupy a fixed slot (pointer + length) followed by
//! their bytes, so their encoded size is slot width plus data length.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use std::sync::Arc;

/// Physical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Timestamp,
    String,
    Binary,
}

impl DataType {
    /// Fixed width of one cell of this type, in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double | DataType::Timestamp => 8,
            // slot of pointer + length
            DataType::String | DataType::Binary => 16,
        }
    }

    pub const fn is_variable_length(self) -> bool {
        matches!(self, DataType::String | DataType::Binary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Column layout of a table. Key columns come first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    num_key_columns: usize,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>, num_key_columns: usize) -> StorageResult<Self> {
        if columns.is_empty() {
            return Err(StorageError::InvalidArgument(
                "schema must have at least one column".into(),
            ));
        }
        if num_key_columns == 0 || num_key_columns > columns.len() {
            return Err(StorageError::InvalidArgument(format!(
                "invalid key column count {} for {} columns",
                num_key_columns,
                columns.len()
            )));
        }
        if let Some(key) = columns[..num_key_columns].iter().find(|c| c.nullable) {
            return Err(StorageError::InvalidArgument(format!(
                "key column {} may not be nullable",
                key.name
            )));
        }
        Ok(Self {
            columns,
            num_key_columns,
        })
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn column(&self, idx: usize) -> &ColumnSchema {
        &self.columns[idx]
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_nullables(&self) -> bool {
        self.columns.iter().any(|c| c.nullable)
    }
}

/// Bytes needed for a bitmap of `bits` bits.
pub const fn bitmap_size(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Size of the null bitmap for rows of `schema`; zero when nothing is nullable.
pub fn null_bitmap_size(schema: &Schema) -> usize {
    if schema.has_nullables() {
        bitmap_size(schema.num_columns())
    } else {
        0
    }
}

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Timestamp(i64),
    String(Bytes),
    Binary(Bytes),
}

impl Cell {
    pub fn data_type(&self) -> DataType {
        match self {
            Cell::Bool(_) => DataType::Bool,
            Cell::Int8(_) => DataType::Int8,
            Cell::Int16(_) => DataType::Int16,
            Cell::Int32(_) => DataType::Int32,
            Cell::Int64(_) => DataType::Int64,
            Cell::Float(_) => DataType::Float,
            Cell::Double(_) => DataType::Double,
            Cell::Timestamp(_) => DataType::Timestamp,
            Cell::String(_) => DataType::String,
            Cell::Binary(_) => DataType::Binary,
        }
    }

    /// Length of the out-of-line data for variable-length cells.
    fn indirect_len(&self) -> usize {
        match self {
            Cell::String(b) | Cell::Binary(b) => b.len(),
            _ => 0,
        }
    }
}

/// A row being built for a single operation.
#[derive(Debug, Clone)]
pub struct PartialRow {
    schema: Arc<Schema>,
    isset: Vec<u8>,
    nulls: Vec<u8>,
    cells: Vec<Option<Cell>>,
}

impl PartialRow {
    pub fn new(schema: Arc<Schema>) -> Self {
        let n = schema.num_columns();
        Self {
            isset: vec![0; bitmap_size(n)],
            nulls: vec![0; bitmap_size(n)],
            cells: vec![None; n],
            schema,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn set(&mut self, idx: usize, cell: Cell) -> StorageResult<()> {
        let column = self.checked_column(idx)?;
        if column.data_type != cell.data_type() {
            return Err(StorageError::InvalidArgument(format!(
                "column {} is {:?}, got {:?}",
                column.name,
                column.data_type,
                cell.data_type()
            )));
        }
        set_bit(&mut self.isset, idx, true);
        set_bit(&mut self.nulls, idx, false);
        self.cells[idx] = Some(cell);
        Ok(())
    }

    pub fn set_binary(&mut self, idx: usize, value: Bytes) -> StorageResult<()> {
        self.set(idx, Cell::Binary(value))
    }

    pub fn set_int64(&mut self, idx: usize, value: i64) -> StorageResult<()> {
        self.set(idx, Cell::Int64(value))
    }

    pub fn set_null(&mut self, idx: usize) -> StorageResult<()> {
        let column = self.checked_column(idx)?;
        if !column.nullable {
            return Err(StorageError::InvalidArgument(format!(
                "column {} is not nullable",
                column.name
            )));
        }
        set_bit(&mut self.isset, idx, true);
        set_bit(&mut self.nulls, idx, true);
        self.cells[idx] = None;
        Ok(())
    }

    /// Marks a column as not set.
    pub fn unset(&mut self, idx: usize) -> StorageResult<()> {
        self.checked_column(idx)?;
        set_bit(&mut self.isset, idx, false);
        set_bit(&mut self.nulls, idx, false);
        self.cells[idx] = None;
        Ok(())
    }

    pub fn is_column_set(&self, idx: usize) -> bool {
        get_bit(&self.isset, idx)
    }

    pub fn is_null(&self, idx: usize) -> bool {
        get_bit(&self.nulls, idx)
    }

    pub fn cell(&self, idx: usize) -> Option<&Cell> {
        self.cells.get(idx).and_then(Option::as_ref)
    }

    /// True once every key column has a value.
    pub fn is_key_set(&self) -> bool {
        (0..self.schema.num_key_columns()).all(|i| self.is_column_set(i))
    }

    fn checked_column(&self, idx: usize) -> StorageResult<&ColumnSchema> {
        if idx >= self.schema.num_columns() {
            return Err(StorageError::InvalidArgument(format!(
                "column index {} out of range",
                idx
            )));
        }
        Ok(self.schema.column(idx))
    }
}

fn set_bit(bitmap: &mut [u8], idx: usize, value: bool) {
    let mask = 1u8 << (idx % 8);
    if value {
        bitmap[idx / 8] |= mask;
    } else {
        bitmap[idx / 8] &= !mask;
    }
}

fn get_bit(bitmap: &[u8], idx: usize) -> bool {
    bitmap
        .get(idx / 8)
        .map(|byte| byte & (1u8 << (idx % 8)) != 0)
        .unwrap_or(false)
}

/// Estimated encoded size of a row operation, used to pre-size buffers.
///
/// Advisory only: an undercount costs a reallocation, never correctness.
pub fn size_in_buffer(row: &PartialRow) -> usize {
    let schema = row.schema();
    let mut size = 1; // operation kind

    size += bitmap_size(schema.num_columns());
    size += null_bitmap_size(schema);

    for idx in 0..schema.num_columns() {
        if row.is_column_set(idx) && !row.is_null(idx) {
            let data_type = schema.column(idx).data_type;
            size += data_type.size();
            if data_type.is_variable_length() {
                size += row.cell(idx).map(Cell::indirect_len).unwrap_or(0);
            }
        }
    }
    size
}
