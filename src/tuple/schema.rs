use std::collections::HashMap;

use crate::common::{Result, TabulaError};

use super::{ColType, Value};

/// A single fixed-width column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    col_type: ColType,
    /// Width in bytes
    len: usize,
    /// Byte offset inside a record
    offset: usize,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn col_type(&self) -> ColType {
        self.col_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes of this column inside `record`.
    pub fn slice<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.offset..self.offset + self.len]
    }
}

/// Layout of the fixed-size records of a table. Columns are packed in
/// declaration order with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
    name_to_index: HashMap<String, usize>,
    record_size: usize,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| TabulaError::ColumnNotFound(name.to_string()))
    }

    /// Resolves a list of column names to indexes.
    pub fn column_indexes(&self, names: &[&str]) -> Result<Vec<usize>> {
        names.iter().map(|name| self.column_index(name)).collect()
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Encodes one value per column into a record.
    pub fn encode_record(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(TabulaError::ValueCountMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        let mut record = Vec::with_capacity(self.record_size);
        for (column, value) in self.columns.iter().zip(values) {
            record.extend(encode_column(column, value)?);
        }
        Ok(record)
    }

    pub fn decode_record(&self, record: &[u8]) -> Result<Vec<Value>> {
        self.check_record(record)?;
        self.columns
            .iter()
            .map(|column| {
                Value::decode(column.slice(record), column.col_type).ok_or_else(|| {
                    TabulaError::TypeMismatch {
                        column: column.name.clone(),
                        expected: column.col_type.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Concatenated bytes of the given columns, the key format of an index
    /// over them.
    pub fn key_of(&self, record: &[u8], col_idxs: &[usize]) -> Result<Vec<u8>> {
        self.check_record(record)?;
        let mut key = Vec::with_capacity(self.key_len(col_idxs));
        for &idx in col_idxs {
            key.extend_from_slice(self.column_at(idx)?.slice(record));
        }
        Ok(key)
    }

    /// Builds an index key from one value per column.
    pub fn key_from_values(&self, col_idxs: &[usize], values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != col_idxs.len() {
            return Err(TabulaError::ValueCountMismatch {
                expected: col_idxs.len(),
                actual: values.len(),
            });
        }
        let mut key = Vec::with_capacity(self.key_len(col_idxs));
        for (&idx, value) in col_idxs.iter().zip(values) {
            key.extend(encode_column(self.column_at(idx)?, value)?);
        }
        Ok(key)
    }

    pub fn key_len(&self, col_idxs: &[usize]) -> usize {
        col_idxs
            .iter()
            .filter_map(|&idx| self.columns.get(idx))
            .map(|column| column.len)
            .sum()
    }

    fn column_at(&self, idx: usize) -> Result<&Column> {
        self.columns
            .get(idx)
            .ok_or_else(|| TabulaError::ColumnNotFound(format!("#{}", idx)))
    }

    fn check_record(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(TabulaError::RecordSizeMismatch {
                expected: self.record_size,
                actual: record.len(),
            });
        }
        Ok(())
    }
}

fn encode_column(column: &Column, value: &Value) -> Result<Vec<u8>> {
    value
        .encode(column.col_type, column.len)
        .ok_or_else(|| TabulaError::TypeMismatch {
            column: column.name.clone(),
            expected: format!("{}({})", column.col_type, column.len),
        })
}

/// Builder for constructing schemas fluently.
pub struct SchemaBuilder {
    columns: Vec<(String, ColType, usize)>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn int(self, name: impl Into<String>) -> Self {
        self.column(name, ColType::Int, 4)
    }

    pub fn bigint(self, name: impl Into<String>) -> Self {
        self.column(name, ColType::BigInt, 8)
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.column(name, ColType::Float, 8)
    }

    pub fn string(self, name: impl Into<String>, len: usize) -> Self {
        self.column(name, ColType::String, len)
    }

    pub fn column(mut self, name: impl Into<String>, col_type: ColType, len: usize) -> Self {
        self.columns.push((name.into(), col_type, len));
        self
    }

    /// Assigns offsets and validates widths and names.
    pub fn build(self) -> Result<Schema> {
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut name_to_index = HashMap::new();
        let mut offset = 0;

        for (i, (name, col_type, len)) in self.columns.into_iter().enumerate() {
            if !col_type.accepts_len(len) {
                return Err(TabulaError::InvalidColumn(format!(
                    "{} cannot be {} bytes wide",
                    col_type, len
                )));
            }
            if name_to_index.insert(name.clone(), i).is_some() {
                return Err(TabulaError::InvalidColumn(format!("duplicate column {}", name)));
            }
            columns.push(Column {
                name,
                col_type,
                len,
                offset,
            });
            offset += len;
        }

        if columns.is_empty() {
            return Err(TabulaError::InvalidColumn("schema has no columns".to_string()));
        }

        Ok(Schema {
            columns,
            name_to_index,
            record_size: offset,
        })
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
