use super::column::{Column, ColumnValues, Value};
use super::entry::LogEntry;
use super::LogBuffer;
use crate::source::{LogSource, QueryOptions, Rows, Section};

/// Growable buffer owning one typed vector per column
#[derive(Debug, Clone)]
pub struct LogBufferArray {
    columns: Vec<&'static Column>,
    data: Vec<ColumnValues>,
    len: usize,
}

impl LogBufferArray {
    /// Buffer of `len` default rows. Duplicate columns are ignored.
    pub fn new(columns: &[&'static Column], len: usize) -> Self {
        let mut unique: Vec<&'static Column> = Vec::with_capacity(columns.len());
        for column in columns {
            if !unique.contains(column) {
                unique.push(column);
            }
        }
        let data = unique.iter().map(|c| ColumnValues::new(c, len)).collect();
        Self {
            columns: unique,
            data,
            len,
        }
    }

    /// Buffer holding `rows` of `source`, every column the source offers.
    pub fn from_source(source: &dyn LogSource, rows: &Rows<'_>, options: QueryOptions) -> Self {
        let mut buffer = Self::new(&source.columns(), rows.len());
        source.get_entries(rows, &mut buffer, 0, options);
        buffer
    }

    fn position(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    pub fn column(&self, column: &Column) -> Option<&ColumnValues> {
        self.position(column).map(|i| &self.data[i])
    }

    pub fn column_mut(&mut self, column: &Column) -> Option<&mut ColumnValues> {
        self.position(column).map(move |i| &mut self.data[i])
    }

    pub fn resize(&mut self, len: usize) {
        for (column, values) in self.columns.iter().zip(self.data.iter_mut()) {
            values.resize(column, len);
        }
        self.len = len;
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.resize(len);
        }
    }

    pub fn clear(&mut self) {
        self.resize(0);
    }

    /// Append one default row and return its index.
    pub fn push_default(&mut self) -> usize {
        let row = self.len;
        self.resize(row + 1);
        row
    }

    /// Fill `dest_index..` with `rows` of `source`.
    pub fn fill_from(
        &mut self,
        source: &dyn LogSource,
        rows: &Rows<'_>,
        dest_index: usize,
        options: QueryOptions,
    ) {
        source.get_entries(rows, self, dest_index, options);
    }

    /// Copy every row of the columns both buffers carry to `dest_index..`
    /// of `dest`.
    pub fn copy_to(&self, dest: &mut dyn LogBuffer, dest_index: usize) {
        let columns = dest.columns().to_vec();
        let rows = Section::new(0, self.len);
        for column in columns {
            if let Some(values) = self.column(column) {
                dest.write_from(column, dest_index, values, rows);
            }
        }
    }

    pub fn entry(&self, row: usize) -> LogEntry<'_> {
        LogEntry::new(self, row)
    }

    pub fn entries(&self) -> impl Iterator<Item = LogEntry<'_>> {
        (0..self.len).map(move |row| LogEntry::new(self, row))
    }
}

impl LogBuffer for LogBufferArray {
    fn len(&self) -> usize {
        self.len
    }

    fn columns(&self) -> &[&'static Column] {
        &self.columns
    }

    fn value(&self, column: &Column, row: usize) -> Option<Value> {
        self.column(column)?.get(row)
    }

    fn text(&self, column: &Column, row: usize) -> Option<&str> {
        self.column(column)?.as_text()?.get(row).map(String::as_str)
    }

    fn read_into(&self, column: &Column, rows: Section, dest: &mut ColumnValues, dest_index: usize) -> bool {
        match self.column(column) {
            Some(values) => dest.copy_from(dest_index, values, rows),
            None => false,
        }
    }

    fn write_from(&mut self, column: &Column, dest_index: usize, src: &ColumnValues, src_rows: Section) -> bool {
        match self.column_mut(column) {
            Some(values) => values.copy_from(dest_index, src, src_rows),
            None => false,
        }
    }

    fn set_value(&mut self, column: &Column, row: usize, value: Value) -> bool {
        match self.column_mut(column) {
            Some(values) => values.set(row, value),
            None => false,
        }
    }

    fn fill_default(&mut self, column: &Column, rows: Section) {
        let Some(i) = self.position(column) else {
            return;
        };
        let column = self.columns[i];
        self.data[i].fill_default(column, rows);
    }
}
