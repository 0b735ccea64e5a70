use super::column::{Column, ColumnValues, Value};
use super::LogBuffer;
use crate::source::Section;

/// Exposes only some columns of another buffer.
///
/// Writes to hidden columns are refused, so a stage can hand a narrowed
/// destination to its upstream without copying.
pub struct ColumnSubsetView<'a> {
    inner: &'a mut dyn LogBuffer,
    columns: Vec<&'static Column>,
}

impl<'a> ColumnSubsetView<'a> {
    /// Columns the inner buffer lacks are dropped from the view.
    pub fn new(inner: &'a mut dyn LogBuffer, columns: &[&'static Column]) -> Self {
        let columns = columns
            .iter()
            .copied()
            .filter(|c| inner.contains(c))
            .collect();
        Self { inner, columns }
    }

    fn exposes(&self, column: &Column) -> bool {
        self.columns.iter().any(|c| *c == column)
    }
}

impl LogBuffer for ColumnSubsetView<'_> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn columns(&self) -> &[&'static Column] {
        &self.columns
    }

    fn value(&self, column: &Column, row: usize) -> Option<Value> {
        if !self.exposes(column) {
            return None;
        }
        self.inner.value(column, row)
    }

    fn text(&self, column: &Column, row: usize) -> Option<&str> {
        if !self.exposes(column) {
            return None;
        }
        self.inner.text(column, row)
    }

    fn read_into(&self, column: &Column, rows: Section, dest: &mut ColumnValues, dest_index: usize) -> bool {
        self.exposes(column) && self.inner.read_into(column, rows, dest, dest_index)
    }

    fn write_from(&mut self, column: &Column, dest_index: usize, src: &ColumnValues, src_rows: Section) -> bool {
        self.exposes(column) && self.inner.write_from(column, dest_index, src, src_rows)
    }

    fn set_value(&mut self, column: &Column, row: usize, value: Value) -> bool {
        self.exposes(column) && self.inner.set_value(column, row, value)
    }

    fn fill_default(&mut self, column: &Column, rows: Section) {
        if self.exposes(column) {
            self.inner.fill_default(column, rows);
        }
    }
}

/// A window of rows of another buffer; row 0 of the view is
/// `section.index` of the inner buffer.
pub struct SectionView<'a> {
    inner: &'a mut dyn LogBuffer,
    section: Section,
}

impl<'a> SectionView<'a> {
    /// The window is clipped to the inner buffer's length.
    pub fn new(inner: &'a mut dyn LogBuffer, section: Section) -> Self {
        let end = section.end().min(inner.len());
        let index = section.index.min(end);
        Self {
            inner,
            section: Section::new(index, end - index),
        }
    }

    fn clip(&self, start: usize, count: usize) -> Section {
        let start = start.min(self.section.count);
        let count = count.min(self.section.count - start);
        Section::new(self.section.index + start, count)
    }
}

impl LogBuffer for SectionView<'_> {
    fn len(&self) -> usize {
        self.section.count
    }

    fn columns(&self) -> &[&'static Column] {
        self.inner.columns()
    }

    fn value(&self, column: &Column, row: usize) -> Option<Value> {
        if row >= self.section.count {
            return None;
        }
        self.inner.value(column, self.section.index + row)
    }

    fn text(&self, column: &Column, row: usize) -> Option<&str> {
        if row >= self.section.count {
            return None;
        }
        self.inner.text(column, self.section.index + row)
    }

    fn read_into(&self, column: &Column, rows: Section, dest: &mut ColumnValues, dest_index: usize) -> bool {
        self.inner
            .read_into(column, self.clip(rows.index, rows.count), dest, dest_index)
    }

    fn write_from(&mut self, column: &Column, dest_index: usize, src: &ColumnValues, src_rows: Section) -> bool {
        let target = self.clip(dest_index, src_rows.count);
        let src_rows = Section::new(src_rows.index, target.count);
        self.inner.write_from(column, target.index, src, src_rows)
    }

    fn set_value(&mut self, column: &Column, row: usize, value: Value) -> bool {
        row < self.section.count && self.inner.set_value(column, self.section.index + row, value)
    }

    fn fill_default(&mut self, column: &Column, rows: Section) {
        let target = self.clip(rows.index, rows.count);
        self.inner.fill_default(column, target);
    }
}

/// A bare column vector seen as a one-column buffer
pub struct SingleColumnBuffer<'a> {
    column: [&'static Column; 1],
    values: &'a mut ColumnValues,
}

impl<'a> SingleColumnBuffer<'a> {
    pub fn new(column: &'static Column, values: &'a mut ColumnValues) -> Self {
        Self {
            column: [column],
            values,
        }
    }

    fn is_column(&self, column: &Column) -> bool {
        self.column[0] == column
    }
}

impl LogBuffer for SingleColumnBuffer<'_> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn columns(&self) -> &[&'static Column] {
        &self.column
    }

    fn value(&self, column: &Column, row: usize) -> Option<Value> {
        if !self.is_column(column) {
            return None;
        }
        self.values.get(row)
    }

    fn text(&self, column: &Column, row: usize) -> Option<&str> {
        if !self.is_column(column) {
            return None;
        }
        self.values.as_text()?.get(row).map(String::as_str)
    }

    fn read_into(&self, column: &Column, rows: Section, dest: &mut ColumnValues, dest_index: usize) -> bool {
        self.is_column(column) && dest.copy_from(dest_index, &*self.values, rows)
    }

    fn write_from(&mut self, column: &Column, dest_index: usize, src: &ColumnValues, src_rows: Section) -> bool {
        self.is_column(column) && self.values.copy_from(dest_index, src, src_rows)
    }

    fn set_value(&mut self, column: &Column, row: usize, value: Value) -> bool {
        self.is_column(column) && self.values.set(row, value)
    }

    fn fill_default(&mut self, column: &Column, rows: Section) {
        if self.is_column(column) {
            let column = self.column[0];
            self.values.fill_default(column, rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::column::{LINE_NUMBER, RAW_CONTENT, TIMESTAMP};
    use crate::buffer::LogBufferArray;

    #[test]
    fn test_subset_view_hides_columns() {
        let mut buffer = LogBufferArray::new(&[&RAW_CONTENT, &LINE_NUMBER], 2);
        let mut view = ColumnSubsetView::new(&mut buffer, &[&RAW_CONTENT, &TIMESTAMP]);

        assert_eq!(view.columns(), &[&RAW_CONTENT]);
        assert!(!view.set_value(&LINE_NUMBER, 0, Value::Integer(3)));
        assert!(view.set_value(&RAW_CONTENT, 0, Value::Text("shared".into())));

        assert_eq!(buffer.text(&RAW_CONTENT, 0), Some("shared"));
        assert_eq!(buffer.value(&LINE_NUMBER, 0), Some(Value::Integer(0)));
    }

    #[test]
    fn test_section_view_offsets_rows() {
        let mut buffer = LogBufferArray::new(&[&RAW_CONTENT], 5);
        {
            let mut view = SectionView::new(&mut buffer, Section::new(2, 2));
            assert_eq!(view.len(), 2);
            let src = ColumnValues::Text(vec!["x".into(), "y".into(), "z".into()]);
            view.write_from(&RAW_CONTENT, 0, &src, Section::new(0, 3));
        }
        let texts: Vec<_> = (0..5).map(|i| buffer.text(&RAW_CONTENT, i).unwrap()).collect();
        assert_eq!(texts, vec!["", "", "x", "y", ""]);
    }

    #[test]
    fn test_section_view_fill_default_is_clipped() {
        let mut buffer = LogBufferArray::new(&[&LINE_NUMBER], 4);
        for row in 0..4 {
            buffer.set_value(&LINE_NUMBER, row, Value::Integer(row as i64 + 1));
        }
        SectionView::new(&mut buffer, Section::new(1, 2)).fill_all_default(Section::new(0, 10));

        let numbers: Vec<_> = (0..4).map(|i| buffer.entry(i).line_number()).collect();
        assert_eq!(numbers, vec![1, 0, 0, 4]);
    }

    #[test]
    fn test_single_column_buffer_writes_through() {
        let mut values = ColumnValues::new(&RAW_CONTENT, 2);
        {
            let mut buffer = SingleColumnBuffer::new(&RAW_CONTENT, &mut values);
            buffer.set_value(&RAW_CONTENT, 1, Value::Text("hello".into()));
            assert!(!buffer.contains(&TIMESTAMP));
        }
        assert_eq!(values.as_text().unwrap()[1], "hello");
    }
}
