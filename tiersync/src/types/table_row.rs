use std::mem::size_of;

use crate::types::cell::Cell;
use crate::types::sized::SizeHint;

/// One row of a table, values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }

    /// Returns the values at `positions`, in that order.
    pub fn project(&self, positions: &[usize]) -> Vec<Cell> {
        positions
            .iter()
            .map(|&position| self.values.get(position).cloned().unwrap_or(Cell::Null))
            .collect()
    }
}

impl SizeHint for TableRow {
    fn size_hint(&self) -> usize {
        self.values.iter().fold(size_of::<TableRow>(), |total, cell| {
            total
                .saturating_add(size_of::<Cell>())
                .saturating_add(cell_heap_bytes(cell))
        })
    }
}

/// Estimates the heap bytes owned by a value.
fn cell_heap_bytes(cell: &Cell) -> usize {
    match cell {
        Cell::String(value) => value.capacity(),
        Cell::Bytes(value) => value.capacity(),
        // Digits are stored in 32-bit words, roughly nine decimal digits each.
        Cell::Numeric(value) => (value.digits() as usize / 9 + 1) * size_of::<u32>(),
        Cell::Json(value) => value.to_string().len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_key_columns() {
        let row = TableRow::new(vec![Cell::I64(1), Cell::String("a".into()), Cell::Bool(true)]);
        assert_eq!(row.project(&[2, 0]), vec![Cell::Bool(true), Cell::I64(1)]);
        assert_eq!(row.project(&[7]), vec![Cell::Null]);
    }

    #[test]
    fn size_grows_with_owned_data() {
        let small = TableRow::new(vec![Cell::String(String::new())]);
        let large = TableRow::new(vec![Cell::String("x".repeat(1024))]);
        assert!(large.size_hint() >= small.size_hint() + 1024);
    }
}
