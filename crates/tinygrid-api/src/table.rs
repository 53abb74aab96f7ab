//! Column-oriented result set returned by every accessor.
//!
//! Cells are `serde_json::Value`s so JSON pages and CSV documents land in
//! the same shape without per-report schemas.

use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{Read, Write};

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

/// Rectangular table: every row holds exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given header.
    #[must_use]
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from positional rows.
    ///
    /// Short rows are padded with `null`, long rows truncated.
    #[must_use]
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Builds a table from JSON objects.
    ///
    /// With `columns == None` the header is the union of keys in order of
    /// first appearance.
    #[must_use]
    pub fn from_records(columns: Option<Vec<String>>, records: &[Map<String, Value>]) -> Self {
        let columns = columns.unwrap_or_else(|| {
            let mut seen = HashSet::new();
            records
                .iter()
                .flat_map(Map::keys)
                .filter(|key| seen.insert(key.as_str()))
                .cloned()
                .collect()
        });
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Reads a headed CSV document.
    ///
    /// Empty fields become `null`; integer and finite float fields become
    /// numbers; everything else stays a string.
    ///
    /// # Errors
    ///
    /// Returns the `csv` error for malformed input.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let columns: Vec<String> = csv_reader.headers()?.iter().map(String::from).collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(infer_cell).collect());
        }
        Ok(Self::from_rows(columns, rows))
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `name` in the header.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Whether `name` is in the header.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// First of `candidates` present in the header.
    #[must_use]
    pub fn find_column<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|c| self.has_column(c))
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(idx)))
    }

    /// Cell at `row` in column `name`.
    #[must_use]
    pub fn cell(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)
    }

    /// Renames columns through `mapping`.
    ///
    /// A rename that would collide with an existing column is skipped.
    pub fn rename_columns<'m>(&mut self, mapping: impl Fn(&str) -> Option<&'m str>) {
        for i in 0..self.columns.len() {
            let Some(current) = self.columns.get(i) else {
                continue;
            };
            let Some(target) = mapping(current) else {
                continue;
            };
            if target == current || self.has_column(target) {
                continue;
            }
            if let Some(slot) = self.columns.get_mut(i) {
                *slot = String::from(target);
            }
        }
    }

    /// Adds or replaces a column. `values` is padded with `null` or
    /// truncated to the row count.
    pub fn add_column(&mut self, name: &str, mut values: Vec<Value>) {
        values.resize(self.rows.len(), Value::Null);
        if let Some(idx) = self.column_index(name) {
            for (row, value) in self.rows.iter_mut().zip(values) {
                if let Some(cell) = row.get_mut(idx) {
                    *cell = value;
                }
            }
        } else {
            self.columns.push(String::from(name));
            for (row, value) in self.rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
    }

    /// Adds or replaces a column holding `value` on every row.
    pub fn fill_column(&mut self, name: &str, value: &Value) {
        let values = vec![value.clone(); self.rows.len()];
        self.add_column(name, values);
    }

    /// Removes the named columns; unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        if keep.iter().all(|k| *k) {
            return;
        }
        self.columns = retain_by_mask(std::mem::take(&mut self.columns), &keep);
        for row in &mut self.rows {
            *row = retain_by_mask(std::mem::take(row), &keep);
        }
    }

    /// Moves the named columns (those present) to the front, in the given
    /// order; the rest keep their relative order.
    pub fn reorder_front(&mut self, names: &[&str]) {
        let mut order: Vec<usize> = names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        let front: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..self.columns.len()).filter(|i| !front.contains(i)));

        self.columns = permute(&self.columns, &order);
        for row in &mut self.rows {
            *row = permute(row, &order);
        }
    }

    /// Keeps rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Value]) -> bool) {
        self.rows.retain(|row| keep(row));
    }

    /// Concatenates tables in argument order.
    ///
    /// The header is the union of all headers (first appearance wins);
    /// missing cells are `null`.
    #[must_use]
    pub fn concat(tables: impl IntoIterator<Item = Self>) -> Self {
        let tables: Vec<Self> = tables.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for col in &table.columns {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(Self::len).sum());
        for table in tables {
            let positions: Vec<Option<usize>> =
                columns.iter().map(|c| table.column_index(c)).collect();
            for row in table.rows {
                rows.push(
                    positions
                        .iter()
                        .map(|pos| {
                            pos.and_then(|i| row.get(i).cloned())
                                .unwrap_or(Value::Null)
                        })
                        .collect(),
                );
            }
        }
        Self { columns, rows }
    }

    /// Stable chronological sort on an RFC 3339 column.
    ///
    /// Rows whose cell does not parse sort last, in their original order.
    pub fn sort_by_time(&mut self, column: &str) {
        let Some(idx) = self.column_index(column) else {
            return;
        };
        self.rows.sort_by_cached_key(|row| {
            let parsed = row.get(idx).and_then(parse_rfc3339);
            (parsed.is_none(), parsed)
        });
    }

    /// Drops rows whose key cells repeat an earlier row; the first
    /// occurrence is kept.
    ///
    /// When any key column is absent the whole row is the key, so rows
    /// are only merged when every cell matches.
    pub fn dedup_by(&mut self, key_columns: &[&str]) {
        let key = if !key_columns.is_empty() && key_columns.iter().all(|c| self.has_column(c)) {
            RowKey::named(self, key_columns)
        } else {
            RowKey::Whole
        };
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(key.render(row)));
    }

    /// Drops rows whose key also occurs in `earlier`.
    ///
    /// Rows within `self` are never merged with each other. Key columns
    /// must exist in both tables; otherwise the key is every column of
    /// `self`, looked up by name in `earlier`.
    pub fn retain_unseen(&mut self, earlier: &Self, key_columns: &[&str]) {
        if self.is_empty() || earlier.is_empty() {
            return;
        }
        let keyed = !key_columns.is_empty()
            && key_columns
                .iter()
                .all(|c| self.has_column(c) && earlier.has_column(c));
        let names: Vec<&str> = if keyed {
            key_columns.to_vec()
        } else {
            self.columns.iter().map(String::as_str).collect()
        };

        let theirs = RowKey::named(earlier, &names);
        let seen: HashSet<Vec<String>> = earlier.rows.iter().map(|row| theirs.render(row)).collect();
        let ours = RowKey::named(self, &names);
        let before = self.rows.len();
        self.rows.retain(|row| !seen.contains(&ours.render(row)));

        let dropped = before.saturating_sub(self.rows.len());
        if dropped > 0 {
            tracing::debug!(dropped, key = ?names, "Dropped overlapping rows");
        }
    }

    /// Writes the table as CSV with a header row.
    ///
    /// # Errors
    ///
    /// Returns the `csv` error if writing fails.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|v| cell_text(v).into_owned()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// Which cells of a row identify it.
enum RowKey {
    /// Every cell.
    Whole,
    /// Cells at these positions; `None` renders as empty.
    Cells(Vec<Option<usize>>),
}

impl RowKey {
    /// Cells of `table` named `names`, in that order.
    fn named(table: &Table, names: &[&str]) -> Self {
        Self::Cells(names.iter().map(|c| table.column_index(c)).collect())
    }

    fn render(&self, row: &[Value]) -> Vec<String> {
        match self {
            Self::Whole => row.iter().map(|v| cell_text(v).into_owned()).collect(),
            Self::Cells(indices) => indices
                .iter()
                .map(|i| {
                    i.and_then(|i| row.get(i))
                        .map(|v| cell_text(v).into_owned())
                        .unwrap_or_default()
                })
                .collect(),
        }
    }
}

/// Renders a cell as plain text: strings unquoted, `null` empty.
#[must_use]
pub fn cell_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Parses an RFC 3339 cell.
fn parse_rfc3339(value: &Value) -> Option<DateTime<FixedOffset>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

/// Converts a CSV field to `null`, a number or a string.
fn infer_cell(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = field.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = field
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(n);
    }
    Value::String(String::from(field))
}

fn retain_by_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, k)| k.then_some(item))
        .collect()
}

fn permute<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().filter_map(|&i| items.get(i).cloned()).collect()
}
