//! Tabular view of a response: CSV/JSON export and a terminal preview.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::row::{Row, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Lay `rows` out under `columns`. Cells are picked by column name, so a
    /// row missing a column gets a null cell there.
    pub fn from_rows(columns: Vec<String>, rows: &[Row]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column values, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| crate::Error::Output(e.to_string()))
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(file)?;
        info!(path = %path.display(), rows = self.rows.len(), "wrote csv");
        Ok(())
    }

    /// Rows as a JSON array of objects keyed by column name.
    pub fn to_json(&self) -> Result<String> {
        let mut records = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut record = serde_json::Map::new();
            for (column, value) in self.columns.iter().zip(row) {
                record.insert(column.clone(), serde_json::to_value(value)?);
            }
            records.push(serde_json::Value::Object(record));
        }
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Aligned text rendering of the first `max_rows` rows, followed by a
    /// `...` line when rows were left out.
    pub fn render_preview(&self, max_rows: usize) -> String {
        let shown: Vec<Vec<String>> = self
            .rows
            .iter()
            .take(max_rows)
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                shown
                    .iter()
                    .map(|row| row[i].len())
                    .chain(std::iter::once(c.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:>width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
        };
        out.push_str(&line(&self.columns));
        out.push('\n');
        for row in &shown {
            out.push_str(&line(row));
            out.push('\n');
        }
        if self.rows.len() > max_rows {
            out.push_str("...\n");
        }
        out
    }
}
