//! Endpoint table model. Each listing fully replaces the table body with one
//! row per endpoint record, four cells per row in (ip, mac, encap,
//! resolve-link) order. Resolution results are keyed by row index and
//! checked against the row's IP, so a late result can never land in another
//! row's cell.

use crate::apic::types::EndpointRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    /// Per-row resolve control. Carries the row's IP as its identifier,
    /// which stays stable after the IP cell's text is replaced.
    ResolveLink(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    cells: Vec<Cell>,
}

impl TableRow {
    fn from_record(record: &EndpointRecord) -> Self {
        Self {
            cells: vec![
                Cell::Text(record.ip.clone()),
                Cell::Text(record.mac.clone()),
                Cell::Text(record.encap.clone()),
                Cell::ResolveLink(record.ip.clone()),
            ],
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The row's endpoint IP, read from the resolve-link cell.
    pub fn ip(&self) -> Option<&str> {
        self.cells.iter().find_map(|cell| match cell {
            Cell::ResolveLink(ip) => Some(ip.as_str()),
            Cell::Text(_) => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct EndpointTable {
    rows: Vec<TableRow>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Full table-body replace: previous rows are discarded, one row per
    /// record in listing order.
    pub fn replace_all(&mut self, records: &[EndpointRecord]) {
        self.rows = records.iter().map(TableRow::from_record).collect();
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply a resolution result to the row at `index`. The row must still
    /// carry the expected IP; otherwise the result is dropped (stale reply
    /// after a re-listing, or an index that no longer exists). A ptr of
    /// `"n/a"` renders as `"<ip> (n/a)"`; anything else replaces the cell
    /// text with exactly the ptr value. Returns whether a cell was updated.
    pub fn apply_resolution(&mut self, index: usize, ip: &str, ptr: &str) -> bool {
        let Some(row) = self.rows.get_mut(index) else {
            log::debug!("dropping resolution for {}: row {} no longer exists", ip, index);
            return false;
        };
        if row.ip() != Some(ip) {
            log::debug!(
                "dropping resolution for {}: row {} now holds {:?}",
                ip,
                index,
                row.ip()
            );
            return false;
        }
        let text = if ptr == "n/a" {
            format!("{} (n/a)", ip)
        } else {
            ptr.to_string()
        };
        row.cells[0] = Cell::Text(text);
        true
    }

    /// Plain-text rendering for the terminal.
    pub fn render(&self) -> String {
        let headers = ["ip", "mac", "encap"];
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in &self.rows {
            for (i, cell) in row.cells().iter().take(3).enumerate() {
                if let Cell::Text(text) = cell {
                    widths[i] = widths[i].max(text.len());
                }
            }
        }

        let mut out = String::new();
        for (i, header) in headers.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", header, width = widths[i]));
        }
        out.push('\n');
        for (i, _) in headers.iter().enumerate() {
            out.push_str(&format!("{:-<width$}  ", "", width = widths[i]));
        }
        out.push('\n');

        for row in &self.rows {
            for (i, cell) in row.cells().iter().enumerate() {
                match cell {
                    Cell::Text(text) => {
                        out.push_str(&format!("{:<width$}  ", text, width = widths[i]))
                    }
                    Cell::ResolveLink(_) => out.push_str("[resolve]"),
                }
            }
            out.push('\n');
        }
        out
    }
}
