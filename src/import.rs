use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use diesel::prelude::*;

use crate::actions::{self, UNASSIGNED_FOLDER_ID};
use crate::errors::{PortalError, PortalResult};
use crate::models::{compute_model_root, timestamp, NewNonconformity, Severity};

/// One nonconformity row of a spreadsheet export.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub model_version: String,
    pub model_root: String,
    pub customer_supplier: String,
    pub mo: String,
    pub line: String,
    pub work_station: String,
    pub department: String,
    pub severity: Severity,
    pub description: String,
    pub defective_qty: f64,
    pub inspection_qty: f64,
    pub lot_qty: f64,
}

/// Header lookup: the first listed column that exists and is non-blank wins.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        Columns(
            headers
                .into_iter()
                .enumerate()
                .map(|(i, h)| (h.trim().to_lowercase(), i))
                .collect(),
        )
    }

    fn get(&self, record: &[String], names: &[&str]) -> String {
        names
            .iter()
            .filter_map(|n| self.0.get(&n.to_lowercase()))
            .filter_map(|&i| record.get(i))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or("")
            .to_string()
    }

    fn quantity(&self, record: &[String], names: &[&str], line: u64) -> PortalResult<f64> {
        let raw = self.get(record, names);
        if raw.is_empty() {
            return Ok(0.0);
        }
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| {
                PortalError::bad_request(format!(
                    "line {}: {} '{}' is not a non-negative number",
                    line, names[0], raw
                ))
            })
    }

    /// Rows with neither a model version nor a root yield `None`.
    fn row(&self, record: &[String], line: u64) -> PortalResult<Option<ImportRow>> {
        let version = self.get(record, &["ModelVersion", "model", "version"]);
        let mut root = self.get(record, &["ModelRoot", "root"]);
        if root.is_empty() {
            root = compute_model_root(&version);
        }
        if version.is_empty() && root.is_empty() {
            return Ok(None);
        }

        let severity_raw = self.get(record, &["Severity", "severity"]);
        let severity = if severity_raw.is_empty() {
            Severity::Major
        } else {
            severity_raw.parse::<Severity>().unwrap_or_else(|_| {
                tracing::warn!(line, severity = %severity_raw, "unknown severity, importing as Major");
                Severity::Major
            })
        };

        Ok(Some(ImportRow {
            model_version: if version.is_empty() { root.clone() } else { version },
            model_root: root,
            customer_supplier: self.get(record, &["CustomerSupplier", "customer"]),
            mo: self.get(record, &["MO", "mo"]),
            line: self.get(record, &["Line", "line"]),
            work_station: self.get(record, &["WorkStation", "station"]),
            department: self.get(record, &["Department", "dept"]),
            severity,
            description: self.get(record, &["Description", "desc"]),
            defective_qty: self.quantity(record, &["DefectiveQty", "dq"], line)?,
            inspection_qty: self.quantity(record, &["InspectionQty", "iq"], line)?,
            lot_qty: self.quantity(record, &["LotQty", "lq"], line)?,
        }))
    }
}

/// Uploaded spreadsheet format, picked from the file name or, failing that,
/// from the zip signature every `.xlsx` starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Xlsx,
}

impl ImportFormat {
    pub fn detect(filename: Option<&str>, data: &[u8]) -> PortalResult<Self> {
        match filename.map(|f| f.trim().to_lowercase()) {
            Some(f) if f.ends_with(".csv") => Ok(ImportFormat::Csv),
            Some(f) if f.ends_with(".xlsx") => Ok(ImportFormat::Xlsx),
            Some(f) if !f.is_empty() => Err(PortalError::bad_request(
                "only .csv and .xlsx files can be imported",
            )),
            _ if data.starts_with(b"PK\x03\x04") => Ok(ImportFormat::Xlsx),
            _ => Ok(ImportFormat::Csv),
        }
    }
}

pub fn parse(format: ImportFormat, data: &[u8]) -> PortalResult<Vec<ImportRow>> {
    match format {
        ImportFormat::Csv => parse_csv(data),
        ImportFormat::Xlsx => parse_xlsx(data),
    }
}

/// Parse a CSV export. Rows with neither a model version nor a root are skipped.
pub fn parse_csv(data: &[u8]) -> PortalResult<Vec<ImportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);
    let columns = Columns::new(reader.headers()?.iter());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        rows.extend(columns.row(&cells, line)?);
    }
    Ok(rows)
}

/// Parse the first sheet of an `.xlsx` workbook; its first row holds the headers.
pub fn parse_xlsx(data: &[u8]) -> PortalResult<Vec<ImportRow>> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PortalError::bad_request("workbook has no sheets"))??;
    rows_from_range(&range)
}

fn rows_from_range(range: &Range<Data>) -> PortalResult<Vec<ImportRow>> {
    let first_row = range.start().map(|(row, _)| u64::from(row)).unwrap_or(0);
    let mut sheet = range
        .rows()
        .map(|cells| cells.iter().map(|c| c.to_string()).collect::<Vec<String>>());
    let headers = match sheet.next() {
        Some(headers) => headers,
        None => return Ok(Vec::new()),
    };
    let columns = Columns::new(headers.iter().map(String::as_str));

    let mut rows = Vec::new();
    for (i, cells) in sheet.enumerate() {
        // 1-based sheet row; the header row comes first
        let line = first_row + i as u64 + 2;
        rows.extend(columns.row(&cells, line)?);
    }
    Ok(rows)
}

/// Insert every row in one transaction. New models land in `Unassigned`;
/// existing ones keep their folder.
pub fn import_rows(
    rows: &[ImportRow],
    reporter: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<usize> {
    conn.transaction::<_, PortalError, _>(|conn| {
        actions::ensure_default_folder(conn)?;
        let mut imported = 0;
        for row in rows {
            let folder = match actions::find_model_by_version(&row.model_version, conn)? {
                Some(existing) => existing.folder_id,
                None => Some(UNASSIGNED_FOLDER_ID),
            };
            let model = actions::upsert_model_with_root(
                &row.model_version,
                &row.model_root,
                Some(&row.customer_supplier),
                folder,
                conn,
            )?;
            let record = NewNonconformity {
                created_at: timestamp(),
                model_id: model.id,
                model_root: row.model_root.clone(),
                customer_supplier: row.customer_supplier.clone(),
                mo: row.mo.clone(),
                line: row.line.clone(),
                work_station: row.work_station.clone(),
                department: row.department.clone(),
                unit_head: String::new(),
                responsibility: String::new(),
                root_cause: String::new(),
                corrective_action: String::new(),
                discovery_dept: String::new(),
                source: String::new(),
                defective_category: String::new(),
                defective_item: String::new(),
                defective_outflow: "None".to_string(),
                defective_qty: row.defective_qty,
                inspection_qty: row.inspection_qty,
                lot_qty: row.lot_qty,
                severity: row.severity.as_str().to_string(),
                description: row.description.clone(),
                reporter: reporter.to_string(),
                cover_image: None,
            };
            actions::insert_nonconformity(&record, &[], conn)?;
            imported += 1;
        }
        Ok(imported)
    })
}
