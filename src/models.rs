use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{first_piece, folders, models, nc_images, nonconformities};

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = folders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Folder {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = folders)]
pub struct NewFolder<'a> {
    pub name: &'a str,
}

/// A product model. `model_version` is the full part name, `model_root`
/// the normalised family it belongs to.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = models)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Model {
    pub id: i32,
    pub model_version: String,
    pub model_root: String,
    pub customer_supplier: Option<String>,
    pub folder_id: Option<i32>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = models)]
pub struct NewModel {
    pub model_version: String,
    pub model_root: String,
    pub customer_supplier: Option<String>,
    pub folder_id: Option<i32>,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = first_piece)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FirstPiece {
    pub id: i32,
    pub created_at: String,
    pub model_id: i32,
    pub model_root: String,
    pub sn: String,
    pub mo: String,
    pub status: String,
    pub review_notes: String,
    pub reporter: String,
    pub top_image: Option<String>,
    pub bottom_image: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = first_piece)]
pub struct NewFirstPiece {
    pub created_at: String,
    pub model_id: i32,
    pub model_root: String,
    pub sn: String,
    pub mo: String,
    pub status: String,
    pub review_notes: String,
    pub reporter: String,
    pub top_image: Option<String>,
    pub bottom_image: Option<String>,
}

/// A recorded quality-control abnormality (a "finding") for one model.
#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = nonconformities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Nonconformity {
    pub id: i32,
    pub created_at: String,
    pub model_id: i32,
    pub model_root: String,
    pub customer_supplier: String,
    pub mo: String,
    pub line: String,
    pub work_station: String,
    pub department: String,
    pub unit_head: String,
    pub responsibility: String,
    pub root_cause: String,
    pub corrective_action: String,
    pub discovery_dept: String,
    pub source: String,
    pub defective_category: String,
    pub defective_item: String,
    pub defective_outflow: String,
    pub defective_qty: f64,
    pub inspection_qty: f64,
    pub lot_qty: f64,
    pub severity: String,
    pub description: String,
    pub reporter: String,
    pub cover_image: Option<String>,
}

impl Nonconformity {
    /// Sort position: Critical first, anything unrecognised last.
    pub fn severity_rank(&self) -> u8 {
        self.severity
            .parse::<Severity>()
            .map(|s| s.rank())
            .unwrap_or(3)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = nonconformities)]
pub struct NewNonconformity {
    pub created_at: String,
    pub model_id: i32,
    pub model_root: String,
    pub customer_supplier: String,
    pub mo: String,
    pub line: String,
    pub work_station: String,
    pub department: String,
    pub unit_head: String,
    pub responsibility: String,
    pub root_cause: String,
    pub corrective_action: String,
    pub discovery_dept: String,
    pub source: String,
    pub defective_category: String,
    pub defective_item: String,
    pub defective_outflow: String,
    pub defective_qty: f64,
    pub inspection_qty: f64,
    pub lot_qty: f64,
    pub severity: String,
    pub description: String,
    pub reporter: String,
    pub cover_image: Option<String>,
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = nc_images)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NcImage {
    pub id: i32,
    pub nc_id: i32,
    pub image_path: String,
}

#[derive(Insertable)]
#[diesel(table_name = nc_images)]
pub struct NewNcImage<'a> {
    pub nc_id: i32,
    pub image_path: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstPieceStatus {
    Ok,
    Ng,
    Pending,
}

impl FirstPieceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirstPieceStatus::Ok => "OK",
            FirstPieceStatus::Ng => "NG",
            FirstPieceStatus::Pending => "Pending",
        }
    }
}

impl FromStr for FirstPieceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OK" => Ok(FirstPieceStatus::Ok),
            "NG" => Ok(FirstPieceStatus::Ng),
            "Pending" => Ok(FirstPieceStatus::Pending),
            other => Err(format!("unknown status '{}', expected OK, NG or Pending", other)),
        }
    }
}

impl fmt::Display for FirstPieceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::Major => "Major",
            Severity::Minor => "Minor",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::Major => 2,
            Severity::Minor => 3,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Critical" => Ok(Severity::Critical),
            "Major" => Ok(Severity::Major),
            "Minor" => Ok(Severity::Minor),
            other => Err(format!(
                "unknown severity '{}', expected Critical, Major or Minor",
                other
            )),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a defect escaped to before it was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outflow {
    None,
    Oqc,
    Customer,
}

impl Outflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outflow::None => "None",
            Outflow::Oqc => "OQC",
            Outflow::Customer => "Customer",
        }
    }
}

impl FromStr for Outflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "None" => Ok(Outflow::None),
            "OQC" => Ok(Outflow::Oqc),
            "Customer" => Ok(Outflow::Customer),
            other => Err(format!(
                "unknown outflow '{}', expected None, OQC or Customer",
                other
            )),
        }
    }
}

/// Normalise a full model version to its root: `190A56980` -> `190-56980`.
pub fn compute_model_root(model_version: &str) -> String {
    let digits: String = model_version
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.len() >= 4 {
        format!("{}-{}", &digits[..3], &digits[3..])
    } else if !digits.is_empty() {
        digits
    } else {
        model_version.trim().to_string()
    }
}

/// UTC creation stamp stored on new records, e.g. `2024-06-01T10:15:00.123456`.
pub fn timestamp() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
