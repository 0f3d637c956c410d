use std::collections::HashMap;

use actix_multipart::Multipart;
use futures::TryStreamExt;

use crate::errors::{PortalError, PortalResult};
use crate::models::{FirstPieceStatus, Outflow, Severity};

const MAX_FILE_BYTES: usize = 32 * 1024 * 1024;
pub const MAX_FORM_BYTES: usize = 64 * 1024 * 1024;
pub const MAX_FORM_PARTS: usize = 64;

pub struct UploadedFile {
    pub field: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// A `multipart/form-data` body split into text fields and file parts.
#[derive(Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl UploadForm {
    pub async fn read(mut payload: Multipart) -> PortalResult<UploadForm> {
        let mut form = UploadForm::default();
        let mut parts = 0;
        let mut total = 0;
        while let Some(mut field) = payload.try_next().await? {
            parts += 1;
            if parts > MAX_FORM_PARTS {
                return Err(PortalError::bad_request(format!(
                    "form has more than {} parts",
                    MAX_FORM_PARTS
                )));
            }
            let name = field.name().to_string();
            let filename = field
                .content_disposition()
                .get_filename()
                .map(str::to_string);

            let mut bytes: Vec<u8> = Vec::new();
            while let Some(chunk) = field.try_next().await? {
                if bytes.len() + chunk.len() > MAX_FILE_BYTES {
                    return Err(PortalError::bad_request(format!(
                        "field '{}' exceeds {} bytes",
                        name, MAX_FILE_BYTES
                    )));
                }
                total += chunk.len();
                if total > MAX_FORM_BYTES {
                    return Err(PortalError::bad_request(format!(
                        "form exceeds {} bytes",
                        MAX_FORM_BYTES
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            // browsers send an empty part for an untouched file input
            if filename.as_deref() == Some("") && bytes.is_empty() {
                continue;
            }
            if filename.is_some() {
                form.files.push(UploadedFile {
                    field: name,
                    filename,
                    bytes,
                });
            } else {
                let text = String::from_utf8(bytes).map_err(|_| {
                    PortalError::bad_request(format!("field '{}' is not utf-8", name))
                })?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    pub fn opt_text(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|v| v.trim().to_string())
    }

    /// Non-negative quantity; blank means zero.
    pub fn quantity(&self, name: &str) -> PortalResult<f64> {
        let raw = self.text(name);
        if raw.is_empty() {
            return Ok(0.0);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => Err(PortalError::bad_request(format!(
                "{} must be a non-negative number",
                name
            ))),
        }
    }

    pub fn take_upload(&mut self, name: &str) -> Option<UploadedFile> {
        let idx = self.files.iter().position(|f| f.field == name)?;
        Some(self.files.remove(idx))
    }

    pub fn take_file(&mut self, name: &str) -> Option<Vec<u8>> {
        self.take_upload(name).map(|f| f.bytes)
    }

    pub fn take_files(&mut self, name: &str) -> Vec<Vec<u8>> {
        let (taken, rest): (Vec<_>, Vec<_>) =
            self.files.drain(..).partition(|f| f.field == name);
        self.files = rest;
        taken.into_iter().map(|f| f.bytes).collect()
    }

    #[cfg(test)]
    pub fn from_parts(fields: &[(&str, &str)], files: Vec<(&str, Vec<u8>)>) -> Self {
        UploadForm {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: files
                .into_iter()
                .map(|(field, bytes)| UploadedFile {
                    field: field.to_string(),
                    filename: Some(format!("{}.png", field)),
                    bytes,
                })
                .collect(),
        }
    }
}

pub struct FirstPieceForm {
    pub mo: String,
    pub sn: String,
    pub status: FirstPieceStatus,
    pub review_notes: String,
    pub top_image: Option<Vec<u8>>,
    pub bottom_image: Option<Vec<u8>>,
}

impl FirstPieceForm {
    pub fn from_upload(mut form: UploadForm) -> PortalResult<Self> {
        let status = form
            .opt_text("status")
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<FirstPieceStatus>())
            .transpose()
            .map_err(PortalError::BadRequest)?
            .unwrap_or(FirstPieceStatus::Ok);
        Ok(FirstPieceForm {
            mo: form.text("mo"),
            sn: form.text("sn"),
            status,
            review_notes: form.text("review_notes"),
            top_image: form.take_file("top_image"),
            bottom_image: form.take_file("bottom_image"),
        })
    }
}

pub struct NonconformityForm {
    /// `None` keeps the customer stored on the model.
    pub customer_supplier: Option<String>,
    pub mo: String,
    pub line: String,
    pub work_station: String,
    pub department: String,
    pub unit_head: String,
    pub responsibility: String,
    pub discovery_dept: String,
    pub source: String,
    pub defective_category: String,
    pub defective_item: String,
    pub defective_outflow: Outflow,
    pub defective_qty: f64,
    pub inspection_qty: f64,
    pub lot_qty: f64,
    pub severity: Severity,
    pub description: String,
    pub photos: Vec<Vec<u8>>,
}

impl NonconformityForm {
    pub fn from_upload(mut form: UploadForm) -> PortalResult<Self> {
        let severity = form
            .text("severity")
            .parse::<Severity>()
            .map_err(PortalError::BadRequest)?;
        let defective_outflow = form
            .text("defective_outflow")
            .parse::<Outflow>()
            .map_err(PortalError::BadRequest)?;
        Ok(NonconformityForm {
            customer_supplier: form.opt_text("customer_supplier"),
            mo: form.text("mo"),
            line: form.text("line"),
            work_station: form.text("work_station"),
            department: form.text("department"),
            unit_head: form.text("unit_head"),
            responsibility: form.text("responsibility"),
            discovery_dept: form.text("discovery_dept"),
            source: form.text("source"),
            defective_category: form.text("defective_category"),
            defective_item: form.text("defective_item"),
            defective_outflow,
            defective_qty: form.quantity("defective_qty")?,
            inspection_qty: form.quantity("inspection_qty")?,
            lot_qty: form.quantity("lot_qty")?,
            severity,
            description: form.text("description"),
            photos: form.take_files("photos"),
        })
    }
}
