use serde::{Deserialize, Serialize};

use crate::models::{FirstPiece, Model, Nonconformity};

mod forms;
pub use forms::*;

#[derive(Deserialize, Serialize)]
pub struct FolderDto {
    pub name: String,
}

#[derive(Deserialize, Serialize, Default)]
pub struct ModelQuery {
    pub folder: Option<String>,
    pub q: Option<String>,
}

#[derive(Deserialize, Serialize)]
pub struct ModelDto {
    pub model_version: String,
    #[serde(default)]
    pub customer_supplier: Option<String>,
    /// Folder name; `Unassigned` when absent.
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Deserialize, Serialize, Default)]
pub struct ModelUpdateDto {
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// A model as shown in the picker, with the name of its folder.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelListing {
    #[serde(flatten)]
    pub model: Model,
    pub folder: Option<String>,
    pub label: String,
}

impl ModelListing {
    pub fn new(model: Model, folder: Option<String>) -> Self {
        let mut label = format!("{}  •  {}", model.model_version, model.model_root);
        if let Some(customer) = model.customer_supplier.as_deref().filter(|c| !c.is_empty()) {
            label.push_str(&format!(" ({})", customer));
        }
        ModelListing {
            model,
            folder,
            label,
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ModelHistory {
    pub model: Model,
    pub first_pieces: Vec<FirstPiece>,
    pub nonconformities: Vec<Nonconformity>,
}

#[derive(Deserialize, Serialize)]
pub struct NonconformityUpdateDto {
    pub severity: String,
    pub description: String,
}

/// A photo sent inline, either bare base64 or a `data:image/...;base64,` URI.
#[derive(Deserialize, Serialize)]
pub struct Base64Dto {
    pub image: String,
}

#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub struct ImportSummary {
    pub imported: usize,
}
