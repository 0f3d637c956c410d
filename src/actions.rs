use diesel::prelude::*;
use diesel::upsert::excluded;

use crate::dtos::{ModelHistory, ModelListing};
use crate::errors::{PortalError, PortalResult};
use crate::models::{
    compute_model_root, FirstPiece, Folder, Model, NcImage, NewFirstPiece, NewFolder,
    NewModel, NewNcImage, NewNonconformity, Nonconformity, Severity,
};

pub const UNASSIGNED_FOLDER_ID: i32 = 1;
pub const UNASSIGNED_FOLDER: &str = "Unassigned";

diesel::define_sql_function!(fn last_insert_rowid() -> diesel::sql_types::Integer);

fn last_id(conn: &mut SqliteConnection) -> QueryResult<i32> {
    diesel::select(last_insert_rowid()).get_result::<i32>(conn)
}

// ---------------------------------------------------------------- folders

pub fn ensure_default_folder(conn: &mut SqliteConnection) -> PortalResult<()> {
    use crate::schema::folders::dsl::*;

    diesel::insert_or_ignore_into(folders)
        .values((id.eq(UNASSIGNED_FOLDER_ID), name.eq(UNASSIGNED_FOLDER)))
        .execute(conn)?;
    Ok(())
}

pub fn list_folders(conn: &mut SqliteConnection) -> PortalResult<Vec<Folder>> {
    use crate::schema::folders::dsl::*;

    Ok(folders
        .order(name.asc())
        .select(Folder::as_select())
        .load(conn)?)
}

pub fn find_folder_by_name(
    folder_name: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<Folder> {
    use crate::schema::folders::dsl::*;

    folders
        .filter(name.eq(folder_name.trim()))
        .select(Folder::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| PortalError::not_found(format!("folder '{}'", folder_name.trim())))
}

/// Creating an existing folder is not an error; the existing one is returned.
pub fn create_folder(folder_name: &str, conn: &mut SqliteConnection) -> PortalResult<Folder> {
    use crate::schema::folders::dsl::*;

    let folder_name = folder_name.trim();
    if folder_name.is_empty() {
        return Err(PortalError::bad_request("folder name is required"));
    }
    diesel::insert_or_ignore_into(folders)
        .values(&NewFolder { name: folder_name })
        .execute(conn)?;
    find_folder_by_name(folder_name, conn)
}

pub fn rename_folder(
    folder_id: i32,
    new_name: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<Folder> {
    use crate::schema::folders::dsl::*;

    let new_name = new_name.trim();
    if new_name.is_empty() {
        return Err(PortalError::bad_request("folder name is required"));
    }
    let taken = folders
        .filter(name.eq(new_name).and(id.ne(folder_id)))
        .count()
        .get_result::<i64>(conn)?;
    if taken > 0 {
        return Err(PortalError::bad_request(format!(
            "folder '{}' already exists",
            new_name
        )));
    }
    let updated = diesel::update(folders.find(folder_id))
        .set(name.eq(new_name))
        .execute(conn)?;
    if updated == 0 {
        return Err(PortalError::not_found(format!("folder {}", folder_id)));
    }
    Ok(Folder {
        id: folder_id,
        name: new_name.to_string(),
    })
}

/// Models in the folder keep existing with no folder. `Unassigned` is where
/// new models land, so it cannot be deleted.
pub fn delete_folder(folder_id: i32, conn: &mut SqliteConnection) -> PortalResult<()> {
    use crate::schema::folders::dsl::*;

    if folder_id == UNASSIGNED_FOLDER_ID {
        return Err(PortalError::bad_request(format!(
            "folder '{}' cannot be deleted",
            UNASSIGNED_FOLDER
        )));
    }
    let deleted = diesel::delete(folders.find(folder_id)).execute(conn)?;
    if deleted == 0 {
        return Err(PortalError::not_found(format!("folder {}", folder_id)));
    }
    Ok(())
}

// ----------------------------------------------------------------- models

/// Every model with its folder name, ordered by folder, root, version.
pub fn list_models(conn: &mut SqliteConnection) -> PortalResult<Vec<ModelListing>> {
    use crate::schema::{folders, models};

    let rows = models::table
        .left_join(folders::table)
        .select((Model::as_select(), folders::name.nullable()))
        .load::<(Model, Option<String>)>(conn)?;

    let mut listings: Vec<ModelListing> = rows
        .into_iter()
        .map(|(model, folder)| ModelListing::new(model, folder))
        .collect();
    listings.sort_by(|a, b| {
        let fa = a.folder.as_deref().unwrap_or("");
        let fb = b.folder.as_deref().unwrap_or("");
        fa.cmp(fb)
            .then_with(|| a.model.model_root.cmp(&b.model.model_root))
            .then_with(|| a.model.model_version.cmp(&b.model.model_version))
    });
    Ok(listings)
}

/// Narrow the picker: `folder` of `None`/`All` keeps every folder; `query`
/// matches version, root or customer case-insensitively.
pub fn filter_models(
    listings: Vec<ModelListing>,
    folder: Option<&str>,
    query: Option<&str>,
) -> Vec<ModelListing> {
    let folder = folder.map(str::trim).filter(|f| !f.is_empty() && *f != "All");
    let needle = query
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    listings
        .into_iter()
        .filter(|l| match folder {
            Some(f) => l.folder.as_deref() == Some(f),
            None => true,
        })
        .filter(|l| match &needle {
            Some(n) => {
                l.model.model_version.to_lowercase().contains(n.as_str())
                    || l.model.model_root.to_lowercase().contains(n.as_str())
                    || l
                        .model
                        .customer_supplier
                        .as_deref()
                        .unwrap_or("")
                        .to_lowercase()
                        .contains(n.as_str())
            }
            None => true,
        })
        .collect()
}

pub fn find_model_by_id(model_id: i32, conn: &mut SqliteConnection) -> PortalResult<Model> {
    use crate::schema::models::dsl::*;

    models
        .find(model_id)
        .select(Model::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| PortalError::not_found(format!("model {}", model_id)))
}

pub fn find_model_by_version(
    version: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<Option<Model>> {
    use crate::schema::models::dsl::*;

    Ok(models
        .filter(model_version.eq(version))
        .select(Model::as_select())
        .first(conn)
        .optional()?)
}

/// Insert a model, or update root, customer and folder of the existing one
/// with the same version.
pub fn upsert_model(
    version: &str,
    customer: Option<&str>,
    folder: Option<i32>,
    conn: &mut SqliteConnection,
) -> PortalResult<Model> {
    upsert_model_with_root(version, &compute_model_root(version), customer, folder, conn)
}

/// Like [`upsert_model`] but with an explicit root, as bulk imports carry one.
pub fn upsert_model_with_root(
    version: &str,
    root: &str,
    customer: Option<&str>,
    folder: Option<i32>,
    conn: &mut SqliteConnection,
) -> PortalResult<Model> {
    use crate::schema::models::dsl::*;

    let version = version.trim();
    if version.is_empty() {
        return Err(PortalError::bad_request("model version is required"));
    }
    let new_model = NewModel {
        model_version: version.to_string(),
        model_root: root.trim().to_string(),
        customer_supplier: customer
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        folder_id: folder,
    };
    diesel::insert_into(models)
        .values(&new_model)
        .on_conflict(model_version)
        .do_update()
        .set((
            model_root.eq(excluded(model_root)),
            customer_supplier.eq(excluded(customer_supplier)),
            folder_id.eq(excluded(folder_id)),
        ))
        .execute(conn)?;

    find_model_by_version(version, conn)?
        .ok_or_else(|| PortalError::not_found(format!("model '{}'", version)))
}

/// Move and/or rename; the root follows the (possibly new) version.
pub fn update_model(
    model_id: i32,
    new_version: Option<&str>,
    folder: Option<i32>,
    conn: &mut SqliteConnection,
) -> PortalResult<Model> {
    use crate::schema::models::dsl::*;

    conn.transaction::<_, PortalError, _>(|conn| {
        let current = find_model_by_id(model_id, conn)?;
        let version = new_version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&current.model_version)
            .to_string();
        if version != current.model_version && find_model_by_version(&version, conn)?.is_some()
        {
            return Err(PortalError::bad_request(format!(
                "model version '{}' already exists",
                version
            )));
        }
        diesel::update(models.find(model_id))
            .set((
                model_version.eq(&version),
                model_root.eq(compute_model_root(&version)),
                folder_id.eq(folder.or(current.folder_id)),
            ))
            .execute(conn)?;
        find_model_by_id(model_id, conn)
    })
}

/// Deletes the model and, by cascade, its history. Returns the photo paths
/// that were referenced so the caller can drop the files.
pub fn delete_model(model_id: i32, conn: &mut SqliteConnection) -> PortalResult<Vec<String>> {
    use crate::schema::{first_piece, models, nc_images, nonconformities};

    conn.transaction::<_, PortalError, _>(|conn| {
        find_model_by_id(model_id, conn)?;

        let mut paths: Vec<String> = Vec::new();
        let fp_images = first_piece::table
            .filter(first_piece::model_id.eq(model_id))
            .select((first_piece::top_image, first_piece::bottom_image))
            .load::<(Option<String>, Option<String>)>(conn)?;
        for (top, bottom) in fp_images {
            paths.extend(top);
            paths.extend(bottom);
        }
        let nc_ids = nonconformities::table
            .filter(nonconformities::model_id.eq(model_id))
            .select(nonconformities::id);
        paths.extend(
            nc_images::table
                .filter(nc_images::nc_id.eq_any(nc_ids))
                .select(nc_images::image_path)
                .load::<String>(conn)?,
        );

        diesel::delete(models::table.find(model_id)).execute(conn)?;
        Ok(paths)
    })
}

pub fn model_history(model_id: i32, conn: &mut SqliteConnection) -> PortalResult<ModelHistory> {
    let model = find_model_by_id(model_id, conn)?;
    Ok(ModelHistory {
        first_pieces: first_pieces_for_model(model.id, conn)?,
        nonconformities: nonconformities_for_model(model.id, conn)?,
        model,
    })
}

// ------------------------------------------------------------ first piece

pub fn insert_first_piece(
    record: &NewFirstPiece,
    conn: &mut SqliteConnection,
) -> PortalResult<FirstPiece> {
    use crate::schema::first_piece::dsl::*;

    conn.transaction::<_, PortalError, _>(|conn| {
        diesel::insert_into(first_piece).values(record).execute(conn)?;
        let new_id = last_id(conn)?;
        Ok(first_piece
            .find(new_id)
            .select(FirstPiece::as_select())
            .first(conn)?)
    })
}

/// Newest first.
pub fn first_pieces_for_model(
    search_model: i32,
    conn: &mut SqliteConnection,
) -> PortalResult<Vec<FirstPiece>> {
    use crate::schema::first_piece::dsl::*;

    Ok(first_piece
        .filter(model_id.eq(search_model))
        .order(id.desc())
        .select(FirstPiece::as_select())
        .load(conn)?)
}

// ---------------------------------------------------------- nonconformity

/// Stores the finding and one photo row per path; the first path is the cover.
pub fn insert_nonconformity(
    record: &NewNonconformity,
    photos: &[String],
    conn: &mut SqliteConnection,
) -> PortalResult<Nonconformity> {
    use crate::schema::{nc_images, nonconformities};

    conn.transaction::<_, PortalError, _>(|conn| {
        let mut record = record.clone();
        record.cover_image = photos.first().cloned();
        diesel::insert_into(nonconformities::table)
            .values(&record)
            .execute(conn)?;
        let new_id = last_id(conn)?;

        let rows: Vec<NewNcImage> = photos
            .iter()
            .map(|p| NewNcImage {
                nc_id: new_id,
                image_path: p,
            })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(nc_images::table)
                .values(&rows)
                .execute(conn)?;
        }
        find_nonconformity(new_id, conn)
    })
}

pub fn find_nonconformity(nc: i32, conn: &mut SqliteConnection) -> PortalResult<Nonconformity> {
    use crate::schema::nonconformities::dsl::*;

    nonconformities
        .find(nc)
        .select(Nonconformity::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| PortalError::not_found(format!("nonconformity {}", nc)))
}

/// Critical, then Major, then Minor; newest first within a severity.
pub fn nonconformities_for_model(
    search_model: i32,
    conn: &mut SqliteConnection,
) -> PortalResult<Vec<Nonconformity>> {
    use crate::schema::nonconformities::dsl::*;

    let mut rows = nonconformities
        .filter(model_id.eq(search_model))
        .select(Nonconformity::as_select())
        .load(conn)?;
    sort_by_severity(&mut rows);
    Ok(rows)
}

pub fn sort_by_severity(rows: &mut [Nonconformity]) {
    rows.sort_by(|a, b| {
        a.severity_rank()
            .cmp(&b.severity_rank())
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub fn update_nonconformity(
    nc: i32,
    new_severity: Severity,
    new_description: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<Nonconformity> {
    use crate::schema::nonconformities::dsl::*;

    let updated = diesel::update(nonconformities.find(nc))
        .set((
            severity.eq(new_severity.as_str()),
            description.eq(new_description.trim()),
        ))
        .execute(conn)?;
    if updated == 0 {
        return Err(PortalError::not_found(format!("nonconformity {}", nc)));
    }
    find_nonconformity(nc, conn)
}

/// Returns the photo paths that belonged to the deleted finding.
pub fn delete_nonconformity(nc: i32, conn: &mut SqliteConnection) -> PortalResult<Vec<String>> {
    use crate::schema::nonconformities;

    conn.transaction::<_, PortalError, _>(|conn| {
        let paths = photos_for_nonconformity(nc, conn)?
            .into_iter()
            .map(|p| p.image_path)
            .collect();
        let deleted = diesel::delete(nonconformities::table.find(nc)).execute(conn)?;
        if deleted == 0 {
            return Err(PortalError::not_found(format!("nonconformity {}", nc)));
        }
        Ok(paths)
    })
}

pub fn photos_for_nonconformity(
    nc: i32,
    conn: &mut SqliteConnection,
) -> PortalResult<Vec<NcImage>> {
    use crate::schema::nc_images::dsl::*;

    Ok(nc_images
        .filter(nc_id.eq(nc))
        .order(id.asc())
        .select(NcImage::as_select())
        .load(conn)?)
}

/// Append a photo to an existing finding; it becomes the cover if there is none.
pub fn attach_photo(
    nc: i32,
    path: &str,
    conn: &mut SqliteConnection,
) -> PortalResult<NcImage> {
    use crate::schema::{nc_images, nonconformities};

    conn.transaction::<_, PortalError, _>(|conn| {
        let finding = find_nonconformity(nc, conn)?;
        diesel::insert_into(nc_images::table)
            .values(&NewNcImage {
                nc_id: nc,
                image_path: path,
            })
            .execute(conn)?;
        let new_id = last_id(conn)?;
        if finding.cover_image.is_none() {
            diesel::update(nonconformities::table.find(nc))
                .set(nonconformities::cover_image.eq(path))
                .execute(conn)?;
        }
        Ok(NcImage {
            id: new_id,
            nc_id: nc,
            image_path: path.to_string(),
        })
    })
}
