use actix_multipart::Multipart;
use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use diesel::SqliteConnection;

use crate::actions;
use crate::db::DbPool;
use crate::dtos::*;
use crate::errors::{PortalError, PortalResult};
use crate::import;
use crate::models::{
    timestamp, FirstPiece, NewFirstPiece, NewNonconformity, Nonconformity, Severity,
};
use crate::notify::{self, TeamsNotifier};
use crate::photos::PhotoStore;

/// Shared, read-only state next to the pool.
pub struct AppContext {
    pub photos: PhotoStore,
    pub notifier: TeamsNotifier,
    pub reporter: String,
}

/// Run diesel work on the blocking pool with a pooled connection.
async fn with_conn<F, T>(pool: &web::Data<DbPool>, f: F) -> PortalResult<T>
where
    F: FnOnce(&mut SqliteConnection) -> PortalResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await?
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

// ---------------------------------------------------------------- folders

#[get("/folders")]
async fn get_folders(pool: web::Data<DbPool>) -> PortalResult<HttpResponse> {
    let folders = with_conn(&pool, actions::list_folders).await?;
    Ok(HttpResponse::Ok().json(folders))
}

#[post("/folders")]
async fn add_folder(
    pool: web::Data<DbPool>,
    model: web::Json<FolderDto>,
) -> PortalResult<HttpResponse> {
    let name = model.into_inner().name;
    let folder = with_conn(&pool, move |conn| actions::create_folder(&name, conn)).await?;
    tracing::info!(folder = %folder.name, "folder created");
    Ok(HttpResponse::Created().json(folder))
}

#[put("/folders/{id}")]
async fn rename_folder(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
    model: web::Json<FolderDto>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let name = model.into_inner().name;
    let folder = with_conn(&pool, move |conn| actions::rename_folder(id, &name, conn)).await?;
    tracing::info!(id, folder = %folder.name, "folder renamed");
    Ok(HttpResponse::Ok().json(folder))
}

#[delete("/folders/{id}")]
async fn delete_folder(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    with_conn(&pool, move |conn| actions::delete_folder(id, conn)).await?;
    tracing::info!(id, "folder deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ----------------------------------------------------------------- models

#[get("/models")]
async fn search_models(
    pool: web::Data<DbPool>,
    query: web::Query<ModelQuery>,
) -> PortalResult<HttpResponse> {
    let query = query.into_inner();
    let listings = with_conn(&pool, actions::list_models).await?;
    let found = actions::filter_models(listings, query.folder.as_deref(), query.q.as_deref());
    Ok(HttpResponse::Ok().json(found))
}

#[post("/models")]
async fn save_model(
    pool: web::Data<DbPool>,
    model: web::Json<ModelDto>,
) -> PortalResult<HttpResponse> {
    let dto = model.into_inner();
    let saved = with_conn(&pool, move |conn| {
        let folder = match dto.folder.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(name) => actions::find_folder_by_name(name, conn)?.id,
            None => actions::UNASSIGNED_FOLDER_ID,
        };
        actions::upsert_model(
            &dto.model_version,
            dto.customer_supplier.as_deref(),
            Some(folder),
            conn,
        )
    })
    .await?;
    tracing::info!(model = %saved.model_version, root = %saved.model_root, "model saved");
    Ok(HttpResponse::Ok().json(saved))
}

#[put("/models/{id}")]
async fn update_model(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
    model: web::Json<ModelUpdateDto>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let dto = model.into_inner();
    let updated = with_conn(&pool, move |conn| {
        let folder = match dto.folder.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(name) => Some(actions::find_folder_by_name(name, conn)?.id),
            None => None,
        };
        actions::update_model(id, dto.model_version.as_deref(), folder, conn)
    })
    .await?;
    tracing::info!(id, model = %updated.model_version, "model updated");
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/models/{id}")]
async fn delete_model(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let paths = with_conn(&pool, move |conn| actions::delete_model(id, conn)).await?;
    let photos = ctx.photos.clone();
    let removed = paths.len();
    web::block(move || photos.remove_all(paths.iter().map(String::as_str))).await?;
    tracing::info!(id, photos = removed, "model deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/models/{id}/history")]
async fn model_history(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let history = with_conn(&pool, move |conn| actions::model_history(id, conn)).await?;
    Ok(HttpResponse::Ok().json(history))
}

// ------------------------------------------------------------ first piece

#[get("/models/{id}/first-pieces")]
async fn get_first_pieces(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let rows = with_conn(&pool, move |conn| {
        actions::find_model_by_id(id, conn)?;
        actions::first_pieces_for_model(id, conn)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[post("/models/{id}/first-pieces")]
async fn add_first_piece(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    info: web::Path<i32>,
    payload: Multipart,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let form = FirstPieceForm::from_upload(UploadForm::read(payload).await?)?;
    let photos = ctx.photos.clone();
    let reporter = ctx.reporter.clone();

    let (model, record) = with_conn(&pool, move |conn| {
        let model = actions::find_model_by_id(id, conn)?;
        let mut saved: Vec<String> = Vec::new();
        let result = (|| -> PortalResult<FirstPiece> {
            let top_image = match &form.top_image {
                Some(bytes) => Some(photos.save(&model.model_root, bytes)?),
                None => None,
            };
            saved.extend(top_image.clone());
            let bottom_image = match &form.bottom_image {
                Some(bytes) => Some(photos.save(&model.model_root, bytes)?),
                None => None,
            };
            saved.extend(bottom_image.clone());
            actions::insert_first_piece(
                &NewFirstPiece {
                    created_at: timestamp(),
                    model_id: model.id,
                    model_root: model.model_root.clone(),
                    sn: form.sn.clone(),
                    mo: form.mo.clone(),
                    status: form.status.as_str().to_string(),
                    review_notes: form.review_notes.clone(),
                    reporter: reporter.clone(),
                    top_image,
                    bottom_image,
                },
                conn,
            )
        })();
        match result {
            Ok(record) => Ok((model, record)),
            Err(e) => {
                photos.remove_all(saved.iter().map(String::as_str));
                Err(e)
            }
        }
    })
    .await?;

    tracing::info!(
        id = record.id,
        model = %model.model_version,
        status = %record.status,
        "first piece saved"
    );
    if record.status == "NG" {
        let (title, lines) = notify::first_piece_ng(&model, &record);
        ctx.notifier.send(title, lines);
    }
    Ok(HttpResponse::Created().json(record))
}

// ---------------------------------------------------------- nonconformity

#[get("/models/{id}/nonconformities")]
async fn get_nonconformities(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let rows = with_conn(&pool, move |conn| {
        actions::find_model_by_id(id, conn)?;
        actions::nonconformities_for_model(id, conn)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[post("/models/{id}/nonconformities")]
async fn add_nonconformity(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    info: web::Path<i32>,
    payload: Multipart,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let form = NonconformityForm::from_upload(UploadForm::read(payload).await?)?;
    let photos = ctx.photos.clone();
    let reporter = ctx.reporter.clone();

    let (model, record) = with_conn(&pool, move |conn| {
        let model = actions::find_model_by_id(id, conn)?;
        let mut saved: Vec<String> = Vec::new();
        let result = (|| -> PortalResult<Nonconformity> {
            for bytes in &form.photos {
                saved.push(photos.save(&model.model_root, bytes)?);
            }
            let customer = form
                .customer_supplier
                .clone()
                .unwrap_or_else(|| model.customer_supplier.clone().unwrap_or_default());
            let record = NewNonconformity {
                created_at: timestamp(),
                model_id: model.id,
                model_root: model.model_root.clone(),
                customer_supplier: customer,
                mo: form.mo.clone(),
                line: form.line.clone(),
                work_station: form.work_station.clone(),
                department: form.department.clone(),
                unit_head: form.unit_head.clone(),
                responsibility: form.responsibility.clone(),
                root_cause: String::new(),
                corrective_action: String::new(),
                discovery_dept: form.discovery_dept.clone(),
                source: form.source.clone(),
                defective_category: form.defective_category.clone(),
                defective_item: form.defective_item.clone(),
                defective_outflow: form.defective_outflow.as_str().to_string(),
                defective_qty: form.defective_qty,
                inspection_qty: form.inspection_qty,
                lot_qty: form.lot_qty,
                severity: form.severity.as_str().to_string(),
                description: form.description.clone(),
                reporter: reporter.clone(),
                cover_image: None,
            };
            actions::insert_nonconformity(&record, &saved, conn)
        })();
        match result {
            Ok(record) => Ok((model, record)),
            Err(e) => {
                photos.remove_all(saved.iter().map(String::as_str));
                Err(e)
            }
        }
    })
    .await?;

    tracing::info!(
        id = record.id,
        model = %model.model_version,
        severity = %record.severity,
        "nonconformity recorded"
    );
    let (title, lines) = notify::nonconformity_recorded(&model, &record);
    ctx.notifier.send(title, lines);
    Ok(HttpResponse::Created().json(record))
}

#[patch("/nonconformities/{id}")]
async fn edit_nonconformity(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
    model: web::Json<NonconformityUpdateDto>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let dto = model.into_inner();
    let severity = dto
        .severity
        .parse::<Severity>()
        .map_err(PortalError::BadRequest)?;
    let updated = with_conn(&pool, move |conn| {
        actions::update_nonconformity(id, severity, &dto.description, conn)
    })
    .await?;
    tracing::info!(id, severity = %updated.severity, "nonconformity updated");
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/nonconformities/{id}")]
async fn delete_nonconformity(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let paths = with_conn(&pool, move |conn| actions::delete_nonconformity(id, conn)).await?;
    let photos = ctx.photos.clone();
    web::block(move || photos.remove_all(paths.iter().map(String::as_str))).await?;
    tracing::info!(id, "nonconformity deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/nonconformities/{id}/photos")]
async fn get_photos(
    pool: web::Data<DbPool>,
    info: web::Path<i32>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    let rows = with_conn(&pool, move |conn| {
        actions::find_nonconformity(id, conn)?;
        actions::photos_for_nonconformity(id, conn)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[post("/nonconformities/{id}/photos")]
async fn add_base64_photo(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    info: web::Path<i32>,
    model: web::Json<Base64Dto>,
) -> PortalResult<HttpResponse> {
    let id = info.into_inner();
    // skip the data-URI header, if any
    let encoded = match model.image.split(',').last() {
        Some(b) if !b.trim().is_empty() => b.trim().to_string(),
        _ => return Err(PortalError::bad_request("base64 encoded string was not presented")),
    };
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| PortalError::bad_request("base64 incorrectly encoded"))?;
    let photos = ctx.photos.clone();

    let photo = with_conn(&pool, move |conn| {
        let finding = actions::find_nonconformity(id, conn)?;
        let path = photos.save(&finding.model_root, &bytes)?;
        actions::attach_photo(id, &path, conn).map_err(|e| {
            photos.remove_all([path.as_str()]);
            e
        })
    })
    .await?;
    tracing::info!(id, path = %photo.image_path, "photo attached");
    Ok(HttpResponse::Created().json(photo))
}

// ----------------------------------------------------------------- images

#[get("/images/{path:.*}")]
async fn get_image(
    ctx: web::Data<AppContext>,
    info: web::Path<String>,
) -> PortalResult<HttpResponse> {
    let rel = format!("images/{}", info.into_inner());
    let photos = ctx.photos.clone();
    let bytes = web::block(move || photos.read(&rel)).await??;
    Ok(HttpResponse::Ok().content_type("image/jpeg").body(bytes))
}

#[get("/preview/{path:.*}")]
async fn get_preview(
    ctx: web::Data<AppContext>,
    info: web::Path<String>,
) -> PortalResult<HttpResponse> {
    let rel = format!("images/{}", info.into_inner());
    let photos = ctx.photos.clone();
    let bytes = web::block(move || photos.preview(&rel)).await??;
    Ok(HttpResponse::Ok().content_type("image/jpeg").body(bytes))
}

// ----------------------------------------------------------------- import

#[post("/import")]
async fn import_spreadsheet(
    pool: web::Data<DbPool>,
    ctx: web::Data<AppContext>,
    payload: Multipart,
) -> PortalResult<HttpResponse> {
    let mut form = UploadForm::read(payload).await?;
    let upload = form.take_upload("file").ok_or_else(|| {
        PortalError::bad_request("upload a .csv or .xlsx file in the 'file' field")
    })?;
    let format = import::ImportFormat::detect(upload.filename.as_deref(), &upload.bytes)?;
    let data = upload.bytes;
    let reporter = ctx.reporter.clone();

    let imported = with_conn(&pool, move |conn| {
        let rows = import::parse(format, &data)?;
        import::import_rows(&rows, &reporter, conn)
    })
    .await?;
    tracing::info!(imported, ?format, "nonconformities imported");
    Ok(HttpResponse::Ok().json(ImportSummary { imported }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_folders)
        .service(add_folder)
        .service(rename_folder)
        .service(delete_folder)
        .service(search_models)
        .service(save_model)
        .service(update_model)
        .service(delete_model)
        .service(model_history)
        .service(get_first_pieces)
        .service(add_first_piece)
        .service(get_nonconformities)
        .service(add_nonconformity)
        .service(edit_nonconformity)
        .service(delete_nonconformity)
        .service(get_photos)
        .service(add_base64_photo)
        .service(get_image)
        .service(get_preview)
        .service(import_spreadsheet);
}
