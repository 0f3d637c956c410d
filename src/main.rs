use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;

mod actions;
mod config;
mod db;
mod dtos;
mod errors;
mod handlers;
mod import;
mod logging;
mod models;
mod notify;
mod photos;
mod schema;

use config::Config;
use handlers::AppContext;
use notify::TeamsNotifier;
use photos::PhotoStore;

const POOL_SIZE: u32 = 8;
const JSON_LIMIT: usize = 32 * 1024 * 1024;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    logging::init(config.debug);

    let photos = PhotoStore::new(&config.data_dir);
    photos.ensure_dirs().map_err(to_io)?;

    let database_url = config.database_url();
    let pool = db::build_pool(&database_url, POOL_SIZE).map_err(to_io)?;
    db::prepare(&pool).map_err(to_io)?;

    let notifier = TeamsNotifier::new(config.webhook());
    let context = web::Data::new(AppContext {
        photos,
        notifier,
        reporter: config.reporter(),
    });
    let pool = web::Data::new(pool);

    let (address, port) = config.bind_addr();
    tracing::info!(
        %address,
        port,
        database = %database_url,
        data_dir = %config.data_dir.display(),
        teams = context.notifier.is_enabled(),
        reporter = %context.reporter,
        "starting qc portal"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(pool.clone())
            .app_data(context.clone())
            .app_data(web::JsonConfig::default().limit(JSON_LIMIT))
            .configure(handlers::configure)
    })
    .bind((address.as_str(), port))?
    .run()
    .await
}

fn to_io(e: errors::PortalError) -> std::io::Error {
    tracing::error!(error = %e, "startup failed");
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::{ImportSummary, ModelHistory, ModelListing};
    use crate::models::{FirstPiece, Folder, Model, NcImage, Nonconformity};
    use actix_web::http::{header, StatusCode};
    use actix_web::test;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;

    const BOUNDARY: &str = "qcportalboundary";

    struct TestEnv {
        pool: web::Data<db::DbPool>,
        context: web::Data<AppContext>,
        _dir: tempfile::TempDir,
    }

    fn test_env() -> TestEnv {
        let dir = tempfile::tempdir().unwrap();
        let photos = PhotoStore::new(dir.path());
        photos.ensure_dirs().unwrap();
        TestEnv {
            pool: web::Data::new(db::test_pool()),
            context: web::Data::new(AppContext {
                photos,
                notifier: TeamsNotifier::disabled(),
                reporter: "tester".to_string(),
            }),
            _dir: dir,
        }
    }

    macro_rules! init_app {
        ($env:expr) => {
            test::init_service(
                App::new()
                    .app_data($env.pool.clone())
                    .app_data($env.context.clone())
                    .app_data(web::JsonConfig::default().limit(JSON_LIMIT))
                    .configure(handlers::configure),
            )
            .await
        };
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, Vec<u8>),
    }

    fn multipart_body(parts: Vec<Part>) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(uri: &str, parts: Vec<Part>) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(parts))
    }

    fn png() -> Vec<u8> {
        photos::tests::png_bytes(16, 12)
    }

    #[actix_rt::test]
    async fn test_search_models_by_model_number() {
        let env = test_env();
        let app = init_app!(env);

        for (version, customer) in [("190A56980", "Acme"), ("190A56981", ""), ("300C00001", "Initech")] {
            let req = test::TestRequest::post()
                .uri("/models")
                .set_json(json!({ "model_version": version, "customer_supplier": customer }))
                .to_request();
            let saved: Model = test::call_and_read_body_json(&app, req).await;
            assert_eq!(saved.folder_id, Some(actions::UNASSIGNED_FOLDER_ID));
        }

        let req = test::TestRequest::get().uri("/models?q=190-5698").to_request();
        let found: Vec<ModelListing> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].label, "190A56980  •  190-56980 (Acme)");
        assert_eq!(found[1].label, "190A56981  •  190-56981");

        let req = test::TestRequest::get().uri("/models?q=INITECH&folder=Unassigned").to_request();
        let found: Vec<ModelListing> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].folder.as_deref(), Some("Unassigned"));
    }

    #[actix_rt::test]
    async fn test_folder_admin_and_move_model() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/folders")
            .set_json(json!({ "name": "Line A" }))
            .to_request();
        let folder: Folder = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::put()
            .uri(&format!("/models/{}", model.id))
            .set_json(json!({ "model_version": "190B56980", "folder": "Line A" }))
            .to_request();
        let moved: Model = test::call_and_read_body_json(&app, req).await;
        assert_eq!(moved.folder_id, Some(folder.id));
        assert_eq!(moved.model_version, "190B56980");

        let req = test::TestRequest::put()
            .uri(&format!("/folders/{}", folder.id))
            .set_json(json!({ "name": "Line A2" }))
            .to_request();
        let renamed: Folder = test::call_and_read_body_json(&app, req).await;
        assert_eq!(renamed.name, "Line A2");

        let req = test::TestRequest::delete()
            .uri(&format!("/folders/{}", folder.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/models").to_request();
        let all: Vec<ModelListing> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all[0].folder, None);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "999", "folder": "Nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::delete().uri("/folders/1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "300C00001" }))
            .to_request();
        let saved: Model = test::call_and_read_body_json(&app, req).await;
        assert_eq!(saved.folder_id, Some(actions::UNASSIGNED_FOLDER_ID));
    }

    #[actix_rt::test]
    async fn test_upload_first_piece_with_photos() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;

        let req = multipart_request(
            &format!("/models/{}/first-pieces", model.id),
            vec![
                Part::Text("mo", " MO-42 "),
                Part::Text("sn", "SN-0001"),
                Part::Text("status", "NG"),
                Part::Text("review_notes", "polarity reversed"),
                Part::File("top_image", "top.png", png()),
                Part::File("bottom_image", "", Vec::new()),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let fp: FirstPiece = test::read_body_json(resp).await;
        assert_eq!(fp.mo, "MO-42");
        assert_eq!(fp.status, "NG");
        assert_eq!(fp.reporter, "tester");
        assert!(fp.bottom_image.is_none());
        let top = fp.top_image.clone().unwrap();
        assert!(top.starts_with("images/190-56980/"));

        let req = test::TestRequest::get().uri(&format!("/{}", top)).to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert!(body.starts_with(&[255, 216, 255]));

        let req = test::TestRequest::get()
            .uri(&format!("/preview/{}", top.trim_start_matches("images/")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get()
            .uri(&format!("/models/{}/first-pieces", model.id))
            .to_request();
        let listed: Vec<FirstPiece> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed, vec![fp]);
    }

    #[actix_rt::test]
    async fn test_upload_nonconformity_and_history() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980", "customer_supplier": "Acme" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;
        let uri = format!("/models/{}/nonconformities", model.id);

        let req = multipart_request(
            &uri,
            vec![
                Part::Text("severity", "Minor"),
                Part::Text("description", "scratch on housing"),
            ],
        )
        .to_request();
        let minor: Nonconformity = test::call_and_read_body_json(&app, req).await;
        assert_eq!(minor.customer_supplier, "Acme");
        assert!(minor.cover_image.is_none());

        let req = multipart_request(
            &uri,
            vec![
                Part::Text("severity", "Critical"),
                Part::Text("work_station", "ST3"),
                Part::Text("defective_outflow", "OQC"),
                Part::Text("defective_qty", "2"),
                Part::Text("inspection_qty", "50"),
                Part::Text("description", "bridged pins"),
                Part::File("photos", "a.png", png()),
                Part::File("photos", "b.png", png()),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let critical: Nonconformity = test::read_body_json(resp).await;
        assert_eq!(critical.defective_outflow, "OQC");
        assert_eq!(critical.root_cause, "");

        let req = test::TestRequest::get()
            .uri(&format!("/nonconformities/{}/photos", critical.id))
            .to_request();
        let photos: Vec<NcImage> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(photos.len(), 2);
        assert_eq!(critical.cover_image.as_deref(), Some(photos[0].image_path.as_str()));

        let req = test::TestRequest::get()
            .uri(&format!("/models/{}/history", model.id))
            .to_request();
        let history: ModelHistory = test::call_and_read_body_json(&app, req).await;
        let ids: Vec<i32> = history.nonconformities.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![critical.id, minor.id]);
        assert!(history.first_pieces.is_empty());
    }

    #[actix_rt::test]
    async fn test_upload_rejects_non_images_and_bad_fields() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;
        let uri = format!("/models/{}/nonconformities", model.id);

        let req = multipart_request(
            &uri,
            vec![
                Part::Text("severity", "Major"),
                Part::File("photos", "notes.txt", b"not an image".to_vec()),
            ],
        )
        .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());

        let req = multipart_request(&uri, vec![Part::Text("severity", "Catastrophic")]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = multipart_request("/models/999/nonconformities", vec![Part::Text("severity", "Major")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri(&format!("/models/{}/history", model.id)).to_request();
        let history: ModelHistory = test::call_and_read_body_json(&app, req).await;
        assert!(history.nonconformities.is_empty());
    }

    #[actix_rt::test]
    async fn test_upload_with_too_many_parts_is_rejected() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;

        let mut parts = vec![Part::Text("severity", "Major")];
        parts.extend((0..dtos::MAX_FORM_PARTS).map(|_| Part::File("photos", "p.png", png())));
        let req = multipart_request(&format!("/models/{}/nonconformities", model.id), parts)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri(&format!("/models/{}/history", model.id)).to_request();
        let history: ModelHistory = test::call_and_read_body_json(&app, req).await;
        assert!(history.nonconformities.is_empty());
    }

    #[actix_rt::test]
    async fn test_edit_attach_and_delete_nonconformity() {
        let env = test_env();
        let app = init_app!(env);

        let req = test::TestRequest::post()
            .uri("/models")
            .set_json(json!({ "model_version": "190A56980" }))
            .to_request();
        let model: Model = test::call_and_read_body_json(&app, req).await;
        let req = multipart_request(
            &format!("/models/{}/nonconformities", model.id),
            vec![Part::Text("severity", "Minor")],
        )
        .to_request();
        let nc: Nonconformity = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::patch()
            .uri(&format!("/nonconformities/{}", nc.id))
            .set_json(json!({ "severity": "Major", "description": " loose screw " }))
            .to_request();
        let edited: Nonconformity = test::call_and_read_body_json(&app, req).await;
        assert_eq!(edited.severity, "Major");
        assert_eq!(edited.description, "loose screw");

        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(png()));
        let req = test::TestRequest::post()
            .uri(&format!("/nonconformities/{}/photos", nc.id))
            .set_json(json!({ "image": data_uri }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let photo: NcImage = test::read_body_json(resp).await;

        let req = test::TestRequest::post()
            .uri(&format!("/nonconformities/{}/photos", nc.id))
            .set_json(json!({ "image": "@@not-base64@@" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete()
            .uri(&format!("/nonconformities/{}", nc.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri(&format!("/{}", photo.image_path)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_import_csv() {
        let env = test_env();
        let app = init_app!(env);

        let csv = "ModelVersion,MO,Severity,Description,DefectiveQty\n\
                   190A56980,MO-1,Critical,cold joint,3\n\
                   300C00001,MO-2,Minor,label skew,1\n\
                   ,,,,\n";
        let req = multipart_request("/import", vec![Part::File("file", "nc.csv", csv.as_bytes().to_vec())])
            .to_request();
        let summary: ImportSummary = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary, ImportSummary { imported: 2 });

        let req = test::TestRequest::get().uri("/models?q=300").to_request();
        let found: Vec<ModelListing> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model.model_root, "300-00001");

        let req = multipart_request("/import", vec![Part::Text("note", "no file")]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        for (name, bytes) in [("nc.xls", b"whatever".to_vec()), ("nc.xlsx", b"PK\x03\x04junk".to_vec())] {
            let req = multipart_request("/import", vec![Part::File("file", name, bytes)]).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", name);
        }
    }

    #[actix_rt::test]
    async fn test_get_image_with_bad_path_is_client_error() {
        let env = test_env();
        let app = init_app!(env);

        for uri in ["/images/missing/0000.jpg", "/preview/missing/0000.jpg", "/images/../qc_portal.sqlite3"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_client_error(), "{}", uri);
        }
    }
}
