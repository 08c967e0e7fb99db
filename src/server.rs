//! HTTP surface (feature `server`).
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/upload` | multipart field `file` → elements, figures, notes |
//! | `POST /api/process-extracted-data[?mode=single\|incremental]` | notes for already-extracted data |
//! | `GET  /api/images/{filename}` | published figure JPEGs |
//! | `GET  /health` | liveness |
//!
//! Every failure body is `{ "error", "details", "kind" }`, where `kind` is
//! the [`FaultKind`] tag of the underlying [`NotesError`]. Failures answer
//! 500; the exceptions are an upload without a `file` field and an invalid
//! image name (400), and a missing image (404).

use crate::config::GenerationMode;
use crate::document::{base64_bytes, ContentElement, ExtractedDocument};
use crate::error::{FaultKind, NotesError};
use crate::images::ImageStore;
use crate::output::NotesStats;
use crate::pipeline::normalize::renormalize;
use crate::process::Pipeline;
use actix_multipart::Multipart;
use actix_web::error::InternalError;
use actix_web::http::header;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Largest accepted upload or JSON body.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub images: ImageStore,
    /// Write uploaded figures to the image store and return their URLs.
    pub publish_figures: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    details: String,
    kind: FaultKind,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    data: UploadData,
}

#[derive(Debug, Serialize)]
struct UploadData {
    elements: Vec<ContentElement>,
    figures: Vec<UploadFigure>,
    notes: String,
    stats: NotesStats,
}

#[derive(Debug, Serialize)]
struct UploadFigure {
    name: String,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct NotesResponse {
    message: &'static str,
    notes: String,
    stats: NotesStats,
}

#[derive(Debug, Deserialize)]
struct NotesQuery {
    #[serde(default)]
    mode: Option<String>,
}

fn error_response(summary: &str, err: &NotesError) -> HttpResponse {
    let kind = err.kind();
    HttpResponse::InternalServerError().json(ErrorBody {
        error: summary.to_string(),
        details: err.to_string(),
        kind,
    })
}

#[post("/upload")]
async fn upload(data: web::Data<AppState>, mut payload: Multipart) -> impl Responder {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = payload.next().await {
        let mut field = match field {
            Ok(field) => field,
            Err(e) => return bad_multipart(e.to_string()),
        };
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload.pdf")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            match chunk {
                Ok(chunk) if bytes.len() + chunk.len() <= MAX_BODY_BYTES => {
                    bytes.extend_from_slice(&chunk)
                }
                Ok(_) => return bad_multipart(format!("file exceeds {MAX_BODY_BYTES} bytes")),
                Err(e) => return bad_multipart(e.to_string()),
            }
        }
        file = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = file else {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "No file provided" }));
    };

    let cancel = CancellationToken::new();
    let output = match data.pipeline.run(&bytes, &file_name, &cancel).await {
        Ok(output) => output,
        Err(e) => {
            error!("Upload '{}' failed: {}", file_name, e);
            return error_response("Error processing file", &e);
        }
    };

    let mut urls: Vec<Option<String>> = vec![None; output.figures.len()];
    if data.publish_figures {
        match data.images.publish(&output.figures).await {
            Ok(published) => {
                for p in published {
                    urls[p.index] = Some(format!("/api/images/{}", p.filename));
                }
            }
            Err(e) => warn!("Figures for '{}' not published: {}", file_name, e),
        }
    }

    let figures = output
        .figures
        .into_iter()
        .zip(urls)
        .map(|(fig, url)| UploadFigure {
            name: fig.name,
            data: fig.data,
            url,
        })
        .collect();

    info!("Upload '{}' processed", file_name);
    HttpResponse::Ok().json(UploadResponse {
        message: "File processed successfully",
        data: UploadData {
            elements: output.elements,
            figures,
            notes: output.notes,
            stats: output.stats,
        },
    })
}

fn bad_multipart(details: String) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorBody {
        error: "Invalid upload".to_string(),
        details,
        kind: FaultKind::Input,
    })
}

#[post("/process-extracted-data")]
async fn process_extracted_data(
    data: web::Data<AppState>,
    query: web::Query<NotesQuery>,
    body: web::Json<ExtractedDocument>,
) -> impl Responder {
    const SUMMARY: &str = "Error processing extracted data";

    let generator = data.pipeline.generator();
    let mode = match query.mode.as_deref() {
        Some(m) => match m.parse::<GenerationMode>() {
            Ok(mode) => mode,
            Err(e) => {
                let e = NotesError::Validation {
                    detail: e.to_string(),
                };
                return error_response(SUMMARY, &e);
            }
        },
        None => generator.mode(),
    };

    let mut doc = body.into_inner();
    doc.elements = match renormalize(doc.elements) {
        Ok(elements) => elements,
        Err(e) => return error_response(SUMMARY, &e),
    };

    let cancel = CancellationToken::new();
    match generator.generate_with_mode(mode, &doc, &cancel).await {
        Ok(notes) => HttpResponse::Ok().json(NotesResponse {
            message: "Notes generated successfully",
            notes: notes.text,
            stats: notes.stats,
        }),
        Err(e) => {
            error!("Notes generation failed: {}", e);
            error_response(SUMMARY, &e)
        }
    }
}

#[get("/images/{filename}")]
async fn image(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match data.images.read(&path).await {
        Ok(Some(bytes)) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
            .body(bytes),
        Ok(None) => HttpResponse::NotFound().body("File not found"),
        Err(e @ NotesError::Validation { .. }) => HttpResponse::BadRequest().json(ErrorBody {
            error: "Invalid image name".to_string(),
            details: e.to_string(),
            kind: e.kind(),
        }),
        Err(e) => error_response("Error reading image", &e),
    }
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Unreadable JSON bodies get the same error shape as every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| {
            let body = ErrorBody {
                error: "Error processing extracted data".to_string(),
                details: err.to_string(),
                kind: FaultKind::Parse,
            };
            InternalError::from_response(err, HttpResponse::InternalServerError().json(body)).into()
        })
}

/// Register every route; shared by [`start_server`] and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(health)
        .service(
            web::scope("/api")
                .service(upload)
                .service(process_extracted_data)
                .service(image),
        );
}

/// Bind and start the server. Await the returned [`Server`] to run it.
pub fn start_server(state: AppState, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    info!("Listening on http://{}:{}", host, port);
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind((host, port))?
        .run();
    Ok(server)
}
