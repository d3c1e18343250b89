use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use compute::{
    filter_layers, layer_overview, map_frame, projects_csv, projects_shapefile_zip, summarize,
    LayerSelection, MapFrame, Summary, CSV_EXPORT_NAME, SHAPEFILE_EXPORT_NAME,
};
use formats::geojson::to_feature_collection;
use formats::GeoTable;
use ingest::{CompanionTable, PipelineError, Stage, UploadRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use store::Dataset;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{require_admin, require_visitor};
use crate::error::ApiError;
use crate::state::AppState;

pub fn build_app(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    let visitor = Router::new()
        .route("/api/layers", get(list_layers))
        .route("/api/projects", get(get_projects))
        .route("/api/boundary", get(get_boundary))
        .route("/api/summary", get(get_summary))
        .route("/api/export/projects.csv", get(export_csv))
        .route("/api/export/projects.zip", get(export_shapefile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_visitor));

    let admin = Router::new()
        .route("/api/admin/upload", post(upload))
        .route("/api/admin/layers/:code", delete(delete_layer))
        .route("/api/admin/cache/clear", post(clear_cache))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(visitor)
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

/// Runs store and pipeline work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("background task failed: {e}")))?
}

async fn load_dataset(state: &AppState) -> Result<Arc<Dataset>, ApiError> {
    let data = state.data.clone();
    blocking(move || data.dataset().map_err(ApiError::from)).await
}

#[derive(Debug, Default, Deserialize)]
struct LayerQuery {
    /// Comma separated layer codes; absent means every layer.
    layers: Option<String>,
}

fn selected(state: &AppState, dataset: &Dataset, query: &LayerQuery) -> Option<GeoTable> {
    let selection = LayerSelection::parse(query.layers.as_deref(), &state.catalog);
    dataset
        .projects
        .as_ref()
        .map(|projects| filter_layers(projects, &selection))
}

async fn list_layers(State(state): State<AppState>) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let layers =
        blocking(move || Ok(layer_overview(&state.catalog, dataset.projects.as_ref()))).await?;
    Ok(Json(layers).into_response())
}

async fn get_projects(
    State(state): State<AppState>,
    Query(query): Query<LayerQuery>,
) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let body = blocking(move || {
        Ok(match selected(&state, &dataset, &query) {
            Some(projects) => to_feature_collection(&projects),
            None => json!({ "type": "FeatureCollection", "features": [] }),
        })
    })
    .await?;
    Ok(Json(body).into_response())
}

async fn get_boundary(State(state): State<AppState>) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let body = blocking(move || {
        dataset
            .boundary
            .as_ref()
            .map(to_feature_collection)
            .ok_or_else(|| ApiError::not_found("no basin boundary has been published"))
    })
    .await?;
    Ok(Json(body).into_response())
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    layers: Vec<String>,
    has_data: bool,
    summary: Summary,
    map: MapFrame,
}

async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<LayerQuery>,
) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let response = blocking(move || {
        let projects = selected(&state, &dataset, &query);
        Ok(SummaryResponse {
            layers: LayerSelection::parse(query.layers.as_deref(), &state.catalog)
                .codes()
                .to_vec(),
            has_data: dataset.projects.is_some(),
            summary: projects
                .as_ref()
                .map(|p| summarize(p, &state.catalog))
                .unwrap_or_default(),
            map: map_frame(projects.as_ref(), dataset.boundary.as_ref()),
        })
    })
    .await?;
    Ok(Json(response).into_response())
}

fn attachment(content_type: &str, file_name: &str, bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<LayerQuery>,
) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let bytes = blocking(move || {
        let projects = selected(&state, &dataset, &query)
            .ok_or_else(|| ApiError::not_found("no project data has been published"))?;
        projects_csv(&projects, &state.schema).map_err(|e| ApiError::internal(e.to_string()))
    })
    .await?;
    Ok(attachment("text/csv; charset=utf-8", CSV_EXPORT_NAME, bytes))
}

async fn export_shapefile(
    State(state): State<AppState>,
    Query(query): Query<LayerQuery>,
) -> Result<Response, ApiError> {
    let dataset = load_dataset(&state).await?;
    let bytes = blocking(move || {
        let projects = selected(&state, &dataset, &query)
            .ok_or_else(|| ApiError::not_found("no project data has been published"))?;
        projects_shapefile_zip(&projects).map_err(|e| ApiError::internal(e.to_string()))
    })
    .await?;
    Ok(attachment("application/zip", SHAPEFILE_EXPORT_NAME, bytes))
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    layer: String,
    records: usize,
    merge: String,
    resolved: Vec<(String, String)>,
    defaulted: Vec<String>,
    filled_cells: Vec<(String, usize)>,
}

/// Multipart fields: `layer` (code), `archive` (zipped shapefile) and an
/// optional `table` (CSV or spreadsheet, named by its file name).
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut layer = None;
    let mut archive = None;
    let mut table = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "layer" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                layer = Some(text);
            }
            "archive" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()).at(Stage::Archive))?;
                archive = Some(bytes.to_vec());
            }
            "table" => {
                let file_name = field.file_name().unwrap_or("table.csv").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()).at(Stage::Table))?;
                if !bytes.is_empty() {
                    table = Some(CompanionTable {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            other => debug!("ignoring multipart field '{other}'"),
        }
    }

    let layer_code = layer
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("A layer code is required").at(Stage::Layer))?;
    let archive = archive
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::bad_request("A zipped shapefile is required").at(Stage::Archive))?;
    let request = UploadRequest {
        layer_code,
        archive,
        table,
    };

    let worker = state.clone();
    let response = blocking(move || {
        let processed = worker.pipeline.process(&request)?;
        worker
            .data
            .publish_layer(&processed.layer_code, &processed.table)
            .map_err(PipelineError::storage)?;
        Ok(UploadResponse {
            layer: processed.layer_code,
            records: processed.table.len(),
            merge: processed.merge.to_string(),
            resolved: processed.report.resolved,
            defaulted: processed.report.defaulted,
            filled_cells: processed.report.filled_cells,
        })
    })
    .await?;
    info!("{}: published {} records", response.layer, response.records);
    Ok(Json(response).into_response())
}

async fn delete_layer(
    State(state): State<AppState>,
    AxumPath(code): AxumPath<String>,
) -> Result<Response, ApiError> {
    let data = state.data.clone();
    let lookup = code.clone();
    let removed = blocking(move || data.remove_layer(&lookup).map_err(ApiError::from)).await?;
    Ok(Json(json!({ "layer": code.trim().to_uppercase(), "removed": removed })).into_response())
}

/// Invalidation waits for an in-flight load to finish, so it runs off the executor.
async fn clear_cache(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let data = state.data.clone();
    blocking(move || {
        data.invalidate();
        Ok(())
    })
    .await?;
    info!("dataset cache cleared");
    Ok(Json(json!({ "cleared": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use catalog::{CanonicalSchema, LayerCatalog};
    use formats::shapefile::shapefile_bytes;
    use formats::{AttributeTable, CellValue, Column};
    use foundation::Crs;
    use geo_types::{polygon, Geometry};
    use ingest::{Pipeline, PipelineOptions};
    use std::io::{Cursor, Write};
    use std::time::Duration;
    use store::{DatasetService, LayerStore};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const BOUNDARY: &str = "forestry-test-boundary";

    fn app(dir: &TempDir, auth: AuthConfig) -> Router {
        let catalog = Arc::new(LayerCatalog::builtin());
        let schema = Arc::new(CanonicalSchema::default());
        let store = LayerStore::open(dir.path(), catalog.clone(), schema.clone()).unwrap();
        let state = AppState::new(
            catalog.clone(),
            schema.clone(),
            Pipeline::new(catalog, schema, PipelineOptions::default()),
            DatasetService::new(store, Duration::from_secs(3600)),
            auth,
        );
        build_app(state, 16 * 1024 * 1024)
    }

    fn open() -> AuthConfig {
        AuthConfig {
            admin_password: Some("admin".to_string()),
            visitor_password: None,
        }
    }

    fn zip(entries: Vec<(String, Vec<u8>)>) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn parcels_zip(folios: &[&str]) -> Vec<u8> {
        let attributes = AttributeTable::from_columns(
            folios.len(),
            vec![Column::new("FOLIO", folios.iter().map(|f| CellValue::from(*f)).collect())],
        )
        .unwrap();
        let geometries = (0..folios.len())
            .map(|i| {
                let x = -103.0 + i as f64 * 0.01;
                Geometry::from(polygon![
                    (x: x, y: 20.0),
                    (x: x + 0.005, y: 20.0),
                    (x: x + 0.005, y: 20.005),
                    (x: x, y: 20.005),
                ])
            })
            .collect();
        let table = GeoTable::new(attributes, geometries, Some(Crs::wgs84())).unwrap();
        zip(shapefile_bytes("predios", &table).unwrap())
    }

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, bytes) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>, token: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/admin/upload")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_and_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, open());
        let (status, body) = send(&app, get_request("/healthz")).await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, b"ok".as_slice()));

        let (status, summary) = send_json(&app, get_request("/api/summary")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["has_data"], false);
        assert_eq!(summary["map"]["zoom"], 7);

        let (status, _) = send_json(&app, get_request("/api/boundary")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_join_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, open());
        let archive = parcels_zip(&["A-001", "A-002"]);
        let body = multipart(&[
            ("layer", None, b"psa".as_slice()),
            ("archive", Some("predios.zip"), archive.as_slice()),
            ("table", Some("montos.csv"), b"FOLIO,MONTO_TOT\n a-001 ,500\n".as_slice()),
        ]);
        let (status, result) = send_json(&app, upload_request(body, "admin")).await;
        assert_eq!(status, StatusCode::OK, "{result}");
        assert_eq!(result["layer"], "PSA");
        assert_eq!(result["records"], 2);

        let (_, summary) = send_json(&app, get_request("/api/summary?layers=PSA")).await;
        assert_eq!(summary["summary"]["totals"]["total"], 500.0);
        assert_eq!(summary["summary"]["totals"]["projects"], 2);
        assert_eq!(summary["map"]["zoom"], 8);

        let (_, none) = send_json(&app, get_request("/api/summary?layers=PFC")).await;
        assert_eq!(none["summary"]["totals"]["projects"], 0);

        let (_, layers) = send_json(&app, get_request("/api/layers")).await;
        assert_eq!(layers[0]["code"], "PSA");
        assert_eq!(layers[0]["records"], 2);

        let (_, features) = send_json(&app, get_request("/api/projects")).await;
        let features = features["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1]["properties"]["MONTO_TOT"], 0.0);
        assert_eq!(features[1]["properties"]["MUNICIPIO"], "Sin Dato");

        let (status, csv) = send(&app, get_request("/api/export/projects.csv")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(csv).unwrap().contains("A-001"));
        let (status, zipped) = send(&app, get_request("/api/export/projects.zip")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&zipped[..2], b"PK");
    }

    #[tokio::test]
    async fn upload_errors_name_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, open());
        let csv_only = zip(vec![("datos.csv".to_string(), b"A\n1\n".to_vec())]);
        let body = multipart(&[
            ("layer", None, b"PSA".as_slice()),
            ("archive", Some("datos.zip"), csv_only.as_slice()),
        ]);
        let (status, err) = send_json(&app, upload_request(body, "admin")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"], "No .shp file found in the archive");
        assert_eq!(err["stage"], "archive");

        let archive = parcels_zip(&["A"]);
        let body = multipart(&[
            ("layer", None, b"XYZ".as_slice()),
            ("archive", Some("capa.zip"), archive.as_slice()),
        ]);
        let (status, err) = send_json(&app, upload_request(body, "admin")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["stage"], "layer");

        let body = multipart(&[("archive", Some("capa.zip"), archive.as_slice())]);
        let (_, err) = send_json(&app, upload_request(body, "admin")).await;
        assert_eq!(err["stage"], "layer");
    }

    #[tokio::test]
    async fn passwords_gate_the_routes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(
            &dir,
            AuthConfig {
                admin_password: Some("admin".to_string()),
                visitor_password: Some("guest".to_string()),
            },
        );
        let (status, _) = send_json(&app, get_request("/api/layers")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        for token in ["guest", "admin"] {
            let request = Request::builder()
                .uri("/api/layers")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            let (status, _) = send_json(&app, request).await;
            assert_eq!(status, StatusCode::OK, "{token}");
        }

        let body = multipart(&[("layer", None, b"PSA".as_slice())]);
        let (status, _) = send_json(&app, upload_request(body, "guest")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_and_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir, open());
        let archive = parcels_zip(&["M-1"]);
        let body = multipart(&[
            ("layer", None, b"MFC".as_slice()),
            ("archive", Some("mfc.zip"), archive.as_slice()),
        ]);
        let (status, _) = send_json(&app, upload_request(body, "admin")).await;
        assert_eq!(status, StatusCode::OK);

        let admin = |method: &str, uri: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, "Bearer admin")
                .body(Body::empty())
                .unwrap()
        };
        let (status, removed) = send_json(&app, admin("DELETE", "/api/admin/layers/mfc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed, json!({ "layer": "MFC", "removed": true }));

        let (status, _) = send_json(&app, admin("DELETE", "/api/admin/layers/NOPE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, summary) = send_json(&app, get_request("/api/summary")).await;
        assert_eq!(summary["has_data"], false);

        let (status, cleared) = send_json(&app, admin("POST", "/api/admin/cache/clear")).await;
        assert_eq!((status, cleared), (StatusCode::OK, json!({ "cleared": true })));
    }

    #[tokio::test]
    async fn clearing_the_cache_picks_up_another_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = app(&dir, open());
        let reader = app(&dir, open());
        let (_, before) = send_json(&reader, get_request("/api/summary")).await;
        assert_eq!(before["has_data"], false);

        let archive = parcels_zip(&["R-1", "R-2", "R-3"]);
        let body = multipart(&[
            ("layer", None, b"PSA".as_slice()),
            ("archive", Some("psa.zip"), archive.as_slice()),
        ]);
        let (status, _) = send_json(&writer, upload_request(body, "admin")).await;
        assert_eq!(status, StatusCode::OK);

        let (_, stale) = send_json(&reader, get_request("/api/summary")).await;
        assert_eq!(stale["has_data"], false);

        let clear = Request::builder()
            .method("POST")
            .uri("/api/admin/cache/clear")
            .header(header::AUTHORIZATION, "Bearer admin")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_json(&reader, clear).await;
        assert_eq!(status, StatusCode::OK);

        let (_, fresh) = send_json(&reader, get_request("/api/summary")).await;
        assert_eq!(fresh["has_data"], true);
        assert_eq!(fresh["summary"]["totals"]["projects"], 3);
    }
}
