use crate::config::Config;
use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use driftbox_core::{
    BlobStore, DriftError, IdGenerator, MetadataStore, Result, RetentionSweeper,
    RetrieveFileOperation, RetrieveFileOperationOutcome, RetrieveFileOperationRequest,
    StoreFileOperation, StoreFileOperationRequest, SweepExpiredOperation,
};
use futures_util::TryStreamExt;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "fileUpload";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct ServerState {
    pub store_file: StoreFileOperation,
    pub retrieve_file: RetrieveFileOperation,
    pub config: Config,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct FileInfoResponse {
    id: String,
    name: String,
    content_type: String,
    uploaded_at: i64,
    uploaded_at_human: String,
}

/// Metadata table and blob directory shared by every request and the sweeper.
#[derive(Clone)]
pub struct Storage {
    pub metadata_store: Arc<MetadataStore>,
    pub blob_store: Arc<BlobStore>,
}

impl Storage {
    pub fn open(config: &Config) -> Result<Self> {
        Ok(Self {
            metadata_store: Arc::new(MetadataStore::new(config.storage.metadata_file.clone())?),
            blob_store: Arc::new(BlobStore::new(config.storage.storage_dir.clone())),
        })
    }

    pub fn sweeper(&self, config: &Config) -> RetentionSweeper {
        let operation = SweepExpiredOperation::new(
            self.metadata_store.clone(),
            self.blob_store.clone(),
            config.retention_policy(),
        );
        RetentionSweeper::new(operation, config.sweep_interval())
    }

    pub fn server_state(&self, config: Config) -> ServerState {
        let id_generator = Arc::new(IdGenerator::new(config.upload.id_length));

        ServerState {
            store_file: StoreFileOperation::new(
                self.metadata_store.clone(),
                self.blob_store.clone(),
                id_generator,
            ),
            retrieve_file: RetrieveFileOperation::new(
                self.metadata_store.clone(),
                self.blob_store.clone(),
            ),
            config,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    let max_upload_bytes = state.config.upload.max_upload_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(upload_file))
        .route("/storage/:id", get(show_file))
        .route("/download/:id", get(download_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let storage = Storage::open(&config)?;
    storage.blob_store.ensure_root().await?;

    // Files that expired while the process was down.
    let sweeper = storage.sweeper(&config);
    if let Err(e) = sweeper.sweep_now().await {
        tracing::error!("Startup retention sweep failed: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = sweeper.spawn(shutdown_rx);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(storage.server_state(config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        tracing::warn!("Retention sweeper task ended abnormally: {}", e);
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn error_status(error: &DriftError) -> StatusCode {
    match error {
        DriftError::NotFound(_) => StatusCode::NOT_FOUND,
        DriftError::InvalidForm(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message),
    };
    (status, axum::Json(resp)).into_response()
}

fn drift_error_response(error: DriftError) -> Response {
    error_response(error_status(&error), error.to_string())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({ "status": "ok" })))
}

async fn upload_file(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return drift_error_response(DriftError::InvalidForm(format!(
                    "missing '{}' field",
                    UPLOAD_FIELD
                )));
            }
            Err(e) => return error_response(e.status(), e.body_text()),
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            return drift_error_response(DriftError::InvalidForm(format!(
                "'{}' field has no file name",
                UPLOAD_FIELD
            )));
        };
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        // A broken or oversized request body is the client's fault, not a
        // storage failure; remember its status across the io::Error boundary.
        let client_error: OnceLock<(StatusCode, String)> = OnceLock::new();
        let body = StreamReader::new(field.map_err(|e| {
            let _ = client_error.set((e.status(), e.body_text()));
            std::io::Error::other(e.to_string())
        }));
        tokio::pin!(body);

        let request = StoreFileOperationRequest {
            file_name,
            content_type,
        };

        return match state.store_file.run(request, body).await {
            Ok(result) => {
                let resp = ApiResponse {
                    success: true,
                    data: Some(UploadResponse {
                        id: result.record.id,
                        name: result.record.original_name,
                    }),
                    error: None,
                };
                (StatusCode::CREATED, axum::Json(resp)).into_response()
            }
            Err(e) => match client_error.get() {
                Some((status, message)) => error_response(*status, message.clone()),
                None => {
                    tracing::error!("Upload failed: {}", e);
                    drift_error_response(e)
                }
            },
        };
    }
}

async fn show_file(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    let request = RetrieveFileOperationRequest {
        id: id.clone(),
        include_body: false,
    };

    match state.retrieve_file.run(request).await {
        Ok(RetrieveFileOperationOutcome::Found(result)) => {
            let record = result.record;
            let resp = ApiResponse {
                success: true,
                data: Some(FileInfoResponse {
                    uploaded_at_human: format_upload_time(record.uploaded_at),
                    id: record.id,
                    name: record.original_name,
                    content_type: record.content_type,
                    uploaded_at: record.uploaded_at,
                }),
                error: None,
            };
            (StatusCode::OK, axum::Json(resp)).into_response()
        }
        Ok(RetrieveFileOperationOutcome::NotFound) => {
            drift_error_response(DriftError::NotFound(id))
        }
        Err(e) => drift_error_response(e),
    }
}

async fn download_file(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    let request = RetrieveFileOperationRequest {
        id: id.clone(),
        include_body: true,
    };

    let result = match state.retrieve_file.run(request).await {
        Ok(RetrieveFileOperationOutcome::Found(result)) => result,
        Ok(RetrieveFileOperationOutcome::NotFound) => {
            return drift_error_response(DriftError::NotFound(id));
        }
        Err(e) => return drift_error_response(e),
    };

    let Some(blob) = result.body else {
        return drift_error_response(DriftError::Internal(
            "blob body was not opened".to_string(),
        ));
    };

    let record = result.record;
    let headers = [
        (header::CONTENT_TYPE, content_type_header(&record.content_type)),
        (header::CONTENT_LENGTH, HeaderValue::from(blob.len)),
        (
            header::CONTENT_DISPOSITION,
            content_disposition_header(&record.original_name),
        ),
    ];

    (
        StatusCode::OK,
        headers,
        Body::from_stream(ReaderStream::new(blob.file)),
    )
        .into_response()
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
fn format_upload_time(uploaded_at: i64) -> String {
    chrono::DateTime::from_timestamp(uploaded_at, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| uploaded_at.to_string())
}

fn content_type_header(content_type: &str) -> HeaderValue {
    if content_type.trim().is_empty() {
        return HeaderValue::from_static(DEFAULT_CONTENT_TYPE);
    }
    HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
}

/// `attachment; filename=<name>`, with the name reduced to printable ASCII and
/// quoted when it contains separators. Non-ASCII names also get an RFC 5987
/// `filename*` parameter carrying the exact UTF-8 name.
fn content_disposition_header(original_name: &str) -> HeaderValue {
    let ascii_name: String = original_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    let mut value = if ascii_name.contains([' ', ';', ',']) {
        format!("attachment; filename=\"{}\"", ascii_name)
    } else {
        format!("attachment; filename={}", ascii_name)
    };

    if !original_name.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in original_name.bytes() {
            if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
                value.push(byte as char);
            } else {
                value.push_str(&format!("%{:02X}", byte));
            }
        }
    }

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "driftbox-test-boundary";

    fn build_app(temp_dir: &tempfile::TempDir) -> (Router, Storage) {
        build_app_with(temp_dir, |_| {})
    }

    fn build_app_with(
        temp_dir: &tempfile::TempDir,
        customize: impl FnOnce(&mut Config),
    ) -> (Router, Storage) {
        let mut config = Config::default();
        config.storage.storage_dir = temp_dir.path().join("storage");
        config.storage.metadata_file = temp_dir.path().join("storage.json");
        customize(&mut config);

        let storage = Storage::open(&config).unwrap();
        let app = router(Arc::new(storage.server_state(config)));
        (app, storage)
    }

    fn multipart_request(
        field: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn upload(app: &Router, file_name: &str, content_type: &str, data: &[u8]) -> String {
        let response = app
            .clone()
            .oneshot(multipart_request(UPLOAD_FIELD, file_name, content_type, data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["name"], file_name);
        json["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, _) = build_app(&temp_dir);

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, _) = build_app(&temp_dir);

        let id = upload(&app, "a.txt", "text/plain", b"0123456789").await;
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

        let response = app
            .clone()
            .oneshot(get_request(&format!("/download/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("filename=a.txt"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_file_info_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, _) = build_app(&temp_dir);
        let id = upload(&app, "report.pdf", "application/pdf", b"%PDF-1.7").await;

        let response = app
            .oneshot(get_request(&format!("/storage/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["id"], id.as_str());
        assert_eq!(json["data"]["name"], "report.pdf");
        assert_eq!(json["data"]["content_type"], "application/pdf");
        let human = json["data"]["uploaded_at_human"].as_str().unwrap();
        assert_eq!(human.len(), "2006-01-02 15:04:05".len());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, _) = build_app(&temp_dir);

        for uri in ["/download/doesnotexist", "/storage/doesnotexist"] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(response).await["success"], false);
        }
    }

    #[tokio::test]
    async fn test_missing_blob_is_server_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, storage) = build_app(&temp_dir);
        let id = upload(&app, "a.txt", "text/plain", b"x").await;

        let record = storage.metadata_store.lookup(&id).unwrap().unwrap();
        std::fs::remove_file(&record.storage_path).unwrap();

        let response = app
            .oneshot(get_request(&format!("/download/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, storage) = build_app_with(&temp_dir, |config| {
            config.upload.max_upload_bytes = 64;
        });

        let response = app
            .oneshot(multipart_request(
                UPLOAD_FIELD,
                "big.bin",
                "application/octet-stream",
                &vec![b'x'; 10_000],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["success"], false);
        assert!(storage.metadata_store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_limit_hit_mid_file_is_payload_too_large() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, storage) = build_app_with(&temp_dir, |config| {
            config.upload.max_upload_bytes = 1024;
        });

        // Headers and the start of the file fit under the limit, so the field is
        // handed to the blob writer before the limit trips.
        let mut chunks: Vec<std::io::Result<Vec<u8>>> = vec![Ok(format!(
            "--{}\r\n\
             Content-Disposition: form-data; name=\"{}\"; filename=\"big.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, UPLOAD_FIELD
        )
        .into_bytes())];
        for _ in 0..10 {
            chunks.push(Ok(vec![b'x'; 1000]));
        }
        chunks.push(Ok(format!("\r\n--{}--\r\n", BOUNDARY).into_bytes()));

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(storage.metadata_store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_file_field_is_bad_request() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, storage) = build_app(&temp_dir);

        let response = app
            .oneshot(multipart_request("somethingElse", "a.txt", "text/plain", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(storage.metadata_store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_that_is_not_multipart_is_client_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, _) = build_app(&temp_dir);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_download_uses_octet_stream_for_blank_type() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (app, storage) = build_app(&temp_dir);
        let id = upload(&app, "blob", "application/x-custom", b"abc").await;

        // Rewrite the record with an empty content type, as older tables may hold.
        let mut record = storage.metadata_store.lookup(&id).unwrap().unwrap();
        storage.metadata_store.delete_many(&[id.clone()]).unwrap();
        record.content_type = String::new();
        storage.metadata_store.insert(record).unwrap();

        let response = app
            .oneshot(get_request(&format!("/download/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_content_disposition_header() {
        assert_eq!(content_disposition_header("a.txt"), "attachment; filename=a.txt");
        assert_eq!(
            content_disposition_header("my report.pdf"),
            "attachment; filename=\"my report.pdf\""
        );
        assert_eq!(
            content_disposition_header("say \"hi\".txt"),
            "attachment; filename=\"say _hi_.txt\""
        );
        assert_eq!(
            content_disposition_header("résumé.pdf"),
            "attachment; filename=r_sum_.pdf; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }

    #[test]
    fn test_format_upload_time() {
        assert_eq!(format_upload_time(0), "1970-01-01 00:00:00");
        assert_eq!(format_upload_time(1_700_000_000), "2023-11-14 22:13:20");
    }
}
