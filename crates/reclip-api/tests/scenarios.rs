//! End-to-end flows through the HTTP router, with jobs executed in-process
//! by a stub renderer.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use reclip_api::{create_router, ApiConfig, AppState, JobService};
use reclip_media::{MediaResult, ProgressReporter, RenderJob, RenderOutput, RenderRequest, Renderer};
use reclip_models::JobId;
use reclip_queue::{JobQueue, MemoryQueue};
use reclip_storage::{JobLayout, MemoryJobStore, UploadStore};
use reclip_worker::{JobExecutor, JobOutcome, Stager, WorkerConfig, WorkerContext};

const BOUNDARY: &str = "reclip-test-boundary";

/// Writes one file per primary input. Concat outputs land in numbered
/// pair directories.
struct StubRenderer;

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(
        &self,
        request: RenderRequest,
        reporter: &dyn ProgressReporter,
    ) -> MediaResult<RenderOutput> {
        let targets: Vec<(PathBuf, PathBuf)> = match &request.job {
            RenderJob::Concat { files_a, files_b, .. } => files_a
                .iter()
                .zip(files_b)
                .enumerate()
                .map(|(i, (a, _))| {
                    let dir = request.output_dir.join((i + 1).to_string());
                    (a.clone(), dir.join(format!("{}_joined.mp4", stem(a))))
                })
                .collect(),
            RenderJob::Ugc { files, .. } => files
                .iter()
                .map(|f| (f.clone(), request.output_dir.join(format!("{}_processed.mp4", stem(f)))))
                .collect(),
        };

        let total = targets.len() as u32;
        let mut output = RenderOutput {
            items: total,
            ..Default::default()
        };
        for (i, (input, out)) in targets.into_iter().enumerate() {
            if let Some(parent) = out.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = tokio::fs::read(&input).await?;
            tokio::fs::write(&out, &bytes).await?;
            reporter.progress(i as u32 + 1, total);
            reporter.log(&format!("wrote {}", out.display()));
            output.outputs.push(out);
        }
        output.summary.insert("success".into(), json!(total));
        output.summary.insert("failed".into(), json!(0));
        Ok(output)
    }
}

fn stem(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct Harness {
    _dir: TempDir,
    app: Router,
    store: Arc<MemoryJobStore>,
    queue: Arc<MemoryQueue>,
    executor: JobExecutor,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let layout = JobLayout::new(dir.path().join("jobs"));
    let uploads = UploadStore::new(dir.path().join("uploads"));
    let store = Arc::new(MemoryJobStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let service = JobService::new(store.clone(), queue.clone(), uploads.clone(), layout.clone());
    let ctx = WorkerContext {
        store: store.clone(),
        queue: queue.clone(),
        renderer: Arc::new(StubRenderer),
        stager: Stager::new(uploads, layout.clone(), dir.path().join("assets")),
        layout,
        packager: service.packager(),
    };
    let executor = JobExecutor::new(WorkerConfig::default(), ctx);
    let app = create_router(AppState::new(ApiConfig::default(), service), None);

    Harness {
        _dir: dir,
        app,
        store,
        queue,
        executor,
    }
}

impl Harness {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Bytes) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let (status, body) = self.get(uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn upload(&self, name: &str, content: &str) -> String {
        let (status, body) = self.send(multipart_upload(name, content, Some("main"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["name"], json!(name));
        assert_eq!(body["size"], json!(content.len()));
        assert_eq!(body["role"], json!("main"));
        body["id"].as_str().unwrap().to_string()
    }

    async fn run(&self, job_id: &str) {
        let outcome = self
            .executor
            .process_job(&JobId::from_string(job_id))
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Finished);
    }
}

fn multipart_upload(name: &str, content: &str, role: Option<&str>) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
         Content-Type: video/mp4\r\n\r\n{content}\r\n"
    );
    if let Some(role) = role {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"role\"\r\n\r\n{role}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::post("/api/uploads")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_concat_flat_archive_is_built_on_first_download() {
    let h = harness();
    let a1 = h.upload("intro.mp4", "aaaa").await;
    let a2 = h.upload("hook.mp4", "cccc").await;
    let b1 = h.upload("outro.mp4", "bbbb").await;
    let b2 = h.upload("cta.mp4", "dddd").await;

    let (status, body) = h
        .post_json(
            "/api/jobs/concat",
            json!({
                "files_a": [a1, a2],
                "files_b": [b1, b2],
                "order": "a_then_b",
                "crf": 18,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert_eq!(h.queue.len().await.unwrap(), 1);

    let (status, job) = h.get_json(&format!("/api/jobs/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], json!("queued"));
    assert_eq!(job["type"], json!("concat"));
    assert!(job.get("params").is_none());

    let (status, body) = h.get_json(&format!("/api/jobs/{job_id}/download-zip/flat")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("not_ready"));

    h.run(&job_id).await;

    let (_, job) = h.get_json(&format!("/api/jobs/{job_id}")).await;
    assert_eq!(job["status"], json!("finished"));
    assert_eq!(
        job["outputs"],
        json!(["1/intro_joined.mp4", "2/hook_joined.mp4"])
    );
    assert_eq!(job["summary"]["flat_zip_ready"], json!(false));
    assert_eq!(job["summary"]["nested_zip_ready"], json!(false));

    for _ in 0..2 {
        let request = Request::get(format!("/api/jobs/{job_id}/download-zip/flat"))
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&format!("{job_id}_flat_outputs.zip")));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    let (_, job) = h.get_json(&format!("/api/jobs/{job_id}")).await;
    assert_eq!(job["summary"]["flat_zip_ready"], json!(true));
    assert_eq!(job["summary"]["nested_zip_ready"], json!(false));

    let (status, bytes) = h
        .get(&format!("/api/jobs/{job_id}/download/1/intro_joined.mp4"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"aaaa");
}

#[tokio::test]
async fn test_ugc_job_outputs_and_default_archive() {
    let h = harness();
    let mut files = Vec::new();
    for name in ["one.mp4", "two.mp4", "three.mp4"] {
        files.push(h.upload(name, name).await);
    }

    let (status, body) = h
        .post_json(
            "/api/jobs/ugc",
            json!({"files": files, "enable_captions": false}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    h.run(&job_id).await;

    let (_, job) = h.get_json(&format!("/api/jobs/{job_id}")).await;
    assert_eq!(job["status"], json!("finished"));
    assert_eq!(job["outputs"].as_array().unwrap().len(), 3);
    assert_eq!(job["progress"], json!({"current": 3, "total": 3}));
    assert_eq!(job["summary"]["zip_ready"], json!(false));

    let (status, body) = h.get(&format!("/api/jobs/{job_id}/download-zip")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with(b"PK"));

    let (_, job) = h.get_json(&format!("/api/jobs/{job_id}")).await;
    assert_eq!(job["summary"]["zip_ready"], json!(true));

    // Only the default archive exists for this job type
    let (status, _) = h.get(&format!("/api/jobs/{job_id}/download-zip/flat")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = h.get_json(&format!("/api/jobs/{job_id}/logs?tail=1")).await;
    assert_eq!(status, StatusCode::OK);
    let logs = body["logs"].as_str().unwrap();
    assert_eq!(logs.lines().count(), 1);
    assert!(logs.ends_with('\n'));
    assert!(logs.contains("Done: 3 outputs"));
}

#[tokio::test]
async fn test_unknown_upload_creates_no_job() {
    let h = harness();

    let (status, body) = h
        .post_json("/api/jobs/ugc", json!({"files": ["deadbeefdeadbeef"]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("validation_error"));
    assert!(body["detail"].as_str().unwrap().contains("deadbeefdeadbeef"));

    assert_eq!(h.store.len().await, 0);
    assert_eq!(h.queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness();
    let id = JobId::new();

    for uri in [
        format!("/api/jobs/{id}"),
        format!("/api/jobs/{id}/logs"),
        format!("/api/jobs/{id}/download-zip"),
        format!("/api/jobs/{id}/download/out.mp4"),
    ] {
        let (status, body) = h.get_json(&uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["code"], json!("not_found"));
    }
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let h = harness();

    let (status, body) = h.post_json("/api/jobs/concat", json!({"files_a": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("validation_error"));

    let request = Request::post("/api/uploads")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"role\"\r\n\r\na\r\n--{BOUNDARY}--\r\n"
        )))
        .unwrap();
    let (status, _) = h.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_security_headers() {
    let h = harness();

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));
}
