use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use ragdoc::app::App;
use ragdoc::config::{parse_config, Config};
use ragdoc::ingest::{ParseStatus, UploadFile};
use ragdoc::embedding::DisabledProvider;
use ragdoc::server::{router, Envelope};
use ragdoc_core::embedding::HashProvider;
use ragdoc_core::error::Error;
use ragdoc_core::hash::digest_bytes;
use ragdoc_core::models::DocumentSelector;
use serde_json::{json, Value};
use tempfile::TempDir;

const DIMS: usize = 512;

const KUBERNETES: &str =
    "Kubernetes schedules containers across a cluster of machines and restarts failed pods.";
const BREAD: &str = "Sourdough bread needs flour, water, salt and a lively starter.";
const COMETS: &str = "Comets are icy bodies that grow bright tails near the sun.";

/// Documents containing this word make the mock embedding backend answer 503.
const OUTAGE: &str = "outagemarker";
/// Documents containing this word get vectors one component short.
const SHORT: &str = "shortvectormarker";

#[derive(Clone, Default)]
struct MockState {
    last_chat: Arc<Mutex<Option<Value>>>,
}

async fn mock_embeddings(Json(body): Json<Value>) -> Response {
    let embedder = HashProvider::new(DIMS);
    let inputs: Vec<&str> = body["input"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if inputs.iter().any(|t| t.contains(OUTAGE)) {
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
    }
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let mut vector = embedder.embed_text(text);
            if text.contains(SHORT) {
                vector.pop();
            }
            json!({ "index": i, "embedding": vector })
        })
        .collect();
    Json(json!({ "data": data })).into_response()
}

async fn mock_chat(State(state): State<MockState>, Json(body): Json<Value>) -> impl IntoResponse {
    *state.last_chat.lock().unwrap() = Some(body);
    let frame = |s: &str| format!("data: {}\n\n", json!({"choices": [{"delta": {"content": s}}]}));
    let sse = format!(
        "{}{}data: {{not json\n\n{}data: [DONE]\n\n",
        frame("Kubernetes "),
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        frame("orchestrates containers."),
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], sse)
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_backend() -> (SocketAddr, MockState) {
    let state = MockState::default();
    let app = Router::new()
        .route("/v1/embeddings", post(mock_embeddings))
        .route("/v1/chat/completions", post(mock_chat))
        .with_state(state.clone());
    (spawn(app).await, state)
}

fn test_config(root: &Path, backend: SocketAddr, extra: &str) -> Config {
    let src = format!(
        r#"
[db]
path = "{root}/data/ragdoc.sqlite"

[storage]
feeds_dir = "{root}/feeds"

[vector]
max_results = 3

[embedding]
provider = "openai"
model = "mock-embed"
dims = {DIMS}
url = "http://{backend}/v1"
api_key_env = "RAGDOC_TEST_UNSET_KEY"
max_retries = 0

[chat]
base_url = "http://{backend}"
top_k = 2

[server]
bind = "127.0.0.1:0"

{extra}
"#,
        root = root.display(),
    );
    parse_config(&src).unwrap()
}

async fn setup() -> (TempDir, App, MockState) {
    setup_with("").await
}

async fn setup_with(extra: &str) -> (TempDir, App, MockState) {
    let tmp = TempDir::new().unwrap();
    let (backend, state) = spawn_backend().await;
    let app = App::open(test_config(tmp.path(), backend, extra))
        .await
        .unwrap();
    (tmp, app, state)
}

fn file(name: &str, data: impl Into<Vec<u8>>) -> UploadFile {
    UploadFile {
        file_name: name.to_string(),
        data: data.into(),
    }
}

fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({phrase}) Tj ET");
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn truncated_pdf_is_rejected_and_nothing_is_stored() {
    let (tmp, app, _) = setup().await;

    let report = app
        .documents
        .upload_documents(vec![file("a.pdf", b"%PDF-1.4\n%".to_vec())])
        .await;
    assert_eq!(report.total, 1);
    assert_eq!(report.success, 0);
    assert_eq!(report.fail, 1);
    assert_eq!(report.fail_docs, vec!["a.pdf".to_string()]);
    assert!(report.details[0].error.is_some());

    let listing = app.documents.list_documents(1, 10).await.unwrap();
    assert_eq!(listing.total, 0);
    assert!(!tmp.path().join("feeds").exists() || walk_files(&tmp.path().join("feeds")) == 0);
}

fn walk_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

#[tokio::test]
async fn mismatched_signature_is_rejected() {
    let (_tmp, app, _) = setup().await;
    let report = app
        .documents
        .upload_documents(vec![
            file("photo.png", b"GIF89a not a png".to_vec()),
            file("notes.txt", KUBERNETES),
        ])
        .await;
    assert_eq!(report.success, 1);
    assert_eq!(report.fail_docs, vec!["photo.png".to_string()]);
}

#[tokio::test]
async fn duplicate_content_keeps_one_ledger_row_and_one_vector() {
    let (_tmp, app, _) = setup().await;

    let report = app
        .documents
        .upload_documents(vec![file("one.txt", KUBERNETES), file("two.txt", KUBERNETES)])
        .await;
    assert_eq!(report.success, 2);
    assert!(report.details[0].new_document);
    assert!(!report.details[1].new_document);
    assert_eq!(report.details[0].doc_hash, report.details[1].doc_hash);

    let listing = app.documents.list_documents(1, 10).await.unwrap();
    assert_eq!(listing.total, 1);
    assert_eq!(listing.documents[0].doc_name, "one.txt");

    let hash = listing.documents[0].doc_hash.clone();
    let first = app
        .documents
        .parse_documents(&DocumentSelector::Hashes(vec![hash.clone()]))
        .await
        .unwrap();
    assert_eq!(first.details[0].status, ParseStatus::Inserted);

    let again = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![listing.documents[0].doc_id]))
        .await
        .unwrap();
    assert_eq!(again.success, 1);
    assert_eq!(again.details[0].status, ParseStatus::Updated);

    let records = app.documents.get_vectors(&[hash.clone()]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fingerprint, hash);
    assert_eq!(records[0].embedding.len(), DIMS);
    assert!(records[0].uri.starts_with("file://"));
    assert_eq!(records[0].metadata.doc_name, "one.txt");
}

#[tokio::test]
async fn parse_with_unknown_id_fails_before_processing() {
    let (_tmp, app, _) = setup().await;
    app.documents
        .upload_documents(vec![file("k.txt", KUBERNETES)])
        .await;

    let err = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 99]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");

    let listing = app.documents.list_documents(1, 10).await.unwrap();
    let records = app
        .documents
        .get_vectors(&[listing.documents[0].doc_hash.clone()])
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn parse_reports_missing_plugin_per_document() {
    let (_tmp, app, _) = setup().await;
    let mut wav = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
    wav.extend_from_slice(&[0u8; 24]);
    let upload = app
        .documents
        .upload_documents(vec![file("k.txt", KUBERNETES), file("tone.wav", wav)])
        .await;
    assert_eq!(upload.success, 2);

    let report = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.success, 1);
    assert_eq!(report.fail, 1);
    let wav = report
        .details
        .iter()
        .find(|d| d.doc_name == "tone.wav")
        .unwrap();
    assert_eq!(wav.status, ParseStatus::Failed);
    assert!(wav.error.as_deref().unwrap().contains("wav"));
}

#[tokio::test]
async fn listing_past_the_end_is_empty() {
    let (_tmp, app, _) = setup().await;
    app.documents
        .upload_documents(vec![file("a.txt", KUBERNETES), file("b.txt", BREAD)])
        .await;

    let page = app.documents.list_documents(1, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.documents.len(), 1);

    let page = app.documents.list_documents(5, 10).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.documents.is_empty());
}

async fn index_corpus(app: &App) {
    let report = app
        .documents
        .upload_documents(vec![
            file("kubernetes.txt", KUBERNETES),
            file("bread.md", BREAD),
            file("comets.txt", COMETS),
        ])
        .await;
    assert_eq!(report.success, 3);
    let report = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(report.success, 3);
}

#[tokio::test]
async fn similarity_ranks_matching_document_first() {
    let (_tmp, app, _) = setup().await;
    index_corpus(&app).await;

    let hits = app
        .documents
        .search_similar("kubernetes cluster containers")
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].metadata.doc_name, "kubernetes.txt");
    assert_eq!(hits[0].rank, 1);
    assert!(hits[0].score >= hits[1].score);

    let err = app.documents.search_similar("   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn pdf_text_is_extracted_and_indexed() {
    let (_tmp, app, _) = setup().await;
    let report = app
        .documents
        .upload_documents(vec![file("guide.pdf", minimal_pdf_with_phrase("kubernetes guide"))])
        .await;
    assert_eq!(report.success, 1, "{:?}", report.details);

    let parsed = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1]))
        .await
        .unwrap();
    assert_eq!(parsed.success, 1, "{:?}", parsed.details);
    let hash = report.details[0].doc_hash.clone().unwrap();
    let records = app.documents.get_vectors(&[hash]).await.unwrap();
    assert!(records[0].content.to_lowercase().contains("kubernetes"));
}

#[tokio::test]
async fn chat_uses_retrieved_hints_and_skips_malformed_frames() {
    let (_tmp, app, state) = setup().await;
    index_corpus(&app).await;

    let answer = app
        .retrieval
        .answer("What does kubernetes do with containers?", &[])
        .await
        .unwrap();
    assert_eq!(answer, "Kubernetes orchestrates containers.");

    let sent = state.last_chat.lock().unwrap().clone().unwrap();
    assert_eq!(sent["stream"], json!(true));
    assert!(sent["temperature"].is_number());
    let messages = sent["messages"].as_array().unwrap();
    let user_turn = messages.last().unwrap()["content"].as_str().unwrap();
    assert!(user_turn.starts_with("Here is some related material:"));
    assert!(user_turn.contains("1. Kubernetes schedules containers"));
    assert!(user_turn.ends_with("What does kubernetes do with containers?"));

    let err = app.retrieval.answer("", &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn http_api_wraps_results_in_envelope() {
    let (_tmp, app, _) = setup().await;
    app.documents
        .upload_documents(vec![file("a.txt", KUBERNETES)])
        .await;
    let addr = spawn(router(app)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/document/list?page=1&page_count=5"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Envelope<Value> = resp.json().await.unwrap();
    assert_eq!(body.code, 0);
    assert_eq!(body.msg["total"], json!(1));
    assert_eq!(body.msg["page"], json!(1));
    assert_eq!(body.msg["page_count"], json!(5));
    assert_eq!(body.msg["documents"][0]["doc_name"], json!("a.txt"));

    let resp = client
        .post(format!("http://{addr}/document/parse"))
        .json(&json!({"doc_id": 42}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Envelope<String> = resp.json().await.unwrap();
    assert_eq!(body.code, 2);
    assert!(body.msg.contains("42"), "{}", body.msg);

    let resp = client
        .post(format!("http://{addr}/document/parse"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn malformed_requests_are_enveloped() {
    let (_tmp, app, _) = setup().await;
    let addr = spawn(router(app)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/knowledge/similarity"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Envelope<String> = resp.json().await.unwrap();
    assert_eq!(body.code, 1);
    assert!(body.msg.contains("text"), "{}", body.msg);

    let resp = client
        .post(format!("http://{addr}/knowledge/chat"))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{bad")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Envelope<String> = resp.json().await.unwrap();
    assert_eq!(body.code, 1);
    assert!(!body.msg.is_empty());

    let resp = client
        .post(format!("http://{addr}/document/upload"))
        .body("not multipart")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Envelope<String> = resp.json().await.unwrap();
    assert_eq!(body.code, 1);
}

#[tokio::test]
async fn disabled_embedder_aborts_parse_batch() {
    let tmp = TempDir::new().unwrap();
    let (backend, _) = spawn_backend().await;
    let app = App::with_embedder(test_config(tmp.path(), backend, ""), Arc::new(DisabledProvider))
        .await
        .unwrap();
    let upload = app
        .documents
        .upload_documents(vec![file("a.txt", KUBERNETES), file("b.txt", BREAD)])
        .await;
    assert_eq!(upload.success, 2);

    let err = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermanentConfig(_)), "{err}");
}

#[tokio::test]
async fn same_name_different_content_keeps_each_fingerprint_intact() {
    let (_tmp, app, _) = setup().await;
    let first = app
        .documents
        .upload_documents(vec![file("a.txt", "kubernetes pods")])
        .await;
    let second = app
        .documents
        .upload_documents(vec![file("a.txt", "sourdough bread")])
        .await;
    let h1 = first.details[0].doc_hash.clone().unwrap();
    let h2 = second.details[0].doc_hash.clone().unwrap();
    assert_ne!(h1, h2);

    let report = app
        .documents
        .parse_documents(&DocumentSelector::Hashes(vec![h1.clone(), h2.clone()]))
        .await
        .unwrap();
    assert_eq!(report.success, 2, "{:?}", report.details);

    assert_eq!(h1, digest_bytes(b"kubernetes pods"));
    assert_eq!(h2, digest_bytes(b"sourdough bread"));
    let records = app.documents.get_vectors(&[h1.clone(), h2.clone()]).await.unwrap();
    let content_of = |hash: &str| {
        records
            .iter()
            .find(|r| r.fingerprint == hash)
            .map(|r| r.content.clone())
            .unwrap()
    };
    assert!(content_of(&h1).contains("kubernetes"));
    assert!(content_of(&h2).contains("sourdough"));

    let listing = app.documents.list_documents(1, 10).await.unwrap();
    assert_eq!(listing.total, 2);
    assert_ne!(listing.documents[0].dest_dir, listing.documents[1].dest_dir);
}

#[tokio::test]
async fn tampered_stored_file_is_not_indexed() {
    let (_tmp, app, _) = setup().await;
    app.documents
        .upload_documents(vec![file("a.txt", KUBERNETES)])
        .await;
    let doc = app.documents.list_documents(1, 10).await.unwrap().documents[0].clone();
    std::fs::write(Path::new(&doc.dest_dir).join(&doc.doc_name), BREAD).unwrap();

    let report = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![doc.doc_id]))
        .await
        .unwrap();
    assert_eq!(report.fail, 1);
    assert!(report.details[0].error.as_deref().unwrap().contains("fingerprint"));
    assert!(app.documents.get_vectors(&[doc.doc_hash]).await.unwrap().is_empty());
}

#[tokio::test]
async fn backend_outage_fails_only_the_affected_document() {
    let (_tmp, app, _) = setup().await;
    let outage = format!("This note triggers an {OUTAGE} in the embedding backend.");
    app.documents
        .upload_documents(vec![file("good.txt", KUBERNETES), file("down.txt", outage)])
        .await;

    let report = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.success, 1);
    assert_eq!(report.fail, 1);
    let down = report.details.iter().find(|d| d.doc_name == "down.txt").unwrap();
    assert_eq!(down.status, ParseStatus::Failed);
    assert!(down.error.as_deref().unwrap().contains("backend unavailable"));
}

#[tokio::test]
async fn dimension_mismatch_aborts_the_batch() {
    let (_tmp, app, _) = setup().await;
    let short = format!("This note comes back as a {SHORT} from the backend.");
    app.documents
        .upload_documents(vec![file("good.txt", KUBERNETES), file("short.txt", short)])
        .await;

    let err = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermanentConfig(_)), "{err}");
}

#[tokio::test]
async fn intolerant_batch_stops_on_first_failure() {
    let (_tmp, app, _) = setup_with("[ingest]\ntolerate_partial_failure = false\n").await;
    let outage = format!("This note triggers an {OUTAGE} in the embedding backend.");
    app.documents
        .upload_documents(vec![file("good.txt", KUBERNETES), file("down.txt", outage)])
        .await;

    let err = app
        .documents
        .parse_documents(&DocumentSelector::Ids(vec![1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransientBackend(_)), "{err}");
}
