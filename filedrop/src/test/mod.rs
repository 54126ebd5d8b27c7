//! End-to-end tests: the full router, real files in a temporary storage root.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum_test::{
    TestResponse, TestServer,
    multipart::{MultipartForm, Part},
};

use crate::{
    AppState, build_router,
    config::ExtensionPolicy,
    ids::{ALPHABET, IdGenerator},
    storage::LocalStore,
    test_utils::{
        TEST_BASE_URL, TEST_SECRET, create_test_app, create_test_app_with, create_test_config, png_bytes, stored_files,
    },
};

fn file_form(data: Vec<u8>, file_name: &str, declared_type: &str) -> MultipartForm {
    MultipartForm::new().add_part("file", Part::bytes(data).file_name(file_name).mime_type(declared_type))
}

async fn upload(server: &TestServer, form: MultipartForm) -> TestResponse {
    server.post("/upload").add_header("authorization", TEST_SECRET).multipart(form).await
}

/// Stored name from a successful upload's link.
fn stored_name(response: &TestResponse) -> String {
    let link = response.text();
    let prefix = format!("{TEST_BASE_URL}/");
    link.strip_prefix(&prefix)
        .unwrap_or_else(|| panic!("link {link} does not start with {prefix}"))
        .to_string()
}

#[test_log::test(tokio::test)]
async fn test_upload_png_then_retrieve_identical_bytes() {
    let (server, dir) = create_test_app().await;
    let data = png_bytes(2048);

    let response = upload(&server, file_form(data.clone(), "photo.png", "image/png")).await;
    response.assert_status(StatusCode::CREATED);

    let name = stored_name(&response);
    let (token, extension) = name.split_at(5);
    assert_eq!(extension, ".png");
    assert!(token.bytes().all(|b| ALPHABET.contains(&b)), "unexpected name {name}");
    assert_eq!(stored_files(dir.path()), vec![name.clone()]);

    let fetched = server.get(&format!("/{name}")).await;
    fetched.assert_status(StatusCode::OK);
    assert_eq!(fetched.as_bytes().as_ref(), data.as_slice());
    assert_eq!(
        fetched.headers().get("content-type").map(|v| v.to_str().unwrap()),
        Some("image/png")
    );
}

#[tokio::test]
async fn test_missing_secret_is_forbidden_and_stores_nothing() {
    let (server, dir) = create_test_app().await;

    let response = server.post("/upload").multipart(file_form(png_bytes(0), "photo.png", "image/png")).await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "Authorization failed");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_wrong_secret_is_forbidden_and_stores_nothing() {
    let (server, dir) = create_test_app().await;

    let response = server
        .post("/upload")
        .add_header("authorization", "Bearer test-upload-secret")
        .multipart(file_form(png_bytes(0), "photo.png", "image/png"))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "Authorization failed");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_forbidden_and_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.uploads.max_file_size = 1024;
    let server = create_test_app_with(config).await;

    // Fits under the body limit, so the streamed byte count is what rejects it.
    let response = upload(&server, file_form(png_bytes(4096), "photo.png", "image/png")).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "File size is too big");
    assert!(stored_files(dir.path()).is_empty());

    // Past the body limit as well.
    let response = upload(&server, file_form(png_bytes(256 * 1024), "photo.png", "image/png")).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "File size is too big");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_upload_at_exact_limit_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    let data = png_bytes(1000);
    config.uploads.max_file_size = data.len() as u64;
    let server = create_test_app_with(config).await;

    upload(&server, file_form(data, "photo.png", "image/png"))
        .await
        .assert_status(StatusCode::CREATED);
    assert_eq!(stored_files(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_disallowed_types_are_forbidden() {
    let (server, dir) = create_test_app().await;

    // HTML declared as a text file and as a PNG; the bytes decide.
    let html = b"<!DOCTYPE html><html><body><script>alert(1)</script></body></html>".to_vec();
    let response = upload(&server, file_form(html.clone(), "notes.txt", "text/plain")).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "Unsupported file type");

    let response = upload(&server, file_form(html, "photo.png", "image/png")).await;
    response.assert_status(StatusCode::FORBIDDEN);

    let pdf = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<< /Type /Catalog >>\nendobj\n".to_vec();
    let response = upload(&server, file_form(pdf, "paper.pdf", "application/pdf")).await;
    response.assert_status(StatusCode::FORBIDDEN);

    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_plain_text_upload_is_accepted() {
    let (server, dir) = create_test_app().await;

    let response = upload(&server, file_form(b"hello, world\n".to_vec(), "hello.txt", "text/plain")).await;

    response.assert_status(StatusCode::CREATED);
    let name = stored_name(&response);
    assert!(name.ends_with(".txt"), "{name}");
    assert_eq!(std::fs::read(dir.path().join(&name)).unwrap(), b"hello, world\n");
}

/// JFIF header of a baseline JPEG.
fn jpeg_bytes() -> Vec<u8> {
    let mut data = vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x48, 0x00, 0x48,
        0x00, 0x00,
    ];
    data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
    data.resize(256, 0x10);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// A 1x1 GIF89a.
fn gif_bytes() -> Vec<u8> {
    b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!\xf9\x04\x01\x00\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;".to_vec()
}

/// A phone-style export: `M4V ` major brand, `mp42` only among the compatible brands.
fn m4v_bytes() -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x20];
    data.extend_from_slice(b"ftypM4V \x00\x00\x00\x01M4V M4A mp42isom");
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x10]);
    data.extend_from_slice(b"mdat\x00\x00\x00\x00\x00\x00\x00\x00");
    data
}

/// EBML header with the `webm` doctype.
fn webm_bytes() -> Vec<u8> {
    let mut data = vec![
        0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0xF7, 0x81, 0x01, 0x42, 0xF2, 0x81, 0x04, 0x42,
        0xF3, 0x81, 0x08, 0x42, 0x82, 0x84,
    ];
    data.extend_from_slice(b"webm");
    data.extend_from_slice(&[0x42, 0x87, 0x81, 0x04, 0x42, 0x85, 0x81, 0x02]);
    data
}

/// A zip archive holding one empty stored entry.
fn zip_bytes() -> Vec<u8> {
    let mut data = b"PK\x03\x04\x0a\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x05\x00\x00\x00a.txt".to_vec();
    data.extend_from_slice(b"PK\x05\x06\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00");
    data
}

#[tokio::test]
async fn test_every_allow_listed_format_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.uploads.extension_policy = ExtensionPolicy::Detected;
    let server = create_test_app_with(config).await;

    let cases = [
        (jpeg_bytes(), "photo.jpg", "image/jpeg", ".jpg"),
        (gif_bytes(), "pixel.gif", "image/gif", ".gif"),
        (png_bytes(0), "photo.png", "image/png", ".png"),
        (m4v_bytes(), "clip.mp4", "video/mp4", ".mp4"),
        (webm_bytes(), "clip.webm", "video/webm", ".webm"),
        (zip_bytes(), "bundle.zip", "application/zip", ".zip"),
        (b"#!/bin/sh\necho hello\n".to_vec(), "run.txt", "text/plain", ".txt"),
    ];

    for (data, file_name, declared_type, extension) in cases {
        let response = upload(&server, file_form(data.clone(), file_name, declared_type)).await;
        assert_eq!(response.status_code(), StatusCode::CREATED, "{file_name}: {}", response.text());

        let name = stored_name(&response);
        assert!(name.ends_with(extension), "{file_name} stored as {name}");
        assert_eq!(std::fs::read(dir.path().join(&name)).unwrap(), data, "{file_name}");
    }
    assert_eq!(stored_files(dir.path()).len(), 7);
}

#[tokio::test]
async fn test_shell_script_text_keeps_client_extension() {
    let (server, _dir) = create_test_app().await;

    let response = upload(&server, file_form(b"#!/bin/sh\necho hello\n".to_vec(), "run.txt", "text/plain")).await;

    response.assert_status(StatusCode::CREATED);
    assert!(stored_name(&response).ends_with(".txt"));
}

#[tokio::test]
async fn test_png_magic_wins_over_declared_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.uploads.extension_policy = ExtensionPolicy::Detected;
    let server = create_test_app_with(config).await;

    let response = upload(&server, file_form(png_bytes(16), "notes.txt", "text/plain")).await;

    response.assert_status(StatusCode::CREATED);
    assert!(stored_name(&response).ends_with(".png"));
}

#[tokio::test]
async fn test_sanitized_extension_drops_odd_suffixes() {
    let (server, _dir) = create_test_app().await;

    let response = upload(&server, file_form(png_bytes(0), "../../photo.p?ng", "image/png")).await;

    response.assert_status(StatusCode::CREATED);
    let name = stored_name(&response);
    assert_eq!(name.len(), 5, "expected a bare token, got {name}");
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let (server, dir) = create_test_app().await;

    let form = MultipartForm::new().add_text("upload", "not a file");
    let response = upload(&server, form).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "Bad Request");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_file_field_found_after_other_fields() {
    let (server, _dir) = create_test_app().await;

    let form = MultipartForm::new()
        .add_text("comment", "holiday")
        .add_part("file", Part::bytes(png_bytes(0)).file_name("photo.png").mime_type("image/png"));
    upload(&server, form).await.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let (server, dir) = create_test_app().await;

    let response = server
        .post("/upload")
        .add_header("authorization", TEST_SECRET)
        .text("just some text")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.text(), "Bad Request");
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (server, dir) = create_test_app().await;

    server.get("/zzzzz.png").await.assert_status(StatusCode::NOT_FOUND);
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_traversal_out_of_storage_root_is_not_found() {
    let outer = tempfile::tempdir().unwrap();
    let root = outer.path().join("public");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(outer.path().join("secret.txt"), b"top secret").unwrap();
    let server = create_test_app_with(create_test_config(&root)).await;

    for path in ["/..%2Fsecret.txt", "/%2E%2E%2Fsecret.txt", "/..%5Csecret.txt"] {
        let response = server.get(path).await;
        assert_ne!(response.status_code(), StatusCode::OK, "{path} escaped the storage root");
        assert!(!response.text().contains("top secret"), "{path} leaked the file");
    }
}

#[tokio::test]
async fn test_landing_page_and_favicon() {
    let (server, _dir) = create_test_app().await;

    server.get("/").await.assert_status(StatusCode::OK);
    server.get("/favicon.ico").await.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_same_seed_yields_same_names() {
    let (first, _a) = create_test_app().await;
    let (second, _b) = create_test_app().await;

    let a = upload(&first, file_form(png_bytes(0), "a.png", "image/png")).await;
    let b = upload(&second, file_form(png_bytes(0), "b.png", "image/png")).await;

    assert_eq!(stored_name(&a), stored_name(&b));
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_names() {
    let (server, dir) = create_test_app().await;

    let uploads = (0..20).map(|i| upload(&server, file_form(png_bytes(i), "photo.png", "image/png")));
    let responses = futures::future::join_all(uploads).await;

    let mut names = HashSet::new();
    for response in &responses {
        response.assert_status(StatusCode::CREATED);
        names.insert(stored_name(response));
    }
    assert_eq!(names.len(), 20);
    assert_eq!(stored_files(dir.path()).len(), 20);
}

/// Hands out a fixed sequence of names.
struct ScriptedIds(Mutex<VecDeque<&'static str>>);

impl IdGenerator for ScriptedIds {
    fn generate(&self, len: usize) -> String {
        let next = self.0.lock().unwrap().pop_front().expect("script exhausted");
        assert_eq!(next.len(), len);
        next.to_string()
    }
}

fn scripted_server(dir: &std::path::Path, names: &[&'static str], reject_collisions: bool) -> TestServer {
    let mut config = create_test_config(dir);
    config.uploads.reject_collisions = reject_collisions;
    let state = AppState::builder()
        .allow_list(Arc::new(config.allow_list().unwrap()))
        .config(Arc::new(config))
        .ids(Arc::new(ScriptedIds(Mutex::new(names.iter().copied().collect()))))
        .store(LocalStore::new(dir))
        .build();
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn test_collision_overwrites_by_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("aaaaa.png"), b"older upload").unwrap();
    let server = scripted_server(dir.path(), &["aaaaa"], false);

    let data = png_bytes(8);
    let response = upload(&server, file_form(data.clone(), "photo.png", "image/png")).await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(stored_name(&response), "aaaaa.png");
    assert_eq!(std::fs::read(dir.path().join("aaaaa.png")).unwrap(), data);
}

#[tokio::test]
async fn test_collision_draws_new_name_when_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("aaaaa.png"), b"older upload").unwrap();
    let server = scripted_server(dir.path(), &["aaaaa", "bbbbb"], true);

    let response = upload(&server, file_form(png_bytes(8), "photo.png", "image/png")).await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(stored_name(&response), "bbbbb.png");
    assert_eq!(std::fs::read(dir.path().join("aaaaa.png")).unwrap(), b"older upload");
}
