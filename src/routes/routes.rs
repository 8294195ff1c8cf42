//! Defines routes for the share service.
//!
//! ## Structure
//! - `GET    /`                    — service info (limits, retention rate)
//! - `POST   /`                    — multipart upload (`file` field)
//! - `PUT    /{name}`              — raw body upload
//! - `DELETE /{id}`                — delete item
//! - `GET    /1/{id}/{name}`       — payload (gzip or decompressed)
//! - `GET    /{id}/{name}`         — item view
//! - `GET    /delete/{id}`         — delete item (link-friendly)
//! - `GET    /exists/{id}/{name}`  — existence check
//! - `GET    /stats`               — store usage
//! - `GET    /healthz`, `/readyz`  — probes
//!
//! Static segments take priority, so an item id never shadows `/delete`,
//! `/exists` or `/1`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    item_handlers::{
        delete_item, exists_item, get_raw, home, show_item, stats, upload_multipart, upload_raw,
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};

/// Build and return the router for all share routes.
///
/// The request body limit is disabled: uploads are streamed and the store
/// enforces the per-file cap itself.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stats", get(stats))
        .route("/", get(home).post(upload_multipart))
        .route("/1/{id}/{name}", get(get_raw))
        .route("/delete/{id}", get(delete_item))
        .route("/exists/{id}/{name}", get(exists_item))
        // `{key}` is an item id, or the filename for `PUT`; the two routes
        // must name their first segment alike
        .route("/{key}/{name}", get(show_item))
        .route("/{key}", put(upload_raw).delete(delete_item))
        .layer(DefaultBodyLimit::disable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::content_store::tests::test_store;
    use axum::{
        body::Body,
        http::{HeaderMap, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(tmp: &tempfile::TempDir) -> Router {
        routes().with_state(AppState::new(test_store(tmp), "http://share.test"))
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn upload(app: Router, name: &str, data: &'static [u8]) -> Value {
        let req = Request::put(format!("/{}", name))
            .header(header::CONTENT_LENGTH, data.len())
            .body(Body::from(data))
            .unwrap();
        let (status, _, body) = send(app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download() {
        let tmp = tempfile::tempdir().unwrap();
        let created = upload(app(&tmp), "hello.txt", b"hello there").await;
        let id = created["item"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["id"], format!("{}/hello.txt", id));
        assert_eq!(
            created["item"]["link"],
            format!("http://share.test/1/{}/hello.txt", id)
        );

        let req = Request::get(format!("/1/{}/hello.txt", id))
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body, b"hello there");

        let req = Request::get(format!("/1/{}/hello.txt", id))
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn item_view_inlines_ascii_text() {
        let tmp = tempfile::tempdir().unwrap();
        let created = upload(app(&tmp), "note.txt", b"remember the milk").await;
        let id = created["item"]["id"].as_str().unwrap().to_string();

        let req = Request::get(format!("/{}/note.txt", id))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::OK);
        let view: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["text"], "remember the milk");
        assert_eq!(view["content_type"], "text/plain");
    }

    #[tokio::test]
    async fn oversized_declared_upload_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let data: &'static [u8] = &[b'a'; 2_000];
        let req = Request::put("/big.bin")
            .header(header::CONTENT_LENGTH, data.len())
            .body(Body::from(data))
            .unwrap();
        let (status, _, _) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!tmp.path().join("data").exists());
    }

    #[tokio::test]
    async fn multipart_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let boundary = "XyZboundary";
        let form = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nignored\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pic.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nmultipart body\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::post("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(form))
            .unwrap();
        let (status, _, body) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(created["item"]["name"], "pic.txt");
        assert_eq!(created["item"]["size"], 14);
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let created = upload(app(&tmp), "gone.txt", b"soon gone").await;
        let id = created["item"]["id"].as_str().unwrap().to_string();

        let exists = |id: String| {
            Request::get(format!("/exists/{}/gone.txt", id))
                .body(Body::empty())
                .unwrap()
        };
        let (_, _, body) = send(app(&tmp), exists(id.clone())).await;
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["exists"], "yes");

        let req = Request::get(format!("/delete/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::OK);

        let (_, _, body) = send(app(&tmp), exists(id.clone())).await;
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["exists"], "no");

        let req = Request::delete(format!("/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app(&tmp), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_item_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        for uri in ["/1/123/nope.txt", "/123/nope.txt"] {
            let req = Request::get(uri).body(Body::empty()).unwrap();
            let (status, _, _) = send(app(&tmp), req).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn corrupt_payload_aborts_the_body() {
        let tmp = tempfile::tempdir().unwrap();
        let created = upload(app(&tmp), "cut.txt", b"this payload gets truncated on disk").await;
        let id = created["item"]["id"].as_str().unwrap().to_string();
        let path = tmp.path().join("data").join(&id).join("cut.txt");
        let gz = std::fs::read(&path).unwrap();
        std::fs::write(&path, &gz[..gz.len() / 2]).unwrap();

        let req = Request::get(format!("/1/{}/cut.txt", id))
            .body(Body::empty())
            .unwrap();
        let res = app(&tmp).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.into_body().collect().await.is_err());
    }
}
