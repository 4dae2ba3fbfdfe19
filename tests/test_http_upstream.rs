//! HTTP upstream against a mock origin
//!
//! Covers ranged GETs answered with 206 or a full 200 body, HEAD requests,
//! origin error classification and Content-Range validation.

use slice_store::{ByteRange, HttpUpstream, StoreError, Upstream};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream(server: &MockServer) -> HttpUpstream {
    HttpUpstream::new(server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_partial_content_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .and(header("range", "bytes=4-7"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 4-7/12")
                .insert_header("Cache-Control", "max-age=60")
                .set_body_bytes(&b"4567"[..]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = assert_ok!(
        upstream(&server)
            .fetch_range("/video.mp4", ByteRange::new(4, 7).unwrap())
            .await
    );

    assert_eq!(response.status, 206);
    assert_eq!(&response.body[..], b"4567");
    assert_eq!(response.object_size, Some(12));
    let headers = response.object_headers();
    assert_eq!(headers.get("cache-control").unwrap(), "max-age=60");
    assert!(headers.get("content-range").is_none());
}

#[tokio::test]
async fn test_last_part_may_be_short() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 8-9/10")
                .set_body_bytes(&b"89"[..]),
        )
        .mount(&server)
        .await;

    let response = upstream(&server)
        .fetch_range("/video.mp4", ByteRange::new(8, 11).unwrap())
        .await
        .unwrap();
    assert_eq!(&response.body[..], b"89");
    assert_eq!(response.object_size, Some(10));
}

#[tokio::test]
async fn test_full_body_is_sliced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"0123456789ab"[..]))
        .mount(&server)
        .await;
    let upstream = upstream(&server);

    let response = upstream
        .fetch_range("/video.mp4", ByteRange::new(4, 7).unwrap())
        .await
        .unwrap();
    assert_eq!(&response.body[..], b"4567");
    assert_eq!(response.object_size, Some(12));

    let err = assert_err!(
        upstream
            .fetch_range("/video.mp4", ByteRange::new(12, 15).unwrap())
            .await
    );
    assert!(err.is_range_not_satisfiable());
}

#[tokio::test]
async fn test_origin_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let upstream = upstream(&server);
    let range = ByteRange::new(0, 3).unwrap();

    let err = assert_err!(upstream.fetch_range("/missing", range).await);
    assert!(matches!(err, StoreError::OriginClientError { status: 404, .. }));
    assert_eq!(err.to_http_status(), 404);

    let err = assert_err!(upstream.fetch_range("/broken", range).await);
    assert!(matches!(err, StoreError::OriginServerError { status: 500, .. }));
    assert_eq!(err.to_http_status(), 502);
}

#[tokio::test]
async fn test_mismatched_content_range_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shifted"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-3/12")
                .set_body_bytes(&b"0123"[..]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/no-range"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(&b"4567"[..]))
        .mount(&server)
        .await;
    let upstream = upstream(&server);
    let range = ByteRange::new(4, 7).unwrap();

    assert!(matches!(
        upstream.fetch_range("/shifted", range).await,
        Err(StoreError::Upstream(_))
    ));
    assert!(matches!(
        upstream.fetch_range("/no-range", range).await,
        Err(StoreError::Upstream(_))
    ));
}

#[tokio::test]
async fn test_head_reports_headers_and_size() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/video.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", "12")
                .insert_header("Content-Type", "video/mp4"),
        )
        .mount(&server)
        .await;
    let upstream = upstream(&server);

    let response = upstream.fetch_headers("/video.mp4").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("content-type").unwrap(), "video/mp4");
    assert_eq!(response.object_size, Some(12));
    assert_eq!(upstream.fetch_size("/video.mp4").await.unwrap(), 12);
}
