//! Behaviour of the response interceptor against in-process inner handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tower::{service_fn, BoxError, Layer, ServiceExt};

use envelope_gateway::config::EnvelopeConfig;
use envelope_gateway::envelope::CONTENT_TYPE;
use envelope_gateway::http::{ResponseInterceptorLayer, ResponseProgress};

const FAILURE_BODY: &str = r#"{"success":false,"message":"An unexpected error occurred.","data":null}"#;

fn response(status: StatusCode, content_type: Option<&str>, body: impl Into<Body>) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body.into()).unwrap()
}

/// Run one request through the interceptor with an inner handler that
/// returns `inner`.
async fn intercept(inner: Response<Body>) -> Response<Body> {
    intercept_with(EnvelopeConfig::default(), inner).await
}

async fn intercept_with(config: EnvelopeConfig, inner: Response<Body>) -> Response<Body> {
    let mut inner = Some(inner);
    let service = ResponseInterceptorLayer::new(config).layer(service_fn(move |_req: Request<Body>| {
        let response = inner.take().expect("inner handler called once");
        async move { Ok::<_, Infallible>(response) }
    }));

    service.oneshot(Request::new(Body::empty())).await.unwrap()
}

async fn body_of(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn json_of(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_of(response).await).unwrap()
}

#[tokio::test]
async fn wraps_json_success_body() {
    let out = intercept(response(StatusCode::OK, Some("application/json"), r#"{"id":"7"}"#)).await;

    assert_eq!(out.status(), StatusCode::OK);
    assert_eq!(out.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    let body = body_of(out).await;
    assert_eq!(body.as_ref(), br#"{"success":true,"message":"Success","data":{"id":"7"}}"#);
}

#[tokio::test]
async fn wraps_success_without_content_type() {
    let out = intercept(response(StatusCode::CREATED, None, "[1,2,3]")).await;

    assert_eq!(out.status(), StatusCode::CREATED);
    assert_eq!(
        json_of(out).await,
        json!({"success": true, "message": "Success", "data": [1, 2, 3]})
    );
}

#[tokio::test]
async fn wraps_empty_success_with_null_data() {
    let out = intercept(response(StatusCode::OK, Some("application/json"), "")).await;

    let expected = r#"{"success":true,"message":"Success","data":null}"#;
    assert_eq!(out.headers()[header::CONTENT_LENGTH], expected.len().to_string().as_str());
    assert_eq!(body_of(out).await.as_ref(), expected.as_bytes());
}

#[tokio::test]
async fn content_length_is_recomputed() {
    let mut inner = response(StatusCode::OK, Some("application/json"), "42");
    inner
        .headers_mut()
        .insert(header::CONTENT_LENGTH, header::HeaderValue::from_static("2"));

    let out = intercept(inner).await;
    let expected = r#"{"success":true,"message":"Success","data":42}"#;
    assert_eq!(out.headers()[header::CONTENT_LENGTH], expected.len().to_string().as_str());
    assert_eq!(body_of(out).await.as_ref(), expected.as_bytes());
}

#[tokio::test]
async fn wrapping_keeps_number_text_exact() {
    let body = r#"{"amount":123456789012345678901234567890,"pi":3.14159265358979323846}"#;
    let out = intercept(response(StatusCode::OK, Some("application/json"), body)).await;

    let expected = format!(r#"{{"success":true,"message":"Success","data":{body}}}"#);
    assert_eq!(body_of(out).await.as_ref(), expected.as_bytes());
}

#[tokio::test]
async fn already_wrapped_body_is_untouched() {
    let body = r#"{"success":true,"message":"ok","data":[1,2]}"#;
    let out = intercept(response(StatusCode::OK, Some("application/json"), body)).await;

    assert_eq!(out.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(body_of(out).await.as_ref(), body.as_bytes());
}

#[tokio::test]
async fn already_wrapped_detection_ignores_key_case() {
    let body = r#"{"Success":false,"MESSAGE":"nope","Data":null}"#;
    let out = intercept(response(StatusCode::OK, None, body)).await;
    assert_eq!(body_of(out).await.as_ref(), body.as_bytes());
}

#[tokio::test]
async fn no_content_is_untouched() {
    let out = intercept(response(StatusCode::NO_CONTENT, Some("application/json"), "")).await;

    assert_eq!(out.status(), StatusCode::NO_CONTENT);
    assert!(out.headers().get(header::CONTENT_LENGTH).is_none());
    assert!(body_of(out).await.is_empty());
}

#[tokio::test]
async fn non_json_content_is_untouched_for_any_status() {
    let cases = [
        (StatusCode::OK, "text/plain; charset=utf-8", "hello"),
        (StatusCode::OK, "application/octet-stream", "\u{1}\u{2}binary"),
        (StatusCode::INTERNAL_SERVER_ERROR, "text/plain", ""),
        (StatusCode::NOT_FOUND, "text/html", "<h1>missing</h1>"),
    ];

    for (status, content_type, body) in cases {
        let out = intercept(response(status, Some(content_type), body)).await;
        assert_eq!(out.status(), status);
        assert_eq!(out.headers()[header::CONTENT_TYPE], content_type);
        assert_eq!(body_of(out).await.as_ref(), body.as_bytes());
    }
}

#[tokio::test]
async fn non_ascii_content_type_is_untouched() {
    let content_type = header::HeaderValue::from_bytes(b"text/plain; name=\"r\xe9sum\xe9\"").unwrap();
    let mut inner = response(StatusCode::OK, None, "42");
    inner.headers_mut().insert(header::CONTENT_TYPE, content_type.clone());

    let out = intercept(inner).await;
    assert_eq!(out.headers()[header::CONTENT_TYPE], content_type);
    assert_eq!(body_of(out).await.as_ref(), b"42");
}

#[tokio::test]
async fn malformed_json_success_is_untouched() {
    let out = intercept(response(StatusCode::OK, Some("application/json"), "{broken")).await;
    assert_eq!(out.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(body_of(out).await.as_ref(), b"{broken");
}

#[tokio::test]
async fn error_with_body_is_untouched() {
    let problem = r#"{"title":"One or more validation errors occurred.","errors":{"Title":["Required"]}}"#;
    let out = intercept(response(
        StatusCode::BAD_REQUEST,
        Some("application/problem+json"),
        problem,
    ))
    .await;

    assert_eq!(out.status(), StatusCode::BAD_REQUEST);
    assert_eq!(out.headers()[header::CONTENT_TYPE], "application/problem+json");
    assert_eq!(body_of(out).await.as_ref(), problem.as_bytes());
}

#[tokio::test]
async fn empty_error_is_wrapped_at_original_status() {
    let out = intercept(response(StatusCode::UNAUTHORIZED, None, "")).await;

    assert_eq!(out.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(out.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    assert_eq!(body_of(out).await.as_ref(), FAILURE_BODY.as_bytes());
}

#[tokio::test]
async fn redirect_is_untouched() {
    let mut inner = response(StatusCode::FOUND, None, "");
    inner
        .headers_mut()
        .insert(header::LOCATION, header::HeaderValue::from_static("/elsewhere"));

    let out = intercept(inner).await;
    assert_eq!(out.status(), StatusCode::FOUND);
    assert_eq!(out.headers()[header::LOCATION], "/elsewhere");
    assert!(body_of(out).await.is_empty());
}

#[tokio::test]
async fn wrapping_keeps_unrelated_headers() {
    let mut inner = response(StatusCode::OK, Some("application/json"), "{}");
    inner
        .headers_mut()
        .insert("x-trace", header::HeaderValue::from_static("kept"));

    let out = intercept(inner).await;
    assert_eq!(out.headers()["x-trace"], "kept");
    assert_eq!(
        json_of(out).await,
        json!({"success": true, "message": "Success", "data": {}})
    );
}

#[tokio::test]
async fn handler_error_becomes_generic_500() {
    let service = ResponseInterceptorLayer::default().layer(service_fn(|_req: Request<Body>| async {
        Err::<Response<Body>, _>(std::io::Error::other("database password rejected"))
    }));

    let out = service.oneshot(Request::new(Body::empty())).await.unwrap();
    assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(out.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    assert_eq!(body_of(out).await.as_ref(), FAILURE_BODY.as_bytes());
}

#[tokio::test]
async fn handler_panic_becomes_generic_500() {
    let service = ResponseInterceptorLayer::default().layer(service_fn(|_req: Request<Body>| async {
        if true {
            panic!("handler exploded");
        }
        Ok::<_, Infallible>(Response::new(Body::empty()))
    }));

    let out = service.oneshot(Request::new(Body::empty())).await.unwrap();
    assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_of(out).await.as_ref(), FAILURE_BODY.as_bytes());
}

#[tokio::test]
async fn body_failure_discards_partial_output() {
    let service = ResponseInterceptorLayer::default().layer(service_fn(|_req: Request<Body>| async {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"partial\":")),
            Err(std::io::Error::other("stream reset")),
        ]);
        let mut response = Response::new(Body::from_stream(chunks));
        response.headers_mut().insert("x-inner", header::HeaderValue::from_static("dropped"));
        Ok::<_, Infallible>(response)
    }));

    let out = service.oneshot(Request::new(Body::empty())).await.unwrap();
    assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(out.headers().get("x-inner").is_none());
    assert_eq!(body_of(out).await.as_ref(), FAILURE_BODY.as_bytes());
}

#[tokio::test]
async fn stalled_body_hits_deadline_as_408() {
    let service = ResponseInterceptorLayer::default()
        .with_deadline(Duration::from_millis(100))
        .layer(service_fn(|_req: Request<Body>| async {
            let chunks = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"{\"id\":")) })
                .chain(stream::pending());
            Ok::<_, Infallible>(Response::new(Body::from_stream(chunks)))
        }));

    let out = tokio::time::timeout(Duration::from_secs(5), service.oneshot(Request::new(Body::empty())))
        .await
        .expect("deadline should end the request")
        .unwrap();
    assert_eq!(out.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body_of(out).await.as_ref(), FAILURE_BODY.as_bytes());
}

#[tokio::test]
async fn fault_after_response_started_is_reraised() {
    let service = ResponseInterceptorLayer::default().layer(service_fn(|req: Request<Body>| async move {
        let progress = req
            .extensions()
            .get::<ResponseProgress>()
            .cloned()
            .expect("interceptor attaches progress");
        progress.mark_started();
        Err::<Response<Body>, BoxError>("connection reset mid-stream".into())
    }));

    let err = service.oneshot(Request::new(Body::empty())).await.unwrap_err();
    assert!(err.to_string().contains("connection reset mid-stream"));
}

#[tokio::test]
async fn oversized_body_streams_through_unwrapped() {
    let config = EnvelopeConfig {
        max_buffer_bytes: Some(8),
    };
    let body = r#"{"items":[1,2,3,4,5,6,7,8,9]}"#;
    let out = intercept_with(config, response(StatusCode::OK, Some("application/json"), body)).await;

    assert_eq!(out.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(body_of(out).await.as_ref(), body.as_bytes());
}

#[tokio::test]
async fn body_under_limit_is_still_wrapped() {
    let config = EnvelopeConfig {
        max_buffer_bytes: Some(64),
    };
    let out = intercept_with(config, response(StatusCode::OK, None, "[true]")).await;
    assert_eq!(
        json_of(out).await,
        json!({"success": true, "message": "Success", "data": [true]})
    );
}

#[tokio::test]
async fn concurrent_requests_do_not_share_state() {
    let service = ResponseInterceptorLayer::default().layer(service_fn(|req: Request<Body>| async move {
        let id = req.uri().path().trim_start_matches('/').to_string();
        tokio::task::yield_now().await;
        Ok::<_, Infallible>(response(StatusCode::OK, Some("application/json"), format!(r#"{{"id":"{id}"}}"#)))
    }));

    let calls = (0..32).map(|i| {
        let service = service.clone();
        async move {
            let request = Request::builder().uri(format!("/{i}")).body(Body::empty()).unwrap();
            let out = service.oneshot(request).await.unwrap();
            (i, json_of(out).await)
        }
    });

    for (i, body) in futures_util::future::join_all(calls).await {
        assert_eq!(body["data"]["id"], i.to_string());
        assert_eq!(body["success"], true);
    }
}
