use http_body_util::Full;
use hyper::{
    Response, StatusCode,
    body::Bytes,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderValue, LOCATION, RETRY_AFTER},
};
use kleister_core::Error as CoreError;
use thiserror::Error;
use tracing::warn;

pub type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid submission")]
    Invalid(#[source] anyhow::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("request body over the size limit")]
    TooLarge,
    #[error("unable to determine client address")]
    NoClientAddr,
    #[error("failed to build response")]
    Http(#[from] hyper::http::Error),
    #[error("failed to encode page data")]
    Json(#[from] serde_json::Error),
    #[error("timed out handling request")]
    Timeout,
}

/// Maps a failed request to a response. Internal detail stays out of the
/// body unless the debug flag is on.
pub fn error_response(err: &HandlerError, debug: bool) -> HttpResponse {
    let (status, message) = match err {
        HandlerError::Invalid(_) => (StatusCode::BAD_REQUEST, "Invalid submission."),
        HandlerError::Core(core_err) => match core_err {
            CoreError::InvalidExpiry { .. } | CoreError::EmptySubmission => {
                (StatusCode::BAD_REQUEST, "Invalid submission.")
            }
            CoreError::NotFound => (StatusCode::NOT_FOUND, "Page not found"),
            CoreError::Rng(_)
            | CoreError::Sealing
            | CoreError::Encoding(_)
            | CoreError::StoreTimeout
            | CoreError::Store(_)
            | CoreError::CodeSpaceExhausted => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        },
        HandlerError::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "Request too large."),
        HandlerError::NoClientAddr
        | HandlerError::Http(_)
        | HandlerError::Json(_)
        | HandlerError::Timeout => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    if status.is_server_error() {
        warn!(?err, "request failed");
    }
    let body = if debug {
        format!("{message}\n\n{err:?}")
    } else {
        message.to_owned()
    };
    plain(status, body)
}

pub fn plain(status: StatusCode, message: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn not_found() -> HttpResponse {
    plain(StatusCode::NOT_FOUND, "Page not found")
}

/// Deliberately says nothing about why or for how long.
pub fn access_denied() -> HttpResponse {
    plain(StatusCode::FORBIDDEN, "Access denied")
}

pub fn rate_limited(retry_after_seconds: i64) -> Result<HttpResponse, HandlerError> {
    let response = Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(RETRY_AFTER, retry_after_seconds)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(format!(
            "Rate limit exceeded. Please wait {retry_after_seconds} seconds."
        ))))?;
    Ok(response)
}

pub fn redirect_found(location: &str) -> Result<HttpResponse, HandlerError> {
    let response = Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(Full::new(Bytes::new()))?;
    Ok(response)
}

pub fn html(body: String) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

pub fn json(body: Vec<u8>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn attachment(
    content_type: &str,
    filename: &str,
    bytes: Bytes,
) -> Result<HttpResponse, HandlerError> {
    let response = Response::builder()
        .header(CONTENT_TYPE, content_type)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Full::new(bytes))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use http_body_util::BodyExt;

    async fn body_bytes(response: HttpResponse) -> Bytes {
        response
            .into_body()
            .collect()
            .await
            .expect("body collect failed")
            .to_bytes()
    }

    #[test]
    fn statuses_follow_the_error_class() {
        let invalid = error_response(&HandlerError::Invalid(anyhow!("no expire")), false);
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let missing = error_response(&HandlerError::Core(CoreError::NotFound), false);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let too_large = error_response(&HandlerError::TooLarge, false);
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let timeout = error_response(&HandlerError::Timeout, false);
        assert_eq!(timeout.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn debug_flag_appends_error_detail() {
        let err = HandlerError::Core(CoreError::StoreTimeout);
        let quiet = body_bytes(error_response(&err, false)).await;
        assert_eq!(quiet, "Internal server error");
        let verbose = body_bytes(error_response(&err, true)).await;
        assert!(verbose.starts_with(b"Internal server error"));
        assert!(verbose.len() > quiet.len());
    }

    #[tokio::test]
    async fn rate_limited_carries_a_retry_hint() {
        let response = rate_limited(7).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("7"),
        );
        assert_eq!(
            body_bytes(response).await,
            "Rate limit exceeded. Please wait 7 seconds.",
        );
    }

    #[test]
    fn redirects_point_at_the_new_paste() {
        let response = redirect_found("/paste/abc123").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok()),
            Some("/paste/abc123"),
        );
    }
}
