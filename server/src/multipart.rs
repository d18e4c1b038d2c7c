use anyhow::anyhow;
use futures_util::TryStreamExt;
use http_body_util::{BodyStream, Limited};
use hyper::{
    Request,
    body::{Body, Bytes},
    header::CONTENT_TYPE,
};
use kleister_core::{Attachment, PlaintextPaste};
use multer::Multipart;

use crate::response::HandlerError;

pub const MAX_FORM_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct SubmitForm {
    pub paste: PlaintextPaste,
    pub ttl_seconds: u32,
}

/// Reads the submission form out of a multipart request body. The body is
/// capped at [`MAX_FORM_BYTES`] before any field is parsed.
pub async fn read_submit_form<B>(request: Request<B>) -> Result<SubmitForm, HandlerError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let boundary =
        multer::parse_boundary(content_type).map_err(|err| HandlerError::Invalid(err.into()))?;

    let limited = Limited::new(request.into_body(), MAX_FORM_BYTES);
    let frames =
        BodyStream::new(limited).try_filter_map(|frame| async move { Ok(frame.into_data().ok()) });
    let mut multipart = Multipart::new(frames, boundary);

    let mut text = String::new();
    let mut attachment = None;
    let mut expire = None;
    while let Some(field) = multipart.next_field().await.map_err(convert_multer_error)? {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };
        if name == "text" {
            text = field.text().await.map_err(convert_multer_error)?;
        } else if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_owned();
            let content_type = field
                .content_type()
                .map(ToString::to_string)
                .unwrap_or_default();
            let bytes = field.bytes().await.map_err(convert_multer_error)?.to_vec();
            // Browsers send an empty "file" part when nothing was picked.
            if !file_name.is_empty() || !bytes.is_empty() {
                attachment = Some(Attachment {
                    file_name,
                    content_type,
                    bytes,
                });
            }
        } else if name == "expire" {
            expire = Some(field.text().await.map_err(convert_multer_error)?);
        }
    }

    let expire = expire.ok_or_else(|| HandlerError::Invalid(anyhow!("missing expire field")))?;
    let ttl_seconds = expire
        .trim()
        .parse()
        .map_err(|err| HandlerError::Invalid(anyhow!("invalid expire value: {err}")))?;
    Ok(SubmitForm {
        paste: PlaintextPaste { text, attachment },
        ttl_seconds,
    })
}

fn convert_multer_error(err: multer::Error) -> HandlerError {
    if find_length_limit(&err) {
        HandlerError::TooLarge
    } else {
        HandlerError::Invalid(err.into())
    }
}

fn find_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
#[expect(clippy::arithmetic_side_effects, clippy::string_add, reason = "test")]
mod tests {
    use super::*;
    use http_body_util::Full;

    const BOUNDARY: &str = "test-boundary";

    fn multipart_request(body: String) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Full::new(Bytes::from(body)))
            .expect("failed to build request")
    }

    fn text_part(name: &str, value: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
    }

    fn file_part(file_name: &str, content_type: &str, value: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n{value}\r\n"
        )
    }

    fn closing() -> String {
        format!("--{BOUNDARY}--\r\n")
    }

    #[tokio::test]
    async fn parses_text_and_expiry() {
        let body = text_part("text", "hello world") + &text_part("expire", "600") + &closing();
        let form = read_submit_form(multipart_request(body)).await.unwrap();
        assert_eq!(form.paste.text, "hello world");
        assert_eq!(form.ttl_seconds, 600);
        assert!(form.paste.attachment.is_none());
    }

    #[tokio::test]
    async fn parses_an_uploaded_file() {
        let body = text_part("text", "")
            + &file_part("cat.png", "image/png", "not really a png")
            + &text_part("expire", "3600")
            + &closing();
        let form = read_submit_form(multipart_request(body)).await.unwrap();
        let attachment = form.paste.attachment.clone().expect("attachment missing");
        assert_eq!(attachment.file_name, "cat.png");
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.bytes, b"not really a png");
    }

    #[tokio::test]
    async fn empty_file_part_is_not_an_attachment() {
        let body = text_part("text", "just text")
            + &file_part("", "application/octet-stream", "")
            + &text_part("expire", "600")
            + &closing();
        let form = read_submit_form(multipart_request(body)).await.unwrap();
        assert!(form.paste.attachment.is_none());
    }

    #[tokio::test]
    async fn missing_expiry_is_invalid() {
        let body = text_part("text", "hello") + &closing();
        let err = read_submit_form(multipart_request(body)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }

    #[tokio::test]
    async fn negative_expiry_is_invalid() {
        let body = text_part("text", "hello") + &text_part("expire", "-600") + &closing();
        let err = read_submit_form(multipart_request(body)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }

    #[tokio::test]
    async fn non_multipart_requests_are_invalid() {
        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from_static(b"text=hello")))
            .expect("failed to build request");
        let err = read_submit_form(request).await.unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let huge = "a".repeat(MAX_FORM_BYTES + 1);
        let body = file_part("big.bin", "application/octet-stream", &huge)
            + &text_part("expire", "600")
            + &closing();
        let err = read_submit_form(multipart_request(body)).await.unwrap_err();
        assert!(matches!(err, HandlerError::TooLarge));
    }
}
