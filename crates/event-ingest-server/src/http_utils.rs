// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap, HeaderValue},
    Response, StatusCode,
};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Does two things:
/// 1. Logs the given message. A success status code is logged at debug, a client error at warn
///    and anything else at error.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        error!("{message}");
    }
    create_json_response(&json!({ "message": message }), status)
}

/// Serializes `body` as the JSON payload of a response with the given status code.
pub fn create_json_response(body: &Value, status: StatusCode) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .body(Full::new(Bytes::from(body.to_string())))
}

/// Takes a request's header map, and verifies that the "content-length" and/or "Transfer-Encoding"
/// header is present, valid, and less than the given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs (with the given prefix) and returns an
/// HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let Some(content_length_header) = header_map.get(header::CONTENT_LENGTH) else {
        if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
            debug!("Transfer-Encoding header is present: {transfer_encoding_header:?}");
            return None;
        }
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"),
            StatusCode::LENGTH_REQUIRED,
        ));
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
