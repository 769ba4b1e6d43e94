//! API response helpers.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tempforms_core::ExportFile;

/// `201 Created` with a JSON body.
pub fn created(body: Value) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

/// An export served as a downloadable attachment.
pub struct Attachment(pub ExportFile);

impl IntoResponse for Attachment {
    fn into_response(self) -> Response {
        let file = self.0;
        let disposition = format!("attachment; filename=\"{}\"", file.filename);

        let mut response = (StatusCode::OK, file.body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(file.format.content_type()),
        );
        // The filename is restricted to [A-Za-z0-9_.], so this cannot fail.
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempforms_core::ExportFormat;

    #[test]
    fn test_attachment_headers() {
        let response = Attachment(ExportFile {
            format: ExportFormat::Csv,
            filename: "Poll_responses.csv".to_string(),
            body: "No responses available".to_string(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Poll_responses.csv\""
        );
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
    }
}
