//! Form body extraction.
//!
//! The editor posts `FormData`, which browsers encode as
//! `multipart/form-data`; other clients send `application/x-www-form-urlencoded`.
//! [`FormFields`] accepts both.

use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use bytes::Bytes;

use super::error::ApiError;

/// Text fields and uploaded files of a form body.
#[derive(Debug, Default)]
pub struct FormFields {
    fields: HashMap<String, String>,
    files: HashMap<String, Bytes>,
}

impl FormFields {
    /// A required text field.
    pub fn text(&self, name: &str) -> Result<&str, ApiError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ApiError::Unprocessable(format!("Missing form field: {name}")))
    }

    /// A required file field. A plain text field of that name is accepted
    /// as the file content.
    pub fn take_file(&mut self, name: &str) -> Result<Bytes, ApiError> {
        if let Some(data) = self.files.remove(name) {
            return Ok(data);
        }
        self.fields
            .remove(name)
            .map(Bytes::from)
            .ok_or_else(|| ApiError::Unprocessable(format!("Missing form field: {name}")))
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FormFields::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                form.files.insert(name, data);
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Self::from_multipart(multipart).await
        } else {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(FormFields {
                fields,
                files: HashMap::new(),
            })
        }
    }
}
