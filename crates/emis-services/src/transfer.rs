//! File payloads: multipart uploads and binary downloads.

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::Response;

use emis_core::{ApiError, ReqwestErrorExt};

/// A binary response with its content headers passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl Download {
    pub(crate) async fn from_response(response: Response) -> Result<Self, ApiError> {
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);

        let bytes = response
            .bytes()
            .await
            .map_err(ReqwestErrorExt::into_api_error)?
            .to_vec();

        Ok(Self {
            bytes,
            content_type,
            content_disposition,
        })
    }

    /// `filename` parameter of the `Content-Disposition` header.
    pub fn filename(&self) -> Option<String> {
        let disposition = self.content_disposition.as_deref()?;
        disposition
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("filename="))
            .map(|name| name.trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            ct.contains("spreadsheetml") || ct.contains("ms-excel") || ct.starts_with("text/csv")
        })
    }
}

/// One file plus accompanying text fields, sent as `multipart/form-data`.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

impl MultipartUpload {
    pub fn file(field_name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            mime_type: None,
            bytes,
            fields: Vec::new(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Build the form. An unparsable mime type fails here, before any
    /// request is sent.
    pub(crate) fn into_form(self) -> Result<Form, ApiError> {
        let mut part = Part::bytes(self.bytes).file_name(self.file_name);
        if let Some(mime) = self.mime_type {
            part = part.mime_str(&mime).map_err(|_| ApiError::Validation {
                status: 400,
                message: Some(format!("Invalid upload mime type: {}", mime)),
            })?;
        }

        Ok(self
            .fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
            .part(self.field_name, part))
    }
}
