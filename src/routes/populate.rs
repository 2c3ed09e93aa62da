//! Bulk CSV upload endpoint.

use rocket::form::{Form, FromForm};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;

use crate::error::{ApiError, ApiResult};
use crate::ingest::{IngestError, IngestResult, IngestTarget, Ingestor};

/// Multipart body of `POST /populate`.
#[derive(FromForm)]
pub struct CsvUpload<'r> {
    pub file: TempFile<'r>,
}

/// Ingest an uploaded CSV into the `users` or `metrics` table.
///
/// An unknown `target` is rejected by request validation before the upload
/// is read. Any ingestion failure is reported as a 400; chunks written
/// before the failure are kept.
#[openapi(skip)]
#[post("/populate?<target>", data = "<upload>")]
pub async fn populate(
    ingestor: &State<Ingestor>,
    target: IngestTarget,
    upload: Form<CsvUpload<'_>>,
) -> ApiResult<IngestResult> {
    let file = upload.file.open().await.map_err(IngestError::from);
    let result = match file {
        Ok(reader) => ingestor.ingest(Box::pin(reader), target).await,
        Err(err) => Err(err),
    };

    result
        .map(Json)
        .map_err(|err| ApiError::BadRequest(format!("Error processing CSV: {err}")).into())
}
