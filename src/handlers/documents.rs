//! Document registration
//!
//! Documents registered here are the first layer the scheduler reads block
//! text from. A configured remote document service is consulted on a miss.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Upper bound on blocks per registered document
pub const MAX_DOCUMENT_BLOCKS: usize = 100_000;

/// Upper bound on the text of one block, in bytes
pub const MAX_BLOCK_BYTES: usize = 16 * 1024;

#[derive(Debug, Deserialize, Serialize)]
pub struct DocumentBody {
    pub blocks: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DocumentResponse {
    pub document_id: String,
    pub blocks: usize,
}

fn is_valid_document_id(document_id: &str) -> bool {
    !document_id.is_empty()
        && document_id.len() <= 256
        && !document_id.contains("..")
        && !document_id.contains('/')
}

fn validate(document_id: &str, body: &DocumentBody) -> AppResult<()> {
    if !is_valid_document_id(document_id) {
        return Err(AppError::BadRequest(format!(
            "Invalid document id '{document_id}'"
        )));
    }
    if body.blocks.len() > MAX_DOCUMENT_BLOCKS {
        return Err(AppError::BadRequest(format!(
            "Document has {} blocks (max {MAX_DOCUMENT_BLOCKS})",
            body.blocks.len()
        )));
    }
    if let Some((index, _)) = body
        .blocks
        .iter()
        .enumerate()
        .find(|(_, block)| block.len() > MAX_BLOCK_BYTES)
    {
        return Err(AppError::BadRequest(format!(
            "Block {index} exceeds {MAX_BLOCK_BYTES} bytes"
        )));
    }
    Ok(())
}

/// `PUT /documents/{document_id}`: register or replace a document's blocks
pub async fn put_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(body): Json<DocumentBody>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    validate(&document_id, &body)?;

    let blocks = state.documents.insert(document_id.clone(), body.blocks);
    info!(document_id = %document_id, blocks, "Document registered");

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse {
            document_id,
            blocks,
        }),
    ))
}

/// `GET /documents/{document_id}`
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> AppResult<Json<DocumentBody>> {
    let blocks = state
        .documents
        .get(&document_id)
        .ok_or_else(|| AppError::NotFound(format!("Document '{document_id}'")))?;
    Ok(Json(DocumentBody {
        blocks: blocks.as_ref().clone(),
    }))
}

/// `DELETE /documents/{document_id}`
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> AppResult<StatusCode> {
    if state.documents.remove(&document_id) {
        info!(document_id = %document_id, "Document removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Document '{document_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_documents() {
        let ok = DocumentBody {
            blocks: vec!["One.".to_string()],
        };
        assert!(validate("book-1", &ok).is_ok());
        assert!(validate("", &ok).is_err());
        assert!(validate("../etc", &ok).is_err());

        let huge = DocumentBody {
            blocks: vec!["x".repeat(MAX_BLOCK_BYTES + 1)],
        };
        assert!(matches!(
            validate("book-1", &huge),
            Err(AppError::BadRequest(msg)) if msg.contains("Block 0")
        ));
    }
}
