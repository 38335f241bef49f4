//! AI assistance and code execution handlers.
//!
//! Generation failures never surface as HTTP errors; the answer field carries
//! the inline error text instead.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use protocol::{
    AnalysisResponse, AnswerResponse, ChatHistoryRequest, ChatResponse, CodeRequest, ExecRequest,
    ExecResult, FeedbackResponse, Language, QuestionRequest, ReviewResponse, StatusResponse,
    SuggestChangesResponse, SuggestionResponse,
};

use super::error::ApiError;
use super::form::FormFields;
use super::{blocking, AppState};
use crate::ai::DirectoryContext;
use crate::files::index::{directory_summary, SUMMARY_MAX_ENTRIES};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/ai/suggest/", post(suggest))
        .route("/ai/review/", post(review))
        .route("/ai/chat/", post(chat))
        .route("/ai/suggest_changes/", post(suggest_changes))
        .route("/ai/apply_change/", post(apply_change))
        .route("/api/suggest", post(next_lines))
        .route("/api/analyze", post(analyze))
        .route("/api/check", post(check))
        .route("/api/chat", post(answer))
        .route("/execute/", post(execute))
}

async fn suggest(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Json<SuggestionResponse> {
    let suggestion = state.ai.suggest(&req.language, &req.code).await;
    Json(SuggestionResponse { suggestion })
}

async fn review(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Json<ReviewResponse> {
    let review = state.ai.review(&req.language, &req.code).await;
    Json(ReviewResponse { review })
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatHistoryRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let directory = match req.current_directory.filter(|dir| !dir.is_empty()) {
        Some(path) => {
            let sandbox = state.sandbox.clone();
            let settings = state.settings.clone();
            let indexer = state.indexer.clone();
            let context = blocking(move || {
                let dir = sandbox.resolve(&path)?;
                Ok::<_, ApiError>(DirectoryContext {
                    listing: directory_summary(&dir, SUMMARY_MAX_ENTRIES),
                    index: indexer.stored(&dir, &settings),
                    path,
                })
            })
            .await?;
            Some(context)
        }
        None => None,
    };

    let response = state.ai.chat(&req.history, directory.as_ref()).await;
    Ok(Json(ChatResponse { response }))
}

async fn suggest_changes(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<SuggestChangesResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let sandbox = state.sandbox.clone();
    let (rel, filename, listing, original) = blocking(move || {
        let file = sandbox.resolve(&path)?;
        let bytes = sandbox.read_file(&path)?;
        let listing = file
            .parent()
            .map(|dir| directory_summary(dir, SUMMARY_MAX_ENTRIES))
            .unwrap_or_default();
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok::<_, ApiError>((
            sandbox.relative(&file),
            filename,
            listing,
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    })
    .await?;

    let response = state
        .ai
        .suggest_changes(&rel, &filename, &listing, original)
        .await;
    Ok(Json(response))
}

async fn apply_change(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let new_content = form.text("new_content")?.to_string();
    let sandbox = state.sandbox.clone();
    let rel = blocking(move || {
        let file = sandbox.resolve(&path)?;
        if !file.is_file() {
            return Err(ApiError::NotFound("File not found".to_string()));
        }
        sandbox.write_file(&path, new_content.as_bytes())?;
        Ok(sandbox.relative(&file))
    })
    .await?;
    tracing::info!(path = %rel, "Applied suggested change");
    Ok(Json(StatusResponse::new("applied").with_path(rel)))
}

async fn next_lines(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Json<SuggestionResponse> {
    let suggestion = state.ai.next_lines(&req.language, &req.code).await;
    Json(SuggestionResponse { suggestion })
}

async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Json<AnalysisResponse> {
    let analysis = state.ai.analyze(&req.language, &req.code).await;
    Json(AnalysisResponse { analysis })
}

async fn check(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Json<FeedbackResponse> {
    let feedback = state.ai.check(&req.language, &req.code).await;
    Json(FeedbackResponse { feedback })
}

async fn answer(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Json<AnswerResponse> {
    let answer = state
        .ai
        .answer(&req.language, &req.code, &req.question)
        .await;
    Json(AnswerResponse { answer })
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecRequest>,
) -> Result<Json<ExecResult>, ApiError> {
    let language: Language = req.language.parse()?;
    Ok(Json(state.exec.run(&req.code, language).await))
}
