//! Rule administration endpoints
//!
//! Every change is written through to `.storage/hub.rules`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use hub_core::{NewRule, Rule};
use hub_registries::RuleRegistryError;
use tracing::error;

use crate::{api_error, ApiError, AppState};

/// GET /api/rules - All rules in creation order
pub(crate) async fn list_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.rules.all().iter().map(|r| (**r).clone()).collect())
}

/// GET /api/rules/{rule_id}
pub(crate) async fn get_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    state
        .rules
        .get(&rule_id)
        .map(|rule| Json((*rule).clone()))
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Rule not found: {}", rule_id),
            )
        })
}

/// POST /api/rules - Create a rule
pub(crate) async fn create_rule(
    State(state): State<AppState>,
    payload: Result<Json<NewRule>, JsonRejection>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let Json(new_rule) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    let rule = state
        .rules
        .create_and_save(new_rule)
        .await
        .map_err(registry_error)?;

    Ok((StatusCode::CREATED, Json((*rule).clone())))
}

/// DELETE /api/rules/{rule_id}
pub(crate) async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.rules.remove_and_save(&rule_id).await {
        Ok(Some(_)) => Ok(StatusCode::NO_CONTENT),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Rule not found: {}", rule_id),
        )),
        Err(e) => Err(registry_error(e)),
    }
}

fn registry_error(err: RuleRegistryError) -> ApiError {
    let status = match &err {
        RuleRegistryError::DuplicateName(_) => StatusCode::CONFLICT,
        RuleRegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
        RuleRegistryError::Storage(e) => {
            error!(error = %e, "Rule storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, err.to_string())
}
