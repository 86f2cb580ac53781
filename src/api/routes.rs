use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::affectation::CashMovementDetail;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::middleware::request_logging;
use crate::models::{
    normalize_date, CashMovement, CashMovementPatch, Expense, ExpenseCategory, Invoice,
    InvoiceDirection, Match, NewAffectation, NewCashMovement, PaymentType, Register, RegisterId,
    RegisterState, TeamSettlement, Totals,
};
use crate::settlement::{LedgerMovement, RegisterSheet};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

/// Create the API router
pub fn create_router(ledger: Arc<Ledger>) -> Router {
    let state = AppState { ledger };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/registers", post(create_register).get(list_registers))
        .route(
            "/api/registers/:id",
            get(get_register).delete(void_register),
        )
        .route("/api/registers/:id/sheet", get(get_sheet))
        .route("/api/registers/:id/settlements", get(get_settlements))
        .route("/api/registers/:id/totals", get(get_totals))
        .route("/api/registers/:id/payments", post(post_payment))
        .route("/api/registers/:id/absences", post(post_absence))
        .route("/api/registers/:id/close", post(post_close))
        .route("/api/registers/:id/post", post(post_post))
        .route("/api/registers/:id/reopen", post(post_reopen))
        .route("/api/registers/:id/declared-cash", post(post_declared_cash))
        .route("/api/registers/:id/shift", post(post_shift))
        .route(
            "/api/registers/:id/expenses",
            post(post_expense).get(list_expenses),
        )
        .route(
            "/api/registers/:id/expenses/:category/:slot",
            put(put_expense).delete(delete_expense),
        )
        .route("/api/matches/:id/assign", post(post_assign_match))
        .route("/api/matches/:id/reassign", post(post_reassign_match))
        .route("/api/teams/:id/balance", get(get_team_balance))
        .route("/api/movements", post(post_movement))
        .route(
            "/api/movements/:id",
            get(get_movement).put(put_movement).delete(delete_movement),
        )
        .route(
            "/api/providers/:id/pending-invoices",
            get(get_pending_invoices),
        )
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Find or create the register for (supervisor, day, venue)
async fn create_register(
    State(state): State<AppState>,
    Json(req): Json<CreateRegisterRequest>,
) -> Result<Json<RegisterIdResponse>, ApiError> {
    let register_id = state
        .ledger
        .registers
        .find_or_create_register(
            req.supervisor_id,
            &req.date,
            req.venue_id,
            req.team1_id,
            req.team2_id,
        )
        .await?;
    Ok(Json(RegisterIdResponse { register_id }))
}

async fn list_registers(
    State(state): State<AppState>,
    Query(params): Query<DateQuery>,
) -> Result<Json<Vec<Register>>, ApiError> {
    let date = normalize_date(&params.date)?;
    Ok(Json(state.ledger.registers.list_registers(date).await?))
}

async fn get_register(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let register = state.ledger.registers.get_register(id).await?;
    let matches = state.ledger.registers.list_register_matches(id).await?;
    Ok(Json(RegisterResponse {
        state: register.state(),
        register,
        matches,
    }))
}

async fn void_register(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<StatusCode, ApiError> {
    state.ledger.registers.void_register(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_sheet(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<Json<RegisterSheet>, ApiError> {
    Ok(Json(state.ledger.totals.register_sheet(id).await?))
}

async fn get_settlements(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<Json<Vec<TeamSettlement>>, ApiError> {
    Ok(Json(state.ledger.debts.compute_team_settlements(id).await?))
}

async fn get_totals(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<Json<Totals>, ApiError> {
    Ok(Json(state.ledger.totals.compute_totals(id).await?))
}

/// Set what a team paid for one stream; returns the refreshed settlements
async fn post_payment(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Vec<TeamSettlement>>, ApiError> {
    state
        .ledger
        .debts
        .record_payment(id, req.team_id, req.payment_type, req.amount)
        .await?;
    Ok(Json(state.ledger.debts.compute_team_settlements(id).await?))
}

async fn post_absence(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<AbsenceRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .ledger
        .debts
        .toggle_absence(id, req.team_id, req.absent)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_close(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<CloseRequest>,
) -> Result<Json<Totals>, ApiError> {
    Ok(Json(state.ledger.closing.close(id, req.supervisor_id).await?))
}

async fn post_post(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<PostRequest>,
) -> Result<Json<Totals>, ApiError> {
    Ok(Json(state.ledger.closing.post(id, req.user_id).await?))
}

async fn post_reopen(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<StatusCode, ApiError> {
    state.ledger.closing.reopen(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_declared_cash(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<DeclaredCashRequest>,
) -> Result<Json<Totals>, ApiError> {
    Ok(Json(
        state.ledger.closing.set_declared_cash(id, req.amount).await?,
    ))
}

async fn post_shift(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<ShiftRequest>,
) -> Result<StatusCode, ApiError> {
    state.ledger.closing.set_shift(id, &req.shift_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_expense(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
    Json(req): Json<NewExpenseRequest>,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let expense = state
        .ledger
        .expenses
        .add(id, req.category, req.total)
        .await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn list_expenses(
    State(state): State<AppState>,
    Path(id): Path<RegisterId>,
) -> Result<Json<Vec<Expense>>, ApiError> {
    Ok(Json(state.ledger.expenses.list(id).await?))
}

async fn put_expense(
    State(state): State<AppState>,
    Path((id, category, slot)): Path<(RegisterId, String, i64)>,
    Json(req): Json<ExpenseTotalRequest>,
) -> Result<Json<Expense>, ApiError> {
    let category = parse_category(&category)?;
    Ok(Json(
        state
            .ledger
            .expenses
            .update(id, category, slot, req.total)
            .await?,
    ))
}

async fn delete_expense(
    State(state): State<AppState>,
    Path((id, category, slot)): Path<(RegisterId, String, i64)>,
) -> Result<StatusCode, ApiError> {
    let category = parse_category(&category)?;
    state.ledger.expenses.remove(id, category, slot).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_assign_match(
    State(state): State<AppState>,
    Path(match_id): Path<i64>,
) -> Result<Json<RegisterIdResponse>, ApiError> {
    let register_id = state.ledger.registers.assign_match(match_id).await?;
    Ok(Json(RegisterIdResponse { register_id }))
}

async fn post_reassign_match(
    State(state): State<AppState>,
    Path(match_id): Path<i64>,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<RegisterIdResponse>, ApiError> {
    let register_id = state
        .ledger
        .registers
        .reassign_match(match_id, req.supervisor_id, req.date.as_deref(), req.venue_id)
        .await?;
    Ok(Json(RegisterIdResponse { register_id }))
}

async fn get_team_balance(
    State(state): State<AppState>,
    Path(team_id): Path<i64>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let movements = state.ledger.balances.movements(team_id).await?;
    let balance = crate::settlement::fold_balance(&movements);
    Ok(Json(BalanceResponse {
        team_id,
        balance,
        movements,
    }))
}

async fn post_movement(
    State(state): State<AppState>,
    Json(req): Json<CreateMovementRequest>,
) -> Result<(StatusCode, Json<CashMovement>), ApiError> {
    let movement = state
        .ledger
        .affectations
        .create_cash_movement(req.movement, req.affectations)
        .await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn get_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CashMovementDetail>, ApiError> {
    Ok(Json(state.ledger.affectations.get_cash_movement(id).await?))
}

async fn put_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMovementRequest>,
) -> Result<Json<CashMovement>, ApiError> {
    Ok(Json(
        state
            .ledger
            .affectations
            .update_cash_movement(id, req.patch, req.affectations)
            .await?,
    ))
}

async fn delete_movement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.ledger.affectations.delete_cash_movement(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_pending_invoices(
    State(state): State<AppState>,
    Path(provider_id): Path<i64>,
    Query(params): Query<DirectionQuery>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    let direction = match params.direction.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            InvoiceDirection::from_str(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown direction: {raw}")))?,
        ),
    };
    Ok(Json(
        state
            .ledger
            .affectations
            .list_pending_invoices(provider_id, direction)
            .await?,
    ))
}

fn parse_category(raw: &str) -> Result<ExpenseCategory, ApiError> {
    ExpenseCategory::from_str(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown expense category: {raw}")))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRegisterRequest {
    supervisor_id: i64,
    date: String,
    venue_id: i64,
    #[serde(default)]
    team1_id: Option<i64>,
    #[serde(default)]
    team2_id: Option<i64>,
}

#[derive(Deserialize)]
struct DateQuery {
    date: String,
}

#[derive(Deserialize)]
struct DirectionQuery {
    direction: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequest {
    team_id: i64,
    payment_type: PaymentType,
    amount: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbsenceRequest {
    team_id: i64,
    absent: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseRequest {
    supervisor_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRequest {
    user_id: i64,
}

#[derive(Deserialize)]
struct DeclaredCashRequest {
    amount: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftRequest {
    shift_id: String,
}

#[derive(Deserialize)]
struct NewExpenseRequest {
    category: ExpenseCategory,
    total: Decimal,
}

#[derive(Deserialize)]
struct ExpenseTotalRequest {
    total: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReassignRequest {
    supervisor_id: Option<i64>,
    date: Option<String>,
    venue_id: Option<i64>,
}

#[derive(Deserialize)]
struct CreateMovementRequest {
    #[serde(flatten)]
    movement: NewCashMovement,
    #[serde(default)]
    affectations: Vec<NewAffectation>,
}

#[derive(Deserialize)]
struct UpdateMovementRequest {
    #[serde(flatten)]
    patch: CashMovementPatch,
    #[serde(default)]
    affectations: Option<Vec<NewAffectation>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIdResponse {
    register_id: RegisterId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    register: Register,
    state: RegisterState,
    matches: Vec<Match>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    team_id: i64,
    balance: Decimal,
    movements: Vec<LedgerMovement>,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Ledger(LedgerError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::Ledger(err @ LedgerError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Ledger(LedgerError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Ledger(err @ LedgerError::Persistence(_)) => {
                tracing::error!("Ledger store error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
