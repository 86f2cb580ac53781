//! Ledger records shared by the register, settlement and affectation engines.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub type RegisterId = i64;
pub type TeamId = i64;
pub type MatchId = i64;

/// Closing state, derived from the register's stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterState {
    Abierta,
    Cerrada,
    Contabilizada,
}

impl RegisterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterState::Abierta => "abierta",
            RegisterState::Cerrada => "cerrada",
            RegisterState::Contabilizada => "contabilizada",
        }
    }
}

/// Logical key of a register: one per supervisor, venue and calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterKey {
    pub supervisor_id: i64,
    pub date: NaiveDate,
    pub venue_id: i64,
}

impl RegisterKey {
    /// Validate the raw key parts and normalize `date` to the calendar day.
    pub fn parse(supervisor_id: i64, date: &str, venue_id: i64) -> LedgerResult<Self> {
        if supervisor_id <= 0 {
            return Err(LedgerError::validation("supervisor_id is required"));
        }
        if venue_id <= 0 {
            return Err(LedgerError::validation("venue_id is required"));
        }
        Ok(Self {
            supervisor_id,
            date: normalize_date(date)?,
            venue_id,
        })
    }
}

/// Reduce a date or date-time string to its calendar day.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 and `YYYY-MM-DD HH:MM[:SS]` (with `T` or space).
pub fn normalize_date(raw: &str) -> LedgerResult<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(LedgerError::validation("date is required"));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    const DATE_TIME_FORMATS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.date());
        }
    }
    Err(LedgerError::validation(format!("malformed date: {raw}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    pub id: RegisterId,
    pub supervisor_id: i64,
    pub date: NaiveDate,
    pub venue_id: i64,
    pub sub_venue_id: Option<i64>,
    pub tournament_id: Option<i64>,
    pub shift_id: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<i64>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<i64>,
    pub declared_cash: Option<Decimal>,
    pub computed_cash: Option<Decimal>,
}

impl Register {
    pub fn key(&self) -> RegisterKey {
        RegisterKey {
            supervisor_id: self.supervisor_id,
            date: self.date,
            venue_id: self.venue_id,
        }
    }

    pub fn state(&self) -> RegisterState {
        if self.posted_at.is_some() {
            RegisterState::Contabilizada
        } else if self.closed_at.is_some() {
            RegisterState::Cerrada
        } else {
            RegisterState::Abierta
        }
    }
}

/// A scheduled match as supplied by the match registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub zone_id: i64,
    pub team1_id: TeamId,
    pub team2_id: TeamId,
    pub kickoff: NaiveDateTime,
    pub venue_id: i64,
    pub supervisor_id: i64,
    pub matchday_number: i64,
    pub register_id: Option<RegisterId>,
}

/// Revenue stream a team payment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentType {
    Registration,
    Deposit,
    MatchFee,
}

impl PaymentType {
    pub const ALL: [PaymentType; 3] = [
        PaymentType::Registration,
        PaymentType::Deposit,
        PaymentType::MatchFee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Registration => "registration",
            PaymentType::Deposit => "deposit",
            PaymentType::MatchFee => "match_fee",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(PaymentType::Registration),
            "deposit" => Some(PaymentType::Deposit),
            "match_fee" | "matchFee" => Some(PaymentType::MatchFee),
            _ => None,
        }
    }
}

/// Debt/payment breakdown for one team within one register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSettlement {
    pub register_id: RegisterId,
    pub slot: i64,
    pub team_id: TeamId,
    pub absent: bool,
    pub matches_played: i64,
    pub debt_registration: Decimal,
    pub debt_deposit: Decimal,
    pub debt_match_fee: Decimal,
    pub total_due: Decimal,
    pub paid_registration: Decimal,
    pub paid_deposit: Decimal,
    pub paid_match_fee: Decimal,
    pub residual_debt: Decimal,
}

/// Register-level cash totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub ingreso_inscripciones: Decimal,
    pub ingreso_depositos: Decimal,
    pub ingreso_fecha: Decimal,
    pub egreso_arbitros: Decimal,
    pub egreso_predios: Decimal,
    pub egreso_personal: Decimal,
    pub egreso_medico: Decimal,
    pub egreso_otros: Decimal,
    pub total_ingresos: Decimal,
    pub total_egresos: Decimal,
    pub total_caja: Decimal,
    pub total_efectivo: Decimal,
    pub diferencia_caja: Decimal,
}

/// Ancillary expense collections summed into the register's egresos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Referees,
    Venues,
    Staff,
    Medical,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::Referees => "referees",
            ExpenseCategory::Venues => "venues",
            ExpenseCategory::Staff => "staff",
            ExpenseCategory::Medical => "medical",
            ExpenseCategory::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "referees" => Some(ExpenseCategory::Referees),
            "venues" => Some(ExpenseCategory::Venues),
            "staff" => Some(ExpenseCategory::Staff),
            "medical" => Some(ExpenseCategory::Medical),
            "other" => Some(ExpenseCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub register_id: RegisterId,
    pub category: ExpenseCategory,
    pub slot: i64,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectationStatus {
    Pending,
    Partial,
    Full,
}

impl AffectationStatus {
    /// Status of something worth `total` with `pending` still unallocated.
    pub fn for_pending(total: Decimal, pending: Decimal) -> Self {
        if pending.is_zero() {
            AffectationStatus::Full
        } else if pending >= total {
            AffectationStatus::Pending
        } else {
            AffectationStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AffectationStatus::Pending => "pending",
            AffectationStatus::Partial => "partial",
            AffectationStatus::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AffectationStatus::Pending),
            "partial" => Some(AffectationStatus::Partial),
            "full" => Some(AffectationStatus::Full),
            _ => None,
        }
    }
}

/// Debit invoices are owed to the provider; credit notes are owed by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceDirection {
    Debit,
    Credit,
}

impl InvoiceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceDirection::Debit => "debit",
            InvoiceDirection::Credit => "credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(InvoiceDirection::Debit),
            "credit" => Some(InvoiceDirection::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: i64,
    pub origin_date: NaiveDate,
    pub provider_id: i64,
    pub direction: InvoiceDirection,
    pub voucher_type: String,
    pub voucher_number: String,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub taxes: Decimal,
    pub total: Decimal,
    pub pending_to_affect: Decimal,
    pub affectation_status: AffectationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashMovement {
    pub id: i64,
    pub origin_date: NaiveDate,
    pub provider_id: i64,
    pub voucher_type: String,
    pub voucher_number: String,
    pub due_date: Option<NaiveDate>,
    pub cash_amount: Decimal,
    pub check_amount: Decimal,
    pub affected_amount: Decimal,
    pub net_amount: Decimal,
    pub status: AffectationStatus,
}

impl CashMovement {
    pub fn total(&self) -> Decimal {
        self.cash_amount + self.check_amount
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCashMovement {
    pub origin_date: NaiveDate,
    pub provider_id: i64,
    pub voucher_type: String,
    pub voucher_number: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub cash_amount: Decimal,
    #[serde(default)]
    pub check_amount: Decimal,
}

/// Whitelisted mutable fields of a cash movement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashMovementPatch {
    pub origin_date: Option<NaiveDate>,
    pub voucher_type: Option<String>,
    pub voucher_number: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub cash_amount: Option<Decimal>,
    pub check_amount: Option<Decimal>,
}

impl CashMovementPatch {
    pub fn is_empty(&self) -> bool {
        self.origin_date.is_none()
            && self.voucher_type.is_none()
            && self.voucher_number.is_none()
            && self.due_date.is_none()
            && self.cash_amount.is_none()
            && self.check_amount.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAffectation {
    pub invoice_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affectation {
    pub id: i64,
    pub movement_id: i64,
    pub invoice_id: i64,
    pub amount: Decimal,
}
