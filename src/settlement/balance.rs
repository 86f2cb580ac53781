//! Running account balance per team.
//!
//! A read-model over six typed movement sources. Each source maps to a fixed
//! side (charge = debit, payment = credit); the balance is credits minus debits.

use chrono::Utc;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{RegisterId, TeamId};
use crate::money::{self, SqlDecimal};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementSource {
    RegistrationCharge,
    DepositCharge,
    MatchFeeCharge,
    RegistrationPayment,
    DepositPayment,
    MatchFeePayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Debit,
    Credit,
}

impl MovementSource {
    pub const ALL: [MovementSource; 6] = [
        MovementSource::RegistrationCharge,
        MovementSource::DepositCharge,
        MovementSource::MatchFeeCharge,
        MovementSource::RegistrationPayment,
        MovementSource::DepositPayment,
        MovementSource::MatchFeePayment,
    ];

    pub fn side(&self) -> Side {
        match self {
            MovementSource::RegistrationCharge
            | MovementSource::DepositCharge
            | MovementSource::MatchFeeCharge => Side::Debit,
            MovementSource::RegistrationPayment
            | MovementSource::DepositPayment
            | MovementSource::MatchFeePayment => Side::Credit,
        }
    }

    /// `(register_id, amount)` rows of this source for one team (`?1`).
    /// Rows tied to voided registers are skipped.
    fn query(&self) -> &'static str {
        match self {
            MovementSource::RegistrationCharge => {
                "SELECT NULL, amount FROM registration_charges WHERE team_id = ?1 ORDER BY id"
            }
            MovementSource::DepositCharge => {
                "SELECT NULL, amount FROM deposit_charges WHERE team_id = ?1 ORDER BY id"
            }
            MovementSource::MatchFeeCharge => {
                "SELECT c.register_id, c.amount FROM match_fee_charges c
                 JOIN registers r ON r.id = c.register_id AND r.voided = 0
                 WHERE c.team_id = ?1 ORDER BY c.match_id"
            }
            MovementSource::RegistrationPayment => {
                "SELECT p.register_id, p.amount FROM team_payments p
                 JOIN registers r ON r.id = p.register_id AND r.voided = 0
                 WHERE p.team_id = ?1 AND p.payment_type = 'registration' ORDER BY p.register_id"
            }
            MovementSource::DepositPayment => {
                "SELECT p.register_id, p.amount FROM team_payments p
                 JOIN registers r ON r.id = p.register_id AND r.voided = 0
                 WHERE p.team_id = ?1 AND p.payment_type = 'deposit' ORDER BY p.register_id"
            }
            MovementSource::MatchFeePayment => {
                "SELECT p.register_id, p.amount FROM team_payments p
                 JOIN registers r ON r.id = p.register_id AND r.voided = 0
                 WHERE p.team_id = ?1 AND p.payment_type = 'match_fee' ORDER BY p.register_id"
            }
        }
    }
}

/// One typed entry in a team's running account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerMovement {
    pub source: MovementSource,
    /// Register the movement was booked in; `None` for registry-level charges.
    pub register_id: Option<RegisterId>,
    pub amount: Decimal,
}

impl LedgerMovement {
    pub fn signed_amount(&self) -> Decimal {
        match self.source.side() {
            Side::Credit => self.amount,
            Side::Debit => -self.amount,
        }
    }
}

/// Σ credits − Σ debits
pub fn fold_balance<'a>(movements: impl IntoIterator<Item = &'a LedgerMovement>) -> Decimal {
    movements
        .into_iter()
        .map(LedgerMovement::signed_amount)
        .sum()
}

pub(crate) fn movements_for_team(
    conn: &Connection,
    team_id: TeamId,
    sources: &[MovementSource],
) -> LedgerResult<Vec<LedgerMovement>> {
    let mut out = Vec::new();
    for &source in sources {
        let mut stmt = conn.prepare_cached(source.query())?;
        let rows = stmt.query_map(params![team_id], |row| {
            Ok(LedgerMovement {
                source,
                register_id: row.get(0)?,
                amount: money::get(row, 1)?,
            })
        })?;
        for movement in rows {
            out.push(movement?);
        }
    }
    Ok(out)
}

pub(crate) fn running_account_balance(conn: &Connection, team_id: TeamId) -> LedgerResult<Decimal> {
    let movements = movements_for_team(conn, team_id, &MovementSource::ALL)?;
    Ok(fold_balance(&movements))
}

/// Deposit charges minus deposit payments, used when the full union cannot be computed.
pub(crate) fn deposit_ledger_balance(conn: &Connection, team_id: TeamId) -> LedgerResult<Decimal> {
    let movements = movements_for_team(
        conn,
        team_id,
        &[MovementSource::DepositCharge, MovementSource::DepositPayment],
    )?;
    Ok(fold_balance(&movements))
}

/// Read side of the running account plus the two non-match debit feeds.
#[derive(Clone)]
pub struct BalanceAggregator {
    store: Store,
}

impl BalanceAggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn running_account_balance(&self, team_id: TeamId) -> LedgerResult<Decimal> {
        self.store
            .read(|conn| running_account_balance(conn, team_id))
            .await
    }

    pub async fn movements(&self, team_id: TeamId) -> LedgerResult<Vec<LedgerMovement>> {
        self.store
            .read(|conn| movements_for_team(conn, team_id, &MovementSource::ALL))
            .await
    }

    pub async fn record_registration_charge(
        &self,
        team_id: TeamId,
        tournament_id: i64,
        amount: Decimal,
    ) -> LedgerResult<()> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("charge amount must be positive"));
        }
        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO registration_charges (team_id, tournament_id, amount, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![team_id, tournament_id, SqlDecimal(amount), Utc::now()],
                )?;
                Ok(())
            })
            .await?;
        info!(team_id, tournament_id, %amount, "registration charge recorded");
        Ok(())
    }

    pub async fn record_deposit_charge(
        &self,
        team_id: TeamId,
        amount: Decimal,
        concept: &str,
    ) -> LedgerResult<()> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("charge amount must be positive"));
        }
        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO deposit_charges (team_id, amount, concept, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![team_id, SqlDecimal(amount), concept, Utc::now()],
                )?;
                Ok(())
            })
            .await?;
        info!(team_id, %amount, concept, "deposit charge recorded");
        Ok(())
    }
}
