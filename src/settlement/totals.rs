//! Register-level totals: income from team settlements, outgoings from the
//! ancillary expense collections, and the declared-vs-computed cash check.

use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::LedgerResult;
use crate::expenses::expense_totals;
use crate::models::{
    ExpenseCategory, Match, Register, RegisterId, RegisterState, TeamSettlement, Totals,
};
use crate::money::SqlDecimal;
use crate::register::{load_register, register_matches};
use crate::settlement::debts::compute_settlements_in;
use crate::store::Store;

impl Totals {
    pub fn assemble(
        settlements: &[TeamSettlement],
        expenses: &HashMap<ExpenseCategory, Decimal>,
        declared_cash: Decimal,
    ) -> Totals {
        let ingreso_inscripciones: Decimal = settlements.iter().map(|s| s.paid_registration).sum();
        let ingreso_depositos: Decimal = settlements.iter().map(|s| s.paid_deposit).sum();
        let ingreso_fecha: Decimal = settlements.iter().map(|s| s.paid_match_fee).sum();

        let egreso = |c: ExpenseCategory| expenses.get(&c).copied().unwrap_or(Decimal::ZERO);
        let egreso_arbitros = egreso(ExpenseCategory::Referees);
        let egreso_predios = egreso(ExpenseCategory::Venues);
        let egreso_personal = egreso(ExpenseCategory::Staff);
        let egreso_medico = egreso(ExpenseCategory::Medical);
        let egreso_otros = egreso(ExpenseCategory::Other);

        let total_ingresos = ingreso_inscripciones + ingreso_depositos + ingreso_fecha;
        let total_egresos =
            egreso_arbitros + egreso_predios + egreso_personal + egreso_medico + egreso_otros;
        let total_caja = total_ingresos - total_egresos;

        Totals {
            ingreso_inscripciones,
            ingreso_depositos,
            ingreso_fecha,
            egreso_arbitros,
            egreso_predios,
            egreso_personal,
            egreso_medico,
            egreso_otros,
            total_ingresos,
            total_egresos,
            total_caja,
            total_efectivo: declared_cash,
            diferencia_caja: declared_cash - total_caja,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.diferencia_caja.is_zero()
    }
}

pub(crate) fn compute_totals_in(conn: &Connection, register_id: RegisterId) -> LedgerResult<Totals> {
    let register = load_register(conn, register_id)?;
    let settlements = compute_settlements_in(conn, register_id)?;
    let expenses = expense_totals(conn, register_id)?;
    Ok(Totals::assemble(
        &settlements,
        &expenses,
        register.declared_cash.unwrap_or(Decimal::ZERO),
    ))
}

/// Recompute and store `computed_cash`, even on a posted register.
pub(crate) fn persist_in(conn: &Connection, register_id: RegisterId) -> LedgerResult<Totals> {
    let totals = compute_totals_in(conn, register_id)?;
    conn.execute(
        "UPDATE registers SET computed_cash = ?2 WHERE id = ?1",
        params![register_id, SqlDecimal(totals.total_caja)],
    )?;
    Ok(totals)
}

/// Recompute after a structural change. Posted registers keep their frozen figures.
pub(crate) fn refresh_in(conn: &Connection, register_id: RegisterId) -> LedgerResult<Totals> {
    let register = load_register(conn, register_id)?;
    if register.state() == RegisterState::Contabilizada {
        debug!(register_id, "register posted; totals frozen");
        return compute_totals_in(conn, register_id);
    }
    persist_in(conn, register_id)
}

/// Everything the printed sheet of a register shows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSheet {
    pub register: Register,
    pub state: RegisterState,
    pub matches: Vec<Match>,
    pub settlements: Vec<TeamSettlement>,
    pub totals: Totals,
}

#[derive(Clone)]
pub struct TotalsCalculator {
    store: Store,
}

impl TotalsCalculator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn compute_totals(&self, register_id: RegisterId) -> LedgerResult<Totals> {
        self.store
            .read(|conn| compute_totals_in(conn, register_id))
            .await
    }

    /// Recompute and persist unless the register is posted.
    pub async fn recompute(&self, register_id: RegisterId) -> LedgerResult<Totals> {
        self.store.with_tx(|tx| refresh_in(tx, register_id)).await
    }

    pub async fn register_sheet(&self, register_id: RegisterId) -> LedgerResult<RegisterSheet> {
        self.store
            .read(|conn| {
                let register = load_register(conn, register_id)?;
                let settlements = compute_settlements_in(conn, register_id)?;
                let expenses = expense_totals(conn, register_id)?;
                let totals = Totals::assemble(
                    &settlements,
                    &expenses,
                    register.declared_cash.unwrap_or(Decimal::ZERO),
                );
                Ok(RegisterSheet {
                    state: register.state(),
                    matches: register_matches(conn, register_id)?,
                    register,
                    settlements,
                    totals,
                })
            })
            .await
    }
}
