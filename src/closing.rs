//! Register closing state machine: abierta -> cerrada -> contabilizada, with
//! `reopen` back to abierta from either. The state lives only in the stamps.

use chrono::Utc;
use rusqlite::params;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{RegisterId, RegisterState, Totals};
use crate::money::SqlDecimal;
use crate::register::{load_mutable_register, load_register};
use crate::settlement::totals;
use crate::store::Store;

#[derive(Clone)]
pub struct ClosingStateMachine {
    store: Store,
    require_close_before_post: bool,
}

impl ClosingStateMachine {
    pub fn new(store: Store, require_close_before_post: bool) -> Self {
        Self {
            store,
            require_close_before_post,
        }
    }

    pub async fn state(&self, register_id: RegisterId) -> LedgerResult<RegisterState> {
        self.store
            .read(|conn| Ok(load_register(conn, register_id)?.state()))
            .await
    }

    /// Recompute totals and stamp the register closed. A cash mismatch is logged, not refused.
    pub async fn close(&self, register_id: RegisterId, supervisor_id: i64) -> LedgerResult<Totals> {
        let totals = self
            .store
            .with_tx(|tx| {
                load_register(tx, register_id)?;
                let totals = totals::persist_in(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET closed_at = ?2, closed_by = ?3 WHERE id = ?1",
                    params![register_id, Utc::now(), supervisor_id],
                )?;
                Ok(totals)
            })
            .await?;

        if !totals.is_reconciled() {
            warn!(
                register_id,
                total_caja = %totals.total_caja,
                total_efectivo = %totals.total_efectivo,
                diferencia = %totals.diferencia_caja,
                "register closed with cash difference"
            );
        }
        info!(register_id, supervisor_id, "register closed");
        Ok(totals)
    }

    pub async fn post(&self, register_id: RegisterId, user_id: i64) -> LedgerResult<Totals> {
        let require_close = self.require_close_before_post;
        let totals = self
            .store
            .with_tx(|tx| {
                let register = load_register(tx, register_id)?;
                if require_close && register.state() == RegisterState::Abierta {
                    return Err(LedgerError::validation(
                        "register must be closed before it can be posted",
                    ));
                }
                let totals = totals::persist_in(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET posted_at = ?2, posted_by = ?3 WHERE id = ?1",
                    params![register_id, Utc::now(), user_id],
                )?;
                Ok(totals)
            })
            .await?;
        info!(register_id, user_id, total_caja = %totals.total_caja, "register posted");
        Ok(totals)
    }

    /// Clear every closing stamp, whatever the current state.
    pub async fn reopen(&self, register_id: RegisterId) -> LedgerResult<()> {
        let previous = self
            .store
            .with_tx(|tx| {
                let register = load_register(tx, register_id)?;
                tx.execute(
                    "UPDATE registers
                     SET closed_at = NULL, closed_by = NULL, posted_at = NULL, posted_by = NULL
                     WHERE id = ?1",
                    params![register_id],
                )?;
                Ok(register.state())
            })
            .await?;
        info!(register_id, from = previous.as_str(), "register reopened");
        Ok(())
    }

    pub async fn set_declared_cash(
        &self,
        register_id: RegisterId,
        amount: Decimal,
    ) -> LedgerResult<Totals> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::validation("declared cash cannot be negative"));
        }
        let totals = self
            .store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET declared_cash = ?2 WHERE id = ?1",
                    params![register_id, SqlDecimal(amount)],
                )?;
                totals::refresh_in(tx, register_id)
            })
            .await?;
        info!(register_id, %amount, "declared cash set");
        Ok(totals)
    }

    pub async fn set_shift(&self, register_id: RegisterId, shift_id: &str) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                load_register(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET shift_id = ?2 WHERE id = ?1",
                    params![register_id, shift_id],
                )?;
                Ok(())
            })
            .await?;
        info!(register_id, shift_id, "shift set");
        Ok(())
    }
}
