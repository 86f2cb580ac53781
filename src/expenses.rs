//! Ancillary expense collections of a register (referees, venues, staff,
//! medical, other). Each row is addressed by `(category, slot)`.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Expense, ExpenseCategory, RegisterId};
use crate::money::{self, SqlDecimal};
use crate::register::{load_mutable_register, load_register};
use crate::settlement::totals;
use crate::store::Store;

/// Per-category outgoings of one register. Categories with no rows are absent.
pub(crate) fn expense_totals(
    conn: &Connection,
    register_id: RegisterId,
) -> LedgerResult<HashMap<ExpenseCategory, Decimal>> {
    let mut stmt = conn.prepare_cached(
        "SELECT category, total FROM register_expenses WHERE register_id = ?1",
    )?;
    let rows = stmt.query_map(params![register_id], |row| {
        Ok((row.get::<_, String>(0)?, money::get(row, 1)?))
    })?;

    let mut out = HashMap::new();
    for row in rows {
        let (category, total) = row?;
        match ExpenseCategory::from_str(&category) {
            Some(c) => *out.entry(c).or_insert(Decimal::ZERO) += total,
            None => debug!(register_id, category = %category, "skipping unknown expense category"),
        }
    }
    Ok(out)
}

fn check_total(total: Decimal) -> LedgerResult<()> {
    if total < Decimal::ZERO {
        return Err(LedgerError::validation("expense total cannot be negative"));
    }
    Ok(())
}

fn expense_exists(
    conn: &Connection,
    register_id: RegisterId,
    category: ExpenseCategory,
    slot: i64,
) -> LedgerResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM register_expenses WHERE register_id = ?1 AND category = ?2 AND slot = ?3",
            params![register_id, category.as_str(), slot],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

#[derive(Clone)]
pub struct ExpenseLedger {
    store: Store,
}

impl ExpenseLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an expense in the next free slot of `category`.
    pub async fn add(
        &self,
        register_id: RegisterId,
        category: ExpenseCategory,
        total: Decimal,
    ) -> LedgerResult<Expense> {
        check_total(total)?;
        let expense = self
            .store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                let slot: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(slot), 0) + 1 FROM register_expenses
                     WHERE register_id = ?1 AND category = ?2",
                    params![register_id, category.as_str()],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "INSERT INTO register_expenses (register_id, category, slot, total)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![register_id, category.as_str(), slot, SqlDecimal(total)],
                )?;
                totals::refresh_in(tx, register_id)?;
                Ok(Expense {
                    register_id,
                    category,
                    slot,
                    total,
                })
            })
            .await?;
        info!(register_id, category = category.as_str(), slot = expense.slot, %total, "expense added");
        Ok(expense)
    }

    pub async fn update(
        &self,
        register_id: RegisterId,
        category: ExpenseCategory,
        slot: i64,
        total: Decimal,
    ) -> LedgerResult<Expense> {
        check_total(total)?;
        self.store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                if !expense_exists(tx, register_id, category, slot)? {
                    return Err(LedgerError::not_found("expense", slot));
                }
                tx.execute(
                    "UPDATE register_expenses SET total = ?4
                     WHERE register_id = ?1 AND category = ?2 AND slot = ?3",
                    params![register_id, category.as_str(), slot, SqlDecimal(total)],
                )?;
                totals::refresh_in(tx, register_id)?;
                Ok(())
            })
            .await?;
        info!(register_id, category = category.as_str(), slot, %total, "expense updated");
        Ok(Expense {
            register_id,
            category,
            slot,
            total,
        })
    }

    pub async fn remove(
        &self,
        register_id: RegisterId,
        category: ExpenseCategory,
        slot: i64,
    ) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                let deleted = tx.execute(
                    "DELETE FROM register_expenses
                     WHERE register_id = ?1 AND category = ?2 AND slot = ?3",
                    params![register_id, category.as_str(), slot],
                )?;
                if deleted == 0 {
                    return Err(LedgerError::not_found("expense", slot));
                }
                totals::refresh_in(tx, register_id)?;
                Ok(())
            })
            .await?;
        info!(register_id, category = category.as_str(), slot, "expense removed");
        Ok(())
    }

    pub async fn list(&self, register_id: RegisterId) -> LedgerResult<Vec<Expense>> {
        self.store
            .read(|conn| {
                load_register(conn, register_id)?;
                let mut stmt = conn.prepare_cached(
                    "SELECT category, slot, total FROM register_expenses
                     WHERE register_id = ?1 ORDER BY category, slot",
                )?;
                let rows = stmt.query_map(params![register_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        money::get(row, 2)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    let (category, slot, total) = row?;
                    if let Some(category) = ExpenseCategory::from_str(&category) {
                        out.push(Expense {
                            register_id,
                            category,
                            slot,
                            total,
                        });
                    }
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closing::ClosingStateMachine;
    use crate::register::RegisterManager;
    use crate::settlement::TotalsCalculator;
    use rust_decimal_macros::dec;

    async fn open_register(store: &Store) -> RegisterId {
        RegisterManager::new(store.clone())
            .find_or_create_register(7, "2024-05-18", 3, None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_expenses_feed_egresos() {
        let store = Store::open(":memory:").unwrap();
        let register_id = open_register(&store).await;
        let expenses = ExpenseLedger::new(store.clone());

        let first = expenses
            .add(register_id, ExpenseCategory::Referees, dec!(150))
            .await
            .unwrap();
        let second = expenses
            .add(register_id, ExpenseCategory::Referees, dec!(100))
            .await
            .unwrap();
        assert_eq!((first.slot, second.slot), (1, 2));
        expenses
            .add(register_id, ExpenseCategory::Medical, dec!(40))
            .await
            .unwrap();

        let totals = TotalsCalculator::new(store.clone())
            .compute_totals(register_id)
            .await
            .unwrap();
        assert_eq!(totals.egreso_arbitros, dec!(250));
        assert_eq!(totals.egreso_medico, dec!(40));
        assert_eq!(totals.total_egresos, dec!(290));
        assert_eq!(totals.total_caja, dec!(-290));

        expenses
            .update(register_id, ExpenseCategory::Referees, 2, dec!(50))
            .await
            .unwrap();
        expenses
            .remove(register_id, ExpenseCategory::Medical, 1)
            .await
            .unwrap();

        let totals = TotalsCalculator::new(store)
            .compute_totals(register_id)
            .await
            .unwrap();
        assert_eq!(totals.total_egresos, dec!(200));
        assert_eq!(expenses.list(register_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expense_errors() {
        let store = Store::open(":memory:").unwrap();
        let register_id = open_register(&store).await;
        let expenses = ExpenseLedger::new(store);

        assert!(matches!(
            expenses
                .add(register_id, ExpenseCategory::Other, dec!(-1))
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            expenses.remove(register_id, ExpenseCategory::Other, 9).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            expenses.add(999, ExpenseCategory::Other, dec!(10)).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_posted_register_refuses_expense_changes() {
        let store = Store::open(":memory:").unwrap();
        let register_id = open_register(&store).await;
        let expenses = ExpenseLedger::new(store.clone());
        expenses
            .add(register_id, ExpenseCategory::Venues, dec!(80))
            .await
            .unwrap();
        let closing = ClosingStateMachine::new(store.clone(), false);
        closing.post(register_id, 1).await.unwrap();

        assert!(matches!(
            expenses.add(register_id, ExpenseCategory::Venues, dec!(20)).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            expenses
                .update(register_id, ExpenseCategory::Venues, 1, dec!(10))
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            expenses.remove(register_id, ExpenseCategory::Venues, 1).await,
            Err(LedgerError::Validation(_))
        ));
        let frozen = TotalsCalculator::new(store.clone())
            .compute_totals(register_id)
            .await
            .unwrap();
        assert_eq!(frozen.total_egresos, dec!(80));

        closing.reopen(register_id).await.unwrap();
        expenses
            .remove(register_id, ExpenseCategory::Venues, 1)
            .await
            .unwrap();
        assert!(expenses.list(register_id).await.unwrap().is_empty());
    }
}
