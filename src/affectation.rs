//! Provider cash movements and their allocation ("affectation") against
//! pending invoices.
//!
//! Every invoice keeps `total = pending_to_affect + Σ live affectations`.
//! Updates and deletes reverse a movement's affectations before touching it,
//! so the balance holds across the whole lifecycle.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Affectation, AffectationStatus, CashMovement, CashMovementPatch, Invoice, InvoiceDirection,
    NewAffectation, NewCashMovement,
};
use crate::money::{self, SqlDecimal};
use crate::registry::{load_invoice, row_to_invoice, INVOICE_COLUMNS};
use crate::store::Store;

const MOVEMENT_COLUMNS: &str = "id, origin_date, provider_id, voucher_type, voucher_number, due_date, \
     cash_amount, check_amount, affected_amount, net_amount, status";

/// A cash movement together with its live affectations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashMovementDetail {
    pub movement: CashMovement,
    pub affectations: Vec<Affectation>,
}

fn row_to_movement(row: &rusqlite::Row<'_>) -> rusqlite::Result<CashMovement> {
    let status: String = row.get(10)?;
    Ok(CashMovement {
        id: row.get(0)?,
        origin_date: row.get(1)?,
        provider_id: row.get(2)?,
        voucher_type: row.get(3)?,
        voucher_number: row.get(4)?,
        due_date: row.get(5)?,
        cash_amount: money::get(row, 6)?,
        check_amount: money::get(row, 7)?,
        affected_amount: money::get(row, 8)?,
        net_amount: money::get(row, 9)?,
        status: AffectationStatus::from_str(&status).unwrap_or(AffectationStatus::Pending),
    })
}

fn load_movement(conn: &Connection, movement_id: i64) -> LedgerResult<CashMovement> {
    conn.query_row(
        &format!("SELECT {MOVEMENT_COLUMNS} FROM cash_movements WHERE id = ?1"),
        params![movement_id],
        row_to_movement,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("cash movement", movement_id))
}

fn movement_affectations(conn: &Connection, movement_id: i64) -> LedgerResult<Vec<Affectation>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, movement_id, invoice_id, amount FROM affectations
         WHERE movement_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![movement_id], |row| {
        Ok(Affectation {
            id: row.get(0)?,
            movement_id: row.get(1)?,
            invoice_id: row.get(2)?,
            amount: money::get(row, 3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn check_amounts(cash_amount: Decimal, check_amount: Decimal) -> LedgerResult<()> {
    if cash_amount < Decimal::ZERO || check_amount < Decimal::ZERO {
        return Err(LedgerError::validation("movement amounts cannot be negative"));
    }
    Ok(())
}

fn movement_status(total: Decimal, affected: Decimal) -> AffectationStatus {
    if affected.is_zero() {
        AffectationStatus::Pending
    } else {
        AffectationStatus::for_pending(total, total - affected)
    }
}

fn set_invoice_pending(conn: &Connection, invoice: &Invoice, pending: Decimal) -> LedgerResult<()> {
    let status = AffectationStatus::for_pending(invoice.total, pending);
    conn.execute(
        "UPDATE invoices SET pending_to_affect = ?2, affectation_status = ?3 WHERE id = ?1",
        params![invoice.id, SqlDecimal(pending), status.as_str()],
    )?;
    debug!(invoice_id = invoice.id, %pending, status = status.as_str(), "invoice pending updated");
    Ok(())
}

/// Validate and book `affectations` for a movement. Returns the amount applied.
fn apply_affectations(
    conn: &Connection,
    movement: &CashMovement,
    affectations: &[NewAffectation],
) -> LedgerResult<Decimal> {
    let requested: Decimal = affectations.iter().map(|a| a.amount).sum();
    if requested > movement.total() {
        return Err(LedgerError::validation(format!(
            "affectations ({requested}) exceed movement total ({})",
            movement.total()
        )));
    }

    for a in affectations {
        if a.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("affectation amount must be positive"));
        }
        let invoice = load_invoice(conn, a.invoice_id)?;
        if invoice.provider_id != movement.provider_id {
            return Err(LedgerError::validation(format!(
                "invoice {} belongs to another provider",
                invoice.id
            )));
        }
        if a.amount > invoice.pending_to_affect {
            return Err(LedgerError::validation(format!(
                "affectation ({}) exceeds pending amount of invoice {} ({})",
                a.amount, invoice.id, invoice.pending_to_affect
            )));
        }
        conn.execute(
            "INSERT INTO affectations (movement_id, invoice_id, amount) VALUES (?1, ?2, ?3)",
            params![movement.id, a.invoice_id, SqlDecimal(a.amount)],
        )?;
        set_invoice_pending(conn, &invoice, invoice.pending_to_affect - a.amount)?;
    }
    Ok(requested)
}

/// Give every affected amount back to its invoice and drop the affectations.
fn reverse_affectations(conn: &Connection, movement_id: i64) -> LedgerResult<usize> {
    let existing = movement_affectations(conn, movement_id)?;
    for a in &existing {
        let invoice = load_invoice(conn, a.invoice_id)?;
        let restored = (invoice.pending_to_affect + a.amount).min(invoice.total);
        set_invoice_pending(conn, &invoice, restored)?;
    }
    conn.execute(
        "DELETE FROM affectations WHERE movement_id = ?1",
        params![movement_id],
    )?;
    Ok(existing.len())
}

fn write_summary(conn: &Connection, movement: &CashMovement, affected: Decimal) -> LedgerResult<()> {
    let total = movement.total();
    conn.execute(
        "UPDATE cash_movements
         SET affected_amount = ?2, net_amount = ?3, status = ?4, updated_at = ?5
         WHERE id = ?1",
        params![
            movement.id,
            SqlDecimal(affected),
            SqlDecimal(total - affected),
            movement_status(total, affected).as_str(),
            Utc::now(),
        ],
    )?;
    Ok(())
}

#[derive(Clone)]
pub struct AffectationLedger {
    store: Store,
}

impl AffectationLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create_cash_movement(
        &self,
        new: NewCashMovement,
        affectations: Vec<NewAffectation>,
    ) -> LedgerResult<CashMovement> {
        if new.provider_id <= 0 {
            return Err(LedgerError::validation("provider_id is required"));
        }
        check_amounts(new.cash_amount, new.check_amount)?;

        let movement = self
            .store
            .with_tx(|tx| {
                let now = Utc::now();
                let total = new.cash_amount + new.check_amount;
                tx.execute(
                    "INSERT INTO cash_movements
                        (origin_date, provider_id, voucher_type, voucher_number, due_date,
                         cash_amount, check_amount, affected_amount, net_amount, status,
                         created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '0', ?8, ?9, ?10, ?10)",
                    params![
                        new.origin_date,
                        new.provider_id,
                        &new.voucher_type,
                        &new.voucher_number,
                        new.due_date,
                        SqlDecimal(new.cash_amount),
                        SqlDecimal(new.check_amount),
                        SqlDecimal(total),
                        AffectationStatus::Pending.as_str(),
                        now,
                    ],
                )?;
                let movement = load_movement(tx, tx.last_insert_rowid())?;
                let affected = apply_affectations(tx, &movement, &affectations)?;
                write_summary(tx, &movement, affected)?;
                load_movement(tx, movement.id)
            })
            .await?;

        info!(
            movement_id = movement.id,
            provider_id = movement.provider_id,
            affected = %movement.affected_amount,
            count = affectations.len(),
            "cash movement created"
        );
        Ok(movement)
    }

    /// Apply a whitelisted patch. When `affectations` is given, the existing set is
    /// reversed and replaced by it; otherwise the current set must still fit the new total.
    pub async fn update_cash_movement(
        &self,
        movement_id: i64,
        patch: CashMovementPatch,
        affectations: Option<Vec<NewAffectation>>,
    ) -> LedgerResult<CashMovement> {
        if patch.is_empty() && affectations.is_none() {
            return Err(LedgerError::validation("nothing to update"));
        }

        let movement = self
            .store
            .with_tx(|tx| {
                let current = load_movement(tx, movement_id)?;
                let cash_amount = patch.cash_amount.unwrap_or(current.cash_amount);
                let check_amount = patch.check_amount.unwrap_or(current.check_amount);
                check_amounts(cash_amount, check_amount)?;

                tx.execute(
                    "UPDATE cash_movements
                     SET origin_date = ?2, voucher_type = ?3, voucher_number = ?4, due_date = ?5,
                         cash_amount = ?6, check_amount = ?7
                     WHERE id = ?1",
                    params![
                        movement_id,
                        patch.origin_date.unwrap_or(current.origin_date),
                        patch.voucher_type.as_deref().unwrap_or(&current.voucher_type),
                        patch.voucher_number.as_deref().unwrap_or(&current.voucher_number),
                        patch.due_date.or(current.due_date),
                        SqlDecimal(cash_amount),
                        SqlDecimal(check_amount),
                    ],
                )?;
                let updated = load_movement(tx, movement_id)?;

                let affected = match &affectations {
                    Some(replacement) => {
                        let reversed = reverse_affectations(tx, movement_id)?;
                        debug!(movement_id, reversed, "affectations reversed");
                        apply_affectations(tx, &updated, replacement)?
                    }
                    None => {
                        if current.affected_amount > updated.total() {
                            return Err(LedgerError::validation(format!(
                                "existing affectations ({}) exceed new movement total ({})",
                                current.affected_amount,
                                updated.total()
                            )));
                        }
                        current.affected_amount
                    }
                };
                write_summary(tx, &updated, affected)?;
                load_movement(tx, movement_id)
            })
            .await?;

        info!(movement_id, affected = %movement.affected_amount, "cash movement updated");
        Ok(movement)
    }

    pub async fn delete_cash_movement(&self, movement_id: i64) -> LedgerResult<()> {
        let reversed = self
            .store
            .with_tx(|tx| {
                load_movement(tx, movement_id)?;
                let reversed = reverse_affectations(tx, movement_id)?;
                tx.execute(
                    "DELETE FROM cash_movements WHERE id = ?1",
                    params![movement_id],
                )?;
                Ok(reversed)
            })
            .await?;
        info!(movement_id, reversed, "cash movement deleted");
        Ok(())
    }

    pub async fn get_cash_movement(&self, movement_id: i64) -> LedgerResult<CashMovementDetail> {
        self.store
            .read(|conn| {
                Ok(CashMovementDetail {
                    movement: load_movement(conn, movement_id)?,
                    affectations: movement_affectations(conn, movement_id)?,
                })
            })
            .await
    }

    /// Invoices of a provider with something left to affect, oldest first.
    pub async fn list_pending_invoices(
        &self,
        provider_id: i64,
        direction: Option<InvoiceDirection>,
    ) -> LedgerResult<Vec<Invoice>> {
        self.store
            .read(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices
                     WHERE provider_id = ?1 AND (?2 IS NULL OR direction = ?2)
                     ORDER BY origin_date ASC, id ASC"
                ))?;
                let rows = stmt.query_map(
                    params![provider_id, direction.map(|d| d.as_str())],
                    row_to_invoice,
                )?;
                let mut out = Vec::new();
                for invoice in rows {
                    let invoice = invoice?;
                    if !invoice.pending_to_affect.is_zero() {
                        out.push(invoice);
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
    use crate::registry::{InvoiceRecord, Registry};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    async fn invoice(
        registry: &Registry,
        id: i64,
        provider_id: i64,
        direction: InvoiceDirection,
        origin: u32,
        total: Decimal,
    ) {
        registry
            .upsert_invoice(&InvoiceRecord {
                id,
                origin_date: day(origin),
                provider_id,
                direction,
                voucher_type: "FA".to_string(),
                voucher_number: format!("0001-{id:08}"),
                due_date: None,
                subtotal: total,
                taxes: Decimal::ZERO,
            })
            .await
            .unwrap();
    }

    fn movement(provider_id: i64, cash: Decimal, check: Decimal) -> NewCashMovement {
        NewCashMovement {
            origin_date: day(20),
            provider_id,
            voucher_type: "OP".to_string(),
            voucher_number: "0001-00000042".to_string(),
            due_date: None,
            cash_amount: cash,
            check_amount: check,
        }
    }

    fn alloc(invoice_id: i64, amount: Decimal) -> NewAffectation {
        NewAffectation { invoice_id, amount }
    }

    async fn setup() -> (Store, Registry, AffectationLedger) {
        let store = Store::open(":memory:").unwrap();
        let registry = Registry::new(store.clone());
        invoice(&registry, 1, 9, InvoiceDirection::Debit, 3, dec!(300)).await;
        invoice(&registry, 2, 9, InvoiceDirection::Debit, 1, dec!(500)).await;
        let ledger = AffectationLedger::new(store.clone());
        (store, registry, ledger)
    }

    async fn affected_total(store: &Store, invoice_id: i64) -> Decimal {
        store
            .read(|conn| {
                let mut stmt =
                    conn.prepare("SELECT amount FROM affectations WHERE invoice_id = ?1")?;
                let rows = stmt.query_map(params![invoice_id], |r| money::get(r, 0))?;
                let mut sum = Decimal::ZERO;
                for amount in rows {
                    sum += amount?;
                }
                Ok(sum)
            })
            .await
            .unwrap()
    }

    async fn assert_conserved(store: &Store, registry: &Registry, invoice_id: i64) {
        let invoice = registry.get_invoice(invoice_id).await.unwrap();
        assert_eq!(
            invoice.total,
            invoice.pending_to_affect + affected_total(store, invoice_id).await,
            "invoice {invoice_id} out of balance"
        );
    }

    #[tokio::test]
    async fn test_split_movement_across_invoices() {
        let (store, registry, ledger) = setup().await;

        let m = ledger
            .create_cash_movement(
                movement(9, dec!(400), dec!(100)),
                vec![alloc(1, dec!(300)), alloc(2, dec!(200))],
            )
            .await
            .unwrap();
        assert_eq!(m.affected_amount, dec!(500));
        assert_eq!(m.net_amount, Decimal::ZERO);
        assert_eq!(m.status, AffectationStatus::Full);

        let first = registry.get_invoice(1).await.unwrap();
        assert_eq!(first.pending_to_affect, Decimal::ZERO);
        assert_eq!(first.affectation_status, AffectationStatus::Full);
        let second = registry.get_invoice(2).await.unwrap();
        assert_eq!(second.pending_to_affect, dec!(300));
        assert_eq!(second.affectation_status, AffectationStatus::Partial);

        assert_conserved(&store, &registry, 1).await;
        assert_conserved(&store, &registry, 2).await;

        let pending = ledger.list_pending_invoices(9, None).await.unwrap();
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn test_invalid_affectations_leave_nothing_behind() {
        let (store, registry, ledger) = setup().await;
        invoice(&registry, 3, 77, InvoiceDirection::Debit, 2, dec!(100)).await;

        let cases = vec![
            (movement(9, dec!(100), dec!(0)), vec![alloc(1, dec!(150))]),
            (movement(9, dec!(100), dec!(0)), vec![alloc(2, dec!(60)), alloc(1, dec!(60))]),
            (movement(9, dec!(100), dec!(0)), vec![alloc(3, dec!(50))]),
            (movement(9, dec!(100), dec!(0)), vec![alloc(1, dec!(0))]),
            (movement(9, dec!(100), dec!(0)), vec![alloc(404, dec!(10))]),
            (movement(9, dec!(-1), dec!(0)), vec![]),
        ];
        for (m, affectations) in cases {
            assert!(ledger.create_cash_movement(m, affectations).await.is_err());
        }

        let movements: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM cash_movements", [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(movements, 0);
        for id in [1, 2, 3] {
            let invoice = registry.get_invoice(id).await.unwrap();
            assert_eq!(invoice.pending_to_affect, invoice.total);
        }
    }

    #[tokio::test]
    async fn test_update_reverses_then_reapplies() {
        let (store, registry, ledger) = setup().await;
        let m = ledger
            .create_cash_movement(
                movement(9, dec!(500), dec!(0)),
                vec![alloc(1, dec!(300)), alloc(2, dec!(200))],
            )
            .await
            .unwrap();

        let updated = ledger
            .update_cash_movement(
                m.id,
                CashMovementPatch {
                    voucher_number: Some("0001-00000043".to_string()),
                    ..Default::default()
                },
                Some(vec![alloc(2, dec!(450))]),
            )
            .await
            .unwrap();
        assert_eq!(updated.voucher_number, "0001-00000043");
        assert_eq!(updated.affected_amount, dec!(450));
        assert_eq!(updated.net_amount, dec!(50));
        assert_eq!(updated.status, AffectationStatus::Partial);

        let first = registry.get_invoice(1).await.unwrap();
        assert_eq!(first.pending_to_affect, dec!(300));
        assert_eq!(first.affectation_status, AffectationStatus::Pending);
        assert_eq!(registry.get_invoice(2).await.unwrap().pending_to_affect, dec!(50));
        assert_conserved(&store, &registry, 1).await;
        assert_conserved(&store, &registry, 2).await;

        // Shrinking the movement below what is already affected is refused
        let shrink = ledger
            .update_cash_movement(
                m.id,
                CashMovementPatch {
                    cash_amount: Some(dec!(100)),
                    ..Default::default()
                },
                None,
            )
            .await;
        assert!(matches!(shrink, Err(LedgerError::Validation(_))));

        let detail = ledger.get_cash_movement(m.id).await.unwrap();
        assert_eq!(detail.movement.cash_amount, dec!(500));
        assert_eq!(detail.affectations.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_restores_invoices() {
        let (store, registry, ledger) = setup().await;
        let m = ledger
            .create_cash_movement(
                movement(9, dec!(200), dec!(100)),
                vec![alloc(1, dec!(300))],
            )
            .await
            .unwrap();

        ledger.delete_cash_movement(m.id).await.unwrap();
        let first = registry.get_invoice(1).await.unwrap();
        assert_eq!(first.pending_to_affect, dec!(300));
        assert_eq!(first.affectation_status, AffectationStatus::Pending);
        assert_conserved(&store, &registry, 1).await;

        assert!(matches!(
            ledger.get_cash_movement(m.id).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.delete_cash_movement(m.id).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_invoices_order_and_direction() {
        let (_store, registry, ledger) = setup().await;
        invoice(&registry, 4, 9, InvoiceDirection::Credit, 2, dec!(40)).await;

        let all = ledger.list_pending_invoices(9, None).await.unwrap();
        assert_eq!(all.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 4, 1]);

        let credits = ledger
            .list_pending_invoices(9, Some(InvoiceDirection::Credit))
            .await
            .unwrap();
        assert_eq!(credits.iter().map(|i| i.id).collect::<Vec<_>>(), vec![4]);
        assert!(ledger.list_pending_invoices(1234, None).await.unwrap().is_empty());
    }
}
