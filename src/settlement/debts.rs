//! Per-team debt aggregation for one register, plus the payment and absence writers.
//!
//! Each team's debt combines three streams:
//! - registration: tournament fee minus every registration payment to date
//! - deposit: the negative part of the team's running account
//! - match fee: resolved rate times matches played in this register
//!
//! Payments recorded in this register are then subtracted to get the residual.

use chrono::Utc;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{PaymentType, RegisterId, TeamId, TeamSettlement};
use crate::money::{self, floor_zero, SqlDecimal};
use crate::register::{ensure_team_slot, load_mutable_register, load_register, register_matches};
use crate::registry::{registration_fee, resolve_match_fee, tournament_for_zone};
use crate::settlement::balance::{
    deposit_ledger_balance, fold_balance, movements_for_team, running_account_balance,
    MovementSource,
};
use crate::settlement::totals;
use crate::store::Store;

/// Where a team sits in a register and which zone it was first seen playing in.
#[derive(Debug, Clone, Copy)]
struct TeamEntry {
    team_id: TeamId,
    slot: i64,
    zone_id: Option<i64>,
    matches_played: i64,
}

/// Teams of a register in settlement order: slotted teams by slot, then
/// unslotted teams by first appearance in the register's matches.
fn register_teams(conn: &Connection, register_id: RegisterId) -> LedgerResult<Vec<TeamEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT team_id, slot FROM register_team_slots WHERE register_id = ?1 ORDER BY slot ASC",
    )?;
    let slots = stmt
        .query_map(params![register_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<(TeamId, i64)>, _>>()?;

    let mut entries: Vec<TeamEntry> = slots
        .iter()
        .map(|&(team_id, slot)| TeamEntry {
            team_id,
            slot,
            zone_id: None,
            matches_played: 0,
        })
        .collect();
    let mut index: HashMap<TeamId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.team_id, i))
        .collect();
    let mut next_slot = entries.iter().map(|e| e.slot).max().unwrap_or(0);

    for m in register_matches(conn, register_id)? {
        for team_id in [m.team1_id, m.team2_id] {
            let i = *index.entry(team_id).or_insert_with(|| {
                next_slot += 1;
                entries.push(TeamEntry {
                    team_id,
                    slot: next_slot,
                    zone_id: None,
                    matches_played: 0,
                });
                entries.len() - 1
            });
            let entry = &mut entries[i];
            entry.matches_played += 1;
            entry.zone_id.get_or_insert(m.zone_id);
        }
    }
    Ok(entries)
}

fn paid_in_register(
    conn: &Connection,
    register_id: RegisterId,
    team_id: TeamId,
) -> LedgerResult<HashMap<PaymentType, Decimal>> {
    let mut stmt = conn.prepare_cached(
        "SELECT payment_type, amount FROM team_payments WHERE register_id = ?1 AND team_id = ?2",
    )?;
    let rows = stmt.query_map(params![register_id, team_id], |row| {
        Ok((row.get::<_, String>(0)?, money::get(row, 1)?))
    })?;
    let mut out = HashMap::new();
    for row in rows {
        let (kind, amount) = row?;
        match PaymentType::from_str(&kind) {
            Some(t) => {
                out.insert(t, amount);
            }
            None => warn!(register_id, team_id, kind = %kind, "unknown payment type ignored"),
        }
    }
    Ok(out)
}

fn is_absent(conn: &Connection, register_id: RegisterId, team_id: TeamId) -> LedgerResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM team_absences WHERE register_id = ?1 AND team_id = ?2",
        params![register_id, team_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn deposit_debt(conn: &Connection, team_id: TeamId) -> LedgerResult<Decimal> {
    match running_account_balance(conn, team_id) {
        Ok(balance) => Ok(floor_zero(-balance)),
        Err(err) => {
            warn!(team_id, error = %err, "running account unavailable; using deposit ledger");
            Ok(floor_zero(-deposit_ledger_balance(conn, team_id)?))
        }
    }
}

/// Registration paid across every live register, global to date.
fn registration_paid(conn: &Connection, team_id: TeamId) -> LedgerResult<Decimal> {
    let payments = movements_for_team(conn, team_id, &[MovementSource::RegistrationPayment])?;
    Ok(fold_balance(&payments))
}

pub(crate) fn compute_settlements_in(
    conn: &Connection,
    register_id: RegisterId,
) -> LedgerResult<Vec<TeamSettlement>> {
    let register = load_register(conn, register_id)?;
    let mut out = Vec::new();

    for entry in register_teams(conn, register_id)? {
        let team_id = entry.team_id;
        let tournament_id = match entry.zone_id {
            Some(zone_id) => tournament_for_zone(conn, zone_id)?,
            None => None,
        }
        .or(register.tournament_id);

        let debt_registration = match tournament_id {
            Some(tid) => floor_zero(registration_fee(conn, tid)? - registration_paid(conn, team_id)?),
            None => Decimal::ZERO,
        };
        let debt_deposit = deposit_debt(conn, team_id)?;
        let rate = match (entry.zone_id, tournament_id) {
            (Some(zone_id), Some(tid)) => resolve_match_fee(conn, team_id, zone_id, tid)?,
            _ => Decimal::ZERO,
        };
        let debt_match_fee = rate * Decimal::from(entry.matches_played);
        let total_due = debt_registration + debt_deposit + debt_match_fee;

        let paid = paid_in_register(conn, register_id, team_id)?;
        let paid_of = |t: PaymentType| paid.get(&t).copied().unwrap_or(Decimal::ZERO);
        let paid_registration = paid_of(PaymentType::Registration);
        let paid_deposit = paid_of(PaymentType::Deposit);
        let paid_match_fee = paid_of(PaymentType::MatchFee);

        out.push(TeamSettlement {
            register_id,
            slot: entry.slot,
            team_id,
            absent: is_absent(conn, register_id, team_id)?,
            matches_played: entry.matches_played,
            debt_registration,
            debt_deposit,
            debt_match_fee,
            total_due,
            paid_registration,
            paid_deposit,
            paid_match_fee,
            residual_debt: total_due - (paid_registration + paid_deposit + paid_match_fee),
        });
    }
    Ok(out)
}

#[derive(Clone)]
pub struct DebtAggregator {
    store: Store,
}

impl DebtAggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn compute_team_settlements(
        &self,
        register_id: RegisterId,
    ) -> LedgerResult<Vec<TeamSettlement>> {
        self.store
            .read(|conn| compute_settlements_in(conn, register_id))
            .await
    }

    /// Set (not add) what a team paid for one stream in this register.
    pub async fn record_payment(
        &self,
        register_id: RegisterId,
        team_id: TeamId,
        payment_type: PaymentType,
        amount: Decimal,
    ) -> LedgerResult<()> {
        if team_id <= 0 {
            return Err(LedgerError::validation("team_id is required"));
        }
        if amount < Decimal::ZERO {
            return Err(LedgerError::validation("payment amount cannot be negative"));
        }
        self.store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                ensure_team_slot(tx, register_id, team_id)?;
                tx.execute(
                    "DELETE FROM team_payments WHERE register_id = ?1 AND team_id = ?2 AND payment_type = ?3",
                    params![register_id, team_id, payment_type.as_str()],
                )?;
                if amount > Decimal::ZERO {
                    tx.execute(
                        "INSERT INTO team_payments (register_id, team_id, payment_type, amount, recorded_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            register_id,
                            team_id,
                            payment_type.as_str(),
                            SqlDecimal(amount),
                            Utc::now(),
                        ],
                    )?;
                }
                totals::refresh_in(tx, register_id)?;
                Ok(())
            })
            .await?;
        info!(
            register_id,
            team_id,
            payment_type = payment_type.as_str(),
            %amount,
            "payment recorded"
        );
        Ok(())
    }

    /// Mark or unmark a team as absent. Debts are not waived.
    pub async fn toggle_absence(
        &self,
        register_id: RegisterId,
        team_id: TeamId,
        absent: bool,
    ) -> LedgerResult<()> {
        if team_id <= 0 {
            return Err(LedgerError::validation("team_id is required"));
        }
        self.store
            .with_tx(|tx| {
                load_mutable_register(tx, register_id)?;
                if absent {
                    tx.execute(
                        "INSERT OR IGNORE INTO team_absences (register_id, team_id, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![register_id, team_id, Utc::now()],
                    )?;
                } else {
                    tx.execute(
                        "DELETE FROM team_absences WHERE register_id = ?1 AND team_id = ?2",
                        params![register_id, team_id],
                    )?;
                }
                Ok(())
            })
            .await?;
        debug!(register_id, team_id, absent, "absence toggled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closing::ClosingStateMachine;
    use crate::models::Match;
    use crate::register::RegisterManager;
    use crate::registry::Registry;
    use crate::settlement::balance::BalanceAggregator;
    use crate::settlement::TotalsCalculator;
    use chrono::NaiveDateTime;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Store,
        registry: Registry,
        registers: RegisterManager,
        debts: DebtAggregator,
    }

    async fn fixture() -> Fixture {
        let store = Store::open(":memory:").unwrap();
        let registry = Registry::new(store.clone());
        registry
            .upsert_tournament(1, "Apertura", dec!(1000), dec!(50))
            .await
            .unwrap();
        registry.upsert_zone(10, 1, "Zona A").await.unwrap();
        Fixture {
            registers: RegisterManager::new(store.clone()),
            debts: DebtAggregator::new(store.clone()),
            registry,
            store,
        }
    }

    impl Fixture {
        async fn schedule(&self, id: i64, team1_id: TeamId, team2_id: TeamId, day: &str) -> RegisterId {
            let kickoff =
                NaiveDateTime::parse_from_str(&format!("{day} 10:00:00"), "%Y-%m-%d %H:%M:%S")
                    .unwrap()
                    + chrono::Duration::hours(id);
            self.registry
                .upsert_match(&Match {
                    id,
                    zone_id: 10,
                    team1_id,
                    team2_id,
                    kickoff,
                    venue_id: 3,
                    supervisor_id: 7,
                    matchday_number: 1,
                    register_id: None,
                })
                .await
                .unwrap();
            self.registers.assign_match(id).await.unwrap()
        }

        async fn settlement(&self, register_id: RegisterId, team_id: TeamId) -> TeamSettlement {
            self.debts
                .compute_team_settlements(register_id)
                .await
                .unwrap()
                .into_iter()
                .find(|s| s.team_id == team_id)
                .unwrap()
        }

        async fn payment_rows(&self, register_id: RegisterId, team_id: TeamId) -> Vec<Decimal> {
            self.store
                .read(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT amount FROM team_payments WHERE register_id = ?1 AND team_id = ?2",
                    )?;
                    let rows =
                        stmt.query_map(params![register_id, team_id], |r| money::get(r, 0))?;
                    Ok(rows.collect::<Result<Vec<_>, _>>()?)
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_matches_played_and_order() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        assert_eq!(f.schedule(2, 100, 300, "2024-05-18").await, r);

        let settlements = f.debts.compute_team_settlements(r).await.unwrap();
        let summary: Vec<_> = settlements
            .iter()
            .map(|s| (s.team_id, s.slot, s.matches_played))
            .collect();
        assert_eq!(summary, vec![(100, 1, 2), (200, 2, 1), (300, 3, 1)]);
    }

    #[tokio::test]
    async fn test_debt_components() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        f.schedule(2, 100, 300, "2024-05-18").await;

        let team_a = f.settlement(r, 100).await;
        assert_eq!(team_a.debt_registration, dec!(1000));
        // Two match fee charges leave the running account at -100
        assert_eq!(team_a.debt_deposit, dec!(100));
        assert_eq!(team_a.debt_match_fee, dec!(100));
        assert_eq!(team_a.total_due, dec!(1200));
        assert_eq!(team_a.residual_debt, dec!(1200));

        f.debts
            .record_payment(r, 100, PaymentType::Registration, dec!(400))
            .await
            .unwrap();
        let team_a = f.settlement(r, 100).await;
        assert_eq!(team_a.debt_registration, dec!(600));
        assert_eq!(team_a.debt_deposit, dec!(0));
        assert_eq!(team_a.debt_deposit.to_string(), "0");
        assert_eq!(team_a.paid_registration, dec!(400));
    }

    #[tokio::test]
    async fn test_history_from_other_registers() {
        let f = fixture().await;
        let earlier = f.schedule(1, 100, 200, "2024-05-11").await;
        f.debts
            .record_payment(earlier, 100, PaymentType::Registration, dec!(600))
            .await
            .unwrap();
        let balances = BalanceAggregator::new(f.store.clone());
        balances
            .record_deposit_charge(100, dec!(300), "guarantee")
            .await
            .unwrap();

        let today = f.schedule(2, 100, 300, "2024-05-18").await;
        assert_ne!(earlier, today);

        let team_a = f.settlement(today, 100).await;
        assert_eq!(team_a.debt_registration, dec!(400));
        // +600 registration paid, -100 match fees, -300 deposit charge
        assert_eq!(team_a.debt_deposit, dec!(0));
        assert_eq!(team_a.debt_match_fee, dec!(50));
        assert_eq!(team_a.total_due, dec!(450));

        f.debts
            .record_payment(today, 100, PaymentType::Registration, dec!(400))
            .await
            .unwrap();
        let team_a = f.settlement(today, 100).await;
        assert_eq!(team_a.debt_registration, dec!(0));
        assert_eq!(team_a.paid_registration, dec!(400));
        assert_eq!(team_a.total_due, dec!(50));
        assert_eq!(team_a.residual_debt, dec!(-350));

        // Other teams carry their own history
        assert_eq!(f.settlement(today, 300).await.debt_registration, dec!(1000));
    }

    #[tokio::test]
    async fn test_deposit_debt_follows_running_account() {
        let f = fixture().await;
        let balances = BalanceAggregator::new(f.store.clone());
        balances
            .record_deposit_charge(100, dec!(300), "guarantee")
            .await
            .unwrap();
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        assert_eq!(f.settlement(r, 100).await.debt_deposit, dec!(350));

        f.debts
            .record_payment(r, 100, PaymentType::Deposit, dec!(120))
            .await
            .unwrap();
        let team_a = f.settlement(r, 100).await;
        assert_eq!(
            team_a.debt_deposit,
            -balances.running_account_balance(100).await.unwrap()
        );
        assert_eq!(team_a.debt_deposit, dec!(230));
        assert_eq!(team_a.paid_deposit, dec!(120));
    }

    #[tokio::test]
    async fn test_deposit_debt_falls_back_to_deposit_ledger() {
        let f = fixture().await;
        let balances = BalanceAggregator::new(f.store.clone());
        balances
            .record_deposit_charge(100, dec!(300), "guarantee")
            .await
            .unwrap();
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        f.debts
            .record_payment(r, 100, PaymentType::Deposit, dec!(120))
            .await
            .unwrap();

        f.store
            .with_tx(|tx| {
                tx.execute_batch("DROP TABLE registration_charges")?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(balances.running_account_balance(100).await.is_err());

        // Deposit charges minus deposit payments; the match fee charge is not part of it
        let team_a = f.settlement(r, 100).await;
        assert_eq!(team_a.debt_deposit, dec!(180));
        assert_eq!(team_a.debt_match_fee, dec!(50));
        assert_eq!(f.settlement(r, 200).await.debt_deposit, dec!(0));
    }

    #[tokio::test]
    async fn test_posted_register_refuses_payments_and_absence() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        f.debts
            .record_payment(r, 100, PaymentType::MatchFee, dec!(50))
            .await
            .unwrap();
        let closing = ClosingStateMachine::new(f.store.clone(), false);
        let posted = closing.post(r, 1).await.unwrap();

        assert!(matches!(
            f.debts
                .record_payment(r, 100, PaymentType::Deposit, dec!(75))
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            f.debts.toggle_absence(r, 200, true).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(f.payment_rows(r, 100).await, vec![dec!(50)]);
        let totals = TotalsCalculator::new(f.store.clone())
            .compute_totals(r)
            .await
            .unwrap();
        assert_eq!(totals.total_caja, posted.total_caja);

        closing.reopen(r).await.unwrap();
        f.debts
            .record_payment(r, 100, PaymentType::Deposit, dec!(75))
            .await
            .unwrap();
        f.debts.toggle_absence(r, 200, true).await.unwrap();
        assert_eq!(f.settlement(r, 100).await.paid_deposit, dec!(75));
    }

    #[tokio::test]
    async fn test_record_payment_replaces() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;

        f.debts
            .record_payment(r, 100, PaymentType::MatchFee, dec!(100))
            .await
            .unwrap();
        f.debts
            .record_payment(r, 100, PaymentType::MatchFee, dec!(40))
            .await
            .unwrap();
        assert_eq!(f.payment_rows(r, 100).await, vec![dec!(40)]);

        f.debts
            .record_payment(r, 100, PaymentType::MatchFee, dec!(0))
            .await
            .unwrap();
        assert!(f.payment_rows(r, 100).await.is_empty());

        assert!(matches!(
            f.debts
                .record_payment(r, 100, PaymentType::Deposit, dec!(-1))
                .await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            f.debts
                .record_payment(999, 100, PaymentType::Deposit, dec!(1))
                .await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_payment_from_non_playing_team_gets_a_slot() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        f.debts
            .record_payment(r, 400, PaymentType::Deposit, dec!(75))
            .await
            .unwrap();

        let settlements = f.debts.compute_team_settlements(r).await.unwrap();
        let last = settlements.last().unwrap();
        assert_eq!((last.team_id, last.slot, last.matches_played), (400, 3, 0));
        assert_eq!(last.paid_deposit, dec!(75));
    }

    #[tokio::test]
    async fn test_absence_does_not_waive_debt() {
        let f = fixture().await;
        let r = f.schedule(1, 100, 200, "2024-05-18").await;
        let before = f.debts.compute_team_settlements(r).await.unwrap();

        f.debts.toggle_absence(r, 200, true).await.unwrap();
        f.debts.toggle_absence(r, 200, true).await.unwrap();
        let after = f.debts.compute_team_settlements(r).await.unwrap();
        let team_b = after.iter().find(|s| s.team_id == 200).unwrap();
        assert!(team_b.absent);
        let team_b_before = before.iter().find(|s| s.team_id == 200).unwrap();
        assert_eq!(team_b.total_due, team_b_before.total_due);
        assert_eq!(team_b.residual_debt, team_b_before.residual_debt);

        f.debts.toggle_absence(r, 200, false).await.unwrap();
        let cleared = f.debts.compute_team_settlements(r).await.unwrap();
        assert!(!cleared.iter().any(|s| s.absent));
    }
}
