//! Register lifecycle: find-or-create by logical key, team slots, match-day fee charges
//! and match (re)assignment.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Match, MatchId, Register, RegisterId, RegisterKey, RegisterState, TeamId};
use crate::money::{self, SqlDecimal};
use crate::registry::{load_match, resolve_match_fee, row_to_match, tournament_for_zone};
use crate::settlement::totals;
use crate::store::Store;

const REGISTER_COLUMNS: &str = "id, supervisor_id, register_date, venue_id, sub_venue_id, tournament_id, shift_id, \
     closed_at, closed_by, posted_at, posted_by, declared_cash, computed_cash";

fn row_to_register(row: &rusqlite::Row<'_>) -> rusqlite::Result<Register> {
    Ok(Register {
        id: row.get(0)?,
        supervisor_id: row.get(1)?,
        date: row.get(2)?,
        venue_id: row.get(3)?,
        sub_venue_id: row.get(4)?,
        tournament_id: row.get(5)?,
        shift_id: row.get(6)?,
        closed_at: row.get(7)?,
        closed_by: row.get(8)?,
        posted_at: row.get(9)?,
        posted_by: row.get(10)?,
        declared_cash: money::get_opt(row, 11)?,
        computed_cash: money::get_opt(row, 12)?,
    })
}

/// Live (non-voided) register by id.
pub(crate) fn load_register(conn: &Connection, register_id: RegisterId) -> LedgerResult<Register> {
    conn.query_row(
        &format!("SELECT {REGISTER_COLUMNS} FROM registers WHERE id = ?1 AND voided = 0"),
        params![register_id],
        row_to_register,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("register", register_id))
}

/// Live register that still accepts structural changes. Posted registers stay frozen until reopened.
pub(crate) fn load_mutable_register(
    conn: &Connection,
    register_id: RegisterId,
) -> LedgerResult<Register> {
    let register = load_register(conn, register_id)?;
    if register.state() == RegisterState::Contabilizada {
        return Err(LedgerError::validation(format!(
            "register {register_id} is posted; reopen it first"
        )));
    }
    Ok(register)
}

pub(crate) fn find_by_key(conn: &Connection, key: &RegisterKey) -> LedgerResult<Option<Register>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {REGISTER_COLUMNS} FROM registers
                 WHERE supervisor_id = ?1 AND register_date = ?2 AND venue_id = ?3 AND voided = 0"
            ),
            params![key.supervisor_id, key.date, key.venue_id],
            row_to_register,
        )
        .optional()?)
}

/// Add a placeholder slot for `team_id` unless it already has one. Returns whether a slot was added.
pub(crate) fn ensure_team_slot(
    conn: &Connection,
    register_id: RegisterId,
    team_id: TeamId,
) -> LedgerResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO register_team_slots (register_id, team_id, slot)
         SELECT ?1, ?2, COALESCE(MAX(slot), 0) + 1 FROM register_team_slots WHERE register_id = ?1",
        params![register_id, team_id],
    )?;
    Ok(inserted > 0)
}

fn find_or_create_in(
    conn: &Connection,
    key: &RegisterKey,
    teams: &[Option<TeamId>],
) -> LedgerResult<RegisterId> {
    let register_id = match find_by_key(conn, key)? {
        Some(existing) => existing.id,
        None => {
            let inserted = conn.execute(
                "INSERT INTO registers (supervisor_id, register_date, venue_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT DO NOTHING",
                params![key.supervisor_id, key.date, key.venue_id, Utc::now()],
            )?;
            if inserted == 1 {
                let id = conn.last_insert_rowid();
                info!(
                    register_id = id,
                    supervisor_id = key.supervisor_id,
                    venue_id = key.venue_id,
                    date = %key.date,
                    "register created"
                );
                id
            } else {
                // Another writer created the same key first; use its row.
                let winner = find_by_key(conn, key)?.ok_or_else(|| {
                    LedgerError::Conflict(format!(
                        "register key ({}, {}, {}) conflicted but no live row exists",
                        key.supervisor_id, key.date, key.venue_id
                    ))
                })?;
                debug!(register_id = winner.id, "register key conflict resolved by re-fetch");
                winner.id
            }
        }
    };

    for team_id in teams.iter().flatten().copied().filter(|t| *t > 0) {
        if ensure_team_slot(conn, register_id, team_id)? {
            debug!(register_id, team_id, "team slot added");
        }
    }

    Ok(register_id)
}

/// Upsert the match-day fee charges of one match. Returns how many charges were written.
pub(crate) fn attach_match_fee_charge_in(
    conn: &Connection,
    match_id: MatchId,
    register_id: RegisterId,
    team1_id: TeamId,
    team2_id: TeamId,
    zone_id: i64,
    matchday_number: i64,
) -> LedgerResult<usize> {
    load_mutable_register(conn, register_id)?;

    let Some(tournament_id) = tournament_for_zone(conn, zone_id)? else {
        warn!(match_id, zone_id, "zone has no tournament; match fee charges skipped");
        return Ok(0);
    };

    let mut written = 0usize;
    for team_id in [team1_id, team2_id] {
        if team_id <= 0 {
            continue;
        }
        let rate = resolve_match_fee(conn, team_id, zone_id, tournament_id)?;
        if rate <= Decimal::ZERO {
            // A rate that dropped to zero must not leave a stale charge behind.
            let removed = conn.execute(
                "DELETE FROM match_fee_charges WHERE match_id = ?1 AND team_id = ?2",
                params![match_id, team_id],
            )?;
            debug!(match_id, team_id, removed, "zero match fee; no charge");
            continue;
        }
        conn.execute(
            "INSERT INTO match_fee_charges
                (match_id, team_id, register_id, amount, tournament_id, matchday_number, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(match_id, team_id) DO UPDATE SET
                register_id = excluded.register_id,
                amount = excluded.amount,
                tournament_id = excluded.tournament_id,
                matchday_number = excluded.matchday_number,
                updated_at = excluded.updated_at",
            params![
                match_id,
                team_id,
                register_id,
                SqlDecimal(rate),
                tournament_id,
                matchday_number,
                Utc::now(),
            ],
        )?;
        written += 1;
    }
    Ok(written)
}

/// The key a match's register should have after applying the proposed edits.
fn proposed_key(
    m: &Match,
    current: Option<RegisterKey>,
    supervisor_id: Option<i64>,
    date: Option<&str>,
    venue_id: Option<i64>,
) -> LedgerResult<(RegisterKey, Option<NaiveDate>)> {
    let base = current.unwrap_or(RegisterKey {
        supervisor_id: m.supervisor_id,
        date: m.kickoff.date(),
        venue_id: m.venue_id,
    });
    let new_date = date
        .filter(|d| !d.trim().is_empty())
        .map(crate::models::normalize_date)
        .transpose()?;
    Ok((
        RegisterKey {
            supervisor_id: supervisor_id.filter(|s| *s > 0).unwrap_or(base.supervisor_id),
            date: new_date.unwrap_or(base.date),
            venue_id: venue_id.filter(|v| *v > 0).unwrap_or(base.venue_id),
        },
        new_date,
    ))
}

fn detect_in(
    conn: &Connection,
    match_id: MatchId,
    supervisor_id: Option<i64>,
    date: Option<&str>,
    venue_id: Option<i64>,
) -> LedgerResult<bool> {
    let m = load_match(conn, match_id)?;
    let current = match m.register_id {
        Some(id) => match load_register(conn, id) {
            Ok(register) => Some(register.key()),
            Err(LedgerError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };
    let Some(current) = current else {
        // Unassigned matches always need a register resolved.
        return Ok(true);
    };
    let (proposed, _) = proposed_key(&m, Some(current), supervisor_id, date, venue_id)?;
    Ok(proposed != current)
}

fn assign_in(conn: &Connection, match_id: MatchId) -> LedgerResult<RegisterId> {
    let m = load_match(conn, match_id)?;
    let key = RegisterKey::parse(
        m.supervisor_id,
        &m.kickoff.date().to_string(),
        m.venue_id,
    )?;
    let register_id = find_or_create_in(conn, &key, &[Some(m.team1_id), Some(m.team2_id)])?;

    conn.execute(
        "UPDATE matches SET register_id = ?2 WHERE id = ?1",
        params![match_id, register_id],
    )?;
    if let Some(tournament_id) = tournament_for_zone(conn, m.zone_id)? {
        conn.execute(
            "UPDATE registers SET tournament_id = COALESCE(tournament_id, ?2) WHERE id = ?1",
            params![register_id, tournament_id],
        )?;
    }
    attach_match_fee_charge_in(
        conn,
        match_id,
        register_id,
        m.team1_id,
        m.team2_id,
        m.zone_id,
        m.matchday_number,
    )?;
    totals::refresh_in(conn, register_id)?;
    Ok(register_id)
}

/// Drop slots of teams that no longer play and never paid in the register.
fn prune_idle_slots(conn: &Connection, register_id: RegisterId) -> LedgerResult<usize> {
    let pruned = conn.execute(
        "DELETE FROM register_team_slots
         WHERE register_id = ?1
           AND team_id NOT IN (
               SELECT team1_id FROM matches WHERE register_id = ?1
               UNION SELECT team2_id FROM matches WHERE register_id = ?1)
           AND team_id NOT IN (SELECT team_id FROM team_payments WHERE register_id = ?1)",
        params![register_id],
    )?;
    Ok(pruned)
}

pub(crate) fn register_matches(conn: &Connection, register_id: RegisterId) -> LedgerResult<Vec<Match>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, zone_id, team1_id, team2_id, kickoff, venue_id, supervisor_id, matchday_number, register_id
         FROM matches WHERE register_id = ?1 ORDER BY kickoff ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![register_id], row_to_match)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[derive(Clone)]
pub struct RegisterManager {
    store: Store,
}

impl RegisterManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve the register for (supervisor, day, venue), creating it on first use,
    /// and make sure both teams hold a slot in it.
    pub async fn find_or_create_register(
        &self,
        supervisor_id: i64,
        date: &str,
        venue_id: i64,
        team1_id: Option<TeamId>,
        team2_id: Option<TeamId>,
    ) -> LedgerResult<RegisterId> {
        let key = RegisterKey::parse(supervisor_id, date, venue_id)?;
        self.store
            .with_tx(|tx| find_or_create_in(tx, &key, &[team1_id, team2_id]))
            .await
    }

    pub async fn attach_match_fee_charge(
        &self,
        match_id: MatchId,
        register_id: RegisterId,
        team1_id: TeamId,
        team2_id: TeamId,
        zone_id: i64,
        matchday_number: i64,
    ) -> LedgerResult<usize> {
        let written = self
            .store
            .with_tx(|tx| {
                let written = attach_match_fee_charge_in(
                    tx,
                    match_id,
                    register_id,
                    team1_id,
                    team2_id,
                    zone_id,
                    matchday_number,
                )?;
                totals::refresh_in(tx, register_id)?;
                Ok(written)
            })
            .await?;
        debug!(match_id, register_id, written, "match fee charges attached");
        Ok(written)
    }

    /// Whether the proposed edits move the match to a different register.
    pub async fn detect_register_key_change(
        &self,
        match_id: MatchId,
        supervisor_id: Option<i64>,
        date: Option<&str>,
        venue_id: Option<i64>,
    ) -> LedgerResult<bool> {
        self.store
            .read(|conn| detect_in(conn, match_id, supervisor_id, date, venue_id))
            .await
    }

    /// Link a freshly scheduled match to its register and charge both teams.
    pub async fn assign_match(&self, match_id: MatchId) -> LedgerResult<RegisterId> {
        let register_id = self.store.with_tx(|tx| assign_in(tx, match_id)).await?;
        info!(match_id, register_id, "match assigned to register");
        Ok(register_id)
    }

    /// Apply key edits to a match and move it to the matching register when the key changed.
    pub async fn reassign_match(
        &self,
        match_id: MatchId,
        supervisor_id: Option<i64>,
        date: Option<&str>,
        venue_id: Option<i64>,
    ) -> LedgerResult<RegisterId> {
        let (register_id, moved_from) = self
            .store
            .with_tx(|tx| {
                let m = load_match(tx, match_id)?;
                if !detect_in(tx, match_id, supervisor_id, date, venue_id)? {
                    if let Some(current) = m.register_id {
                        return Ok((current, None));
                    }
                }

                let (key, new_date) = proposed_key(&m, None, supervisor_id, date, venue_id)?;
                let kickoff = new_date
                    .map(|d| NaiveDateTime::new(d, m.kickoff.time()))
                    .unwrap_or(m.kickoff);
                tx.execute(
                    "UPDATE matches SET supervisor_id = ?2, venue_id = ?3, kickoff = ?4, register_id = NULL
                     WHERE id = ?1",
                    params![match_id, key.supervisor_id, key.venue_id, kickoff],
                )?;
                tx.execute(
                    "DELETE FROM match_fee_charges WHERE match_id = ?1",
                    params![match_id],
                )?;

                let register_id = assign_in(tx, match_id)?;
                let moved_from = m.register_id.filter(|old| *old != register_id);
                if let Some(old) = moved_from {
                    match load_mutable_register(tx, old) {
                        Ok(_) => {
                            let pruned = prune_idle_slots(tx, old)?;
                            debug!(register_id = old, pruned, "idle slots pruned");
                            totals::refresh_in(tx, old)?;
                        }
                        Err(LedgerError::NotFound { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok((register_id, moved_from))
            })
            .await?;
        if let Some(old) = moved_from {
            info!(match_id, from = old, to = register_id, "match moved between registers");
        }
        Ok(register_id)
    }

    pub async fn get_register(&self, register_id: RegisterId) -> LedgerResult<Register> {
        self.store
            .read(|conn| load_register(conn, register_id))
            .await
    }

    pub async fn find_register(
        &self,
        supervisor_id: i64,
        date: &str,
        venue_id: i64,
    ) -> LedgerResult<Option<Register>> {
        let key = RegisterKey::parse(supervisor_id, date, venue_id)?;
        self.store.read(|conn| find_by_key(conn, &key)).await
    }

    pub async fn list_registers(&self, date: NaiveDate) -> LedgerResult<Vec<Register>> {
        self.store
            .read(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {REGISTER_COLUMNS} FROM registers
                     WHERE register_date = ?1 AND voided = 0 ORDER BY id ASC"
                ))?;
                let rows = stmt.query_map(params![date], row_to_register)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
    }

    pub async fn list_register_matches(&self, register_id: RegisterId) -> LedgerResult<Vec<Match>> {
        self.store
            .read(|conn| {
                load_register(conn, register_id)?;
                register_matches(conn, register_id)
            })
            .await
    }

    pub async fn set_sub_venue(
        &self,
        register_id: RegisterId,
        sub_venue_id: Option<i64>,
    ) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                load_register(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET sub_venue_id = ?2 WHERE id = ?1",
                    params![register_id, sub_venue_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Void a register: it disappears from every read, frees its key and
    /// releases its matches for reassignment.
    pub async fn void_register(&self, register_id: RegisterId) -> LedgerResult<()> {
        let released = self
            .store
            .with_tx(|tx| {
                load_register(tx, register_id)?;
                tx.execute(
                    "UPDATE registers SET voided = 1 WHERE id = ?1",
                    params![register_id],
                )?;
                let released = tx.execute(
                    "UPDATE matches SET register_id = NULL WHERE register_id = ?1",
                    params![register_id],
                )?;
                Ok(released)
            })
            .await?;
        warn!(register_id, released, "register voided");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closing::ClosingStateMachine;
    use crate::registry::Registry;
    use rust_decimal_macros::dec;

    fn kickoff(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn test_match(id: MatchId, team1_id: TeamId, team2_id: TeamId, at: &str) -> Match {
        Match {
            id,
            zone_id: 10,
            team1_id,
            team2_id,
            kickoff: kickoff(at),
            venue_id: 3,
            supervisor_id: 7,
            matchday_number: 1,
            register_id: None,
        }
    }

    async fn setup() -> (Store, Registry, RegisterManager) {
        let store = Store::open(":memory:").unwrap();
        let registry = Registry::new(store.clone());
        registry
            .upsert_tournament(1, "Apertura", dec!(1000), dec!(50))
            .await
            .unwrap();
        registry.upsert_zone(10, 1, "Zona A").await.unwrap();
        let manager = RegisterManager::new(store.clone());
        (store, registry, manager)
    }

    async fn slot_rows(store: &Store, register_id: RegisterId) -> Vec<(TeamId, i64)> {
        store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT team_id, slot FROM register_team_slots WHERE register_id = ?1 ORDER BY slot",
                )?;
                let rows = stmt.query_map(params![register_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .unwrap()
    }

    async fn charges(store: &Store, match_id: MatchId) -> Vec<(TeamId, Decimal)> {
        store
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT team_id, amount FROM match_fee_charges WHERE match_id = ?1 ORDER BY team_id",
                )?;
                let rows =
                    stmt.query_map(params![match_id], |r| Ok((r.get(0)?, money::get(r, 1)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (store, _registry, manager) = setup().await;

        let first = manager
            .find_or_create_register(7, "2024-05-18T10:00:00", 3, Some(100), Some(200))
            .await
            .unwrap();
        let second = manager
            .find_or_create_register(7, "2024-05-18 21:45", 3, Some(100), Some(200))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(slot_rows(&store, first).await, vec![(100, 1), (200, 2)]);

        let third = manager
            .find_or_create_register(7, "2024-05-18", 3, Some(300), None)
            .await
            .unwrap();
        assert_eq!(third, first);
        assert_eq!(
            slot_rows(&store, first).await,
            vec![(100, 1), (200, 2), (300, 3)]
        );

        let other_day = manager
            .find_or_create_register(7, "2024-05-19", 3, None, None)
            .await
            .unwrap();
        assert_ne!(other_day, first);
    }

    #[tokio::test]
    async fn test_find_or_create_validates_key() {
        let (_store, _registry, manager) = setup().await;
        for (sup, date, venue) in [(0, "2024-05-18", 3), (7, "", 3), (7, "2024-05-18", 0)] {
            let result = manager
                .find_or_create_register(sup, date, venue, None, None)
                .await;
            assert!(matches!(result, Err(LedgerError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_attach_match_fee_charge_upserts() {
        let (store, registry, manager) = setup().await;
        let register_id = manager
            .find_or_create_register(7, "2024-05-18", 3, Some(100), Some(200))
            .await
            .unwrap();

        manager
            .attach_match_fee_charge(1, register_id, 100, 200, 10, 4)
            .await
            .unwrap();
        manager
            .attach_match_fee_charge(1, register_id, 100, 200, 10, 4)
            .await
            .unwrap();
        assert_eq!(
            charges(&store, 1).await,
            vec![(100, dec!(50)), (200, dec!(50))]
        );

        registry
            .set_team_zone_fee(100, 10, Some(dec!(80)))
            .await
            .unwrap();
        registry
            .set_team_zone_fee(200, 10, Some(dec!(0)))
            .await
            .unwrap();
        manager
            .attach_match_fee_charge(1, register_id, 100, 200, 10, 4)
            .await
            .unwrap();
        assert_eq!(charges(&store, 1).await, vec![(100, dec!(80))]);
    }

    #[tokio::test]
    async fn test_attach_with_unknown_zone_is_a_noop() {
        let (store, _registry, manager) = setup().await;
        let register_id = manager
            .find_or_create_register(7, "2024-05-18", 3, None, None)
            .await
            .unwrap();
        let written = manager
            .attach_match_fee_charge(1, register_id, 100, 200, 999, 4)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(charges(&store, 1).await.is_empty());

        assert!(matches!(
            manager.attach_match_fee_charge(1, 4242, 100, 200, 10, 4).await,
            Err(LedgerError::NotFound { entity: "register", .. })
        ));
    }

    #[tokio::test]
    async fn test_assign_and_detect_key_change() {
        let (_store, registry, manager) = setup().await;
        registry
            .upsert_match(&test_match(1, 100, 200, "2024-05-18 10:00:00"))
            .await
            .unwrap();
        registry
            .upsert_match(&test_match(2, 100, 300, "2024-05-18 18:00:00"))
            .await
            .unwrap();

        assert!(manager
            .detect_register_key_change(1, None, None, None)
            .await
            .unwrap());

        let r1 = manager.assign_match(1).await.unwrap();
        let r2 = manager.assign_match(2).await.unwrap();
        assert_eq!(r1, r2);
        assert_eq!(manager.list_register_matches(r1).await.unwrap().len(), 2);
        assert_eq!(manager.get_register(r1).await.unwrap().tournament_id, Some(1));

        assert!(!manager
            .detect_register_key_change(1, Some(7), Some("2024-05-18T23:59:00"), Some(3))
            .await
            .unwrap());
        assert!(manager
            .detect_register_key_change(1, None, Some("2024-05-19"), None)
            .await
            .unwrap());
        assert!(manager
            .detect_register_key_change(1, Some(8), None, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reassign_moves_match_and_charges() {
        let (store, registry, manager) = setup().await;
        registry
            .upsert_match(&test_match(1, 100, 200, "2024-05-18 10:00:00"))
            .await
            .unwrap();
        let original = manager.assign_match(1).await.unwrap();

        let same = manager
            .reassign_match(1, Some(7), Some("2024-05-18"), None)
            .await
            .unwrap();
        assert_eq!(same, original);

        let moved = manager
            .reassign_match(1, None, Some("2024-05-19"), None)
            .await
            .unwrap();
        assert_ne!(moved, original);

        let m = registry.get_match(1).await.unwrap();
        assert_eq!(m.register_id, Some(moved));
        assert_eq!(m.kickoff, kickoff("2024-05-19 10:00:00"));
        assert!(slot_rows(&store, original).await.is_empty());
        assert_eq!(slot_rows(&store, moved).await, vec![(100, 1), (200, 2)]);

        let register_of_charges: Vec<RegisterId> = store
            .read(|conn| {
                let mut stmt =
                    conn.prepare("SELECT register_id FROM match_fee_charges WHERE match_id = 1")?;
                let rows = stmt.query_map([], |r| r.get(0))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .unwrap();
        assert_eq!(register_of_charges, vec![moved, moved]);
    }

    #[tokio::test]
    async fn test_void_frees_the_key() {
        let (_store, registry, manager) = setup().await;
        registry
            .upsert_match(&test_match(1, 100, 200, "2024-05-18 10:00:00"))
            .await
            .unwrap();
        let first = manager.assign_match(1).await.unwrap();
        manager.void_register(first).await.unwrap();

        assert!(matches!(
            manager.get_register(first).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert_eq!(registry.get_match(1).await.unwrap().register_id, None);

        let second = manager.assign_match(1).await.unwrap();
        assert_ne!(first, second);
        let date = NaiveDate::from_ymd_opt(2024, 5, 18).unwrap();
        let live = manager.list_registers(date).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, second);
    }

    #[tokio::test]
    async fn test_posted_register_refuses_match_changes() {
        let (store, registry, manager) = setup().await;
        registry
            .upsert_match(&test_match(1, 100, 200, "2024-05-18 10:00:00"))
            .await
            .unwrap();
        let posted = manager.assign_match(1).await.unwrap();
        let closing = ClosingStateMachine::new(store.clone(), false);
        closing.post(posted, 1).await.unwrap();

        registry
            .upsert_match(&test_match(2, 100, 300, "2024-05-18 12:00:00"))
            .await
            .unwrap();
        assert!(matches!(
            manager.assign_match(2).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            manager.reassign_match(1, None, Some("2024-05-19"), None).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(registry.get_match(1).await.unwrap().register_id, Some(posted));
        assert_eq!(registry.get_match(2).await.unwrap().register_id, None);
        assert_eq!(slot_rows(&store, posted).await, vec![(100, 1), (200, 2)]);

        closing.reopen(posted).await.unwrap();
        assert_eq!(manager.assign_match(2).await.unwrap(), posted);
    }
}
