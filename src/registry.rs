//! Upstream registries mirrored in the ledger store.
//!
//! Tournaments, zones, fee overrides, matches and provider invoices are owned by
//! other services; this module writes the rows they publish and exposes the
//! lookups the ledger engines need (fee resolution, match reads, invoice reads).

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{AffectationStatus, Invoice, InvoiceDirection, Match, MatchId, TeamId};
use crate::money::{self, SqlDecimal};
use crate::store::Store;

/// Invoice as published by the provider invoice registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub id: i64,
    pub origin_date: NaiveDate,
    pub provider_id: i64,
    pub direction: InvoiceDirection,
    pub voucher_type: String,
    pub voucher_number: String,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub taxes: Decimal,
}

#[derive(Clone)]
pub struct Registry {
    store: Store,
}

impl Registry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn upsert_tournament(
        &self,
        id: i64,
        name: &str,
        registration_fee: Decimal,
        match_fee: Decimal,
    ) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO tournaments (id, name, registration_fee, match_fee)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        registration_fee = excluded.registration_fee,
                        match_fee = excluded.match_fee",
                    params![id, name, SqlDecimal(registration_fee), SqlDecimal(match_fee)],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn upsert_zone(&self, id: i64, tournament_id: i64, name: &str) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO zones (id, tournament_id, name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                        tournament_id = excluded.tournament_id,
                        name = excluded.name",
                    params![id, tournament_id, name],
                )?;
                Ok(())
            })
            .await
    }

    /// Per-team match-day fee override within a zone. `None` removes the override.
    pub async fn set_team_zone_fee(
        &self,
        team_id: TeamId,
        zone_id: i64,
        match_fee: Option<Decimal>,
    ) -> LedgerResult<()> {
        self.store
            .with_tx(|tx| {
                match match_fee {
                    Some(fee) => tx.execute(
                        "INSERT INTO team_zone_fees (team_id, zone_id, match_fee) VALUES (?1, ?2, ?3)
                         ON CONFLICT(team_id, zone_id) DO UPDATE SET match_fee = excluded.match_fee",
                        params![team_id, zone_id, SqlDecimal(fee)],
                    )?,
                    None => tx.execute(
                        "DELETE FROM team_zone_fees WHERE team_id = ?1 AND zone_id = ?2",
                        params![team_id, zone_id],
                    )?,
                };
                Ok(())
            })
            .await
    }

    /// Publish a match. An existing register link is preserved.
    pub async fn upsert_match(&self, m: &Match) -> LedgerResult<()> {
        if m.team1_id == m.team2_id {
            return Err(LedgerError::validation("a match needs two distinct teams"));
        }
        self.store
            .with_tx(|tx| {
                tx.execute(
                    "INSERT INTO matches
                        (id, zone_id, team1_id, team2_id, kickoff, venue_id, supervisor_id, matchday_number)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET
                        zone_id = excluded.zone_id,
                        team1_id = excluded.team1_id,
                        team2_id = excluded.team2_id,
                        kickoff = excluded.kickoff,
                        venue_id = excluded.venue_id,
                        supervisor_id = excluded.supervisor_id,
                        matchday_number = excluded.matchday_number",
                    params![
                        m.id,
                        m.zone_id,
                        m.team1_id,
                        m.team2_id,
                        m.kickoff,
                        m.venue_id,
                        m.supervisor_id,
                        m.matchday_number,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_match(&self, match_id: MatchId) -> LedgerResult<Match> {
        self.store.read(|conn| load_match(conn, match_id)).await
    }

    /// Publish an invoice. New invoices start fully pending; re-publishing an
    /// existing one leaves its affectation state alone.
    pub async fn upsert_invoice(&self, rec: &InvoiceRecord) -> LedgerResult<()> {
        let total = rec.subtotal + rec.taxes;
        if total <= Decimal::ZERO {
            return Err(LedgerError::validation("invoice total must be positive"));
        }
        self.store
            .with_tx(|tx| {
                let existing: Option<SqlDecimal> = tx
                    .query_row(
                        "SELECT pending_to_affect FROM invoices WHERE id = ?1",
                        params![rec.id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_some() {
                    tx.execute(
                        "UPDATE invoices SET origin_date = ?2, voucher_type = ?3, voucher_number = ?4, due_date = ?5
                         WHERE id = ?1",
                        params![
                            rec.id,
                            rec.origin_date,
                            &rec.voucher_type,
                            &rec.voucher_number,
                            rec.due_date,
                        ],
                    )?;
                    return Ok(());
                }
                tx.execute(
                    "INSERT INTO invoices
                        (id, origin_date, provider_id, direction, voucher_type, voucher_number, due_date,
                         subtotal, taxes, total, pending_to_affect, affectation_status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11)",
                    params![
                        rec.id,
                        rec.origin_date,
                        rec.provider_id,
                        rec.direction.as_str(),
                        &rec.voucher_type,
                        &rec.voucher_number,
                        rec.due_date,
                        SqlDecimal(rec.subtotal),
                        SqlDecimal(rec.taxes),
                        SqlDecimal(total),
                        AffectationStatus::Pending.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_invoice(&self, invoice_id: i64) -> LedgerResult<Invoice> {
        self.store.read(|conn| load_invoice(conn, invoice_id)).await
    }
}

pub(crate) fn load_match(conn: &Connection, match_id: MatchId) -> LedgerResult<Match> {
    conn.query_row(
        "SELECT id, zone_id, team1_id, team2_id, kickoff, venue_id, supervisor_id, matchday_number, register_id
         FROM matches WHERE id = ?1",
        params![match_id],
        row_to_match,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("match", match_id))
}

pub(crate) fn row_to_match(row: &rusqlite::Row<'_>) -> rusqlite::Result<Match> {
    Ok(Match {
        id: row.get(0)?,
        zone_id: row.get(1)?,
        team1_id: row.get(2)?,
        team2_id: row.get(3)?,
        kickoff: row.get(4)?,
        venue_id: row.get(5)?,
        supervisor_id: row.get(6)?,
        matchday_number: row.get(7)?,
        register_id: row.get(8)?,
    })
}

pub(crate) const INVOICE_COLUMNS: &str = "id, origin_date, provider_id, direction, voucher_type, voucher_number, \
     due_date, subtotal, taxes, total, pending_to_affect, affectation_status";

pub(crate) fn load_invoice(conn: &Connection, invoice_id: i64) -> LedgerResult<Invoice> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"),
        params![invoice_id],
        row_to_invoice,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("invoice", invoice_id))
}

pub(crate) fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    let direction: String = row.get(3)?;
    let status: String = row.get(11)?;
    Ok(Invoice {
        id: row.get(0)?,
        origin_date: row.get(1)?,
        provider_id: row.get(2)?,
        direction: InvoiceDirection::from_str(&direction).unwrap_or(InvoiceDirection::Debit),
        voucher_type: row.get(4)?,
        voucher_number: row.get(5)?,
        due_date: row.get(6)?,
        subtotal: money::get(row, 7)?,
        taxes: money::get(row, 8)?,
        total: money::get(row, 9)?,
        pending_to_affect: money::get(row, 10)?,
        affectation_status: AffectationStatus::from_str(&status)
            .unwrap_or(AffectationStatus::Pending),
    })
}

pub(crate) fn tournament_for_zone(conn: &Connection, zone_id: i64) -> LedgerResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT tournament_id FROM zones WHERE id = ?1",
            params![zone_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn registration_fee(conn: &Connection, tournament_id: i64) -> LedgerResult<Decimal> {
    let fee = conn
        .query_row(
            "SELECT registration_fee FROM tournaments WHERE id = ?1",
            params![tournament_id],
            |row| money::get(row, 0),
        )
        .optional()?;
    Ok(fee.unwrap_or(Decimal::ZERO))
}

/// Match-day fee for a team in a zone: team+zone override, then the
/// tournament default, then zero.
pub(crate) fn resolve_match_fee(
    conn: &Connection,
    team_id: TeamId,
    zone_id: i64,
    tournament_id: i64,
) -> LedgerResult<Decimal> {
    let override_fee = conn
        .query_row(
            "SELECT match_fee FROM team_zone_fees WHERE team_id = ?1 AND zone_id = ?2",
            params![team_id, zone_id],
            |row| money::get(row, 0),
        )
        .optional()?;
    if let Some(fee) = override_fee {
        debug!(team_id, zone_id, %fee, "match fee from team override");
        return Ok(fee);
    }

    let default_fee = conn
        .query_row(
            "SELECT match_fee FROM tournaments WHERE id = ?1",
            params![tournament_id],
            |row| money::get(row, 0),
        )
        .optional()?;
    Ok(default_fee.unwrap_or(Decimal::ZERO))
}
