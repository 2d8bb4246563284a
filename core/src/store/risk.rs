//! Risk record queries.

use super::{parse_text_col, OpsStore};
use crate::clock::ts;
use crate::error::OpsResult;
use crate::risk_engine::{RiskBand, RiskFeatures, RiskOverride, RiskRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

const RISK_COLS: &str = "customer_phone, score, band, non_pickup_rate, cancel_rate, \
     complaint_count, chargeback_count, computed_at, \
     override_score, override_until, override_by, override_at";

fn map_risk(r: &rusqlite::Row<'_>) -> rusqlite::Result<RiskRecord> {
    let override_score: Option<i64> = r.get(8)?;
    let r#override = match override_score {
        Some(score) => Some(RiskOverride {
            score,
            until: r.get(9)?,
            set_by: r.get(10)?,
            set_at: r.get(11)?,
        }),
        None => None,
    };
    Ok(RiskRecord {
        customer_phone: r.get(0)?,
        score: r.get(1)?,
        band: parse_text_col(2, r.get::<_, String>(2)?)?,
        features: RiskFeatures {
            non_pickup_rate: r.get(3)?,
            cancel_rate: r.get(4)?,
            complaint_count: r.get(5)?,
            chargeback_count: r.get(6)?,
        },
        computed_at: r.get(7)?,
        r#override,
    })
}

impl OpsStore {
    /// Write the computed score and its feature snapshot. An existing
    /// override survives recalculation untouched.
    pub fn upsert_risk_record(
        &self,
        phone: &str,
        score: i64,
        band: RiskBand,
        features: &RiskFeatures,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.conn.execute(
            "INSERT INTO risk_record (customer_phone, score, band, non_pickup_rate,
                cancel_rate, complaint_count, chargeback_count, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(customer_phone) DO UPDATE SET
                score=?2, band=?3, non_pickup_rate=?4, cancel_rate=?5,
                complaint_count=?6, chargeback_count=?7, computed_at=?8",
            params![
                phone,
                score,
                band.as_str(),
                features.non_pickup_rate,
                features.cancel_rate,
                features.complaint_count,
                features.chargeback_count,
                ts(now),
            ],
        )?;
        Ok(())
    }

    pub fn get_risk_record(&self, phone: &str) -> OpsResult<Option<RiskRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RISK_COLS} FROM risk_record WHERE customer_phone=?1"),
                params![phone],
                map_risk,
            )
            .optional()?)
    }

    pub fn all_risk_records(&self) -> OpsResult<Vec<RiskRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RISK_COLS} FROM risk_record"))?;
        let rows = stmt.query_map([], map_risk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_risk_override(
        &self,
        phone: &str,
        score: i64,
        until: &str,
        by: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<()> {
        self.conn.execute(
            "UPDATE risk_record
             SET override_score=?1, override_until=?2, override_by=?3, override_at=?4
             WHERE customer_phone=?5",
            params![score, until, by, ts(now), phone],
        )?;
        Ok(())
    }

    pub fn clear_risk_override(&self, phone: &str) -> OpsResult<()> {
        self.conn.execute(
            "UPDATE risk_record
             SET override_score=NULL, override_until=NULL, override_by=NULL, override_at=NULL
             WHERE customer_phone=?1",
            params![phone],
        )?;
        Ok(())
    }

    pub fn scored_customer_count(&self) -> OpsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM risk_record", [], |r| r.get(0))?)
    }
}
