use async_trait::async_trait;
use chrono::NaiveDate;
use estate_core::{
    Complaint, Directory, Intervention, Lease, Mandate, SettlementError, SettlementResult, Unit,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::codec::storage;

const MANDATE_COLUMNS: &str = r#"
    SELECT m.id, m.owner_id, m.fee_rate_pct, m.start_date, m.end_date,
           COALESCE(array_agg(mu.unit_id ORDER BY mu.unit_id)
                    FILTER (WHERE mu.unit_id IS NOT NULL), '{}') AS unit_ids
    FROM mandates m
    LEFT JOIN mandate_units mu ON mu.mandate_id = m.id
"#;

/// Reads units, leases, mandates, interventions and complaints from the back
/// office tables.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lease(row: &PgRow) -> SettlementResult<Lease> {
    Ok(Lease {
        id: row.try_get("id").map_err(storage)?,
        unit_id: row.try_get("unit_id").map_err(storage)?,
        tenant_id: row.try_get("tenant_id").map_err(storage)?,
        start_date: row.try_get("start_date").map_err(storage)?,
        end_date: row.try_get("end_date").map_err(storage)?,
        monthly_rent: row.try_get("monthly_rent").map_err(storage)?,
    })
}

fn mandate(row: &PgRow) -> SettlementResult<Mandate> {
    Ok(Mandate {
        id: row.try_get("id").map_err(storage)?,
        owner_id: row.try_get("owner_id").map_err(storage)?,
        unit_ids: row.try_get("unit_ids").map_err(storage)?,
        fee_rate_pct: row.try_get("fee_rate_pct").map_err(storage)?,
        start_date: row.try_get("start_date").map_err(storage)?,
        end_date: row.try_get("end_date").map_err(storage)?,
    })
}

#[async_trait]
impl Directory for PgDirectory {
    async fn get_unit(&self, id: Uuid) -> SettlementResult<Unit> {
        let row = sqlx::query("SELECT id, reference FROM units WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("unit", id))?;
        Ok(Unit {
            id: row.try_get("id").map_err(storage)?,
            reference: row.try_get("reference").map_err(storage)?,
        })
    }

    async fn get_lease(&self, id: Uuid) -> SettlementResult<Lease> {
        let row = sqlx::query("SELECT * FROM leases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("lease", id))?;
        lease(&row)
    }

    async fn get_intervention(&self, id: Uuid) -> SettlementResult<Intervention> {
        let row = sqlx::query("SELECT id, unit_id, title FROM interventions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("intervention", id))?;
        Ok(Intervention {
            id: row.try_get("id").map_err(storage)?,
            unit_id: row.try_get("unit_id").map_err(storage)?,
            title: row.try_get("title").map_err(storage)?,
        })
    }

    async fn get_complaint(&self, id: Uuid) -> SettlementResult<Complaint> {
        let row = sqlx::query("SELECT id, lease_id, subject FROM complaints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("complaint", id))?;
        Ok(Complaint {
            id: row.try_get("id").map_err(storage)?,
            lease_id: row.try_get("lease_id").map_err(storage)?,
            subject: row.try_get("subject").map_err(storage)?,
        })
    }

    async fn get_mandate(
        &self,
        owner_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Option<Mandate>> {
        let query = format!(
            "{MANDATE_COLUMNS}
             WHERE m.owner_id = $1
               AND m.start_date <= $2
               AND (m.end_date IS NULL OR m.end_date >= $2)
             GROUP BY m.id
             ORDER BY m.start_date DESC
             LIMIT 1"
        );
        sqlx::query(&query)
            .bind(owner_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .as_ref()
            .map(mandate)
            .transpose()
    }

    async fn get_mandates(&self, owner_id: Uuid, date: NaiveDate) -> SettlementResult<Vec<Mandate>> {
        let query = format!(
            "{MANDATE_COLUMNS}
             WHERE m.owner_id = $1
               AND m.start_date <= $2
               AND (m.end_date IS NULL OR m.end_date >= $2)
             GROUP BY m.id
             ORDER BY m.start_date DESC, m.id"
        );
        let rows = sqlx::query(&query)
            .bind(owner_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(mandate).collect()
    }

    async fn get_active_leases_for_unit(
        &self,
        unit_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Vec<Lease>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM leases
            WHERE unit_id = $1
              AND start_date <= $2
              AND (end_date IS NULL OR end_date >= $2)
            ORDER BY start_date, id
            "#,
        )
        .bind(unit_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(lease).collect()
    }

    async fn get_leases_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<Lease>> {
        let rows = sqlx::query("SELECT * FROM leases WHERE unit_id = $1 ORDER BY start_date, id")
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(lease).collect()
    }

    async fn owners_with_mandates(&self, date: NaiveDate) -> SettlementResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT owner_id FROM mandates
            WHERE start_date <= $1 AND (end_date IS NULL OR end_date >= $1)
            ORDER BY owner_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter()
            .map(|row| row.try_get("owner_id").map_err(storage))
            .collect()
    }
}
