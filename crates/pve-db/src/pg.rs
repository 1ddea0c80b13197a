//! PostgreSQL-backed [`PatrolStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pve_schemas::{IngestResponse, RoundRecord, ScanEvent, ScanOutcome, ScanPointVersion};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::store::{PatrolStore, ScanCommit, StoredState, SweepCommit};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_all<T: DeserializeOwned>(rows: Vec<(Value,)>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|(v,)| serde_json::from_value(v).map_err(StoreError::from))
        .collect()
}

async fn insert_outcome(
    tx: &mut Transaction<'_, Postgres>,
    o: &ScanOutcome,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into scan_outcomes (
          outcome_id, scan_event_id, scan_point_id, factory_id, round_id, guard_id,
          classification, occurred_at_utc, service_date, payload
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
        )
        on conflict (outcome_id) do nothing
        "#,
    )
    .bind(o.outcome_id)
    .bind(o.scan_event_id)
    .bind(&o.scan_point_id)
    .bind(&o.factory_id)
    .bind(o.round_id.as_ref().map(ToString::to_string))
    .bind(&o.guard_id)
    .bind(o.classification.as_str())
    .bind(o.occurred_at)
    .bind(o.service_date)
    .bind(serde_json::to_value(o)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_round(
    tx: &mut Transaction<'_, Postgres>,
    r: &RoundRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into rounds (round_id, factory_id, service_date, status, closes_at_utc, payload)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (round_id) do update
          set status = excluded.status,
              payload = excluded.payload
        "#,
    )
    .bind(r.round_id.to_string())
    .bind(&r.factory_id)
    .bind(r.service_date())
    .bind(r.status.as_str())
    .bind(r.closes_at)
    .bind(serde_json::to_value(r)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl PatrolStore for PgStore {
    async fn save_scan(&self, commit: &ScanCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let ev = &commit.event;

        sqlx::query(
            r#"
            insert into scan_events (
              event_id, guard_id, client_event_id, scan_point_id, factory_id,
              ts_utc, received_at_utc, payload
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            on conflict do nothing
            "#,
        )
        .bind(ev.event_id)
        .bind(&ev.guard_id)
        .bind(&ev.client_event_id)
        .bind(&ev.scan_point_id)
        .bind(&ev.factory_id)
        .bind(ev.timestamp)
        .bind(ev.received_at)
        .bind(serde_json::to_value(ev)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            insert into ingest_responses (guard_id, client_event_id, event_id, payload)
            values ($1, $2, $3, $4)
            on conflict do nothing
            "#,
        )
        .bind(&commit.response.guard_id)
        .bind(&commit.response.client_event_id)
        .bind(commit.response.event_id)
        .bind(serde_json::to_value(&commit.response)?)
        .execute(&mut *tx)
        .await?;

        if let Some(o) = &commit.outcome {
            insert_outcome(&mut tx, o).await?;
        }
        if let Some(r) = &commit.round {
            upsert_round(&mut tx, r).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_sweep(&self, commit: &SweepCommit) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for r in &commit.rounds {
            upsert_round(&mut tx, r).await?;
        }
        for o in &commit.missed {
            insert_outcome(&mut tx, o).await?;
        }
        sqlx::query(
            r#"
            insert into sweep_watermarks (factory_id, watermark_utc)
            values ($1, $2)
            on conflict (factory_id) do update
              set watermark_utc = greatest(sweep_watermarks.watermark_utc, excluded.watermark_utc)
            "#,
        )
        .bind(&commit.factory_id)
        .bind(commit.watermark)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_point_version(&self, version: &ScanPointVersion) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into scan_point_versions (scan_point_id, version, factory_id, effective_from, payload)
            values ($1, $2, $3, $4, $5)
            on conflict (scan_point_id, version) do nothing
            "#,
        )
        .bind(&version.point.id)
        .bind(version.version as i32)
        .bind(&version.point.factory_id)
        .bind(version.effective_from)
        .bind(serde_json::to_value(version)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_state(&self) -> Result<StoredState, StoreError> {
        let point_versions: Vec<ScanPointVersion> = decode_all(
            sqlx::query_as::<_, (Value,)>(
                "select payload from scan_point_versions order by effective_from, scan_point_id, version",
            )
            .fetch_all(&self.pool)
            .await?,
        )?;
        let events: Vec<ScanEvent> = decode_all(
            sqlx::query_as::<_, (Value,)>("select payload from scan_events order by ts_utc, event_id")
                .fetch_all(&self.pool)
                .await?,
        )?;
        let responses: Vec<IngestResponse> = decode_all(
            sqlx::query_as::<_, (Value,)>("select payload from ingest_responses order by guard_id, client_event_id")
                .fetch_all(&self.pool)
                .await?,
        )?;
        let outcomes: Vec<ScanOutcome> = decode_all(
            sqlx::query_as::<_, (Value,)>("select payload from scan_outcomes order by occurred_at_utc, outcome_id")
                .fetch_all(&self.pool)
                .await?,
        )?;
        let rounds: Vec<RoundRecord> = decode_all(
            sqlx::query_as::<_, (Value,)>("select payload from rounds order by round_id")
                .fetch_all(&self.pool)
                .await?,
        )?;
        let watermarks: BTreeMap<String, DateTime<Utc>> =
            sqlx::query_as::<_, (String, DateTime<Utc>)>(
                "select factory_id, watermark_utc from sweep_watermarks",
            )
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        Ok(StoredState {
            point_versions,
            events,
            responses,
            outcomes,
            rounds,
            watermarks,
        })
    }

    async fn outcomes_for_date(&self, date: NaiveDate) -> Result<Vec<ScanOutcome>, StoreError> {
        decode_all(
            sqlx::query_as::<_, (Value,)>(
                r#"
                select payload from scan_outcomes
                where service_date = $1
                order by occurred_at_utc, outcome_id
                "#,
            )
            .bind(date)
            .fetch_all(&self.pool)
            .await?,
        )
    }
}
