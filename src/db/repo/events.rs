use super::{decode_u256, encode_u256, invalid, Repository};
use crate::domain::{Address, AssetAmount, AssetId, EventKind, FundEvent, FundId, TimeMs};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// JSON shape of one entry in `fund_events.amounts`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredAmount {
    asset: String,
    amount: String,
}

impl Repository {
    /// Insert an event idempotently.
    ///
    /// # Returns
    /// `true` if the event was new.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_event(&self, event: &FundEvent) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_event_on(&mut *conn, event).await
    }

    /// Insert events in one transaction.
    ///
    /// Returns the number of newly inserted events (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_events_batch(&self, events: &[FundEvent]) -> Result<usize, sqlx::Error> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;
        for event in events {
            if insert_event_on(&mut *tx, event).await? {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Events of a fund with nonce greater than `after_nonce`, in nonce order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is malformed.
    pub async fn query_events(
        &self,
        fund_id: FundId,
        after_nonce: u64,
    ) -> Result<Vec<FundEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_key, fund_id, nonce, kind, actor, shares, amounts, time_ms
            FROM fund_events
            WHERE fund_id = ? AND nonce > ?
            ORDER BY nonce ASC
            "#,
        )
        .bind(fund_id.to_string())
        .bind(after_nonce as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

pub(super) async fn insert_event_on(
    conn: &mut SqliteConnection,
    event: &FundEvent,
) -> Result<bool, sqlx::Error> {
    let amounts: Vec<StoredAmount> = event
        .amounts
        .iter()
        .map(|a| StoredAmount {
            asset: a.asset.as_str().to_string(),
            amount: encode_u256(a.amount),
        })
        .collect();
    let amounts_json =
        serde_json::to_string(&amounts).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO fund_events (event_key, fund_id, nonce, kind, actor, shares, amounts, time_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(event_key) DO NOTHING
        "#,
    )
    .bind(event.event_key.as_str())
    .bind(event.fund_id.to_string())
    .bind(event.nonce as i64)
    .bind(event.kind.as_str())
    .bind(event.actor.as_str())
    .bind(encode_u256(event.shares))
    .bind(amounts_json)
    .bind(event.time_ms.as_ms())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn event_from_row(row: &SqliteRow) -> Result<FundEvent, sqlx::Error> {
    let fund_id_str: String = row.try_get("fund_id")?;
    let fund_id = FundId::parse(&fund_id_str)
        .map_err(|_| invalid("fund_id", fund_id_str.clone(), "a uuid"))?;
    let kind_str: String = row.try_get("kind")?;
    let kind =
        EventKind::parse(&kind_str).ok_or_else(|| invalid("kind", kind_str.clone(), "an event kind"))?;
    let nonce: i64 = row.try_get("nonce")?;

    let amounts_json: String = row.try_get("amounts")?;
    let stored: Vec<StoredAmount> =
        serde_json::from_str(&amounts_json).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let mut amounts = Vec::with_capacity(stored.len());
    for entry in stored {
        let amount = U256::from_dec_str(&entry.amount)
            .map_err(|_| invalid("amounts", entry.amount.clone(), "a decimal integer"))?;
        amounts.push(AssetAmount::new(AssetId::new(entry.asset), amount));
    }

    Ok(FundEvent {
        event_key: row.try_get("event_key")?,
        fund_id,
        nonce: nonce as u64,
        kind,
        actor: Address::new(row.try_get::<String, _>("actor")?),
        shares: decode_u256(row, "shares")?,
        amounts,
        time_ms: TimeMs::new(row.try_get("time_ms")?),
    })
}
