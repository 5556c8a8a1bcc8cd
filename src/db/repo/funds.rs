use super::events::insert_event_on;
use super::{decode_u256, encode_u256, invalid, Repository};
use crate::domain::{Address, AssetId, Calculations, FundEvent, FundId, TimeMs};
use crate::engine::{OwnedAssets, ShareLedger};
use crate::fund::{FundSetup, FundState, FundStatus};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::debug;

impl Repository {
    /// Persist the full state of a fund in one transaction.
    ///
    /// Share balances and owned assets are rewritten wholesale. The
    /// calculations snapshot is appended to the history only when it differs
    /// from the last stored one.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is written then.
    pub async fn save_fund_state(
        &self,
        fund_id: FundId,
        setup: &FundSetup,
        state: &FundState,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        write_state(&mut *tx, fund_id, setup, state).await?;
        tx.commit().await?;
        debug!(fund = %fund_id, nonce = state.nonce, "Fund state saved");
        Ok(())
    }

    /// Persist the state after a transition together with the events it
    /// produced. Either both land or neither does.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is written then.
    pub async fn save_transition(
        &self,
        fund_id: FundId,
        setup: &FundSetup,
        state: &FundState,
        events: &[FundEvent],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        write_state(&mut *tx, fund_id, setup, state).await?;
        for event in events {
            insert_event_on(&mut *tx, event).await?;
        }
        tx.commit().await?;
        debug!(
            fund = %fund_id,
            nonce = state.nonce,
            events = events.len(),
            "Transition saved"
        );
        Ok(())
    }

    /// Load a fund's state, or `None` if it was never saved.
    ///
    /// `setup` supplies the quote asset and owned asset limit.
    ///
    /// # Errors
    /// Returns a decode error if a stored value is malformed or the stored
    /// total supply disagrees with the stored balances.
    pub async fn load_fund_state(
        &self,
        fund_id: FundId,
        setup: &FundSetup,
    ) -> Result<Option<FundState>, sqlx::Error> {
        let id = fund_id.to_string();
        let mut conn = self.pool.acquire().await?;

        let Some(row) = sqlx::query("SELECT status, nonce, total_supply FROM funds WHERE fund_id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let status_str: String = row.try_get("status")?;
        let status = FundStatus::parse(&status_str)
            .ok_or_else(|| invalid("status", status_str.clone(), "a fund status"))?;
        let nonce: i64 = row.try_get("nonce")?;
        let total_supply = decode_u256(&row, "total_supply")?;

        let balance_rows = sqlx::query("SELECT holder, balance FROM share_balances WHERE fund_id = ?")
            .bind(id.as_str())
            .fetch_all(&mut *conn)
            .await?;
        let mut balances = Vec::with_capacity(balance_rows.len());
        for row in &balance_rows {
            let holder: String = row.try_get("holder")?;
            balances.push((Address::new(holder), decode_u256(row, "balance")?));
        }
        let ledger = ShareLedger::from_balances(balances)
            .map_err(|e| invalid("balance", e.to_string(), "balances that fit in 256 bits"))?;
        if ledger.total_supply() != total_supply {
            return Err(invalid(
                "total_supply",
                total_supply.to_string(),
                "the sum of share balances",
            ));
        }

        let assets: Vec<(String,)> =
            sqlx::query_as("SELECT asset FROM owned_assets WHERE fund_id = ? ORDER BY position ASC")
                .bind(id.as_str())
                .fetch_all(&mut *conn)
                .await?;
        let owned_assets = OwnedAssets::restore(
            setup.quote_asset.clone(),
            setup.max_owned_assets,
            assets.into_iter().map(|(a,)| AssetId::new(a)),
        );

        let calculations = latest_calculations(&mut *conn, &id)
            .await?
            .unwrap_or_else(|| FundState::new(setup).calculations);

        Ok(Some(FundState {
            status,
            ledger,
            owned_assets,
            calculations,
            nonce: nonce as u64,
        }))
    }

    /// Stored calculations snapshots, oldest first, at most `limit`.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is malformed.
    pub async fn calculations_history(
        &self,
        fund_id: FundId,
        limit: u32,
    ) -> Result<Vec<Calculations>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, timestamp_ms, gross_asset_value, unclaimed_management_fee,
                       unclaimed_performance_fee, net_asset_value, share_price,
                       high_water_mark, fee_share_quantity, total_supply
                FROM calculations
                WHERE fund_id = ?
                ORDER BY id DESC
                LIMIT ?
            ) ORDER BY id ASC
            "#,
        )
        .bind(fund_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(calculations_from_row).collect()
    }
}

async fn latest_calculations(
    conn: &mut SqliteConnection,
    fund_id: &str,
) -> Result<Option<Calculations>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT timestamp_ms, gross_asset_value, unclaimed_management_fee,
               unclaimed_performance_fee, net_asset_value, share_price,
               high_water_mark, fee_share_quantity, total_supply
        FROM calculations
        WHERE fund_id = ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(fund_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(calculations_from_row).transpose()
}

async fn insert_calculations(
    conn: &mut SqliteConnection,
    fund_id: &str,
    calcs: &Calculations,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO calculations (
            fund_id, timestamp_ms, gross_asset_value, unclaimed_management_fee,
            unclaimed_performance_fee, net_asset_value, share_price,
            high_water_mark, fee_share_quantity, total_supply
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fund_id)
    .bind(calcs.timestamp.as_ms())
    .bind(encode_u256(calcs.gross_asset_value))
    .bind(encode_u256(calcs.unclaimed_management_fee))
    .bind(encode_u256(calcs.unclaimed_performance_fee))
    .bind(encode_u256(calcs.net_asset_value))
    .bind(encode_u256(calcs.share_price))
    .bind(encode_u256(calcs.high_water_mark))
    .bind(encode_u256(calcs.fee_share_quantity))
    .bind(encode_u256(calcs.total_supply))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn calculations_from_row(row: &SqliteRow) -> Result<Calculations, sqlx::Error> {
    Ok(Calculations {
        gross_asset_value: decode_u256(row, "gross_asset_value")?,
        unclaimed_management_fee: decode_u256(row, "unclaimed_management_fee")?,
        unclaimed_performance_fee: decode_u256(row, "unclaimed_performance_fee")?,
        net_asset_value: decode_u256(row, "net_asset_value")?,
        share_price: decode_u256(row, "share_price")?,
        high_water_mark: decode_u256(row, "high_water_mark")?,
        fee_share_quantity: decode_u256(row, "fee_share_quantity")?,
        total_supply: decode_u256(row, "total_supply")?,
        timestamp: TimeMs::new(row.try_get("timestamp_ms")?),
    })
}

async fn write_state(
    conn: &mut SqliteConnection,
    fund_id: FundId,
    setup: &FundSetup,
    state: &FundState,
) -> Result<(), sqlx::Error> {
    let id = fund_id.to_string();

    sqlx::query(
        r#"
        INSERT INTO funds (
            fund_id, name, quote_asset, quote_decimals, manager, vault,
            status, nonce, total_supply, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fund_id) DO UPDATE SET
            status = excluded.status,
            nonce = excluded.nonce,
            total_supply = excluded.total_supply,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id.as_str())
    .bind(setup.name.as_str())
    .bind(setup.quote_asset.as_str())
    .bind(i64::from(setup.quote_decimals))
    .bind(setup.manager.as_str())
    .bind(setup.vault.as_str())
    .bind(state.status.as_str())
    .bind(state.nonce as i64)
    .bind(encode_u256(state.ledger.total_supply()))
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM share_balances WHERE fund_id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    for (holder, balance) in state.ledger.holders() {
        sqlx::query("INSERT INTO share_balances (fund_id, holder, balance) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(holder.as_str())
            .bind(encode_u256(*balance))
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("DELETE FROM owned_assets WHERE fund_id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    for (position, asset) in state.owned_assets.as_slice().iter().enumerate() {
        sqlx::query("INSERT INTO owned_assets (fund_id, position, asset) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(position as i64)
            .bind(asset.as_str())
            .execute(&mut *conn)
            .await?;
    }

    let latest = latest_calculations(&mut *conn, &id).await?;
    if latest.as_ref() != Some(&state.calculations) {
        insert_calculations(&mut *conn, &id, &state.calculations).await?;
    }
    Ok(())
}
