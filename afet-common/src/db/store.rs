//! Feed persistence
//!
//! `FeedStore` is the capability the pipeline depends on; `SqliteFeedStore`
//! implements it on an sqlx pool. The feed entry and its location are
//! written in one transaction, everything else is a single statement or a
//! batch inside one transaction.

use crate::masking::MaskingPolicy;
use crate::models::{
    ExtraParameters, FeedEntry, FeedView, Location, LocationQuery, LocationSummary,
    LocationVerification, NeedItem,
};
use crate::error::with_deadline;
use crate::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tracing::debug;

/// Store operations used by the pipeline and the read side
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert the entry and its location atomically, returning the new feed ID.
    ///
    /// The location is skipped (the entry is still written) when it has no
    /// address or a zero coordinate.
    async fn create_feed(&self, entry: &FeedEntry, location: &Location) -> Result<i64>;

    /// Overwrite the resolved intent and needs of the feed's location
    async fn set_location_intent_and_needs(
        &self,
        entry_id: i64,
        reason: &str,
        needs: &[NeedItem],
    ) -> Result<u64>;

    /// Flag the feed's location deleted. Repeating it is harmless.
    async fn soft_delete_location(&self, entry_id: i64) -> Result<u64>;

    /// Live (not deleted) location of a feed
    async fn location_by_entry(&self, entry_id: i64) -> Result<Option<Location>>;

    /// Feed joined with its live location, extra parameters masked
    async fn get_feed(&self, id: i64) -> Result<Option<FeedView>>;

    /// Live locations matching `query`
    async fn get_locations(&self, query: &LocationQuery) -> Result<Vec<LocationSummary>>;

    /// Apply manually verified coordinates in one transaction
    async fn verify_feed_locations(&self, updates: &[LocationVerification]) -> Result<u64>;

    async fn close(&self);
}

/// SQLite-backed feed store
#[derive(Clone)]
pub struct SqliteFeedStore {
    pool: SqlitePool,
    masking: MaskingPolicy,
    /// Bounds connection acquisition and the inserts of `create_feed`
    write_timeout: Option<Duration>,
}

impl SqliteFeedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            masking: MaskingPolicy::default(),
            write_timeout: None,
        }
    }

    pub fn with_masking(mut self, masking: MaskingPolicy) -> Self {
        self.masking = masking;
        self
    }

    /// Fail `create_feed` with a timeout if its writes cannot be staged in
    /// time. The commit itself is never cut short, so a feed reported as
    /// failed was not stored.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Open a transaction holding the entry and, if usable, its location
    async fn stage_feed(
        &self,
        entry: &FeedEntry,
        location: &Location,
    ) -> Result<(Transaction<'static, Sqlite>, i64)> {
        let mut tx = self.pool.begin().await?;
        let geolocated = location.is_geolocated();

        // dropping `tx` on an early return rolls the transaction back
        let entry_id = Self::insert_entry(&mut tx, entry, geolocated).await?;

        if geolocated {
            let location_id = Self::insert_location(&mut tx, location, entry_id).await?;
            debug!(entry_id, location_id, "Inserted feed location");
        } else {
            debug!(entry_id, "Feed has no usable location, skipping location row");
        }

        Ok((tx, entry_id))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Sqlite>,
        entry: &FeedEntry,
        is_geolocated: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO feeds_entry (
                full_text, is_resolved, channel,
                extra_parameters, timestamp, epoch,
                is_geolocated, reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.full_text)
        .bind(entry.is_resolved)
        .bind(&entry.channel)
        .bind(entry.extra_parameters.as_ref().map(ExtraParameters::to_column))
        .bind(entry.timestamp)
        .bind(entry.epoch)
        .bind(is_geolocated)
        .bind(&entry.reason)
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_location(
        tx: &mut Transaction<'_, Sqlite>,
        location: &Location,
        entry_id: i64,
    ) -> Result<i64> {
        let needs = serde_json::to_string(&location.needs)?;

        let result = sqlx::query(
            r#"
            INSERT INTO feeds_location (
                formatted_address,
                latitude, longitude,
                northeast_lat, northeast_lng,
                southwest_lat, southwest_lng,
                entry_id, timestamp,
                epoch, reason, channel,
                needs, extra_parameters
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&location.formatted_address)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.northeast_lat)
        .bind(location.northeast_lng)
        .bind(location.southwest_lat)
        .bind(location.southwest_lng)
        .bind(entry_id)
        .bind(location.timestamp)
        .bind(location.epoch)
        .bind(&location.reason)
        .bind(&location.channel)
        .bind(needs)
        .bind(location.extra_parameters.as_ref().map(ExtraParameters::to_column))
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

fn parse_needs(raw: Option<String>) -> Result<Vec<NeedItem>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
        _ => Ok(Vec::new()),
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn location_from_row(row: &SqliteRow) -> Result<Location> {
    let extra: Option<String> = row.try_get("extra_parameters")?;

    Ok(Location {
        id: row.try_get("id")?,
        formatted_address: row.try_get("formatted_address")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        northeast_lat: row.try_get("northeast_lat")?,
        northeast_lng: row.try_get("northeast_lng")?,
        southwest_lat: row.try_get("southwest_lat")?,
        southwest_lng: row.try_get("southwest_lng")?,
        entry_id: row.try_get("entry_id")?,
        timestamp: row.try_get("timestamp")?,
        epoch: row.try_get("epoch")?,
        reason: row.try_get("reason")?,
        channel: row.try_get("channel")?,
        is_location_verified: row.try_get("is_location_verified")?,
        is_need_verified: row.try_get("is_need_verified")?,
        needs: parse_needs(row.try_get("needs")?)?,
        is_deleted: row.try_get("is_deleted")?,
        extra_parameters: ExtraParameters::from_column(extra.as_deref()),
    })
}

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn create_feed(&self, entry: &FeedEntry, location: &Location) -> Result<i64> {
        let staged = self.stage_feed(entry, location);
        let (tx, entry_id) = match self.write_timeout {
            Some(timeout) => with_deadline(timeout, staged).await?,
            None => staged.await?,
        };

        tx.commit().await?;
        Ok(entry_id)
    }

    async fn set_location_intent_and_needs(
        &self,
        entry_id: i64,
        reason: &str,
        needs: &[NeedItem],
    ) -> Result<u64> {
        let needs = serde_json::to_string(needs)?;

        let result = sqlx::query("UPDATE feeds_location SET reason = ?, needs = ? WHERE entry_id = ?")
            .bind(reason)
            .bind(needs)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn soft_delete_location(&self, entry_id: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE feeds_location SET is_deleted = 1 WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn location_by_entry(&self, entry_id: i64) -> Result<Option<Location>> {
        let row = sqlx::query(
            "SELECT * FROM feeds_location WHERE entry_id = ? AND is_deleted = 0 ORDER BY id LIMIT 1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(location_from_row).transpose()
    }

    async fn get_feed(&self, id: i64) -> Result<Option<FeedView>> {
        let row = sqlx::query(
            r#"
            SELECT fe.id, fe.full_text, fe.is_resolved, fe.channel, fe.timestamp,
                   fe.extra_parameters, fl.formatted_address, fl.reason, fl.needs
            FROM feeds_entry fe
            JOIN feeds_location fl ON fl.entry_id = fe.id
            WHERE fe.id = ? AND fl.is_deleted = 0
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let channel: String = row.try_get("channel")?;
        let extra: Option<String> = row.try_get("extra_parameters")?;
        let extra_parameters = self
            .masking
            .apply(&channel, ExtraParameters::from_column(extra.as_deref()));

        Ok(Some(FeedView {
            id: row.try_get("id")?,
            full_text: row.try_get("full_text")?,
            is_resolved: row.try_get("is_resolved")?,
            channel,
            timestamp: row.try_get("timestamp")?,
            extra_parameters,
            formatted_address: row.try_get("formatted_address")?,
            reason: non_empty(row.try_get("reason")?),
            needs: parse_needs(row.try_get("needs")?)?,
        }))
    }

    async fn get_locations(&self, query: &LocationQuery) -> Result<Vec<LocationSummary>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, latitude, longitude, entry_id, epoch, reason, channel, \
             is_location_verified, is_need_verified, needs, extra_parameters \
             FROM feeds_location WHERE is_deleted = 0",
        );

        if query.has_bounds() {
            qb.push(" AND southwest_lat >= ").push_bind(query.sw_lat);
            qb.push(" AND southwest_lng >= ").push_bind(query.sw_lng);
            qb.push(" AND northeast_lat <= ").push_bind(query.ne_lat);
            qb.push(" AND northeast_lng <= ").push_bind(query.ne_lng);
        }
        if let Some(epoch) = query.effective_since_epoch() {
            qb.push(" AND epoch >= ").push_bind(epoch);
        }
        if let Some(reason) = query.reason.as_deref().filter(|r| !r.is_empty()) {
            qb.push(" AND reason LIKE ").push_bind(format!("%{}%", reason));
        }
        if let Some(channel) = query.channel.as_deref().filter(|c| !c.is_empty()) {
            qb.push(" AND channel = ").push_bind(channel.to_string());
        }
        if let Some(verified) = query.is_location_verified {
            qb.push(" AND is_location_verified = ").push_bind(verified);
        }
        if let Some(verified) = query.is_need_verified {
            qb.push(" AND is_need_verified = ").push_bind(verified);
        }
        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<LocationSummary> {
                let channel: String = row.try_get("channel")?;
                let extra_parameters = if query.include_extra_parameters {
                    let extra: Option<String> = row.try_get("extra_parameters")?;
                    self.masking
                        .apply(&channel, ExtraParameters::from_column(extra.as_deref()))
                } else {
                    None
                };

                Ok(LocationSummary {
                    id: row.try_get("id")?,
                    loc: [row.try_get("latitude")?, row.try_get("longitude")?],
                    entry_id: row.try_get("entry_id")?,
                    epoch: row.try_get("epoch")?,
                    reason: non_empty(row.try_get("reason")?),
                    channel: non_empty(channel),
                    extra_parameters,
                    is_location_verified: row.try_get("is_location_verified")?,
                    is_need_verified: row.try_get("is_need_verified")?,
                    needs: parse_needs(row.try_get("needs")?)?,
                })
            })
            .collect()
    }

    async fn verify_feed_locations(&self, updates: &[LocationVerification]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE feeds_location
                SET is_location_verified = 1, latitude = ?, longitude = ?, formatted_address = ?
                WHERE entry_id = ?
                "#,
            )
            .bind(update.latitude)
            .bind(update.longitude)
            .bind(&update.address)
            .bind(update.entry_id)
            .execute(&mut *tx)
            .await?;

            updated += result.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
