use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    CharacterPolicy, Commission, CommissionDraft, CommissionId, CommissionOffer, CommissionStatus,
    CustomField, FieldKind, FieldTemplate, FileId, MessageId, MessageKind, OfferId, PathChoice,
    UsageRights, UserId, UserProfile,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Catalog entry to be inserted, templates included.
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub category: PathChoice,
    pub commission_type: PathChoice,
    pub subtype: Option<PathChoice>,
    pub base_price: f64,
    pub description: Option<String>,
    pub character_count: Option<CharacterPolicy>,
    pub comm_specific_inputs: Vec<FieldTemplate>,
    pub addons: Vec<FieldTemplate>,
    pub sort_order: i64,
}

/// Field set for a commission insert or update. The caller owns the
/// business rules (totals, statuses); this is just what gets written.
#[derive(Debug, Clone)]
pub struct CommissionRecord {
    pub user_id: UserId,
    pub offer_id: Option<OfferId>,
    pub category_name: String,
    pub type_name: String,
    pub subtype_name: Option<String>,
    pub base_price: f64,
    pub character_count: u32,
    pub extra_character_price: f64,
    pub usage_rights: UsageRights,
    pub allow_streaming: bool,
    pub comm_specific_inputs: Vec<CustomField>,
    pub addons: Vec<CustomField>,
    pub reference_urls: Vec<String>,
    pub extra_info: Option<String>,
    pub status: CommissionStatus,
    pub total_price: f64,
    pub form_snapshot: Option<CommissionDraft>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub commission_id: CommissionId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: FileId,
    pub uploader_id: UserId,
    pub commission_id: Option<CommissionId>,
    pub object_key: String,
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub size_bytes: u64,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, username, display_name, avatar_url, is_admin FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UserProfile {
            id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            display_name: r.get::<Option<String>, _>(2),
            avatar_url: r.get::<Option<String>, _>(3),
            is_admin: r.get::<bool, _>(4),
        }))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT COALESCE(display_name, username) FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
            .bind(is_admin)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_offer(&self, offer: &NewOffer) -> Result<OfferId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO commission_offers (
                category_name, category_price, category_description,
                type_name, type_price, type_description,
                subtype_name, subtype_price, subtype_description,
                base_price, description, max_character_count, extra_character_price,
                sort_order
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&offer.category.name)
        .bind(offer.category.price)
        .bind(offer.category.description.as_deref())
        .bind(&offer.commission_type.name)
        .bind(offer.commission_type.price)
        .bind(offer.commission_type.description.as_deref())
        .bind(offer.subtype.as_ref().map(|s| s.name.as_str()))
        .bind(offer.subtype.as_ref().and_then(|s| s.price))
        .bind(offer.subtype.as_ref().and_then(|s| s.description.as_deref()))
        .bind(offer.base_price)
        .bind(offer.description.as_deref())
        .bind(offer.character_count.map(|c| c.max as i64))
        .bind(offer.character_count.map(|c| c.price_per_extra))
        .bind(offer.sort_order)
        .fetch_one(&mut *tx)
        .await?;
        let offer_id = OfferId(rec.get::<i64, _>(0));

        for (i, field) in offer.comm_specific_inputs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO commission_offer_fields (offer_id, name, kind, price, sort_order)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(offer_id.0)
            .bind(&field.name)
            .bind(field.kind.as_str())
            .bind(field.price)
            .bind(i as i64)
            .execute(&mut *tx)
            .await?;
        }
        for (i, addon) in offer.addons.iter().enumerate() {
            sqlx::query(
                "INSERT INTO commission_offer_addons (offer_id, name, kind, price, sort_order)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(offer_id.0)
            .bind(&addon.name)
            .bind(addon.kind.as_str())
            .bind(addon.price)
            .bind(i as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(offer_id)
    }

    pub async fn list_active_offers(&self) -> Result<Vec<CommissionOffer>> {
        let rows = sqlx::query(
            "SELECT id, category_name, category_price, category_description,
                    type_name, type_price, type_description,
                    subtype_name, subtype_price, subtype_description,
                    base_price, description, max_character_count, extra_character_price
             FROM commission_offers
             WHERE is_active = 1
             ORDER BY sort_order ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut offers = Vec::with_capacity(rows.len());
        for r in rows {
            let offer_id = OfferId(r.get::<i64, _>(0));
            let character_count = match (
                r.get::<Option<i64>, _>(12),
                r.get::<Option<f64>, _>(13),
            ) {
                (Some(max), price) => Some(CharacterPolicy {
                    max: max.max(1) as u32,
                    price_per_extra: price.unwrap_or(0.0),
                }),
                _ => None,
            };
            offers.push(CommissionOffer {
                id: offer_id,
                category: PathChoice {
                    name: r.get::<String, _>(1),
                    price: r.get::<Option<f64>, _>(2),
                    description: r.get::<Option<String>, _>(3),
                },
                commission_type: PathChoice {
                    name: r.get::<String, _>(4),
                    price: r.get::<Option<f64>, _>(5),
                    description: r.get::<Option<String>, _>(6),
                },
                subtype: r.get::<Option<String>, _>(7).map(|name| PathChoice {
                    name,
                    price: r.get::<Option<f64>, _>(8),
                    description: r.get::<Option<String>, _>(9),
                }),
                base_price: r.get::<f64, _>(10),
                description: r.get::<Option<String>, _>(11),
                character_count,
                comm_specific_inputs: self
                    .offer_templates("commission_offer_fields", offer_id)
                    .await?,
                addons: self
                    .offer_templates("commission_offer_addons", offer_id)
                    .await?,
            });
        }
        Ok(offers)
    }

    async fn offer_templates(&self, table: &str, offer_id: OfferId) -> Result<Vec<FieldTemplate>> {
        // table name comes from the two callers above, never user input
        let sql = format!(
            "SELECT name, kind, price FROM {table} WHERE offer_id = ? ORDER BY sort_order ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(offer_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| FieldTemplate {
                name: r.get::<String, _>(0),
                kind: FieldKind::parse(&r.get::<String, _>(1)).unwrap_or(FieldKind::Text),
                price: r.get::<Option<f64>, _>(2),
            })
            .collect())
    }

    pub async fn insert_commission(&self, record: &CommissionRecord) -> Result<CommissionId> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO commissions (
                user_id, offer_id, category_name, type_name, subtype_name,
                base_price, character_count, extra_character_price,
                usage_rights, allow_streaming,
                comm_specific_inputs, addons, reference_urls, extra_info,
                status, total_price, form_snapshot, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(record.user_id.0)
        .bind(record.offer_id.map(|id| id.0))
        .bind(&record.category_name)
        .bind(&record.type_name)
        .bind(record.subtype_name.as_deref())
        .bind(record.base_price)
        .bind(record.character_count as i64)
        .bind(record.extra_character_price)
        .bind(record.usage_rights.as_str())
        .bind(record.allow_streaming)
        .bind(serde_json::to_string(&record.comm_specific_inputs)?)
        .bind(serde_json::to_string(&record.addons)?)
        .bind(serde_json::to_string(&record.reference_urls)?)
        .bind(record.extra_info.as_deref())
        .bind(record.status.as_str())
        .bind(record.total_price)
        .bind(
            record
                .form_snapshot
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(CommissionId(rec.get::<i64, _>(0)))
    }

    pub async fn update_commission(
        &self,
        commission_id: CommissionId,
        record: &CommissionRecord,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE commissions SET
                offer_id = ?, category_name = ?, type_name = ?, subtype_name = ?,
                base_price = ?, character_count = ?, extra_character_price = ?,
                usage_rights = ?, allow_streaming = ?,
                comm_specific_inputs = ?, addons = ?, reference_urls = ?, extra_info = ?,
                status = ?, total_price = ?, form_snapshot = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(record.offer_id.map(|id| id.0))
        .bind(&record.category_name)
        .bind(&record.type_name)
        .bind(record.subtype_name.as_deref())
        .bind(record.base_price)
        .bind(record.character_count as i64)
        .bind(record.extra_character_price)
        .bind(record.usage_rights.as_str())
        .bind(record.allow_streaming)
        .bind(serde_json::to_string(&record.comm_specific_inputs)?)
        .bind(serde_json::to_string(&record.addons)?)
        .bind(serde_json::to_string(&record.reference_urls)?)
        .bind(record.extra_info.as_deref())
        .bind(record.status.as_str())
        .bind(record.total_price)
        .bind(
            record
                .form_snapshot
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(Utc::now())
        .bind(commission_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn get_commission(&self, commission_id: CommissionId) -> Result<Option<Commission>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions c WHERE c.id = ?"
        ))
        .bind(commission_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| commission_from_row(&r)).transpose()
    }

    pub async fn list_commissions_for_user(&self, user_id: UserId) -> Result<Vec<Commission>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions c WHERE c.user_id = ? ORDER BY c.id DESC"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(commission_from_row).collect()
    }

    /// All commissions, newest first, with the owner's display name for
    /// the admin board.
    pub async fn list_all_commissions(&self) -> Result<Vec<(Commission, Option<String>)>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMISSION_COLUMNS}, COALESCE(u.display_name, u.username) AS client_name
             FROM commissions c
             INNER JOIN users u ON u.id = c.user_id
             ORDER BY c.id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok((
                    commission_from_row(r)?,
                    r.get::<Option<String>, _>("client_name"),
                ))
            })
            .collect()
    }

    /// Sets the status and stamps the matching workflow timestamp column.
    pub async fn update_status(
        &self,
        commission_id: CommissionId,
        status: CommissionStatus,
    ) -> Result<bool> {
        let stamp_column = match status {
            CommissionStatus::Waitlist => Some("waitlisted_at"),
            CommissionStatus::Payment => Some("payment_requested_at"),
            CommissionStatus::Wip => Some("work_started_at"),
            CommissionStatus::Finished => Some("completed_at"),
            CommissionStatus::Draft | CommissionStatus::Submitted => None,
        };

        let now = Utc::now();
        let updated = if let Some(column) = stamp_column {
            sqlx::query(&format!(
                "UPDATE commissions SET status = ?, {column} = ?, updated_at = ? WHERE id = ?"
            ))
            .bind(status.as_str())
            .bind(now)
            .bind(now)
            .bind(commission_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query("UPDATE commissions SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(now)
                .bind(commission_id.0)
                .execute(&self.pool)
                .await?
                .rows_affected()
        };
        Ok(updated > 0)
    }

    pub async fn set_final_price(&self, commission_id: CommissionId, price: f64) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE commissions SET final_price = ?, updated_at = ? WHERE id = ?",
        )
        .bind(price)
        .bind(Utc::now())
        .bind(commission_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn insert_message(
        &self,
        commission_id: CommissionId,
        sender_id: UserId,
        kind: MessageKind,
        content: Option<&str>,
        file_url: Option<&str>,
    ) -> Result<StoredMessage> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO commission_messages (commission_id, user_id, kind, content, file_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(commission_id.0)
        .bind(sender_id.0)
        .bind(kind.as_str())
        .bind(content)
        .bind(file_url)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(StoredMessage {
            message_id: MessageId(rec.get::<i64, _>(0)),
            commission_id,
            sender_id,
            kind,
            content: content.map(str::to_string),
            file_url: file_url.map(str::to_string),
            created_at: now,
        })
    }

    /// Newest page of messages for a commission, returned oldest-first.
    /// `before` pages further back by message id.
    pub async fn list_messages(
        &self,
        commission_id: CommissionId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows = if let Some(before_id) = before {
            sqlx::query(
                "SELECT id, commission_id, user_id, kind, content, file_url, created_at
                 FROM commission_messages
                 WHERE commission_id = ? AND id < ?
                 ORDER BY id DESC
                 LIMIT ?",
            )
            .bind(commission_id.0)
            .bind(before_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, commission_id, user_id, kind, content, file_url, created_at
                 FROM commission_messages
                 WHERE commission_id = ?
                 ORDER BY id DESC
                 LIMIT ?",
            )
            .bind(commission_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.reverse();
        Ok(rows
            .into_iter()
            .map(|r| StoredMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                commission_id: CommissionId(r.get::<i64, _>(1)),
                sender_id: UserId(r.get::<i64, _>(2)),
                kind: MessageKind::parse(&r.get::<String, _>(3)).unwrap_or(MessageKind::Text),
                content: r.get::<Option<String>, _>(4),
                file_url: r.get::<Option<String>, _>(5),
                created_at: r.get::<DateTime<Utc>, _>(6),
            })
            .collect())
    }

    pub async fn store_file(
        &self,
        uploader_id: UserId,
        commission_id: Option<CommissionId>,
        object_key: &str,
        data: &[u8],
        mime_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<FileId> {
        let size_bytes = i64::try_from(data.len()).unwrap_or(i64::MAX);
        let rec = sqlx::query(
            "INSERT INTO files (uploader_user_id, commission_id, object_key, data, mime_type, filename, size_bytes)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(uploader_id.0)
        .bind(commission_id.map(|id| id.0))
        .bind(object_key)
        .bind(data)
        .bind(mime_type)
        .bind(filename)
        .bind(size_bytes)
        .fetch_one(&self.pool)
        .await?;
        Ok(FileId(rec.get::<i64, _>(0)))
    }

    pub async fn load_file(&self, file_id: FileId) -> Result<Option<StoredFile>> {
        let row = sqlx::query(
            "SELECT id, uploader_user_id, commission_id, object_key, data, mime_type, filename, size_bytes
             FROM files WHERE id = ?",
        )
        .bind(file_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredFile {
            file_id: FileId(r.get::<i64, _>(0)),
            uploader_id: UserId(r.get::<i64, _>(1)),
            commission_id: r.get::<Option<i64>, _>(2).map(CommissionId),
            object_key: r.get::<String, _>(3),
            data: r.get::<Vec<u8>, _>(4),
            mime_type: r.get::<Option<String>, _>(5),
            filename: r.get::<Option<String>, _>(6),
            size_bytes: r.get::<Option<i64>, _>(7).unwrap_or_default() as u64,
        }))
    }
}

const COMMISSION_COLUMNS: &str = "c.id, c.user_id, c.offer_id, c.category_name, c.type_name, c.subtype_name, \
     c.base_price, c.final_price, c.character_count, c.extra_character_price, \
     c.usage_rights, c.allow_streaming, c.comm_specific_inputs, c.addons, \
     c.reference_urls, c.extra_info, c.status, c.total_price, c.form_snapshot, \
     c.created_at, c.updated_at, c.waitlisted_at, c.payment_requested_at, \
     c.payment_received_at, c.work_started_at, c.completed_at";

fn commission_from_row(r: &SqliteRow) -> Result<Commission> {
    let usage_raw: String = r.get("usage_rights");
    let status_raw: String = r.get("status");
    Ok(Commission {
        id: CommissionId(r.get::<i64, _>("id")),
        user_id: UserId(r.get::<i64, _>("user_id")),
        offer_id: r.get::<Option<i64>, _>("offer_id").map(OfferId),
        category_name: r.get("category_name"),
        type_name: r.get("type_name"),
        subtype_name: r.get("subtype_name"),
        base_price: r.get("base_price"),
        final_price: r.get("final_price"),
        character_count: r.get::<i64, _>("character_count").max(1) as u32,
        extra_character_price: r.get("extra_character_price"),
        usage_rights: UsageRights::parse(&usage_raw)
            .with_context(|| format!("unknown usage_rights value '{usage_raw}'"))?,
        allow_streaming: r.get("allow_streaming"),
        comm_specific_inputs: serde_json::from_str(&r.get::<String, _>("comm_specific_inputs"))
            .context("bad comm_specific_inputs json")?,
        addons: serde_json::from_str(&r.get::<String, _>("addons")).context("bad addons json")?,
        reference_urls: serde_json::from_str(&r.get::<String, _>("reference_urls"))
            .context("bad reference_urls json")?,
        extra_info: r.get("extra_info"),
        status: CommissionStatus::parse(&status_raw)
            .with_context(|| format!("unknown status value '{status_raw}'"))?,
        total_price: r.get("total_price"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        waitlisted_at: r.get("waitlisted_at"),
        payment_requested_at: r.get("payment_requested_at"),
        payment_received_at: r.get("payment_received_at"),
        work_started_at: r.get("work_started_at"),
        completed_at: r.get("completed_at"),
        form_snapshot: r
            .get::<Option<String>, _>("form_snapshot")
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("bad form_snapshot json")?,
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
