use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::ids::ReferenceId;
use common::model::{
    BundleReference, ChatId, ContentKind, ContentPointer, GroupHandle, OperatingMode, Reference,
    Stats, UserId,
};
use common::session::{SessionMode, UploadSession};
use common::store::{LinkStore, StoreError};

use crate::database::Database;

const MODE_KEY: &str = "operating_mode";

type Result<T> = std::result::Result<T, StoreError<sqlx::Error>>;

type ReferenceRow = (String, i64, i64, String, String, Option<String>, i64);
type BundleRow = (String, i64, String, Option<String>, i64);
type SessionRow = (i64, String, Option<String>, Option<String>, Option<String>);

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn decode_id(raw: String) -> std::result::Result<ReferenceId, sqlx::Error> {
    raw.parse()
        .map_err(|e: common::ids::InvalidReferenceId| decode_error(e.to_string()))
}

fn decode_requirement(raw: Option<String>) -> std::result::Result<Option<GroupHandle>, sqlx::Error> {
    raw.map(|r| {
        GroupHandle::parse(&r).ok_or_else(|| decode_error(format!("invalid group handle: {}", r)))
    })
    .transpose()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn reference_from_row(row: ReferenceRow) -> std::result::Result<Reference, sqlx::Error> {
    let (id, owner, pointer, display_name, kind, requirement, created_at) = row;
    Ok(Reference {
        id: decode_id(id)?,
        owner,
        pointer: ContentPointer(pointer),
        display_name,
        kind: ContentKind::parse(&kind),
        requirement: decode_requirement(requirement)?,
        created_at: from_unix(created_at),
    })
}

impl Database {
    async fn bundle_items(&self, id: &str) -> std::result::Result<Vec<ContentPointer>, sqlx::Error> {
        let pointers: Vec<i64> = sqlx::query_scalar(
            "SELECT pointer FROM bundle_items WHERE bundle_id = ?1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&**self)
        .await?;
        Ok(pointers.into_iter().map(ContentPointer).collect())
    }

    async fn bundle_from_row(&self, row: BundleRow) -> std::result::Result<BundleReference, sqlx::Error> {
        let (id, owner, display_name, requirement, created_at) = row;
        let pointers = self.bundle_items(&id).await?;
        Ok(BundleReference {
            id: decode_id(id)?,
            owner,
            pointers,
            display_name,
            requirement: decode_requirement(requirement)?,
            created_at: from_unix(created_at),
        })
    }

    async fn count(&self, sql: &str, since: Option<i64>) -> std::result::Result<u64, sqlx::Error> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(since) = since {
            query = query.bind(since);
        }
        Ok(query.fetch_one(&**self).await?.max(0) as u64)
    }
}

#[async_trait]
impl LinkStore for Database {
    type Error = sqlx::Error;

    async fn id_exists(&self, id: &ReferenceId) -> Result<bool> {
        let taken: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM links WHERE id = ?1)
                OR EXISTS (SELECT 1 FROM bundles WHERE id = ?1)
            "#,
        )
        .bind(id.as_str())
        .fetch_one(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(taken != 0)
    }

    async fn insert_reference(&self, reference: &Reference) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO links
                (id, owner, pointer, display_name, kind, requirement, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
            WHERE NOT EXISTS (SELECT 1 FROM bundles WHERE id = ?1)
            "#,
        )
        .bind(reference.id.as_str())
        .bind(reference.owner)
        .bind(reference.pointer.0)
        .bind(&reference.display_name)
        .bind(reference.kind.as_str())
        .bind(reference.requirement.as_ref().map(|g| g.as_str()))
        .bind(reference.created_at.timestamp())
        .execute(&**self)
        .await
        .map_err(StoreError::Provider)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(reference.id.clone()));
        }
        Ok(())
    }

    async fn insert_bundle(&self, bundle: &BundleReference) -> Result<()> {
        let mut tx = self.begin().await.map_err(StoreError::Provider)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO bundles (id, owner, display_name, requirement, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5
            WHERE NOT EXISTS (SELECT 1 FROM links WHERE id = ?1)
            "#,
        )
        .bind(bundle.id.as_str())
        .bind(bundle.owner)
        .bind(&bundle.display_name)
        .bind(bundle.requirement.as_ref().map(|g| g.as_str()))
        .bind(bundle.created_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Provider)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(bundle.id.clone()));
        }

        for (position, pointer) in bundle.pointers.iter().enumerate() {
            sqlx::query("INSERT INTO bundle_items (bundle_id, position, pointer) VALUES (?1, ?2, ?3)")
                .bind(bundle.id.as_str())
                .bind(position as i64)
                .bind(pointer.0)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Provider)?;
        }

        tx.commit().await.map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn reference(&self, id: &ReferenceId) -> Result<Option<Reference>> {
        let row: Option<ReferenceRow> = sqlx::query_as(
            r#"
            SELECT id, owner, pointer, display_name, kind, requirement, created_at
            FROM links
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&**self)
        .await
        .map_err(StoreError::Provider)?;

        row.map(reference_from_row)
            .transpose()
            .map_err(StoreError::Provider)
    }

    async fn bundle(&self, id: &ReferenceId) -> Result<Option<BundleReference>> {
        let row: Option<BundleRow> = sqlx::query_as(
            "SELECT id, owner, display_name, requirement, created_at FROM bundles WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&**self)
        .await
        .map_err(StoreError::Provider)?;

        match row {
            Some(row) => Ok(Some(
                self.bundle_from_row(row)
                    .await
                    .map_err(StoreError::Provider)?,
            )),
            None => Ok(None),
        }
    }

    async fn delete_reference(&self, id: &ReferenceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?1")
            .bind(id.as_str())
            .execute(&**self)
            .await
            .map_err(StoreError::Provider)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_bundle(&self, id: &ReferenceId) -> Result<bool> {
        let mut tx = self.begin().await.map_err(StoreError::Provider)?;
        sqlx::query("DELETE FROM bundle_items WHERE bundle_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;
        let result = sqlx::query("DELETE FROM bundles WHERE id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;
        tx.commit().await.map_err(StoreError::Provider)?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_references(&self, owner: UserId, limit: usize) -> Result<Vec<Reference>> {
        let rows: Vec<ReferenceRow> = sqlx::query_as(
            r#"
            SELECT id, owner, pointer, display_name, kind, requirement, created_at
            FROM links
            WHERE owner = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&**self)
        .await
        .map_err(StoreError::Provider)?;

        rows.into_iter()
            .map(reference_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(StoreError::Provider)
    }

    async fn recent_bundles(&self, owner: UserId, limit: usize) -> Result<Vec<BundleReference>> {
        let rows: Vec<BundleRow> = sqlx::query_as(
            r#"
            SELECT id, owner, display_name, requirement, created_at
            FROM bundles
            WHERE owner = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&**self)
        .await
        .map_err(StoreError::Provider)?;

        let mut bundles = Vec::with_capacity(rows.len());
        for row in rows {
            bundles.push(
                self.bundle_from_row(row)
                    .await
                    .map_err(StoreError::Provider)?,
            );
        }
        Ok(bundles)
    }

    async fn session(&self, owner: UserId) -> Result<Option<UploadSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT owner, mode, requirement, display_name, thumbnail
            FROM upload_sessions
            WHERE owner = ?1
            "#,
        )
        .bind(owner)
        .fetch_optional(&**self)
        .await
        .map_err(StoreError::Provider)?;

        let Some((owner, mode, requirement, display_name, thumbnail)) = row else {
            return Ok(None);
        };

        let pending: Vec<i64> =
            sqlx::query_scalar("SELECT pointer FROM session_items WHERE owner = ?1 ORDER BY seq")
                .bind(owner)
                .fetch_all(&**self)
                .await
                .map_err(StoreError::Provider)?;

        let mode = SessionMode::parse(&mode)
            .ok_or_else(|| StoreError::Provider(decode_error(format!("invalid session mode: {}", mode))))?;

        Ok(Some(UploadSession {
            owner,
            mode,
            pending: pending.into_iter().map(ContentPointer).collect(),
            requirement: decode_requirement(requirement).map_err(StoreError::Provider)?,
            display_name,
            thumbnail,
        }))
    }

    async fn put_session(&self, session: &UploadSession) -> Result<()> {
        let mut tx = self.begin().await.map_err(StoreError::Provider)?;

        sqlx::query(
            r#"
            INSERT INTO upload_sessions (owner, mode, requirement, display_name, thumbnail)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (owner) DO UPDATE SET
                mode = excluded.mode,
                requirement = excluded.requirement,
                display_name = excluded.display_name,
                thumbnail = excluded.thumbnail
            "#,
        )
        .bind(session.owner)
        .bind(session.mode.as_str())
        .bind(session.requirement.as_ref().map(|g| g.as_str()))
        .bind(session.display_name.as_deref())
        .bind(session.thumbnail.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Provider)?;

        sqlx::query("DELETE FROM session_items WHERE owner = ?1")
            .bind(session.owner)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;

        for pointer in &session.pending {
            sqlx::query("INSERT INTO session_items (owner, pointer) VALUES (?1, ?2)")
                .bind(session.owner)
                .bind(pointer.0)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::Provider)?;
        }

        tx.commit().await.map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn append_pending(&self, owner: UserId, pointer: ContentPointer) -> Result<Option<usize>> {
        let mut tx = self.begin().await.map_err(StoreError::Provider)?;

        let result = sqlx::query(
            r#"
            INSERT INTO session_items (owner, pointer)
            SELECT ?1, ?2
            WHERE EXISTS (
                SELECT 1 FROM upload_sessions WHERE owner = ?1 AND mode = ?3
            )
            "#,
        )
        .bind(owner)
        .bind(pointer.0)
        .bind(SessionMode::CollectingBundle.as_str())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Provider)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_items WHERE owner = ?1")
            .bind(owner)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;

        tx.commit().await.map_err(StoreError::Provider)?;
        Ok(Some(pending.max(0) as usize))
    }

    async fn set_thumbnail(&self, owner: UserId, thumbnail: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (owner, mode, thumbnail)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (owner) DO UPDATE SET thumbnail = excluded.thumbnail
            "#,
        )
        .bind(owner)
        .bind(SessionMode::AwaitingSingle.as_str())
        .bind(thumbnail)
        .execute(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn clear_thumbnail(&self, owner: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET thumbnail = NULL WHERE owner = ?1 AND thumbnail IS NOT NULL",
        )
        .bind(owner)
        .execute(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_session(&self, owner: UserId) -> Result<()> {
        let mut tx = self.begin().await.map_err(StoreError::Provider)?;
        sqlx::query("DELETE FROM session_items WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;
        sqlx::query("DELETE FROM upload_sessions WHERE owner = ?1")
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Provider)?;
        tx.commit().await.map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn touch_user(
        &self,
        id: UserId,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, last_activity_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                last_activity_at = excluded.last_activity_at,
                display_name = COALESCE(excluded.display_name, users.display_name)
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(at.timestamp())
        .execute(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn remove_user(&self, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&**self)
            .await
            .map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn user_ids(&self) -> Result<Vec<UserId>> {
        sqlx::query_scalar("SELECT id FROM users ORDER BY id")
            .fetch_all(&**self)
            .await
            .map_err(StoreError::Provider)
    }

    async fn mode(&self) -> Result<Option<OperatingMode>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(MODE_KEY)
            .fetch_optional(&**self)
            .await
            .map_err(StoreError::Provider)?;

        value
            .map(|v| v.parse().map_err(|e: common::model::UnknownMode| decode_error(e.to_string())))
            .transpose()
            .map_err(StoreError::Provider)
    }

    async fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(MODE_KEY)
        .bind(mode.as_str())
        .execute(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn add_warning(&self, chat: ChatId, user: UserId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO warnings (chat_id, user_id, count) VALUES (?1, ?2, 1)
            ON CONFLICT (chat_id, user_id) DO UPDATE SET count = warnings.count + 1
            RETURNING count
            "#,
        )
        .bind(chat)
        .bind(user)
        .fetch_one(&**self)
        .await
        .map_err(StoreError::Provider)?;
        Ok(count.clamp(0, u32::MAX as i64) as u32)
    }

    async fn reset_warnings(&self, chat: ChatId, user: UserId) -> Result<()> {
        sqlx::query("DELETE FROM warnings WHERE chat_id = ?1 AND user_id = ?2")
            .bind(chat)
            .bind(user)
            .execute(&**self)
            .await
            .map_err(StoreError::Provider)?;
        Ok(())
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<Stats> {
        let since = since.timestamp();

        let users = self.count("SELECT COUNT(*) FROM users", None);
        let active = self.count("SELECT COUNT(*) FROM users WHERE last_activity_at >= ?1", Some(since));
        let references = self.count("SELECT COUNT(*) FROM links", None);
        let bundles = self.count("SELECT COUNT(*) FROM bundles", None);
        let recent_references =
            self.count("SELECT COUNT(*) FROM links WHERE created_at >= ?1", Some(since));
        let recent_bundles =
            self.count("SELECT COUNT(*) FROM bundles WHERE created_at >= ?1", Some(since));

        let kind_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM links GROUP BY kind")
                .fetch_all(&**self)
                .await
                .map_err(StoreError::Provider)?;
        let mut kinds: BTreeMap<ContentKind, u64> = BTreeMap::new();
        for (kind, count) in kind_rows {
            *kinds.entry(ContentKind::parse(&kind)).or_default() += count.max(0) as u64;
        }

        Ok(Stats {
            users: users.await.map_err(StoreError::Provider)?,
            active_users: active.await.map_err(StoreError::Provider)?,
            references: references.await.map_err(StoreError::Provider)?,
            bundles: bundles.await.map_err(StoreError::Provider)?,
            recent_references: recent_references.await.map_err(StoreError::Provider)?,
            recent_bundles: recent_bundles.await.map_err(StoreError::Provider)?,
            kinds: kinds.into_iter().collect(),
        })
    }
}
