use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::PortalStore;
use crate::activity::{ActivityType, ALL_TYPES};
use crate::filters::StudentFilter;
use crate::models::{
    ActivityRecord, Batch, BatchKey, ContactMessage, ContactStatus, MessageType, ProofFile,
    ProofMeta, Student,
};

const SCHEMA: &str = "student_portal";

const STUDENT_COLUMNS: &str = "email_id, first_name, middle_name, last_name, department, \
     batch_no, class_division, gender, prn, abc_id, phone_no, linkedin_url, other_urls, \
     average_sgpi, created_at, updated_at";

const ACTIVITY_COLUMNS: &str = "id, email_id, details, proof_file_name, proof_content_type, \
     proof_size, proof_uploaded_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to DATABASE_URL")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database schema is up to date");
        Ok(())
    }
}

fn table(activity_type: ActivityType) -> String {
    format!("{SCHEMA}.{}", activity_type.descriptor().table)
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn student_from_row(row: &PgRow) -> anyhow::Result<Student> {
    Ok(Student {
        email_id: row.try_get("email_id")?,
        first_name: row.try_get("first_name")?,
        middle_name: row.try_get("middle_name")?,
        last_name: row.try_get("last_name")?,
        department: row.try_get("department")?,
        batch_no: row.try_get("batch_no")?,
        class_division: row.try_get("class_division")?,
        gender: row.try_get("gender")?,
        prn: row.try_get("prn")?,
        abc_id: row.try_get("abc_id")?,
        phone_no: row.try_get("phone_no")?,
        linkedin_url: row.try_get("linkedin_url")?,
        other_urls: row.try_get("other_urls")?,
        average_sgpi: row.try_get("average_sgpi")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn activity_from_row(activity_type: ActivityType, row: &PgRow) -> anyhow::Result<ActivityRecord> {
    let Json(fields): Json<Map<String, Value>> = row.try_get("details")?;
    let file_name: Option<String> = row.try_get("proof_file_name")?;
    let proof = match file_name {
        Some(file_name) => Some(ProofMeta {
            file_name,
            content_type: row
                .try_get::<Option<String>, _>("proof_content_type")?
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: row.try_get::<Option<i64>, _>("proof_size")?.unwrap_or(0),
            uploaded_at: row
                .try_get::<Option<DateTime<Utc>>, _>("proof_uploaded_at")?
                .unwrap_or_else(Utc::now),
        }),
        None => None,
    };

    Ok(ActivityRecord {
        id: row.try_get("id")?,
        activity_type,
        email_id: row.try_get("email_id")?,
        fields,
        proof,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> anyhow::Result<ContactMessage> {
    let message_type: String = row.try_get("message_type")?;
    let status: String = row.try_get("status")?;
    Ok(ContactMessage {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        message_type: message_type.parse::<MessageType>()?,
        subject: row.try_get("subject")?,
        message: row.try_get("message")?,
        status: status.parse::<ContactStatus>()?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PortalStore for PgStore {
    async fn list_students(&self, filter: &StudentFilter) -> anyhow::Result<Vec<Student>> {
        let mut query = format!("SELECT {STUDENT_COLUMNS} FROM {SCHEMA}.students WHERE TRUE");
        let mut index = 0;
        let mut next = || {
            index += 1;
            index
        };

        if !filter.department.is_empty() {
            query.push_str(&format!(" AND department = ANY(${})", next()));
        }
        if filter.batch_no.is_some() {
            query.push_str(&format!(" AND batch_no = ${}", next()));
        }
        if filter.class_division.is_some() {
            query.push_str(&format!(" AND class_division = ${}", next()));
        }
        if filter.gender.is_some() {
            query.push_str(&format!(" AND gender = ${}", next()));
        }
        if filter.email.is_some() {
            query.push_str(&format!(" AND email_id ILIKE ${}", next()));
        }
        query.push_str(" ORDER BY email_id");

        let mut rows = sqlx::query(&query);
        if !filter.department.is_empty() {
            rows = rows.bind(filter.department.clone());
        }
        if let Some(batch_no) = filter.batch_no {
            rows = rows.bind(batch_no);
        }
        if let Some(division) = &filter.class_division {
            rows = rows.bind(division);
        }
        if let Some(gender) = &filter.gender {
            rows = rows.bind(gender);
        }
        if let Some(email) = &filter.email {
            rows = rows.bind(format!("%{}%", escape_like(email)));
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(student_from_row).collect()
    }

    async fn get_student(&self, email_id: &str) -> anyhow::Result<Option<Student>> {
        let row = sqlx::query(&format!(
            "SELECT {STUDENT_COLUMNS} FROM {SCHEMA}.students WHERE email_id = $1"
        ))
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn upsert_student(&self, student: &Student) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_portal.students
            (email_id, first_name, middle_name, last_name, department, batch_no,
             class_division, gender, prn, abc_id, phone_no, linkedin_url, other_urls,
             average_sgpi, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (email_id) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                middle_name = EXCLUDED.middle_name,
                last_name = EXCLUDED.last_name,
                department = EXCLUDED.department,
                batch_no = EXCLUDED.batch_no,
                class_division = EXCLUDED.class_division,
                gender = EXCLUDED.gender,
                prn = EXCLUDED.prn,
                abc_id = EXCLUDED.abc_id,
                phone_no = EXCLUDED.phone_no,
                linkedin_url = EXCLUDED.linkedin_url,
                other_urls = EXCLUDED.other_urls,
                average_sgpi = EXCLUDED.average_sgpi,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&student.email_id)
        .bind(&student.first_name)
        .bind(&student.middle_name)
        .bind(&student.last_name)
        .bind(&student.department)
        .bind(student.batch_no)
        .bind(&student.class_division)
        .bind(&student.gender)
        .bind(&student.prn)
        .bind(&student.abc_id)
        .bind(&student.phone_no)
        .bind(&student.linkedin_url)
        .bind(&student.other_urls)
        .bind(student.average_sgpi)
        .bind(student.created_at)
        .bind(student.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_student(&self, email_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        for ty in ALL_TYPES {
            sqlx::query(&format!("DELETE FROM {} WHERE email_id = $1", table(ty)))
                .bind(email_id)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query("DELETE FROM student_portal.students WHERE email_id = $1")
            .bind(email_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_batches(&self) -> anyhow::Result<Vec<Batch>> {
        let rows = sqlx::query(
            "SELECT batch_no, department, class_division, created_at \
             FROM student_portal.batches \
             ORDER BY batch_no, department, class_division",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Batch {
                    key: BatchKey {
                        batch_no: row.try_get("batch_no")?,
                        department: row.try_get("department")?,
                        class_division: row.try_get("class_division")?,
                    },
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn upsert_batch(&self, key: &BatchKey) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_portal.batches (batch_no, department, class_division)
            VALUES ($1, $2, $3)
            ON CONFLICT (batch_no, department, class_division) DO NOTHING
            "#,
        )
        .bind(key.batch_no)
        .bind(&key.department)
        .bind(&key.class_division)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_batch(&self, key: &BatchKey) -> anyhow::Result<Option<usize>> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM student_portal.batches \
             WHERE batch_no = $1 AND department = $2 AND class_division = $3",
        )
        .bind(key.batch_no)
        .bind(&key.department)
        .bind(&key.class_division)
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let members: Vec<String> = sqlx::query(
            "SELECT email_id FROM student_portal.students \
             WHERE batch_no = $1 AND department = $2 AND class_division = $3",
        )
        .bind(key.batch_no)
        .bind(&key.department)
        .bind(&key.class_division)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.try_get("email_id"))
        .collect::<Result<_, _>>()?;

        for ty in ALL_TYPES {
            sqlx::query(&format!("DELETE FROM {} WHERE email_id = ANY($1)", table(ty)))
                .bind(&members)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM student_portal.students WHERE email_id = ANY($1)")
            .bind(&members)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(members.len()))
    }

    async fn list_activities(
        &self,
        activity_type: ActivityType,
        emails: Option<&[String]>,
    ) -> anyhow::Result<Vec<ActivityRecord>> {
        let query = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM {} \
             WHERE ($1::text[] IS NULL OR email_id = ANY($1)) \
             ORDER BY created_at, id",
            table(activity_type)
        );
        let rows = sqlx::query(&query)
            .bind(emails.map(<[String]>::to_vec))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to read {activity_type} records"))?;

        rows.iter()
            .map(|row| activity_from_row(activity_type, row))
            .collect()
    }

    async fn get_activity(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ActivityRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM {} WHERE id = $1",
            table(activity_type)
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(|row| activity_from_row(activity_type, row))
            .transpose()
    }

    async fn insert_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<()> {
        let meta = proof.map(|p| &p.meta);
        sqlx::query(&format!(
            "INSERT INTO {} \
             (id, email_id, details, proof_file_name, proof_content_type, proof_size, \
              proof_uploaded_at, proof_data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            table(record.activity_type)
        ))
        .bind(record.id)
        .bind(&record.email_id)
        .bind(Json(&record.fields))
        .bind(meta.map(|m| m.file_name.clone()))
        .bind(meta.map(|m| m.content_type.clone()))
        .bind(meta.map(|m| m.size_bytes))
        .bind(meta.map(|m| m.uploaded_at))
        .bind(proof.map(|p| p.data.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<bool> {
        let target = table(record.activity_type);
        let result = match proof {
            Some(file) => {
                sqlx::query(&format!(
                    "UPDATE {target} SET details = $2, updated_at = $3, \
                     proof_file_name = $4, proof_content_type = $5, proof_size = $6, \
                     proof_uploaded_at = $7, proof_data = $8 \
                     WHERE id = $1"
                ))
                .bind(record.id)
                .bind(Json(&record.fields))
                .bind(record.updated_at)
                .bind(&file.meta.file_name)
                .bind(&file.meta.content_type)
                .bind(file.meta.size_bytes)
                .bind(file.meta.uploaded_at)
                .bind(&file.data)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE {target} SET details = $2, updated_at = $3 WHERE id = $1"
                ))
                .bind(record.id)
                .bind(Json(&record.fields))
                .bind(record.updated_at)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn delete_activity(&self, activity_type: ActivityType, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table(activity_type)))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_proof(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ProofFile>> {
        let row = sqlx::query(&format!(
            "SELECT proof_file_name, proof_content_type, proof_size, proof_uploaded_at, proof_data \
             FROM {} WHERE id = $1 AND proof_data IS NOT NULL",
            table(activity_type)
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.try_get("proof_data")?;
        Ok(Some(ProofFile {
            meta: ProofMeta {
                file_name: row
                    .try_get::<Option<String>, _>("proof_file_name")?
                    .unwrap_or_default(),
                content_type: row
                    .try_get::<Option<String>, _>("proof_content_type")?
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size_bytes: row
                    .try_get::<Option<i64>, _>("proof_size")?
                    .unwrap_or(data.len() as i64),
                uploaded_at: row
                    .try_get::<Option<DateTime<Utc>>, _>("proof_uploaded_at")?
                    .unwrap_or_else(Utc::now),
            },
            data,
        }))
    }

    async fn latest_activity_updates(
        &self,
        emails: &[String],
    ) -> anyhow::Result<HashMap<String, DateTime<Utc>>> {
        let union = ALL_TYPES
            .iter()
            .map(|ty| {
                format!(
                    "SELECT email_id, updated_at FROM {} WHERE email_id = ANY($1)",
                    table(*ty)
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let query = format!(
            "SELECT email_id, MAX(updated_at) AS latest FROM ({union}) AS touched GROUP BY email_id"
        );

        let rows = sqlx::query(&query)
            .bind(emails.to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut latest = HashMap::with_capacity(rows.len());
        for row in rows {
            latest.insert(row.try_get("email_id")?, row.try_get("latest")?);
        }
        Ok(latest)
    }

    async fn insert_message(&self, message: &ContactMessage) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO student_portal.contact_messages
            (id, name, email, message_type, subject, message, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(&message.name)
        .bind(&message.email)
        .bind(message.message_type.as_str())
        .bind(&message.subject)
        .bind(&message.message)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self) -> anyhow::Result<Vec<ContactMessage>> {
        let rows = sqlx::query(
            "SELECT id, name, email, message_type, subject, message, status, created_at \
             FROM student_portal.contact_messages ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn set_message_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> anyhow::Result<Option<ContactMessage>> {
        let row = sqlx::query(
            "UPDATE student_portal.contact_messages SET status = $2 WHERE id = $1 \
             RETURNING id, name, email, message_type, subject, message, status, created_at",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn delete_message(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM student_portal.contact_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
