use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use crate::common::{DisputeId, EvidenceId, UserId};

/// Append-only evidence/comment log for a dispute. Rows are never edited or
/// deleted; adding one does not change the dispute's status.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DisputeEvidence {
    pub id: EvidenceId,
    pub dispute_id: DisputeId,
    pub author_id: UserId,
    pub kind: String, // 'evidence', 'comment'
    pub body: String,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Evidence kind enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Evidence,
    Comment,
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceKind::Evidence => write!(f, "evidence"),
            EvidenceKind::Comment => write!(f, "comment"),
        }
    }
}

impl std::str::FromStr for EvidenceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "evidence" => Ok(EvidenceKind::Evidence),
            "comment" => Ok(EvidenceKind::Comment),
            _ => Err(anyhow::anyhow!("Invalid evidence kind: {}", s)),
        }
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl DisputeEvidence {
    pub async fn insert(
        dispute_id: DisputeId,
        author_id: UserId,
        kind: EvidenceKind,
        body: &str,
        attachment_url: Option<&str>,
        conn: &mut PgConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DisputeEvidence>(
            "INSERT INTO dispute_evidence (id, dispute_id, author_id, kind, body, attachment_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(EvidenceId::new())
        .bind(dispute_id)
        .bind(author_id)
        .bind(kind.to_string())
        .bind(body)
        .bind(attachment_url)
        .fetch_one(conn)
        .await
    }

    pub async fn list_for_dispute(
        dispute_id: DisputeId,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DisputeEvidence>(
            "SELECT * FROM dispute_evidence
             WHERE dispute_id = $1
             ORDER BY created_at",
        )
        .bind(dispute_id)
        .fetch_all(pool)
        .await
    }
}
