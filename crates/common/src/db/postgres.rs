//! PostgreSQL + PostGIS alert store

use super::{AlertStore, InsertOutcome};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::models::{EnrichedAlert, Entity, GeoPoint, SeverityBand, SRID};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, FromQueryResult,
    Statement, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS alerts (
    id             TEXT PRIMARY KEY,
    source         TEXT NOT NULL,
    title          TEXT NOT NULL,
    summary        TEXT NOT NULL,
    published_at   TIMESTAMPTZ,
    violence_score NUMERIC NOT NULL,
    fetched_at     TIMESTAMPTZ NOT NULL,
    geom           GEOMETRY(Point, 4326),
    entities       JSONB NOT NULL DEFAULT '[]'::jsonb,
    activities     TEXT[] NOT NULL,
    severity_band  TEXT NOT NULL,
    language       TEXT NOT NULL DEFAULT 'en',
    image_url      TEXT
);

CREATE INDEX IF NOT EXISTS alerts_geom_idx ON alerts USING GIST (geom);
CREATE INDEX IF NOT EXISTS alerts_published_at_idx ON alerts (published_at);
"#;

const INSERT_ALERT: &str = r#"
INSERT INTO alerts (
    id, source, title, summary, published_at, violence_score, fetched_at,
    geom, entities, activities, severity_band, language, image_url
)
VALUES (
    $1, $2, $3, $4, $5, CAST($6 AS NUMERIC), $7,
    ST_GeomFromText($8, $9), $10, $11, $12, $13, $14
)
ON CONFLICT (id) DO NOTHING
"#;

const SELECT_ALERT: &str = r#"
SELECT id, source, title, summary, published_at,
       CAST(violence_score AS DOUBLE PRECISION) AS violence_score,
       fetched_at, ST_AsText(geom) AS geom_wkt, entities, activities,
       severity_band, language, image_url
FROM alerts
WHERE id = $1
"#;

#[derive(Debug, FromQueryResult)]
struct AlertRow {
    id: String,
    source: String,
    title: String,
    summary: String,
    published_at: Option<DateTime<Utc>>,
    violence_score: f64,
    fetched_at: DateTime<Utc>,
    geom_wkt: Option<String>,
    entities: serde_json::Value,
    activities: Vec<String>,
    severity_band: String,
    language: String,
    image_url: Option<String>,
}

impl TryFrom<AlertRow> for EnrichedAlert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> Result<Self> {
        let severity_band: SeverityBand = row.severity_band.parse()?;

        let entities: Vec<Entity> = serde_json::from_value(row.entities)?;
        let geom = row.geom_wkt.as_deref().map(GeoPoint::from_wkt).transpose()?;

        Ok(Self {
            id: row.id,
            source: row.source,
            title: row.title,
            summary: row.summary,
            published_at: row.published_at,
            violence_score: row.violence_score,
            severity_band,
            activities: row.activities,
            fetched_at: row.fetched_at,
            geom,
            entities,
            language: row.language,
            image_url: row.image_url,
        })
    }
}

/// Store backed by a single PostgreSQL connection
pub struct PgAlertStore {
    config: DatabaseConfig,
    conn: Option<DatabaseConnection>,
}

impl PgAlertStore {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config, conn: None }
    }

    fn conn(&self) -> Result<&DatabaseConnection> {
        self.conn.as_ref().ok_or_else(|| AppError::DatabaseConnection {
            message: "Not connected".to_string(),
        })
    }

    fn insert_statement(alert: &EnrichedAlert) -> Result<Statement> {
        let entities = serde_json::to_value(&alert.entities)?;

        Ok(Statement::from_sql_and_values(
            DbBackend::Postgres,
            INSERT_ALERT,
            vec![
                alert.id.clone().into(),
                alert.source.clone().into(),
                alert.title.clone().into(),
                alert.summary.clone().into(),
                alert.published_at.into(),
                alert.violence_score.into(),
                alert.fetched_at.into(),
                alert.geom.map(|g| g.to_wkt()).into(),
                SRID.into(),
                entities.into(),
                alert.activities.clone().into(),
                alert.severity_band.as_str().into(),
                alert.language.clone().into(),
                alert.image_url.clone().into(),
            ],
        ))
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;

        let mut opts = ConnectOptions::new(&self.config.url);
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        conn.execute_unprepared(SCHEMA).await?;

        info!("Database connected, schema ready");
        self.conn = Some(conn);
        Ok(())
    }

    async fn insert_alert(&mut self, alert: &EnrichedAlert) -> Result<InsertOutcome> {
        let stmt = Self::insert_statement(alert)?;
        let txn = self.conn()?.begin().await?;

        let rows = match txn.execute(stmt).await {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e.into());
            }
        };

        txn.commit().await?;

        let outcome = if rows == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        };
        debug!(id = %alert.id, ?outcome, "Alert insert committed");
        Ok(outcome)
    }

    async fn fetch_alert(&mut self, id: &str) -> Result<Option<EnrichedAlert>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, SELECT_ALERT, [id.into()]);

        AlertRow::find_by_statement(stmt)
            .one(self.conn()?)
            .await?
            .map(EnrichedAlert::try_from)
            .transpose()
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Error closing database connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> EnrichedAlert {
        EnrichedAlert {
            id: "a1".to_string(),
            source: "Wire".to_string(),
            title: "Riot".to_string(),
            summary: "Riot in Lagos".to_string(),
            published_at: None,
            violence_score: 0.91,
            severity_band: SeverityBand::High,
            activities: vec!["civil-unrest".to_string()],
            fetched_at: Utc::now(),
            geom: Some(GeoPoint { lon: 3.38, lat: 6.45 }),
            entities: vec![Entity::new("Lagos", "GPE")],
            language: "en".to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_insert_binds_every_column() {
        let stmt = PgAlertStore::insert_statement(&alert()).unwrap();
        assert!(stmt.sql.contains("ON CONFLICT (id) DO NOTHING"));
        assert_eq!(stmt.values.map(|v| v.0.len()), Some(14));
    }

    #[test]
    fn test_schema_has_spatial_and_time_indexes() {
        assert!(SCHEMA.contains("USING GIST (geom)"));
        assert!(SCHEMA.contains("alerts (published_at)"));
        assert!(SCHEMA.contains("GEOMETRY(Point, 4326)"));
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut store = PgAlertStore::new(DatabaseConfig::default());
        let err = store.insert_alert(&alert()).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(store.fetch_alert("a1").await.unwrap_err().is_connection_error());
        store.close().await;
    }

    #[test]
    fn test_row_conversion() {
        let row = AlertRow {
            id: "a1".to_string(),
            source: "Wire".to_string(),
            title: "Riot".to_string(),
            summary: "Riot in Lagos".to_string(),
            published_at: None,
            violence_score: 0.91,
            fetched_at: Utc::now(),
            geom_wkt: Some("POINT(3.38 6.45)".to_string()),
            entities: serde_json::json!([{"text": "Lagos", "label": "GPE"}]),
            activities: vec!["civil-unrest".to_string()],
            severity_band: "high".to_string(),
            language: "en".to_string(),
            image_url: None,
        };

        let alert = EnrichedAlert::try_from(row).unwrap();
        assert_eq!(alert.geom, Some(GeoPoint { lon: 3.38, lat: 6.45 }));
        assert_eq!(alert.severity_band, SeverityBand::High);
        assert_eq!(alert.entities, vec![Entity::new("Lagos", "GPE")]);
    }
}
