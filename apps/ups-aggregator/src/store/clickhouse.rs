use super::{ReadingBatch, ReadingStore};
use crate::error::WriteError;
use crate::readings::Reading;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::insert::Insert;
use clickhouse::{Client, Compression, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PowerReadingRow {
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    #[serde(rename = "Watts")]
    pub watts: f32,
    #[serde(rename = "Timestamp", with = "clickhouse::serde::chrono::datetime")]
    pub timestamp: DateTime<Utc>,
}

impl From<&Reading> for PowerReadingRow {
    fn from(reading: &Reading) -> Self {
        Self {
            device_id: reading.device_id,
            display_name: reading.display_name.clone(),
            watts: reading.watts,
            timestamp: reading.timestamp,
        }
    }
}

#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
    database: String,
    table: String,
}

impl ClickHouseStore {
    pub fn new(url: &str, database: &str, username: &str, password: &str, table: &str) -> Self {
        let client = Client::default()
            .with_url(url)
            .with_database(database)
            .with_user(username)
            .with_password(password)
            .with_compression(Compression::Lz4);

        Self {
            client,
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    /// Verifies the server is reachable and provisions the readings table.
    pub async fn connect(
        url: &str,
        database: &str,
        username: &str,
        password: &str,
        table: &str,
    ) -> Result<Self> {
        let store = Self::new(url, database, username, password, table);
        let version = store
            .server_version()
            .await
            .with_context(|| format!("failed to reach ClickHouse at {url}"))?;
        tracing::info!(version = %version, url = %url, "connected to clickhouse server");

        store
            .ensure_schema()
            .await
            .with_context(|| format!("failed to create {}", store.qualified_table()))?;
        Ok(store)
    }

    pub async fn server_version(&self) -> clickhouse::error::Result<String> {
        self.client
            .query("SELECT version()")
            .fetch_one::<String>()
            .await
    }

    pub async fn ensure_schema(&self) -> clickhouse::error::Result<()> {
        self.client.query(&self.create_table_sql()).execute().await?;
        tracing::debug!(table = %self.qualified_table(), "ensured power readings table");
        Ok(())
    }

    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
CREATE TABLE IF NOT EXISTS {} (
    DeviceID UInt32,
    DisplayName String,
    Watts Float32,
    Timestamp DateTime
)
ENGINE = MergeTree
PRIMARY KEY (DeviceID, Timestamp)
"#,
            self.qualified_table()
        )
    }
}

#[async_trait]
impl ReadingStore for ClickHouseStore {
    type Batch = ClickHouseBatch;

    async fn open_batch(&self) -> Result<Self::Batch, WriteError> {
        let insert = self
            .client
            .insert::<PowerReadingRow>(&self.table)
            .await
            .map_err(|err| WriteError::Open(Box::new(err)))?;
        Ok(ClickHouseBatch {
            insert: Some(insert),
            rows: 0,
        })
    }
}

pub struct ClickHouseBatch {
    insert: Option<Insert<PowerReadingRow>>,
    rows: u64,
}

#[async_trait]
impl ReadingBatch for ClickHouseBatch {
    async fn append(&mut self, reading: &Reading) -> Result<(), WriteError> {
        validate(reading)?;
        let insert = self
            .insert
            .as_mut()
            .ok_or_else(|| WriteError::Unavailable("batch already committed".to_string()))?;

        let row = PowerReadingRow::from(reading);
        insert
            .write(&row)
            .await
            .map_err(|err| WriteError::Append {
                device_id: reading.device_id,
                reason: err.to_string(),
            })?;
        self.rows += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<u64, WriteError> {
        let insert = self
            .insert
            .take()
            .ok_or_else(|| WriteError::Unavailable("batch already committed".to_string()))?;
        insert
            .end()
            .await
            .map_err(|err| WriteError::Commit(Box::new(err)))?;
        Ok(self.rows)
    }
}

fn validate(reading: &Reading) -> Result<(), WriteError> {
    if !reading.watts.is_finite() {
        return Err(WriteError::Append {
            device_id: reading.device_id,
            reason: format!("non-finite wattage {}", reading.watts),
        });
    }
    Ok(())
}
