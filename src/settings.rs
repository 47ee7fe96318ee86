use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::SettingsError;

const PRINTER_HOST_KEY: &str = "printer.host";
const PRINTER_PORT_KEY: &str = "printer.port";

/// Printer endpoint as last saved by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterSettings {
    pub host: String,
    pub port: String,
}

impl PrinterSettings {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Load the stored endpoint, falling back to `defaults` per key
    pub async fn load(pool: &SqlitePool, defaults: &PrinterSettings) -> Result<Self, SettingsError> {
        let host = get(pool, PRINTER_HOST_KEY).await?;
        let port = get(pool, PRINTER_PORT_KEY).await?;

        Ok(Self {
            host: host.unwrap_or_else(|| defaults.host.clone()),
            port: port.unwrap_or_else(|| defaults.port.clone()),
        })
    }

    /// Save both keys. Values are stored as entered; validation happens on connect.
    pub async fn save(&self, pool: &SqlitePool) -> Result<(), SettingsError> {
        let mut tx = pool.begin().await?;
        for (key, value) in [(PRINTER_HOST_KEY, &self.host), (PRINTER_PORT_KEY, &self.port)] {
            sqlx::query(
                r#"
                INSERT INTO setting (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(|e| SettingsError::QueryFailed(format!("Failed to save {}: {}", key, e)))?;
        }
        tx.commit().await?;

        info!("Printer settings saved: {}:{}", self.host, self.port);
        Ok(())
    }
}

async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, SettingsError> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM setting WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| SettingsError::QueryFailed(format!("Failed to load {}: {}", key, e)))?;

    Ok(value)
}

/// Open the settings database and apply embedded migrations
pub async fn open_store(connection_string: &str) -> Result<SqlitePool, SettingsError> {
    let pool = SqlitePool::connect(connection_string)
        .await
        .map_err(|e| SettingsError::ConnectionFailed(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| SettingsError::MigrationFailed(e.to_string()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqlitePool {
        open_store("sqlite::memory:").await.unwrap()
    }

    fn defaults() -> PrinterSettings {
        PrinterSettings::new("192.168.0.121", "8008")
    }

    #[tokio::test]
    async fn test_load_defaults_when_empty() {
        let pool = memory_store().await;
        let settings = PrinterSettings::load(&pool, &defaults()).await.unwrap();
        assert_eq!(settings, defaults());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let pool = memory_store().await;
        PrinterSettings::new("10.0.0.7", "9100").save(&pool).await.unwrap();

        let settings = PrinterSettings::load(&pool, &defaults()).await.unwrap();
        assert_eq!(settings, PrinterSettings::new("10.0.0.7", "9100"));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let pool = memory_store().await;
        PrinterSettings::new("10.0.0.7", "9100").save(&pool).await.unwrap();
        PrinterSettings::new("10.0.0.8", "abc").save(&pool).await.unwrap();

        let settings = PrinterSettings::load(&pool, &defaults()).await.unwrap();
        assert_eq!(settings, PrinterSettings::new("10.0.0.8", "abc"));
    }
}
