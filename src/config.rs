use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::registration::Entrance;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub kiosk: KioskConfig,
    pub registration: RegistrationConfig,
    pub printer: PrinterConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct KioskConfig {
    pub entrance: Entrance,
    pub notification_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationConfig {
    pub base_url: String,
}

/// Printer endpoint used until the operator saves one
#[derive(Debug, Clone, Serialize)]
pub struct PrinterConfig {
    pub host: String,
    pub port: String,
    pub use_mock: bool,
    pub logo_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl KioskConfig {
    pub fn notification_ttl(&self) -> Duration {
        Duration::from_millis(self.notification_ttl_ms)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset and empty values mean "use the default".
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        };

        let entrance_var = var("KIOSK_ENTRANCE");
        let entrance = entrance_var
            .as_deref()
            .and_then(Entrance::parse)
            .ok_or(ConfigError::InvalidEntrance {
                value: entrance_var.clone(),
            })?;

        let ttl = var("NOTIFICATION_TTL_MS").unwrap_or_else(|| "3000".to_string());
        let kiosk = KioskConfig {
            entrance,
            notification_ttl_ms: ttl.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "NOTIFICATION_TTL_MS",
                value: ttl.clone(),
            })?,
        };

        let registration = RegistrationConfig {
            base_url: var("REGISTRATION_BASE_URL")
                .unwrap_or_else(|| "https://api.sys.soshosai.com".to_string()),
        };

        let use_mock = var("PRINTER_USE_MOCK").unwrap_or_else(|| "false".to_string());
        let printer = PrinterConfig {
            host: var("PRINTER_HOST").unwrap_or_else(|| "192.168.0.121".to_string()),
            port: var("PRINTER_PORT").unwrap_or_else(|| "8008".to_string()),
            use_mock: use_mock
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "PRINTER_USE_MOCK",
                    value: use_mock.clone(),
                })?,
            logo_path: var("LOGO_PATH").map(PathBuf::from),
        };

        let database = DatabaseConfig {
            path: var("DATABASE_PATH")
                .unwrap_or_else(|| "./kiosk.db".to_string())
                .into(),
        };

        let config = Config {
            server,
            kiosk,
            registration,
            printer,
            database,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse().map_err(|_| ConfigError::InvalidValue {
            name: "HOST",
            value: self.server.host.clone(),
        })
    }
}
