// Reception intake kiosk: keypad intake, remote group registration, ticket printing.

use actix_web::{middleware, web, App, HttpServer};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use intake_kiosk::config::{self, Config};
use intake_kiosk::device::DeviceSession;
use intake_kiosk::errors::AppError;
use intake_kiosk::notifications::Notifier;
use intake_kiosk::registration::HttpRegistrationClient;
use intake_kiosk::routes;
use intake_kiosk::settings::{self, PrinterSettings};
use intake_kiosk::submission::Submitter;
use intake_kiosk::{escpos, new_printer, Kiosk};

// ============================================================================
// Application State
// ============================================================================

/// Centralized application state container
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db_pool: SqlitePool,
    pub kiosk: Arc<Kiosk>,
}

impl AppState {
    /// Create a new application state instance
    async fn new(config: Config) -> Result<Self, AppError> {
        info!("Initializing application state");

        let db_pool = Self::initialize_database(&config.database).await?;

        let transport = new_printer(config.printer.use_mock);
        let mut device = DeviceSession::new(transport);
        let printer_state = device.watch_state();
        let print_events = device
            .take_events()
            .ok_or_else(|| AppError::Initialization("print events already taken".to_string()))?;
        let device = Arc::new(AsyncMutex::new(device));

        let logo = config.printer.logo_path.as_deref().and_then(|path| {
            let logo = escpos::process_logo(path);
            if logo.is_none() {
                warn!("Logo {:?} unusable, tickets will print without it", path);
            }
            logo
        });

        let registration = HttpRegistrationClient::new(&config.registration.base_url)
            .map_err(|e| {
                AppError::Initialization(format!("Failed to build registration client: {}", e))
            })?;
        info!("Registration endpoint: {}", registration.endpoint());

        let notifier = Arc::new(Notifier::new(config.kiosk.notification_ttl()));
        let submitter = Submitter::new(
            Arc::new(registration),
            device.clone(),
            notifier.clone(),
            config.kiosk.entrance,
            logo,
        );
        let kiosk = Arc::new(Kiosk::new(submitter, device, printer_state, notifier));
        kiosk.watch_print_events(print_events);

        Ok(Self {
            config,
            db_pool,
            kiosk,
        })
    }

    async fn initialize_database(
        db_config: &config::DatabaseConfig,
    ) -> Result<SqlitePool, AppError> {
        info!("Initializing settings store at: {:?}", db_config.path);

        if let Some(parent) = db_config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Initialization(format!("Failed to create database directory: {}", e))
            })?;
        }

        let pool = settings::open_store(&db_config.connection_string()).await?;

        info!("Settings store connected and migrations completed");
        Ok(pool)
    }
}

// ============================================================================
// Printer Connection
// ============================================================================

/// Connect to the saved printer. Failure is reported, not fatal.
async fn initialize_printer(state: &AppState) {
    let defaults = routes::default_printer_settings(&state.config);
    let saved = match PrinterSettings::load(&state.db_pool, &defaults).await {
        Ok(saved) => saved,
        Err(e) => {
            warn!("Failed to load printer settings, using defaults: {}", e);
            defaults
        }
    };

    info!("Connecting to printer at {}:{}", saved.host, saved.port);
    if let Err(e) = state.kiosk.connect_saved(&saved).await {
        warn!("Printer connection failed (non-critical): {}", e);
        warn!("Kiosk will accept input; reconnect from the operator screen");
    }
}

// ============================================================================
// Shutdown Handling
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn cleanup_resources(state: AppState) {
    info!("Beginning resource cleanup");

    let snapshot = state.kiosk.snapshot();
    if snapshot.busy || !snapshot.session.members.is_empty() {
        warn!(
            "Discarding unfinished intake with {} member(s)",
            snapshot.session.members.len()
        );
    }

    state.db_pool.close().await;
    info!("Settings store closed");

    info!("Resource cleanup complete");
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ========================================
    // Phase 1: Basic Initialization
    // ========================================

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting intake kiosk");

    // ========================================
    // Phase 2: Configuration & State Setup
    // ========================================

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to load configuration: {}", e),
        )
    })?;

    let socket_addr = config.socket_addr().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    info!("Configuration loaded successfully");
    info!(
        "Entrance '{}', server will bind to: {}",
        config.kiosk.entrance.name(),
        socket_addr
    );

    let app_state = AppState::new(config.clone()).await.map_err(|e| {
        error!("Application initialization error: {}", e);
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to initialize application: {}", e),
        )
    })?;

    // ========================================
    // Phase 3: Printer Connection
    // ========================================

    initialize_printer(&app_state).await;

    // ========================================
    // Phase 4: HTTP Server Setup
    // ========================================

    let app_state_for_server = app_state.clone();

    let server = HttpServer::new(move || {
        let state = app_state_for_server.clone();
        App::new()
            // Middleware
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            // Application state
            .app_data(web::Data::new(state.config.clone()))
            .app_data(web::Data::new(state.db_pool.clone()))
            .app_data(web::Data::new(state.kiosk.clone()))
            // Status
            .service(routes::health)
            .service(routes::kiosk_state)
            // Intake input
            .service(routes::input_key)
            .service(routes::input_age)
            .service(routes::input_gender)
            .service(routes::retry_intake)
            .service(routes::reset_intake)
            // Printer
            .service(routes::printer_status)
            .service(routes::connect_printer)
            // Notifications
            .service(routes::list_notifications)
            .service(routes::notification_stream)
    })
    .bind(socket_addr)?
    .shutdown_timeout(5)
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(async move { server.await });

    info!("Intake kiosk server started on {}", socket_addr);
    info!("System ready for operation");

    // ========================================
    // Phase 5: Run Until Shutdown
    // ========================================

    shutdown_signal().await;

    // ========================================
    // Phase 6: Graceful Shutdown
    // ========================================

    info!("Initiating graceful shutdown...");

    server_handle.stop(true).await;

    cleanup_resources(app_state).await;

    server_task.await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Server task error: {}", e),
        )
    })??;

    info!("Graceful shutdown complete");
    Ok(())
}
