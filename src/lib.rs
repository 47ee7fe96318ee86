// Library module organization

pub mod config;
pub mod device;
pub mod errors;
pub mod escpos;
pub mod intake;
pub mod kiosk;
pub mod notifications;
pub mod printers;
pub mod receipt;
pub mod registration;
pub mod routes;
pub mod settings;
pub mod submission;

// Re-export commonly used types for convenience
pub use device::{ConnectionState, DeviceSession, PrintEvent, PrinterDevice, PrinterTransport};
pub use errors::{AppError, ConnectionError, PrintError, SubmissionError};
pub use intake::{AgeBracket, Gender, IntakeEvent, IntakeSession, MemberRecord, Transition};
pub use kiosk::Kiosk;
pub use printers::{new_printer, MockPrinter, NetworkPrinter};
pub use registration::{Entrance, HttpRegistrationClient, RegistrationService};
