// Route modules organization

pub mod base_routes;
pub mod input_routes;
pub mod notification_routes;
pub mod printer_routes;

// Re-export all routes for convenience
pub use base_routes::*;
pub use input_routes::*;
pub use notification_routes::*;
pub use printer_routes::*;
