pub mod controller;
pub mod state;

pub use controller::ReconcileController;
pub use state::{ReconcileState, SyncStatus};
