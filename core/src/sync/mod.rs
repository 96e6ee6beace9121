//! Device synchronization (session state machine, state store, manager)

pub mod manager;
pub mod retry;
pub mod session;
pub mod state;

pub use manager::{ManagerError, SessionManager};
pub use retry::RetryPolicy;
pub use session::{SessionError, SyncSession};
pub use state::{
    SessionStateStore, StateSubscription, SyncFailure, SyncState, DEFAULT_STATE_BUFFER,
};
