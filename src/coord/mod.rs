//! Session coordination: the shared record that tells every process where the
//! producer publishes and which role each consumer gets.

pub mod record;
pub mod role;
pub mod store;

pub use record::CoordinationRecord;
pub use role::{format_roles, generate_roles, Role, SessionRole};
pub use store::RecordStore;
