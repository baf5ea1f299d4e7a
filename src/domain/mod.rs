//! Payment domain: the aggregate, its state machine and the events it emits.

pub mod events;
pub mod payment;
pub mod tax_id;

pub use events::{PaymentEventKind, PaymentEventPayload, PaymentStatusChanged};
pub use payment::{InvalidTransition, Payment, PaymentMethod, PaymentStatus};
pub use tax_id::{TaxId, TaxIdError, SENTINEL_TAX_ID};
