//! Order and payment aggregates and the events they raise.

mod events;
mod order;
mod payment;
mod status;

pub use events::{DomainEvent, PendingEvents};
pub use order::{Order, OrderItem};
pub use payment::Payment;
pub use status::{OrderStatus, PaymentProvider, PaymentStatus, Transition};
