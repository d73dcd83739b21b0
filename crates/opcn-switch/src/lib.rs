//! OPCN switch layer
//!
//! The forwarding switch binds an incoming HTLC on one channel to an
//! outgoing HTLC on another and propagates resolutions backward, the event
//! publisher turns every local HTLC resolution into an auditable
//! SEND/FORWARD/RECEIVE record, and the payment registry tracks payments
//! this node originated.

pub mod error;
pub mod events;
pub mod payments;
pub mod switch;

pub use error::{PaymentError, SwitchError};
pub use events::{EventPublisher, HtlcEvent, HtlcEventStream, HtlcRole};
pub use payments::{PaymentOutcome, PaymentRegistry};
pub use switch::{ForwardingPair, ForwardingSwitch};
