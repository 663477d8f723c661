//! External collaborators the engine talks to through narrow interfaces.

/// Current time and local-time conversion
pub mod clock;
/// Operator lookup
pub mod directory;
/// Mail delivery
pub mod mail;

pub use clock::{Clock, SystemClock};
pub use directory::{DbOperatorDirectory, OperatorDirectory};
pub use mail::{DisabledTransport, HttpMailTransport, MailTransport, OutgoingMail, TransportError};
