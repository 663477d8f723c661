//! Core business logic - framework-agnostic entitlement, workflow and alerting operations.

/// Alert delivery, recipient resolution and the alert log
pub mod dispatch;
/// Facade composing transitions with their alerts
pub mod engine;
/// Included-intervention quota accounting and active contract selection
pub mod entitlement;
/// Events emitted by state transitions
pub mod events;
/// Intervention lifecycle: open, closed, invoiced
pub mod intervention;
/// Alert templates and message composition
pub mod message;
/// Renewal lifecycle stages
pub mod renewal;
/// Recurring notification rules
pub mod schedule;
