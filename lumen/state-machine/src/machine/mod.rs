#![warn(clippy::missing_docs_in_private_items)]

/// The chain-level dispatcher glue.
pub mod chain;
/// The bilateral channel engine.
pub mod channel;
/// The initiator state machine.
pub mod initiator;
/// The mediator state machine.
pub mod mediator;
/// The lock tree.
pub mod mtree;
/// Route candidate selection.
pub mod routes;
/// On-chain secret registration helpers.
pub mod secret_registry;
/// Helpers shared by the payment machines.
pub mod utils;
