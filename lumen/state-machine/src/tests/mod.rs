mod channel;
mod factories;
mod initiator;
mod mediator;
mod mtree;
