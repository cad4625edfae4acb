//! The single-writer chain worker described in spec §5: one task owns the
//! `Chain` and `Mempool` outright and serializes every mutation behind a
//! bounded ingress channel. External collaborators (network ingress, RPC,
//! the miner) are not implemented here — per §1 they are out of scope — but
//! this is the actor surface they would each hold a [`ChainHandle`] to.

pub mod worker;

pub use worker::{ChainCommand, ChainHandle, ChainWorker, SubmitResult};
