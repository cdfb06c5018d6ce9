//! Collaborator traits consumed by the consensus core.

use aedpos_types::MinerList;

/// Election service that decides the miners of the next term.
///
/// Consulted only when a round change also changes the term. Implementors
/// must be deterministic for a given chain state: every node that
/// generates or validates the same NextTerm block must see the same list.
pub trait ElectionProvider: Send + Sync {
    /// Ordered winners of the current election (GetVictories).
    ///
    /// An empty list means "no election result"; the consensus core then
    /// keeps the current miners.
    fn victories(&self) -> MinerList;
}
