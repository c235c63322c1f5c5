use tessera_store::DocumentStore;
use tracing::debug;

use crate::session::{DocumentSession, SessionResult};

/// Summary of a completed [`sync_pair`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Packets delivered, counting both directions.
    pub rounds: usize,
    /// Fragments carried across.
    pub fragments_transferred: usize,
    /// Whether both indexes ended with the same root digest.
    pub converged: bool,
}

/// Run a full exchange between two sessions of the same document in one
/// process, starting from `a`. Stops when neither side has anything left to
/// send or after `max_rounds` packets.
///
/// Drift-rejected fragments can leave the two sides apart; `converged`
/// reports it.
pub async fn sync_pair<S: DocumentStore>(
    a: &DocumentSession<S>,
    b: &DocumentSession<S>,
    max_rounds: usize,
) -> SessionResult<SyncReport, S> {
    let mut report = SyncReport::default();
    let mut packet = a.prepare_sync().await?;
    let (mut to, mut from) = (b, a);

    while !packet.is_empty() && report.rounds < max_rounds {
        report.rounds += 1;
        report.fragments_transferred += packet.fragments.len();
        debug!(
            round = report.rounds,
            to = to.node_id(),
            messages = packet.messages.len(),
            fragments = packet.fragments.len(),
            "delivering sync packet"
        );
        packet = to.handle_sync(packet).await?;
        std::mem::swap(&mut to, &mut from);
    }

    let (left, right) = (a.status().await?, b.status().await?);
    report.converged = packet.is_empty() && left.key == right.key;
    Ok(report)
}
