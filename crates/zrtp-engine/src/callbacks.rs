//! Host callback surface: the engine never touches a socket
//! or a UI directly, it calls back into whatever the host wired up.

use crate::events::StatusEvent;

/// Implemented by the host application. `send_data` is the only method
/// without a default because a channel that cannot send packets cannot do
/// anything useful; the rest have reasonable no-op defaults so a minimal
/// integration only has to implement transport.
pub trait Callbacks {
    /// Send a fully built packet (envelope + message + CRC) to the peer on
    /// the given channel.
    fn send_data(&mut self, channel_id: usize, packet: &[u8]);

    /// A protocol-level event worth surfacing to the host.
    fn status_event(&mut self, channel_id: usize, event: StatusEvent) {
        let _ = (channel_id, event);
    }

    /// The SAS is ready to show the user. `verified` reflects whether the
    /// cache already held a `previously_verified_sas` flag for this peer.
    fn sas_ready(&mut self, channel_id: usize, sas: &str, verified: bool) {
        let _ = (channel_id, sas, verified);
    }

    /// Lets the host gate acceptance of a peer's public value before it is
    /// used (e.g. a policy check against a pinned DH group). Default
    /// accepts everything.
    fn pv_check(&mut self, channel_id: usize, peer_public: &[u8]) -> bool {
        let _ = (channel_id, peer_public);
        true
    }
}
