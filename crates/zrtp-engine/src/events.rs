//! The small vocabulary of things that can happen to a channel: an inbound message, a timer firing, a host request to go
//! clear or back to secure, and the handful of status notifications the
//! engine pushes back out through `Callbacks`.

use zrtp_proto::MessageType;

/// Something the host (or the timer) hands to `Channel::handle`.
#[derive(Debug, Clone)]
pub enum Event<'a> {
    /// Start the handshake on this channel (host calls `start_channel`).
    Init,
    /// A ZRTP message arrived, already reassembled and MAC/hash-chain
    /// unverified — verification happens inside the state handler since it
    /// depends on which fields are in scope for the current state. `body`
    /// is the complete message, 12-byte header included, matching what
    /// `zrtp_proto::codec` expects and what the transcript stores verbatim.
    Message {
        message_type: MessageType,
        body: &'a [u8],
    },
    /// The per-channel retransmission timer fired.
    Timer,
    /// The host asked to leave secure mode (SIP hold, media restart, ...).
    GoClear,
    /// The host accepted an inbound GoClear request.
    AcceptGoClear,
    /// The host asked to resume a secure session from clear.
    BackToSecure,
}

/// What the engine reports to the host through `Callbacks::status_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    SecureEstablished,
    CacheMismatch,
    ProtocolError,
    WentClear,
    BackToSecureStarted,
}
