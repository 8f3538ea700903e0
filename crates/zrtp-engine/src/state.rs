//! The ten-state handshake: one `dispatch` entry point that
//! takes a channel out of the session's table, runs exactly one event
//! through it, and puts it back — so the handlers below can freely borrow
//! `session` for cache/timer/send access without fighting the borrow
//! checker over `session.channels[id]`.
//!
//! Every state/event pair not handled below falls through to
//! [`EngineError::UnexpectedEvent`] and leaves the channel untouched
//!.

use zrtp_cache::ZidCache;
use zrtp_crypto::hash::hash;
use zrtp_crypto::keyagreement::KeyAgreementContext;
use zrtp_crypto::keyschedule::{
    self, aux_secret_id, derive_keys, derive_s0_dh, derive_s0_multistream, random_secret_id,
    roll_retained_secret,
};
use zrtp_crypto::primitives::{HashAlgorithm, KeyAgreementAlgorithm};
use zrtp_proto::message::{
    Commit, CommitVariable, Confirm, ConfirmFlags, DhPart, GoClear, Hello, HelloFlags,
    MessageType, Ping, MESSAGE_HEADER_LEN,
};
use zrtp_proto::{codec, ProtoError};

use crate::callbacks::Callbacks;
use crate::channel::{Channel, PacketSlot, Role};
use crate::error::EngineError;
use crate::events::{Event, StatusEvent};
use crate::handshake;
use crate::session::{CachedSecretIds, Session};
use crate::timer::TimerClass;

/// One channel's position in the handshake. `SendingGoClear` only exists
/// between a host-initiated `GoClear` and the peer's `ClearAck`; every
/// other secure-to-clear path (accepting the peer's GoClear) moves
/// straight to `Clear` without passing through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    DiscoveryInit,
    DiscoveryWaitingForHello,
    DiscoveryWaitingForHelloAck,
    KeyAgreementSendingCommit,
    KeyAgreementResponderSendingDhPart1,
    KeyAgreementInitiatorSendingDhPart2,
    ConfirmationResponderSendingConfirm1,
    ConfirmationInitiatorSendingConfirm2,
    Secure,
    SendingGoClear,
    Clear,
}

const DEFAULT_CACHE_EXPIRATION_SECS: u32 = 31_536_000;

/// Runs `event` against `channel_id`'s current state, then keeps feeding
/// `Init` back through for as long as a handler asks for an immediate
/// follow-up.
pub async fn dispatch<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel_id: usize,
    event: Event<'_>,
) -> Result<(), EngineError> {
    let mut auto_continue = handle_once(session, channel_id, event).await?;
    while auto_continue {
        auto_continue = handle_once(session, channel_id, Event::Init).await?;
    }
    Ok(())
}

async fn handle_once<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel_id: usize,
    event: Event<'_>,
) -> Result<bool, EngineError> {
    let mut channel = session.channels[channel_id]
        .take()
        .ok_or(EngineError::NoSuchChannel(channel_id))?;

    let result = step(session, &mut channel, event).await;

    session.channels[channel_id] = Some(channel);
    result
}

/// Intercepts the handful of message types that sit outside the ten-state
/// handshake (Ping/PingACK, Error/ErrorACK) before falling into the main
/// per-state table, then dispatches non-message events and the remaining
/// message types through [`step_message`].
async fn step<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    event: Event<'_>,
) -> Result<bool, EngineError> {
    if let Event::Message { message_type, body } = event {
        match message_type {
            MessageType::Ping => {
                let ping = Ping::decode(&body[MESSAGE_HEADER_LEN..])?;
                let ack = handshake::build_ping_ack(session.self_zid, ping.endpoint_hash, ping.ssrc);
                session.send_message(channel, &ack);
                return Ok(false);
            }
            MessageType::PingAck => {
                return Ok(false);
            }
            MessageType::Error => {
                tracing::warn!(channel_id = channel.id, "peer reported a ZRTP Error");
                session.callbacks.status_event(channel.id, StatusEvent::ProtocolError);
                let ack = codec::encode_message(MessageType::ErrorAck, &[]);
                session.send_message(channel, &ack);
                return Ok(false);
            }
            MessageType::ErrorAck => {
                return Ok(false);
            }
            _ => {}
        }
    }
    step_message(session, channel, event).await
}

async fn step_message<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    event: Event<'_>,
) -> Result<bool, EngineError> {
    use MessageType::*;
    use State::*;

    match (channel.state, &event) {
        // ---- discovery_init ------------------------------------------------
        (DiscoveryInit, Event::Init) => {
            build_and_send_hello(session, channel);
            channel.timer.start(TimerClass::Hello, session.time_reference);
            Ok(false)
        }
        (DiscoveryInit, Event::Message { message_type: Hello, body }) => {
            respond_to_hello(session, channel, body).await?;
            channel.state = DiscoveryWaitingForHelloAck;
            Ok(false)
        }
        (DiscoveryInit, Event::Message { message_type: HelloAck, .. }) => {
            channel.timer.stop();
            channel.state = DiscoveryWaitingForHello;
            Ok(false)
        }

        // ---- discovery_waitingForHello --------------------------------------
        (DiscoveryWaitingForHello, Event::Message { message_type: Hello, body }) => {
            respond_to_hello(session, channel, body).await?;
            channel.state = KeyAgreementSendingCommit;
            Ok(true)
        }

        // ---- discovery_waitingForHelloAck ------------------------------------
        (DiscoveryWaitingForHelloAck, Event::Message { message_type: Hello, body }) => {
            match channel.peer_packets.get(PacketSlot::Hello) {
                Some(stored) if stored == *body => {
                    send_hello_ack(session, channel);
                    Ok(false)
                }
                Some(_) => Err(EngineError::UnmatchingPacketRepetition),
                None => {
                    respond_to_hello(session, channel, body).await?;
                    Ok(false)
                }
            }
        }
        (DiscoveryWaitingForHelloAck, Event::Message { message_type: HelloAck, .. }) => {
            channel.timer.stop();
            channel.state = KeyAgreementSendingCommit;
            Ok(true)
        }
        (DiscoveryWaitingForHelloAck, Event::Message { message_type: Commit, body }) => {
            turn_into_responder(session, channel, body).await?;
            Ok(true)
        }
        (DiscoveryWaitingForHelloAck, Event::Timer) => {
            if let Some(hello) = channel.self_packets.get(PacketSlot::Hello).map(<[u8]>::to_vec) {
                session.send_message(channel, &hello);
            }
            Ok(false)
        }

        // ---- keyAgreement_sendingCommit ---------------------------------------
        (KeyAgreementSendingCommit, Event::Init) => {
            build_and_send_commit(session, channel)?;
            channel.timer.start(TimerClass::NonHello, session.time_reference);
            Ok(false)
        }
        (KeyAgreementSendingCommit, Event::Message { message_type: Commit, body }) => {
            resolve_commit_contention(session, channel, body).await
        }
        (KeyAgreementSendingCommit, Event::Message { message_type: DhPart1, body }) => {
            complete_dh_as_initiator(session, channel, body).await?;
            channel.state = KeyAgreementInitiatorSendingDhPart2;
            Ok(true)
        }
        (KeyAgreementSendingCommit, Event::Message { message_type: Confirm1, body }) => {
            complete_non_dh_as_initiator(session, channel, body).await?;
            channel.state = ConfirmationInitiatorSendingConfirm2;
            Ok(true)
        }
        (KeyAgreementSendingCommit, Event::Timer) => {
            if let Some(commit) = channel.self_packets.get(PacketSlot::Commit).map(<[u8]>::to_vec) {
                session.send_message(channel, &commit);
            }
            Ok(false)
        }

        // ---- keyAgreement_responderSendingDHPart1 ------------------------------
        (KeyAgreementResponderSendingDhPart1, Event::Init) => {
            build_and_send_dhpart1(session, channel)?;
            Ok(false)
        }
        (KeyAgreementResponderSendingDhPart1, Event::Message { message_type: Commit, body }) => {
            match channel.peer_packets.get(PacketSlot::Commit) {
                Some(stored) if stored == *body => {
                    if let Some(dhpart1) = channel.self_packets.get(PacketSlot::DhPart).map(<[u8]>::to_vec) {
                        session.send_message(channel, &dhpart1);
                    }
                    Ok(false)
                }
                _ => Err(EngineError::UnmatchingPacketRepetition),
            }
        }
        (KeyAgreementResponderSendingDhPart1, Event::Message { message_type: DhPart2, body }) => {
            complete_dh_as_responder(session, channel, body).await?;
            channel.state = ConfirmationResponderSendingConfirm1;
            Ok(true)
        }

        // ---- keyAgreement_initiatorSendingDHPart2 ------------------------------
        (KeyAgreementInitiatorSendingDhPart2, Event::Init) => {
            if let Some(dhpart2) = channel.self_packets.get(PacketSlot::DhPart).map(<[u8]>::to_vec) {
                session.send_message(channel, &dhpart2);
            }
            channel.timer.start(TimerClass::NonHello, session.time_reference);
            Ok(false)
        }
        (KeyAgreementInitiatorSendingDhPart2, Event::Message { message_type: DhPart1, body }) => {
            match channel.peer_packets.get(PacketSlot::DhPart) {
                Some(stored) if stored == *body => Ok(false),
                _ => Err(EngineError::UnmatchingPacketRepetition),
            }
        }
        (KeyAgreementInitiatorSendingDhPart2, Event::Message { message_type: Confirm1, body }) => {
            channel.timer.stop();
            accept_peer_confirm(session, channel, body, Confirm1).await?;
            channel.state = ConfirmationInitiatorSendingConfirm2;
            Ok(true)
        }
        (KeyAgreementInitiatorSendingDhPart2, Event::Timer) => {
            if let Some(dhpart2) = channel.self_packets.get(PacketSlot::DhPart).map(<[u8]>::to_vec) {
                session.send_message(channel, &dhpart2);
            }
            Ok(false)
        }

        // ---- confirmation_responderSendingConfirm1 -----------------------------
        (ConfirmationResponderSendingConfirm1, Event::Init) => {
            build_and_send_confirm(session, channel, Confirm1)?;
            Ok(false)
        }
        (ConfirmationResponderSendingConfirm1, Event::Message { message_type: Commit | DhPart2, body }) => {
            match channel.peer_packets.get(PacketSlot::DhPart) {
                Some(stored) if stored == *body => {
                    if let Some(confirm1) = channel.self_packets.get(PacketSlot::Confirm).map(<[u8]>::to_vec) {
                        session.send_message(channel, &confirm1);
                    }
                    Ok(false)
                }
                _ => Ok(false),
            }
        }
        (ConfirmationResponderSendingConfirm1, Event::Message { message_type: Confirm2, body }) => {
            accept_peer_confirm(session, channel, body, Confirm2).await?;
            let ack = codec::encode_message(MessageType::Conf2Ack, &[]);
            session.send_message(channel, &ack);
            finish_handshake(session, channel).await?;
            channel.state = Secure;
            Ok(true)
        }

        // ---- confirmation_initiatorSendingConfirm2 -----------------------------
        (ConfirmationInitiatorSendingConfirm2, Event::Init) => {
            build_and_send_confirm(session, channel, Confirm2)?;
            channel.timer.start(TimerClass::NonHello, session.time_reference);
            Ok(false)
        }
        (ConfirmationInitiatorSendingConfirm2, Event::Message { message_type: Confirm1, body }) => {
            match channel.peer_packets.get(PacketSlot::Confirm) {
                Some(stored) if stored == *body => Ok(false),
                _ => Err(EngineError::UnmatchingPacketRepetition),
            }
        }
        (ConfirmationInitiatorSendingConfirm2, Event::Message { message_type: Conf2Ack, .. }) => {
            channel.timer.stop();
            finish_handshake(session, channel).await?;
            channel.state = Secure;
            Ok(true)
        }
        (ConfirmationInitiatorSendingConfirm2, Event::Timer) => {
            if let Some(confirm2) = channel.self_packets.get(PacketSlot::Confirm).map(<[u8]>::to_vec) {
                session.send_message(channel, &confirm2);
            }
            Ok(false)
        }

        // ---- secure -------------------------------------------------------------
        (Secure, Event::Init) => {
            channel.is_secure = true;
            channel.is_clear = false;
            let negotiated = channel
                .negotiated
                .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing in secure".into()))?;
            let derived = channel
                .derived
                .as_ref()
                .ok_or_else(|| EngineError::InvalidContext("derived keys missing in secure".into()))?;
            let sas = zrtp_crypto::sas::render(negotiated.sas, derived.sas_integer);
            channel.sas_rendered = Some(sas.clone());
            session.callbacks.status_event(channel.id, StatusEvent::SecureEstablished);
            session
                .callbacks
                .sas_ready(channel.id, &sas, session.peer_secrets.previously_verified_sas);
            Ok(false)
        }
        (Secure, Event::GoClear) => {
            let mac_key = own_mackey(channel)?.to_vec();
            let hash_alg = channel
                .negotiated
                .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?
                .hash;
            let goclear = handshake::build_goclear(hash_alg, &mac_key);
            channel.self_packets.set(PacketSlot::GoClear, goclear.clone());
            session.send_message(channel, &goclear);
            channel.timer.start(TimerClass::ClearAck, session.time_reference);
            channel.state = SendingGoClear;
            Ok(false)
        }
        (Secure, Event::Message { message_type: GoClear, body }) => {
            accept_inbound_goclear(session, channel, body)?;
            channel.has_received_goclear = true;
            channel.wipe_keys();
            channel.is_secure = false;
            channel.is_clear = true;
            let ack = codec::encode_message(MessageType::ClearAck, &[]);
            session.send_message(channel, &ack);
            session.callbacks.status_event(channel.id, StatusEvent::WentClear);
            channel.state = Clear;
            Ok(false)
        }

        // ---- sending_GoClear ------------------------------------------------------
        (SendingGoClear, Event::Message { message_type: ClearAck, .. }) => {
            channel.timer.stop();
            channel.wipe_keys();
            channel.is_secure = false;
            channel.is_clear = true;
            session.callbacks.status_event(channel.id, StatusEvent::WentClear);
            channel.state = Clear;
            Ok(false)
        }
        (SendingGoClear, Event::Message { message_type: GoClear, .. }) => Ok(false),
        (SendingGoClear, Event::Timer) => {
            if let Some(goclear) = channel.self_packets.get(PacketSlot::GoClear).map(<[u8]>::to_vec) {
                session.send_message(channel, &goclear);
            }
            Ok(false)
        }

        // ---- clear ----------------------------------------------------------------
        (Clear, Event::BackToSecure) => {
            channel.self_packets.clear_for_new_handshake();
            channel.peer_packets.clear_for_new_handshake();
            channel.is_clear = false;
            session.callbacks.status_event(channel.id, StatusEvent::BackToSecureStarted);
            channel.state = KeyAgreementSendingCommit;
            Ok(true)
        }
        (Clear, Event::Message { message_type: Commit, body }) => {
            turn_into_responder(session, channel, body).await?;
            Ok(true)
        }
        (Clear, Event::AcceptGoClear) => Ok(false),

        _ => Err(EngineError::UnexpectedEvent),
    }
}

// ---------------------------------------------------------------------------
// Hello / HelloACK
// ---------------------------------------------------------------------------

fn build_and_send_hello<C: ZidCache, CB: Callbacks>(session: &mut Session<C, CB>, channel: &mut Channel) {
    let hello = handshake::build_hello(
        session.self_zid,
        &channel.self_hash_chain.h3,
        HelloFlags::default(),
        &session.supported,
        HashAlgorithm::S256,
        &channel.self_hash_chain.h2,
    );
    channel.self_packets.set(PacketSlot::Hello, hello.clone());
    session.send_message(channel, &hello);
}

fn send_hello_ack<C: ZidCache, CB: Callbacks>(session: &mut Session<C, CB>, channel: &mut Channel) {
    let ack = codec::encode_message(MessageType::HelloAck, &[]);
    session.send_message(channel, &ack);
}

/// Parses and records a peer Hello, negotiates algorithms eagerly, loads this peer's cached
/// secrets, and acks. Sends our own Hello too if we haven't yet (the
/// simultaneous-Hello race: a peer Hello can arrive before our own
/// `discovery_init::Init` has fired).
async fn respond_to_hello<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    let hello = Hello::decode(&body[MESSAGE_HEADER_LEN..], 32)?;
    if hello.version != handshake::ZRTP_VERSION {
        return Err(EngineError::UnsupportedZrtpVersion);
    }
    channel.peer_hash_chain.reveal_h3(hello.h3.clone());

    if let Some(expected) = session.peer_hello_hash {
        if handshake::hello_hash(body) != expected {
            return Err(EngineError::InvalidContext(
                "Hello hash does not match the value bound over signalling".into(),
            ));
        }
    }

    let peer_supported = zrtp_proto::algorithms::SupportedAlgorithms {
        hash: hello.hash_algorithms.clone(),
        cipher: hello.cipher_algorithms.clone(),
        auth_tag: hello.auth_tag_algorithms.clone(),
        key_agreement: hello.key_agreement_algorithms.clone(),
        sas: hello.sas_algorithms.clone(),
    };
    let negotiated = crate::negotiation::negotiate(&session.supported, &peer_supported);
    channel.negotiated = Some(negotiated);
    channel.peer_packets.set(PacketSlot::Hello, body.to_vec());

    session.load_peer_secrets(hello.zid, negotiated.hash).await?;

    if let Some(aux) = session.transient_aux_secret.clone() {
        channel.aux_id_self = Some(aux_secret_id(negotiated.hash, &aux, &channel.self_hash_chain.h3));
        channel.aux_id_peer = Some(aux_secret_id(negotiated.hash, &aux, &hello.h3));
    }

    if channel.self_packets.get(PacketSlot::Hello).is_none() {
        build_and_send_hello(session, channel);
        channel.timer.start(TimerClass::Hello, session.time_reference);
    }
    send_hello_ack(session, channel);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Builds and sends `Commit`. For DH/KEM modes this also generates the key
/// pair and pre-builds `DHPart2` right away, since `hvi` is computed over
/// that exact message.
fn build_and_send_commit<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
) -> Result<(), EngineError> {
    let mut negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("algorithms not negotiated before Commit".into()))?;
    // A session that already has a ZRTPSess (a later channel, or a
    // back-to-secure resumption) always re-uses it via multistream rather
    // than repeating a full DH exchange.
    if session.zrtp_sess.is_some() {
        negotiated.key_agreement = KeyAgreementAlgorithm::Mult;
        channel.negotiated = Some(negotiated);
    }
    let ids = session
        .cached_secret_ids
        .ok_or_else(|| EngineError::InvalidContext("cached secret ids not loaded".into()))?;
    let responder_hello = channel
        .peer_packets
        .get(PacketSlot::Hello)
        .ok_or_else(|| EngineError::InvalidContext("peer Hello not yet stored".into()))?
        .to_vec();

    let commit_bytes = if negotiated.key_agreement.has_dhpart() {
        let ctx = KeyAgreementContext::generate(negotiated.key_agreement).map_err(EngineError::Crypto)?;
        let pv = ctx.public_value_bytes();
        channel.key_agreement_ctx = Some(ctx);

        let aux_id = channel.aux_id_self.unwrap_or_else(random_secret_id);
        let dhpart2 = handshake::build_dhpart(
            MessageType::DhPart2,
            &channel.self_hash_chain.h1,
            ids.rs1_i,
            ids.rs2_i,
            aux_id,
            ids.pbx_i,
            pv.clone(),
            negotiated.hash,
            &channel.self_hash_chain.h0,
        );
        let hvi = handshake::compute_commit_hvi(negotiated.hash, &dhpart2, &responder_hello);
        channel.self_packets.set(PacketSlot::DhPart, dhpart2);

        if negotiated.key_agreement.is_kem() {
            handshake::build_commit_kem(
                &channel.self_hash_chain.h2,
                session.self_zid,
                &negotiated,
                hvi,
                pv,
                negotiated.hash,
                &channel.self_hash_chain.h1,
            )
        } else {
            handshake::build_commit_dh(
                &channel.self_hash_chain.h2,
                session.self_zid,
                &negotiated,
                hvi,
                negotiated.hash,
                &channel.self_hash_chain.h1,
            )
        }
    } else {
        let mut nonce = [0u8; 16];
        use rand::rngs::OsRng;
        use rand::RngCore;
        OsRng.fill_bytes(&mut nonce);
        handshake::build_commit_multistream(
            &channel.self_hash_chain.h2,
            session.self_zid,
            &negotiated,
            nonce,
            negotiated.hash,
            &channel.self_hash_chain.h1,
        )
    };

    channel.self_packets.set(PacketSlot::Commit, commit_bytes.clone());
    session.send_message(channel, &commit_bytes);
    Ok(())
}

/// Resolves two `Commit`s crossing in flight. The loser turns into the responder; the
/// winner just keeps waiting for `DHPart1`/`Confirm1`.
async fn resolve_commit_contention<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<bool, EngineError> {
    let local_commit_bytes = channel
        .self_packets
        .get(PacketSlot::Commit)
        .ok_or_else(|| EngineError::InvalidContext("no local Commit stored yet".into()))?
        .to_vec();
    let local = Commit::decode(&local_commit_bytes[MESSAGE_HEADER_LEN..], 32, false)?;
    let peer = Commit::decode(&body[MESSAGE_HEADER_LEN..], 32, false)?;

    if handshake::local_keeps_initiator_role(&local.variable, &peer.variable) {
        // We keep sending our own Commit; nothing changes.
        Ok(false)
    } else {
        turn_into_responder(session, channel, body).await?;
        Ok(true)
    }
}

/// Records an inbound `Commit`, verifying its hash-chain reveal against
/// the stored peer Hello, and moves into the matching next state.
async fn turn_into_responder<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    let commit = Commit::decode(&body[MESSAGE_HEADER_LEN..], 32, false)?;
    absorb_peer_chain_value(channel, HashAlgorithm::S256, 2, commit.h2.clone())?;
    if let Some(hello) = channel.peer_packets.get(PacketSlot::Hello) {
        verify_prior_mac(commit.hash, &channel.peer_hash_chain_h2(), hello)?;
    }

    channel.role = Role::Responder;
    channel.peer_packets.set(PacketSlot::Commit, body.to_vec());
    channel.peer_key_agreement_mode = Some(commit.key_agreement);
    let negotiated = zrtp_proto::algorithms::NegotiatedAlgorithms {
        hash: commit.hash,
        cipher: commit.cipher,
        auth_tag: commit.auth_tag,
        key_agreement: commit.key_agreement,
        sas: commit.sas,
    };
    channel.negotiated = Some(negotiated);

    if commit.key_agreement.is_preshared() {
        return Err(EngineError::UnsupportedMode(
            "Preshared key agreement is not implemented (DESIGN.md Open Question 1)".into(),
        ));
    }

    channel.state = if commit.key_agreement.has_dhpart() {
        State::KeyAgreementResponderSendingDhPart1
    } else {
        State::ConfirmationResponderSendingConfirm1
    };
    Ok(())
}

// ---------------------------------------------------------------------------
// DHPart1 / DHPart2
// ---------------------------------------------------------------------------

fn build_and_send_dhpart1<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
) -> Result<(), EngineError> {
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let ids = session
        .cached_secret_ids
        .ok_or_else(|| EngineError::InvalidContext("cached secret ids not loaded".into()))?;
    let aux_id = channel.aux_id_self.unwrap_or_else(random_secret_id);

    let pv = if negotiated.key_agreement.is_kem() {
        let commit_bytes = channel
            .peer_packets
            .get(PacketSlot::Commit)
            .ok_or_else(|| EngineError::InvalidContext("peer Commit not stored".into()))?;
        let commit = Commit::decode(&commit_bytes[MESSAGE_HEADER_LEN..], 32, false)?;
        let initiator_public = match commit.variable {
            CommitVariable::Kem { initiator_public, .. } => initiator_public,
            _ => return Err(EngineError::InvalidContext("KEM1 Commit missing initiator public value".into())),
        };
        let (ciphertext, shared) =
            KeyAgreementContext::responder_encapsulate(&initiator_public).map_err(EngineError::Crypto)?;
        channel.pending_shared_secret = Some(shared.to_vec());
        ciphertext
    } else {
        let ctx = KeyAgreementContext::generate(negotiated.key_agreement).map_err(EngineError::Crypto)?;
        let pv = ctx.public_value_bytes();
        channel.key_agreement_ctx = Some(ctx);
        pv
    };

    let dhpart1 = handshake::build_dhpart(
        MessageType::DhPart1,
        &channel.self_hash_chain.h1,
        ids.rs1_r,
        ids.rs2_r,
        aux_id,
        ids.pbx_r,
        pv,
        negotiated.hash,
        &channel.self_hash_chain.h0,
    );
    channel.self_packets.set(PacketSlot::DhPart, dhpart1.clone());
    session.send_message(channel, &dhpart1);
    Ok(())
}

/// Responder side: verifies `DHPart2`, derives `s0` and the full key
/// schedule.
async fn complete_dh_as_responder<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let pv_len = handshake::dhpart_pv_len(negotiated.key_agreement, MessageType::DhPart2);
    let dhpart2 = DhPart::decode(&body[MESSAGE_HEADER_LEN..], 32, pv_len)?;

    absorb_peer_chain_value(channel, HashAlgorithm::S256, 1, dhpart2.h1.clone())?;
    if let Some(commit) = channel.peer_packets.get(PacketSlot::Commit) {
        verify_prior_mac(negotiated.hash, &channel.peer_hash_chain_h1(), commit)?;
    }

    let dh_result = if negotiated.key_agreement.is_kem() {
        channel
            .pending_shared_secret
            .take()
            .ok_or_else(|| EngineError::InvalidContext("KEM1 shared secret was never computed".into()))?
    } else {
        let ctx = channel
            .key_agreement_ctx
            .take()
            .ok_or_else(|| EngineError::InvalidContext("no key-agreement context to finish".into()))?;
        if !session.callbacks.pv_check(channel.id, &dhpart2.pv) {
            return Err(EngineError::InvalidContext("host rejected peer public value".into()));
        }
        ctx.agree(&dhpart2.pv).map_err(EngineError::Crypto)?.to_vec()
    };

    let (s1, s2, s3, mismatch) = match_dh_secrets(session, channel, &dhpart2, Role::Initiator);
    if mismatch {
        session.cache_mismatch = true;
        session.callbacks.status_event(channel.id, StatusEvent::CacheMismatch);
    }

    channel.peer_packets.set(PacketSlot::DhPart, body.to_vec());
    let hello_resp = channel
        .self_packets
        .get(PacketSlot::Hello)
        .ok_or_else(|| EngineError::InvalidContext("own Hello not stored".into()))?
        .to_vec();
    let commit_bytes = channel
        .peer_packets
        .get(PacketSlot::Commit)
        .ok_or_else(|| EngineError::InvalidContext("peer Commit not stored".into()))?
        .to_vec();
    let dhpart1_bytes = channel
        .self_packets
        .get(PacketSlot::DhPart)
        .ok_or_else(|| EngineError::InvalidContext("own DHPart1 not stored".into()))?
        .to_vec();

    let total_hash = handshake::total_hash_dh(negotiated.hash, &hello_resp, &commit_bytes, &dhpart1_bytes, body);
    derive_and_store_keys_dh(session, channel, negotiated.hash, &dh_result, &total_hash, &s1, s2.as_deref(), s3.as_deref())?;
    Ok(())
}

/// Initiator side: verifies `DHPart1`, derives `s0` and the full key
/// schedule. The initiator's own `DHPart2` was already pre-built at
/// `Commit`-build time.
async fn complete_dh_as_initiator<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let pv_len = handshake::dhpart_pv_len(negotiated.key_agreement, MessageType::DhPart1);
    let dhpart1 = DhPart::decode(&body[MESSAGE_HEADER_LEN..], 32, pv_len)?;

    // The responder never sends its own `Commit`, so its `H2` is never
    // transmitted — chain `H1` straight to the stored `H3` instead of the
    // usual single hop to `H2` (DESIGN.md's hash-chain gap note).
    absorb_peer_chain_value(channel, HashAlgorithm::S256, 1, dhpart1.h1.clone())?;
    if let Some(hello) = channel.peer_packets.get(PacketSlot::Hello) {
        verify_prior_mac(negotiated.hash, &channel.peer_hash_chain_h2(), hello)?;
    }

    let dh_result = if negotiated.key_agreement.is_kem() {
        let ctx = channel
            .key_agreement_ctx
            .take()
            .ok_or_else(|| EngineError::InvalidContext("no KEM1 context to finish".into()))?;
        ctx.agree(&dhpart1.pv).map_err(EngineError::Crypto)?.to_vec()
    } else {
        if !session.callbacks.pv_check(channel.id, &dhpart1.pv) {
            return Err(EngineError::InvalidContext("host rejected peer public value".into()));
        }
        let ctx = channel
            .key_agreement_ctx
            .take()
            .ok_or_else(|| EngineError::InvalidContext("no key-agreement context to finish".into()))?;
        ctx.agree(&dhpart1.pv).map_err(EngineError::Crypto)?.to_vec()
    };

    let (s1, s2, s3, mismatch) = match_dh_secrets(session, channel, &dhpart1, Role::Responder);
    if mismatch {
        session.cache_mismatch = true;
        session.callbacks.status_event(channel.id, StatusEvent::CacheMismatch);
    }

    channel.peer_packets.set(PacketSlot::DhPart, body.to_vec());
    let hello_resp = channel
        .peer_packets
        .get(PacketSlot::Hello)
        .ok_or_else(|| EngineError::InvalidContext("peer Hello not stored".into()))?
        .to_vec();
    let commit_bytes = channel
        .self_packets
        .get(PacketSlot::Commit)
        .ok_or_else(|| EngineError::InvalidContext("own Commit not stored".into()))?
        .to_vec();
    let dhpart2_bytes = channel
        .self_packets
        .get(PacketSlot::DhPart)
        .ok_or_else(|| EngineError::InvalidContext("own DHPart2 not stored".into()))?
        .to_vec();

    let total_hash = handshake::total_hash_dh(negotiated.hash, &hello_resp, &commit_bytes, body, &dhpart2_bytes);
    derive_and_store_keys_dh(session, channel, negotiated.hash, &dh_result, &total_hash, &s1, s2.as_deref(), s3.as_deref())?;
    Ok(())
}

/// Matches a received `DHPart`'s `rs1ID`/`rs2ID` against this session's
/// cached-secret IDs computed for `sender_role` (the role that built the
/// message we are reading), returning the matching retained secret (if
/// any), the aux/pbx secrets (if their IDs match), and whether neither
/// retained-secret ID matched (a cache mismatch).
fn match_dh_secrets<C: ZidCache, CB: Callbacks>(
    session: &Session<C, CB>,
    channel: &Channel,
    dhpart: &DhPart,
    sender_role: Role,
) -> (Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>, bool) {
    let ids = session.cached_secret_ids.unwrap_or_default();
    let (expect_rs1, expect_rs2, expect_pbx) = match sender_role {
        Role::Initiator => (ids.rs1_i, ids.rs2_i, ids.pbx_i),
        Role::Responder => (ids.rs1_r, ids.rs2_r, ids.pbx_r),
    };
    let (s1, mismatch) = if dhpart.rs1_id == expect_rs1 && session.peer_secrets.rs1.is_some() {
        (session.peer_secrets.rs1.clone(), false)
    } else if dhpart.rs2_id == expect_rs2 && session.peer_secrets.rs2.is_some() {
        (session.peer_secrets.rs2.clone(), false)
    } else {
        (None, session.peer_secrets.rs1.is_some() || session.peer_secrets.rs2.is_some())
    };
    let s2 = if Some(dhpart.aux_id) == channel.aux_id_peer {
        session.transient_aux_secret.clone()
    } else {
        None
    };
    let s3 = if dhpart.pbx_id == expect_pbx { session.peer_secrets.pbx.clone() } else { None };
    (s1, s2, s3, mismatch)
}

fn derive_and_store_keys_dh<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    hash_alg: HashAlgorithm,
    dh_result: &[u8],
    total_hash: &[u8],
    s1: &Option<Vec<u8>>,
    s2: Option<&[u8]>,
    s3: Option<&[u8]>,
) -> Result<(), EngineError> {
    let (zid_initiator, zid_responder) = ordered_zids(session, channel)?;
    let ctx = handshake::kdf_context(&zid_initiator, &zid_responder, total_hash);
    let s0 = derive_s0_dh(hash_alg, dh_result, &ctx, s1.as_deref(), s2, s3);
    store_derived_keys(session, channel, hash_alg, s0, ctx);
    Ok(())
}

fn ordered_zids<C: ZidCache, CB: Callbacks>(
    session: &Session<C, CB>,
    channel: &Channel,
) -> Result<(zrtp_crypto::Zid, zrtp_crypto::Zid), EngineError> {
    let peer_zid = session
        .peer_zid
        .ok_or_else(|| EngineError::InvalidContext("peer ZID unknown".into()))?;
    Ok(match channel.role {
        Role::Initiator => (session.self_zid, peer_zid),
        Role::Responder => (peer_zid, session.self_zid),
    })
}

fn store_derived_keys<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    hash_alg: HashAlgorithm,
    s0: Vec<u8>,
    ctx: zrtp_crypto::keyschedule::KdfContext,
) {
    let negotiated = channel.negotiated.expect("set before key derivation runs");
    let derive_zrtp_sess = session.zrtp_sess.is_none();
    let derived = derive_keys(hash_alg, negotiated.cipher, &s0, &ctx, derive_zrtp_sess);
    if let Some(sess) = &derived.zrtp_sess {
        session.zrtp_sess = Some(sess.clone());
    }
    session.negotiated_key_agreement = Some(negotiated.key_agreement);
    channel.kdf_context = Some(ctx);
    channel.s0 = Some(s0);
    channel.derived = Some(derived);
    channel.key_agreement_ctx = None;
    channel.pending_shared_secret = None;
}

// ---------------------------------------------------------------------------
// Confirm1 / Confirm2 (multistream/preshared key schedule, shared by both
// directions once a Commit — but no DHPart — has been exchanged)
// ---------------------------------------------------------------------------

async fn complete_non_dh_as_initiator<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    derive_multistream_keys(session, channel)?;
    accept_peer_confirm(session, channel, body, MessageType::Confirm1).await
}

fn derive_multistream_keys<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
) -> Result<(), EngineError> {
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let zrtp_sess = session
        .zrtp_sess
        .clone()
        .ok_or_else(|| EngineError::InvalidContext("no ZRTPSess available for multistream".into()))?;

    let hello_resp = if channel.role == Role::Responder {
        channel.self_packets.get(PacketSlot::Hello)
    } else {
        channel.peer_packets.get(PacketSlot::Hello)
    }
    .ok_or_else(|| EngineError::InvalidContext("responder Hello not stored".into()))?
    .to_vec();
    let commit_bytes = if channel.role == Role::Initiator {
        channel.self_packets.get(PacketSlot::Commit)
    } else {
        channel.peer_packets.get(PacketSlot::Commit)
    }
    .ok_or_else(|| EngineError::InvalidContext("Commit not stored".into()))?
    .to_vec();

    let total_hash = handshake::total_hash_multistream(negotiated.hash, &hello_resp, &commit_bytes);
    let (zid_initiator, zid_responder) = ordered_zids(session, channel)?;
    let ctx = handshake::kdf_context(&zid_initiator, &zid_responder, &total_hash);
    let s0 = derive_s0_multistream(negotiated.hash, &zrtp_sess, &ctx);
    store_derived_keys(session, channel, negotiated.hash, s0, ctx);
    Ok(())
}

// ---------------------------------------------------------------------------
// Confirm (shared build/verify for both directions)
// ---------------------------------------------------------------------------

fn build_and_send_confirm<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    message_type: MessageType,
) -> Result<(), EngineError> {
    if channel.derived.is_none() {
        derive_multistream_keys(session, channel)?;
    }
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let derived = channel
        .derived
        .as_ref()
        .ok_or_else(|| EngineError::InvalidContext("derived keys missing".into()))?;
    let (zrtpkey, mackey) = match channel.role {
        Role::Initiator => (&derived.zrtpkey_i, &derived.mackey_i),
        Role::Responder => (&derived.zrtpkey_r, &derived.mackey_r),
    };
    let flags = ConfirmFlags {
        sas_verified: session.peer_secrets.previously_verified_sas,
        v_flag: false,
        allow_clear: true,
        disclosure: false,
    };
    let confirm = handshake::build_confirm(
        message_type,
        &channel.self_hash_chain.h0,
        flags,
        DEFAULT_CACHE_EXPIRATION_SECS,
        negotiated.cipher,
        negotiated.hash,
        zrtpkey,
        mackey,
    );
    channel.self_packets.set(PacketSlot::Confirm, confirm.clone());
    session.send_message(channel, &confirm);
    Ok(())
}

/// Opens, authenticates, and records an inbound `Confirm`. Chains its `H0`
/// reveal all the way back to the stored `H3` whenever the intervening
/// `Commit`/`DHPart` levels were never transmitted (the responder skips
/// `Commit` in the ordinary path; multistream/preshared skip `DHPart` on
/// both sides).
async fn accept_peer_confirm<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
    body: &[u8],
    message_type: MessageType,
) -> Result<(), EngineError> {
    let negotiated = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?;
    let derived = channel
        .derived
        .as_ref()
        .ok_or_else(|| EngineError::InvalidContext("derived keys missing before Confirm".into()))?;
    let (peer_zrtpkey, peer_mackey) = match channel.role {
        Role::Initiator => (derived.zrtpkey_r.clone(), derived.mackey_r.clone()),
        Role::Responder => (derived.zrtpkey_i.clone(), derived.mackey_i.clone()),
    };

    let confirm = Confirm::decode(&body[MESSAGE_HEADER_LEN..])?;
    let plaintext = handshake::open_confirm(&confirm, negotiated.cipher, negotiated.hash, &peer_zrtpkey, &peer_mackey)?;

    absorb_peer_chain_value(channel, HashAlgorithm::S256, 0, plaintext.h0.clone())?;

    // DHPart's trailing MAC is keyed by H0 (handshake::build_dhpart uses
    // self_hash_chain.h0); Commit's is keyed by H1. Confirm is what reveals
    // H0, so the DH branch must verify against the just-absorbed peer H0,
    // not H1.
    if negotiated.key_agreement.has_dhpart() {
        if let Some(stored) = channel.peer_packets.get(PacketSlot::DhPart) {
            verify_prior_mac(negotiated.hash, &channel.peer_hash_chain_h0(), stored)?;
        }
    } else if let Some(stored) = channel.peer_packets.get(PacketSlot::Commit) {
        verify_prior_mac(negotiated.hash, &channel.peer_hash_chain_h1(), stored)?;
    }

    channel.peer_packets.set(PacketSlot::Confirm, body.to_vec());
    if plaintext.flags.sas_verified {
        session.peer_secrets.previously_verified_sas = true;
    }
    let _ = message_type;
    Ok(())
}

/// Rolls `rs1`, persists the peer's secrets, and marks the channel secure.
/// Called once on whichever side completes last (responder on `Confirm2`,
/// initiator on `Conf2ACK`).
async fn finish_handshake<C: ZidCache, CB: Callbacks>(
    session: &mut Session<C, CB>,
    channel: &mut Channel,
) -> Result<(), EngineError> {
    let hash_alg = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?
        .hash;
    let s0 = channel
        .s0
        .clone()
        .ok_or_else(|| EngineError::InvalidContext("s0 missing at handshake completion".into()))?;
    let ctx = channel
        .kdf_context
        .clone()
        .ok_or_else(|| EngineError::InvalidContext("kdf context missing at handshake completion".into()))?;
    let new_rs1 = roll_retained_secret(hash_alg, &s0, &ctx);
    let sas_verified = session.peer_secrets.previously_verified_sas;
    session.roll_and_persist_secrets(new_rs1, sas_verified).await?;
    channel.state = State::Secure;
    Ok(())
}

// ---------------------------------------------------------------------------
// GoClear
// ---------------------------------------------------------------------------

fn own_mackey(channel: &Channel) -> Result<&[u8], EngineError> {
    let derived = channel
        .derived
        .as_ref()
        .ok_or_else(|| EngineError::InvalidContext("no derived keys to build GoClear with".into()))?;
    Ok(match channel.role {
        Role::Initiator => &derived.mackey_i,
        Role::Responder => &derived.mackey_r,
    })
}

fn accept_inbound_goclear<C: ZidCache, CB: Callbacks>(
    _session: &Session<C, CB>,
    channel: &Channel,
    body: &[u8],
) -> Result<(), EngineError> {
    let goclear = GoClear::decode(&body[MESSAGE_HEADER_LEN..])?;
    let derived = channel
        .derived
        .as_ref()
        .ok_or_else(|| EngineError::InvalidContext("no derived keys to verify GoClear with".into()))?;
    let peer_mackey = match channel.role {
        Role::Initiator => &derived.mackey_r,
        Role::Responder => &derived.mackey_i,
    };
    let hash_alg = channel
        .negotiated
        .ok_or_else(|| EngineError::InvalidContext("negotiated algorithms missing".into()))?
        .hash;
    handshake::verify_goclear(body, hash_alg, peer_mackey)?;
    let _ = goclear;
    Ok(())
}

// ---------------------------------------------------------------------------
// Hash-chain reveal with gap-filling
// ---------------------------------------------------------------------------

/// Verifies a newly revealed peer hash-chain value and backfills it
///. When the message that would ordinarily carry an
/// intermediate level was never sent — the responder never sends its own
/// `Commit`, and multistream/preshared skip `DHPart` on both sides — this
/// hashes forward past that gap until it reaches a level the chain
/// already has on record (at the latest, the stored `H3` from `Hello`),
/// rather than requiring every level to arrive as its own message.
///
/// `level` is `2` for a `Commit`'s `H2`, `1` for a `DHPart`'s `H1`, `0` for
/// a `Confirm`'s `H0`.
fn absorb_peer_chain_value(
    channel: &mut Channel,
    hash_alg: HashAlgorithm,
    level: u8,
    value: Vec<u8>,
) -> Result<(), EngineError> {
    let mut derived = vec![(level, value)];
    loop {
        let (current_level, current_value) = derived.last().expect("derived is never empty").clone();
        let parent_level = current_level + 1;
        let parent = peer_chain_level(&channel.peer_hash_chain, parent_level);
        match parent {
            Some(known) => {
                let candidate = hash(hash_alg, &current_value);
                if candidate != known {
                    return Err(zrtp_crypto::CryptoError::HashChainIntegrity(
                        "revealed hash-chain value does not chain to a previously stored level".into(),
                    )
                    .into());
                }
                break;
            }
            None if parent_level >= 3 => {
                return Err(EngineError::InvalidContext("peer H3 not yet known".into()));
            }
            None => {
                let next_value = hash(hash_alg, &current_value);
                derived.push((parent_level, next_value));
            }
        }
    }
    for (lvl, val) in derived {
        set_peer_chain_level(&mut channel.peer_hash_chain, lvl, val);
    }
    Ok(())
}

fn peer_chain_level(chain: &zrtp_crypto::hash_chain::PeerHashChain, level: u8) -> Option<Vec<u8>> {
    match level {
        3 => chain.h3.clone(),
        2 => chain.h2.clone(),
        1 => chain.h1.clone(),
        0 => chain.h0.clone(),
        _ => None,
    }
}

fn set_peer_chain_level(chain: &mut zrtp_crypto::hash_chain::PeerHashChain, level: u8, value: Vec<u8>) {
    match level {
        2 => chain.h2 = Some(value),
        1 => chain.h1 = Some(value),
        0 => chain.h0 = Some(value),
        _ => {}
    }
}

fn verify_prior_mac(hash_alg: HashAlgorithm, key: &[u8], stored_message: &[u8]) -> Result<(), EngineError> {
    if stored_message.len() < 8 {
        return Err(ProtoError::InvalidPacket("stored message too short to carry a MAC".into()).into());
    }
    let mac_field: [u8; 8] = stored_message[stored_message.len() - 8..]
        .try_into()
        .expect("checked length above");
    codec::verify_message_mac(hash_alg, key, stored_message, &mac_field).map_err(EngineError::from)
}

impl Channel {
    fn peer_hash_chain_h0(&self) -> Vec<u8> {
        self.peer_hash_chain.h0.clone().unwrap_or_default()
    }

    fn peer_hash_chain_h1(&self) -> Vec<u8> {
        self.peer_hash_chain.h1.clone().unwrap_or_default()
    }

    fn peer_hash_chain_h2(&self) -> Vec<u8> {
        self.peer_hash_chain.h2.clone().unwrap_or_default()
    }
}
