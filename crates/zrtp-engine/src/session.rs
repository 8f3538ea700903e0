//! The `Session`: the fixed-capacity channel table plus everything that is
//! shared across every channel talking to one peer.
//!
//! Grounded on the teacher's top-level `DarklockGuard` handle, which also
//! owns a fixed collection of per-peer state plus a callback/store pair;
//! narrowed here to one peer's channel table and widened with the
//! algorithm/cache bookkeeping ZRTP needs.

use tracing::{debug, warn};

use zrtp_cache::{PeerSecrets, ZidCache};
use zrtp_crypto::hash_chain::HashChain;
use zrtp_crypto::keyschedule::cached_secret_id;
use zrtp_crypto::primitives::{HashAlgorithm, KeyAgreementAlgorithm};
use zrtp_crypto::zid::Zid;
use zrtp_proto::algorithms::SupportedAlgorithms;
use zrtp_proto::envelope::{self, FragmentHeader, FIXED_HEADER_LEN, FRAGMENT_HEADER_LEN};
use zrtp_proto::fragment::Outcome;

use crate::callbacks::Callbacks;
use crate::channel::Channel;
use crate::error::EngineError;
use crate::events::Event;
use crate::handshake;
use crate::state;

pub const MIN_MTU: usize = 600;
pub const DEFAULT_MTU: usize = 1452;
pub const CHANNEL_TABLE_CAPACITY: usize = 64;

/// The initiator/responder cached-secret hash set: computed
/// once the peer's `PeerSecrets` are in hand, reused by every channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedSecretIds {
    pub rs1_i: [u8; 8],
    pub rs1_r: [u8; 8],
    pub rs2_i: [u8; 8],
    pub rs2_r: [u8; 8],
    pub pbx_i: [u8; 8],
    pub pbx_r: [u8; 8],
}

fn random_or(secret: Option<&[u8]>, hash_alg: HashAlgorithm, label: &str) -> [u8; 8] {
    match secret {
        Some(s) => cached_secret_id(hash_alg, s, label),
        None => zrtp_crypto::keyschedule::random_secret_id(),
    }
}

pub fn cached_secret_ids(hash_alg: HashAlgorithm, secrets: &PeerSecrets) -> CachedSecretIds {
    CachedSecretIds {
        rs1_i: random_or(secrets.rs1.as_deref(), hash_alg, "Initiator"),
        rs1_r: random_or(secrets.rs1.as_deref(), hash_alg, "Responder"),
        rs2_i: random_or(secrets.rs2.as_deref(), hash_alg, "Initiator"),
        rs2_r: random_or(secrets.rs2.as_deref(), hash_alg, "Responder"),
        pbx_i: random_or(secrets.pbx.as_deref(), hash_alg, "Initiator"),
        pbx_r: random_or(secrets.pbx.as_deref(), hash_alg, "Responder"),
    }
}

/// One peer relationship: the fixed-size channel table plus everything
/// that is session-scoped rather than per-channel.
pub struct Session<C: ZidCache, CB: Callbacks> {
    pub self_zid: Zid,
    pub peer_zid: Option<Zid>,
    pub supported: SupportedAlgorithms,

    /// Set once the first channel completes; reused by later channels'
    /// multistream `s0` derivation.
    pub zrtp_sess: Option<Vec<u8>>,
    pub negotiated_key_agreement: Option<KeyAgreementAlgorithm>,

    pub peer_secrets: PeerSecrets,
    pub cached_secret_ids: Option<CachedSecretIds>,

    pub mtu: usize,
    pub peer_supports_multichannel: bool,
    pub cache_mismatch: bool,
    pub peer_hello_hash: Option<[u8; 32]>,
    pub transient_aux_secret: Option<Vec<u8>>,
    pub time_reference: u64,

    pub channels: Vec<Option<Channel>>,

    pub cache: C,
    pub callbacks: CB,
}

impl<C: ZidCache, CB: Callbacks> Session<C, CB> {
    pub fn new(self_zid: Zid, cache: C, callbacks: CB) -> Self {
        let mut channels = Vec::with_capacity(CHANNEL_TABLE_CAPACITY);
        channels.resize_with(CHANNEL_TABLE_CAPACITY, || None);
        Self {
            self_zid,
            peer_zid: None,
            supported: SupportedAlgorithms::default(),
            zrtp_sess: None,
            negotiated_key_agreement: None,
            peer_secrets: PeerSecrets::default(),
            cached_secret_ids: None,
            mtu: DEFAULT_MTU,
            peer_supports_multichannel: false,
            cache_mismatch: false,
            peer_hello_hash: None,
            transient_aux_secret: None,
            time_reference: 0,
            channels,
            cache,
            callbacks,
        }
    }

    pub fn set_supported_algorithms(&mut self, algorithms: SupportedAlgorithms) {
        self.supported = handshake_advertised(&algorithms);
    }

    pub fn set_peer_hello_hash(&mut self, hash: [u8; 32]) {
        self.peer_hello_hash = Some(hash);
    }

    pub fn set_transient_aux_secret(&mut self, secret: Vec<u8>) {
        self.transient_aux_secret = Some(secret);
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu.max(MIN_MTU);
    }

    /// Creates a channel in `discovery_init` and immediately dispatches
    /// `Init` to it.
    pub async fn start_channel(
        &mut self,
        channel_id: usize,
        ssrc: u32,
        is_main: bool,
    ) -> Result<(), EngineError> {
        if channel_id >= CHANNEL_TABLE_CAPACITY {
            return Err(EngineError::ChannelTableFull);
        }
        let hash_chain = HashChain::generate(HashAlgorithm::S256);
        self.channels[channel_id] = Some(Channel::new(channel_id, ssrc, is_main, hash_chain));
        debug!(channel_id, ssrc, is_main, "channel started");
        state::dispatch(self, channel_id, Event::Init).await
    }

    /// Feeds one received datagram through the ingress pipeline and, once a whole message is in hand, dispatches it.
    pub async fn process_message(&mut self, channel_id: usize, packet: &[u8]) -> Result<(), EngineError> {
        self.require_channel(channel_id)?;

        let envelope = envelope::parse(packet)?;

        let message_bytes: Vec<u8> = match envelope.fragment {
            None => {
                let channel = self.channels[channel_id].as_mut().expect("checked above");
                if let Some(prev) = channel.peer_sequence_number {
                    if envelope.sequence_number <= prev {
                        return Err(zrtp_proto::ProtoError::OutOfOrder.into());
                    }
                }
                channel.peer_sequence_number = Some(envelope.sequence_number);
                envelope.message.to_vec()
            }
            Some(fragment) => {
                let channel = self.channels[channel_id].as_mut().expect("checked above");
                match channel.reassembly.accept(0, fragment, envelope.message)? {
                    Outcome::DiscardedStale => return Ok(()),
                    Outcome::Held => return Ok(()),
                    Outcome::Complete(bytes) => bytes,
                }
            }
        };

        let header = zrtp_proto::message::parse_header(&message_bytes)?;
        let message_type = header.message_type;

        state::dispatch(
            self,
            channel_id,
            Event::Message {
                message_type,
                body: &message_bytes,
            },
        )
        .await
    }

    /// Advances `time_reference` and fires any due channel timers
    ///.
    pub async fn tick(&mut self, now_ms: u64) -> Result<(), EngineError> {
        self.time_reference = now_ms;
        for channel_id in 0..CHANNEL_TABLE_CAPACITY {
            let due = match &mut self.channels[channel_id] {
                Some(channel) => channel.timer.poll(now_ms),
                None => false,
            };
            if due {
                state::dispatch(self, channel_id, Event::Timer).await?;
            }
        }
        Ok(())
    }

    pub async fn go_clear(&mut self, channel_id: usize) -> Result<(), EngineError> {
        self.require_channel(channel_id)?;
        state::dispatch(self, channel_id, Event::GoClear).await
    }

    pub async fn accept_go_clear(&mut self, channel_id: usize) -> Result<(), EngineError> {
        self.require_channel(channel_id)?;
        state::dispatch(self, channel_id, Event::AcceptGoClear).await
    }

    pub async fn back_to_secure(&mut self, channel_id: usize) -> Result<(), EngineError> {
        self.require_channel(channel_id)?;
        state::dispatch(self, channel_id, Event::BackToSecure).await
    }

    fn require_channel(&self, channel_id: usize) -> Result<(), EngineError> {
        match self.channels.get(channel_id) {
            Some(Some(_)) => Ok(()),
            _ => Err(EngineError::NoSuchChannel(channel_id)),
        }
    }

    /// Looks up (or refreshes) the peer's cached secrets and the derived
    /// cached-secret ID set, fetching from the cache facade on first use
    /// for this peer.
    pub async fn load_peer_secrets(&mut self, peer_zid: Zid, hash_alg: HashAlgorithm) -> Result<(), EngineError> {
        if self.peer_zid == Some(peer_zid) && self.cached_secret_ids.is_some() {
            return Ok(());
        }
        let secrets = self.cache.get_peer_secrets(&peer_zid).await?;
        self.cached_secret_ids = Some(cached_secret_ids(hash_alg, &secrets));
        self.peer_secrets = secrets;
        self.peer_zid = Some(peer_zid);
        Ok(())
    }

    /// Rolls `rs1` forward and persists the updated secrets after a
    /// successful Confirm exchange.
    pub async fn roll_and_persist_secrets(&mut self, new_rs1: Vec<u8>, sas_verified: bool) -> Result<(), EngineError> {
        let peer_zid = self.peer_zid.ok_or_else(|| {
            EngineError::InvalidContext("cannot persist secrets before the peer ZID is known".into())
        })?;
        let updated = PeerSecrets {
            rs2: self.peer_secrets.rs1.clone(),
            rs1: Some(new_rs1),
            aux: self.peer_secrets.aux.clone(),
            pbx: self.peer_secrets.pbx.clone(),
            previously_verified_sas: sas_verified,
        };
        self.cache.update_peer_secrets(&peer_zid, &updated).await?;
        self.peer_secrets = updated;
        Ok(())
    }

    /// Wraps `message` in an envelope, fragmenting if it would exceed the
    /// configured MTU, and hands each resulting packet to the host
    ///. Message bodies built by this crate are always a
    /// whole number of 32-bit words, matching RFC 6189's fixed field
    /// sizes, so fragment boundaries never split a word. Takes `channel`
    /// directly (rather than a channel_id to look up) so `state::dispatch`
    /// can call this while the channel itself is temporarily taken out of
    /// `self.channels`.
    pub fn send_message(&mut self, channel: &mut Channel, message: &[u8]) {
        let overhead = FIXED_HEADER_LEN + envelope::CRC_LEN;
        if message.len() + overhead <= self.mtu {
            self.send_one_packet(channel, message, None);
            return;
        }

        let max_fragment_bytes = ((self.mtu - overhead - FRAGMENT_HEADER_LEN) / 4) * 4;
        if max_fragment_bytes == 0 {
            warn!(channel_id = channel.id, mtu = self.mtu, "mtu too small to fragment; dropping message");
            return;
        }
        let message_id = {
            let digest = sha256(message);
            u16::from_be_bytes([digest[0], digest[1]])
        };
        let total_length_words = (message.len() / 4) as u16;
        let mut offset_bytes = 0;
        while offset_bytes < message.len() {
            let end = (offset_bytes + max_fragment_bytes).min(message.len());
            let chunk = &message[offset_bytes..end];
            let fragment = FragmentHeader {
                message_id,
                message_total_length_words: total_length_words,
                offset_words: (offset_bytes / 4) as u16,
                fragment_length_words: (chunk.len() / 4) as u16,
            };
            self.send_one_packet(channel, chunk, Some(fragment));
            offset_bytes = end;
        }
    }

    fn send_one_packet(&mut self, channel: &mut Channel, payload: &[u8], fragment: Option<FragmentHeader>) {
        let mut packet = envelope::build(channel.ssrc, payload, fragment);
        let sequence_number = channel.next_sequence_number();
        envelope::set_sequence_number(&mut packet, sequence_number);
        self.callbacks.send_data(channel.id, &packet);
    }
}

fn handshake_advertised(configured: &SupportedAlgorithms) -> SupportedAlgorithms {
    crate::negotiation::advertised_algorithms(configured)
}

fn sha256(data: &[u8]) -> [u8; 32] {
    zrtp_crypto::hash::sha256(data)
}
