//! Per-channel state: the role, current
//! state, retransmission timer, both hash chains, the packet transcript
//! stores, fragment reassembly, negotiated algorithms, and everything the
//! key schedule produces.

use zrtp_crypto::hash_chain::{HashChain, PeerHashChain};
use zrtp_crypto::keyagreement::KeyAgreementContext;
use zrtp_crypto::keyschedule::{DerivedKeys, KdfContext};
use zrtp_crypto::primitives::KeyAgreementAlgorithm;
use zrtp_proto::algorithms::NegotiatedAlgorithms;
use zrtp_proto::fragment::Reassembly;
use zrtp_proto::message::Ping;

use crate::state::State;
use crate::timer::RetransmissionTimer;

/// A channel's role in the handshake. Starts `Initiator` and may flip to
/// `Responder` on commit contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// The five transcript slots a channel keeps per direction. Slot 0
/// (`Hello`) survives a GoClear/back-to-secure cycle; the rest are cleared
/// when that happens since a fresh handshake repopulates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSlot {
    Hello,
    Commit,
    DhPart,
    Confirm,
    GoClear,
}

const SLOT_COUNT: usize = 5;

fn slot_index(slot: PacketSlot) -> usize {
    match slot {
        PacketSlot::Hello => 0,
        PacketSlot::Commit => 1,
        PacketSlot::DhPart => 2,
        PacketSlot::Confirm => 3,
        PacketSlot::GoClear => 4,
    }
}

/// One party's transcript store: the exact bytes last built or received
/// for each message kind, retained verbatim for MAC/transcript purposes
///.
#[derive(Debug, Clone, Default)]
pub struct PacketStore {
    slots: [Option<Vec<u8>>; SLOT_COUNT],
}

impl PacketStore {
    pub fn get(&self, slot: PacketSlot) -> Option<&[u8]> {
        self.slots[slot_index(slot)].as_deref()
    }

    pub fn set(&mut self, slot: PacketSlot, bytes: Vec<u8>) {
        self.slots[slot_index(slot)] = Some(bytes);
    }

    /// Clears every slot except `Hello`, which must remain intact across a
    /// GoClear/back-to-secure cycle.
    pub fn clear_for_new_handshake(&mut self) {
        for i in 1..SLOT_COUNT {
            self.slots[i] = None;
        }
    }
}

/// Everything one channel needs to run the handshake, independent of the
/// session-level state shared across channels.
pub struct Channel {
    pub id: usize,
    pub ssrc: u32,
    pub is_main_channel: bool,

    pub role: Role,
    pub state: State,
    pub timer: RetransmissionTimer,

    pub self_sequence_number: u16,
    pub peer_sequence_number: Option<u16>,

    pub self_hash_chain: HashChain,
    pub peer_hash_chain: PeerHashChain,

    pub self_packets: PacketStore,
    pub peer_packets: PacketStore,

    pub reassembly: Reassembly,

    pub negotiated: Option<NegotiatedAlgorithms>,
    pub key_agreement_ctx: Option<KeyAgreementContext>,
    pub peer_key_agreement_mode: Option<KeyAgreementAlgorithm>,

    /// KEM1-responder's shared secret, computed early at DHPart1-build time
    /// (the encapsulation already yields it) and consumed once DHPart2's
    /// nonce arrives — every other mode derives its shared secret directly
    /// from `key_agreement_ctx.agree()` at that point instead.
    pub pending_shared_secret: Option<Vec<u8>>,

    /// `auxID_i`/`auxID_r`, keyed by each side's H3.
    pub aux_id_self: Option<[u8; 8]>,
    pub aux_id_peer: Option<[u8; 8]>,

    pub kdf_context: Option<KdfContext>,
    pub s0: Option<Vec<u8>>,
    pub derived: Option<DerivedKeys>,
    pub sas_rendered: Option<String>,

    pub is_secure: bool,
    pub is_clear: bool,
    pub has_received_goclear: bool,

    /// Holds an inbound Ping just long enough to synthesise its PingACK
    ///.
    pub transient_ping: Option<Ping>,
}

impl Channel {
    pub fn new(id: usize, ssrc: u32, is_main_channel: bool, self_hash_chain: HashChain) -> Self {
        Self {
            id,
            ssrc,
            is_main_channel,
            role: Role::Initiator,
            state: State::DiscoveryInit,
            timer: RetransmissionTimer::default(),
            self_sequence_number: 0,
            peer_sequence_number: None,
            self_hash_chain,
            peer_hash_chain: PeerHashChain::default(),
            self_packets: PacketStore::default(),
            peer_packets: PacketStore::default(),
            reassembly: Reassembly::default(),
            negotiated: None,
            key_agreement_ctx: None,
            peer_key_agreement_mode: None,
            pending_shared_secret: None,
            aux_id_self: None,
            aux_id_peer: None,
            kdf_context: None,
            s0: None,
            derived: None,
            sas_rendered: None,
            is_secure: false,
            is_clear: false,
            has_received_goclear: false,
            transient_ping: None,
        }
    }

    /// The next outbound sequence number, incrementing the stored counter
    ///.
    pub fn next_sequence_number(&mut self) -> u16 {
        let n = self.self_sequence_number;
        self.self_sequence_number = self.self_sequence_number.wrapping_add(1);
        n
    }

    /// Wipes every derived secret, used on ClearACK and channel teardown
    ///. `zeroize::Zeroize`/`ZeroizeOnDrop` on `DerivedKeys`
    /// handles the actual wipe; this just drops the owning values.
    pub fn wipe_keys(&mut self) {
        self.s0 = None;
        self.derived = None;
        self.key_agreement_ctx = None;
        self.pending_shared_secret = None;
    }
}
