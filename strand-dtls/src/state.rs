use crate::cipher_suite::CipherSuiteAes128Gcm;
use crate::crypto::EcdhKeypair;
use crate::extension::SrtpProtectionProfile;
use crate::handshake::hello::HandshakeRandom;

/// Connection state shared by both handshake roles.
///
/// Key material lives here for the lifetime of the connection and is
/// dropped with it.
pub struct State {
    pub(crate) is_client: bool,

    pub(crate) local_epoch: u16,
    pub(crate) remote_epoch: u16,
    /// Next record sequence number, per local epoch.
    pub(crate) local_sequence_number: Vec<u64>,

    pub(crate) local_random: HandshakeRandom,
    pub(crate) remote_random: HandshakeRandom,

    pub(crate) cookie: Vec<u8>,
    pub(crate) handshake_send_sequence: u16,
    pub(crate) handshake_recv_sequence: u16,

    pub(crate) cipher_suite: Option<CipherSuiteAes128Gcm>,
    pub(crate) master_secret: Vec<u8>,
    pub(crate) pre_master_secret: Vec<u8>,
    pub(crate) extended_master_secret: bool,

    pub(crate) local_keypair: Option<EcdhKeypair>,
    pub(crate) remote_public_key: Vec<u8>,

    pub(crate) srtp_protection_profile: SrtpProtectionProfile,
    pub(crate) peer_certificates: Vec<Vec<u8>>,
    pub(crate) remote_requested_certificate: bool,

    pub(crate) local_verify_data: Vec<u8>,
}

impl State {
    pub(crate) fn new(is_client: bool) -> Self {
        State {
            is_client,
            local_epoch: 0,
            remote_epoch: 0,
            local_sequence_number: vec![0, 0],
            local_random: HandshakeRandom::generate(),
            remote_random: HandshakeRandom::default(),
            cookie: vec![],
            handshake_send_sequence: 0,
            handshake_recv_sequence: 0,
            cipher_suite: None,
            master_secret: vec![],
            pre_master_secret: vec![],
            extended_master_secret: false,
            local_keypair: None,
            remote_public_key: vec![],
            srtp_protection_profile: SrtpProtectionProfile::Unsupported,
            peer_certificates: vec![],
            remote_requested_certificate: false,
            local_verify_data: vec![],
        }
    }
}
