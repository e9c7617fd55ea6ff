//! GlobalPlatform SCP02 secure channel (C3): INITIALIZE UPDATE / EXTERNAL
//! AUTHENTICATE handshake, session key derivation, C-MAC chaining, optional
//! C-ENC, and key wrapping.

mod crypto;
mod error;

pub use crypto::{CryptoProvider, Scp02Crypto};
pub use error::Error;

use gp_ota_apdu::{CommandApdu, StatusWord};

const DERIVE_MAC: u16 = 0x0101;
const DERIVE_ENC: u16 = 0x0182;
const DERIVE_DEK: u16 = 0x0181;

/// The three static keys provisioned onto a security domain.
#[derive(Clone, PartialEq, Debug)]
pub struct StaticKeys {
    pub enc: [u8; 16],
    pub mac: [u8; 16],
    pub dek: [u8; 16],
    pub version: u8,
}

impl StaticKeys {
    /// GlobalPlatform's well-known test key set: all three keys equal to
    /// `404142434445464748494A4B4C4D4E4F`, version 0.
    pub fn default_test_keys() -> Self {
        let k = [
            0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d,
            0x4e, 0x4f,
        ];
        Self { enc: k, mac: k, dek: k, version: 0 }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct SessionKeys {
    pub enc: [u8; 16],
    pub mac: [u8; 16],
    pub dek: [u8; 16],
}

/// Secure-messaging level negotiated at EXTERNAL AUTHENTICATE.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SecurityLevel {
    None = 0x00,
    CMac = 0x01,
    CEncCMac = 0x03,
}

#[derive(Clone, PartialEq, Debug)]
enum ChannelState {
    Init,
    AuthInProgress,
    Open(SecurityLevel),
    Closed,
}

/// SCP02 secure channel state machine, generic over the block-cipher
/// capability it consumes (see [`CryptoProvider`]).
pub struct Scp02Channel<C: CryptoProvider = Scp02Crypto> {
    static_keys: StaticKeys,
    state: ChannelState,
    session_keys: Option<SessionKeys>,
    mac_chaining_value: [u8; 8],
    sequence_counter: [u8; 2],
    card_challenge: [u8; 8],
    host_challenge: [u8; 8],
    key_diversification_data: [u8; 10],
    pending_security_level: Option<SecurityLevel>,
    crypto: C,
}

impl Scp02Channel<Scp02Crypto> {
    pub fn new(static_keys: StaticKeys) -> Self {
        Self::with_crypto(static_keys, Scp02Crypto)
    }
}

impl<C: CryptoProvider> Scp02Channel<C> {
    pub fn with_crypto(static_keys: StaticKeys, crypto: C) -> Self {
        Self {
            static_keys,
            state: ChannelState::Init,
            session_keys: None,
            mac_chaining_value: [0u8; 8],
            sequence_counter: [0u8; 2],
            card_challenge: [0u8; 8],
            host_challenge: [0u8; 8],
            key_diversification_data: [0u8; 10],
            pending_security_level: None,
            crypto,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ChannelState::Open(_))
    }

    pub fn security_level(&self) -> Option<SecurityLevel> {
        match self.state {
            ChannelState::Open(level) => Some(level),
            _ => None,
        }
    }

    pub fn key_diversification_data(&self) -> &[u8; 10] {
        &self.key_diversification_data
    }

    /// Build the INITIALIZE UPDATE command (`CLA=80, INS=50`).
    pub fn initialize_update(&mut self, host_challenge: [u8; 8]) -> CommandApdu {
        self.host_challenge = host_challenge;
        CommandApdu::new(0x80, 0x50, self.static_keys.version, 0x00).with_data(host_challenge.to_vec())
    }

    /// Process the 28-byte INITIALIZE UPDATE response: derive session keys
    /// and verify the card cryptogram.
    pub fn process_initialize_update_response(&mut self, resp: &[u8]) -> Result<(), Error> {
        if resp.len() != 28 {
            return Err(Error::MalformedResponse(resp.len()));
        }

        let kvd: [u8; 10] = resp[0..10].try_into().unwrap();
        let seq: [u8; 2] = resp[10..12].try_into().unwrap();
        let card_challenge: [u8; 8] = resp[12..20].try_into().unwrap();
        let card_cryptogram: [u8; 8] = resp[20..28].try_into().unwrap();

        let session_keys = SessionKeys {
            mac: self.derive_session_key(&self.static_keys.mac.clone(), DERIVE_MAC, &seq),
            enc: self.derive_session_key(&self.static_keys.enc.clone(), DERIVE_ENC, &seq),
            dek: self.derive_session_key(&self.static_keys.dek.clone(), DERIVE_DEK, &seq),
        };

        let mut mac_input = Vec::with_capacity(24);
        mac_input.extend_from_slice(&self.host_challenge);
        mac_input.extend_from_slice(&seq);
        mac_input.extend_from_slice(&card_challenge);
        let expected = self.crypto.retail_mac(&session_keys.mac, &[0u8; 8], &mac_input);

        if expected != card_cryptogram {
            self.state = ChannelState::Closed;
            return Err(Error::AuthenticationFailed);
        }

        self.key_diversification_data = kvd;
        self.sequence_counter = seq;
        self.card_challenge = card_challenge;
        self.session_keys = Some(session_keys);
        self.mac_chaining_value = [0u8; 8];
        self.state = ChannelState::AuthInProgress;

        Ok(())
    }

    fn derive_session_key(&self, static_key: &[u8; 16], constant: u16, seq: &[u8; 2]) -> [u8; 16] {
        let mut data = [0u8; 16];
        data[0] = (constant >> 8) as u8;
        data[1] = (constant & 0xff) as u8;
        data[2] = seq[0];
        data[3] = seq[1];
        let ciphertext = self.crypto.tdes_cbc_encrypt(static_key, &[0u8; 8], &data);
        ciphertext.try_into().expect("tdes_cbc_encrypt of 16 bytes yields 16 bytes")
    }

    /// Build the EXTERNAL AUTHENTICATE command (`CLA=84, INS=82`) at the
    /// requested security level. This is the first secured APDU: its C-MAC
    /// initializes the chaining value.
    pub fn external_authenticate(&mut self, security_level: SecurityLevel) -> Result<CommandApdu, Error> {
        if !matches!(self.state, ChannelState::AuthInProgress) {
            return Err(Error::ChannelNotOpen);
        }
        let session_keys = self.session_keys.as_ref().expect("session keys set in AuthInProgress");

        let mut mac_input = Vec::with_capacity(24);
        mac_input.extend_from_slice(&self.sequence_counter);
        mac_input.extend_from_slice(&self.card_challenge);
        mac_input.extend_from_slice(&self.host_challenge);
        let host_cryptogram = self.crypto.retail_mac(&session_keys.mac, &[0u8; 8], &mac_input);

        let cla = 0x84u8;
        let ins = 0x82u8;
        let p1 = security_level as u8;
        let p2 = 0x00u8;
        let lc_prime = host_cryptogram.len() as u8 + 8;

        let mut cmac_input = vec![cla, ins, p1, p2, lc_prime];
        cmac_input.extend_from_slice(&host_cryptogram);
        let cmac = self.crypto.retail_mac(&session_keys.mac, &self.mac_chaining_value, &cmac_input);
        self.mac_chaining_value = cmac;

        let mut data = host_cryptogram.to_vec();
        data.extend_from_slice(&cmac);

        self.pending_security_level = Some(security_level);

        Ok(CommandApdu::new(cla, ins, p1, p2).with_data(data))
    }

    /// Process the EXTERNAL AUTHENTICATE status word; opens the channel on
    /// success, closes it (fatally) on any failure.
    pub fn process_external_authenticate_response(&mut self, sw: StatusWord) -> Result<(), Error> {
        let level = self.pending_security_level.take().unwrap_or(SecurityLevel::None);
        if sw.is_success() {
            self.state = ChannelState::Open(level);
            Ok(())
        } else {
            self.state = ChannelState::Closed;
            Err(Error::AuthenticationFailed)
        }
    }

    /// Apply C-MAC (and, at `CEncCMac`, C-ENC) to `command`, returning the
    /// secured APDU ready to transmit. Per the resolved open question, the
    /// MAC is always computed over the plaintext data field, even when
    /// C-ENC is subsequently applied.
    pub fn wrap_apdu(&mut self, command: &CommandApdu) -> Result<CommandApdu, Error> {
        let level = self.security_level().ok_or(Error::ChannelNotOpen)?;
        let session_keys = self.session_keys.as_ref().expect("session keys set when open");

        let secured_cla = command.cla | 0x04;
        let plaintext = &command.data;

        let lc_prime_plain = plaintext.len() + 8;
        if lc_prime_plain > 255 {
            return Err(Error::CommandTooLarge);
        }

        let mut mac_input = vec![secured_cla, command.ins, command.p1, command.p2, lc_prime_plain as u8];
        mac_input.extend_from_slice(plaintext);
        let mac = self.crypto.retail_mac(&session_keys.mac, &self.mac_chaining_value, &mac_input);
        self.mac_chaining_value = mac;

        let data = if level == SecurityLevel::CEncCMac && !plaintext.is_empty() {
            let padded = crypto::iso9797_method2_pad(plaintext);
            let encrypted = self.crypto.tdes_cbc_encrypt(&session_keys.enc, &[0u8; 8], &padded);
            let mut out = encrypted;
            out.extend_from_slice(&mac);
            out
        } else {
            let mut out = plaintext.clone();
            out.extend_from_slice(&mac);
            out
        };

        if data.len() > 255 {
            return Err(Error::CommandTooLarge);
        }

        Ok(CommandApdu::new(secured_cla, command.ins, command.p1, command.p2).with_data(data))
    }

    /// Wrap a 16-byte key for PUT KEY: `TDES-ECB(DEK, key) || KCV`.
    pub fn wrap_key(&self, key: &[u8; 16]) -> Result<[u8; 24], Error> {
        let session_keys = self.session_keys.as_ref().ok_or(Error::ChannelNotOpen)?;
        if !self.is_authenticated() {
            return Err(Error::ChannelNotOpen);
        }

        let block_a: [u8; 8] = key[..8].try_into().unwrap();
        let block_b: [u8; 8] = key[8..].try_into().unwrap();
        let enc_a = self.crypto.tdes_ecb_encrypt_block(&session_keys.dek, &block_a);
        let enc_b = self.crypto.tdes_ecb_encrypt_block(&session_keys.dek, &block_b);

        let kcv_block = self.crypto.tdes_ecb_encrypt_block(key, &[0u8; 8]);

        let mut out = [0u8; 24];
        out[..8].copy_from_slice(&enc_a);
        out[8..16].copy_from_slice(&enc_b);
        out[16..19].copy_from_slice(&kcv_block[..3]);
        Ok(out)
    }
}
