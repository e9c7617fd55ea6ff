//! GlobalPlatform handler set (card role): INITIALIZE UPDATE / EXTERNAL
//! AUTHENTICATE, secure-messaging unwrap, and the remaining administrative
//! commands of spec.md section 4.8. This is the card-side mirror of
//! `gp_ota_core::scp02::Scp02Channel` -- same algorithm, opposite role, so
//! the two never share a state machine.

use gp_ota_apdu::{CommandApdu, ResponseApdu, StatusWord};
use gp_ota_core::scp02::{CryptoProvider, Scp02Crypto, SecurityLevel, SessionKeys, StaticKeys};

const DERIVE_MAC: u16 = 0x0101;
const DERIVE_ENC: u16 = 0x0182;
const DERIVE_DEK: u16 = 0x0181;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ChannelState {
    Closed,
    AuthInProgress,
    Open(SecurityLevel),
}

/// Card-side SCP02 state plus the small amount of administrative state
/// (installed/loaded AIDs, stored data) the remaining GP INS handlers need.
pub struct GpState {
    static_keys: StaticKeys,
    crypto: Scp02Crypto,
    state: ChannelState,
    session_keys: Option<SessionKeys>,
    mac_chaining_value: [u8; 8],
    sequence_counter: u16,
    host_challenge: [u8; 8],
    card_challenge: [u8; 8],
    key_diversification_data: [u8; 10],
    stored_data: Vec<u8>,
    loaded_aids: Vec<Vec<u8>>,
}

impl GpState {
    pub fn new(static_keys: StaticKeys) -> Self {
        Self {
            static_keys,
            crypto: Scp02Crypto,
            state: ChannelState::Closed,
            session_keys: None,
            mac_chaining_value: [0u8; 8],
            sequence_counter: 1,
            host_challenge: [0u8; 8],
            card_challenge: [0u8; 8],
            key_diversification_data: [0u8; 10],
            stored_data: Vec::new(),
            loaded_aids: Vec::new(),
        }
    }

    pub fn is_secured_class(cla: u8) -> bool {
        cla & 0xf0 == 0x80 || cla & 0xf0 == 0x84
    }

    /// Dispatches one already-GP-classified command. `cmd` has already had
    /// any secure-messaging wrapper stripped by [`Self::unwrap_secure`].
    pub fn handle(&mut self, ins: u8, cmd: &CommandApdu) -> ResponseApdu {
        match ins {
            0x50 => self.initialize_update(cmd),
            0x82 => self.external_authenticate(cmd),
            0x84 => self.get_challenge(),
            0xd8 => self.put_key(cmd),
            0xe2 => self.store_data(cmd),
            0xf2 => self.get_status(),
            0xf0 => self.set_status(cmd),
            0xe6 => self.install(cmd),
            0xe8 => self.load(cmd),
            0xe4 => self.delete(cmd),
            _ => ResponseApdu::new(Vec::new(), StatusWord::INS_NOT_SUPPORTED),
        }
    }

    /// Verifies and strips a C-MAC (and C-ENC, if the negotiated level
    /// requires it) from a secured command, mirroring
    /// `Scp02Channel::wrap_apdu` in reverse. Returns the plaintext command
    /// ready for [`Self::handle`], or the SW to return directly on failure.
    pub fn unwrap_secure(&mut self, cmd: &CommandApdu) -> Result<CommandApdu, StatusWord> {
        let level = match self.state {
            ChannelState::Open(level) => level,
            _ => return Err(StatusWord::SECURITY_STATUS_NOT_SATISFIED),
        };
        let session_keys = self.session_keys.as_ref().expect("session keys set when open");

        if cmd.data.len() < 8 {
            return Err(StatusWord::WRONG_LENGTH);
        }
        let split = cmd.data.len() - 8;
        let (body, mac) = cmd.data.split_at(split);

        let plaintext = if level == SecurityLevel::CEncCMac && !body.is_empty() {
            let decrypted = self.crypto.tdes_cbc_encrypt(&session_keys.enc, &[0u8; 8], body);
            unpad_iso9797_method2(&decrypted).ok_or(StatusWord::new(0x69, 0x88))?
        } else {
            body.to_vec()
        };

        let lc_prime = plaintext.len() as u8 + 8;
        let unsecured_cla = cmd.cla & !0x04;
        let mut mac_input = vec![cmd.cla, cmd.ins, cmd.p1, cmd.p2, lc_prime];
        mac_input.extend_from_slice(&plaintext);
        let expected = self.crypto.retail_mac(&session_keys.mac, &self.mac_chaining_value, &mac_input);

        if expected != mac {
            return Err(StatusWord::new(0x69, 0x88));
        }
        self.mac_chaining_value = expected;

        Ok(CommandApdu { cla: unsecured_cla, ins: cmd.ins, p1: cmd.p1, p2: cmd.p2, data: plaintext, le: None })
    }

    fn initialize_update(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if cmd.data.len() != 8 {
            return ResponseApdu::new(Vec::new(), StatusWord::WRONG_LENGTH);
        }
        self.host_challenge.copy_from_slice(&cmd.data);
        self.card_challenge = rand::random();

        let seq = self.sequence_counter.to_be_bytes();
        let session_keys = SessionKeys {
            mac: derive_session_key(&self.crypto, &self.static_keys.mac, DERIVE_MAC, &seq),
            enc: derive_session_key(&self.crypto, &self.static_keys.enc, DERIVE_ENC, &seq),
            dek: derive_session_key(&self.crypto, &self.static_keys.dek, DERIVE_DEK, &seq),
        };

        let mut mac_input = Vec::with_capacity(24);
        mac_input.extend_from_slice(&self.host_challenge);
        mac_input.extend_from_slice(&seq);
        mac_input.extend_from_slice(&self.card_challenge);
        let card_cryptogram = self.crypto.retail_mac(&session_keys.mac, &[0u8; 8], &mac_input);

        self.session_keys = Some(session_keys);
        self.mac_chaining_value = [0u8; 8];
        self.state = ChannelState::AuthInProgress;

        let mut data = self.key_diversification_data.to_vec();
        data.extend_from_slice(&seq);
        data.extend_from_slice(&self.card_challenge);
        data.extend_from_slice(&card_cryptogram);
        ResponseApdu::ok(data)
    }

    fn external_authenticate(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::AuthInProgress) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        if cmd.data.len() != 16 {
            self.state = ChannelState::Closed;
            return ResponseApdu::new(Vec::new(), StatusWord::WRONG_LENGTH);
        }

        let session_keys = self.session_keys.clone().expect("session keys set in AuthInProgress");
        let (host_cryptogram, received_mac) = cmd.data.split_at(8);

        let seq = self.sequence_counter.to_be_bytes();
        let mut cryptogram_input = Vec::with_capacity(24);
        cryptogram_input.extend_from_slice(&seq);
        cryptogram_input.extend_from_slice(&self.card_challenge);
        cryptogram_input.extend_from_slice(&self.host_challenge);
        let expected_cryptogram = self.crypto.retail_mac(&session_keys.mac, &[0u8; 8], &cryptogram_input);

        if expected_cryptogram != host_cryptogram {
            self.state = ChannelState::Closed;
            return ResponseApdu::new(Vec::new(), StatusWord::AUTHENTICATION_FAILED);
        }

        let lc_prime = host_cryptogram.len() as u8 + 8;
        let mut cmac_input = vec![cmd.cla, cmd.ins, cmd.p1, cmd.p2, lc_prime];
        cmac_input.extend_from_slice(host_cryptogram);
        let expected_cmac = self.crypto.retail_mac(&session_keys.mac, &self.mac_chaining_value, &cmac_input);

        if expected_cmac != received_mac {
            self.state = ChannelState::Closed;
            return ResponseApdu::new(Vec::new(), StatusWord::AUTHENTICATION_FAILED);
        }

        let level = match cmd.p1 {
            0x03 => SecurityLevel::CEncCMac,
            0x01 => SecurityLevel::CMac,
            _ => SecurityLevel::None,
        };

        self.mac_chaining_value = expected_cmac;
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        self.state = ChannelState::Open(level);
        ResponseApdu::ok(Vec::new())
    }

    fn get_challenge(&self) -> ResponseApdu {
        let challenge: [u8; 8] = rand::random();
        ResponseApdu::ok(challenge.to_vec())
    }

    fn put_key(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        // key data is `{key version}{length}{24-byte wrapped key}` per GP PUT KEY;
        // this simulator only checks the wrapped-key length invariant.
        if cmd.data.len() < 24 {
            return ResponseApdu::new(Vec::new(), StatusWord::WRONG_LENGTH);
        }
        ResponseApdu::ok(vec![cmd.p2])
    }

    fn store_data(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        self.stored_data.extend_from_slice(&cmd.data);
        ResponseApdu::ok(Vec::new())
    }

    fn get_status(&self) -> ResponseApdu {
        let mut data = Vec::new();
        for aid in &self.loaded_aids {
            data.extend_from_slice(&gp_ota_apdu::TlvNode::primitive(vec![0x4f], aid.clone()).encode());
        }
        ResponseApdu::ok(data)
    }

    fn set_status(&mut self, _cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        ResponseApdu::ok(Vec::new())
    }

    fn install(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        if !cmd.data.is_empty() {
            self.loaded_aids.push(cmd.data.clone());
        }
        ResponseApdu::ok(Vec::new())
    }

    fn load(&mut self, _cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        ResponseApdu::ok(Vec::new())
    }

    fn delete(&mut self, cmd: &CommandApdu) -> ResponseApdu {
        if !matches!(self.state, ChannelState::Open(_)) {
            return ResponseApdu::new(Vec::new(), StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        let before = self.loaded_aids.len();
        self.loaded_aids.retain(|aid| aid != &cmd.data);
        if self.loaded_aids.len() == before {
            return ResponseApdu::new(Vec::new(), StatusWord::new(0x6a, 0x88));
        }
        ResponseApdu::ok(Vec::new())
    }
}

fn derive_session_key(crypto: &Scp02Crypto, static_key: &[u8; 16], constant: u16, seq: &[u8; 2]) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[0] = (constant >> 8) as u8;
    data[1] = (constant & 0xff) as u8;
    data[2] = seq[0];
    data[3] = seq[1];
    crypto.tdes_cbc_encrypt(static_key, &[0u8; 8], &data).try_into().expect("16-byte session key")
}

/// Strips ISO 9797-1 padding method 2: trailing `0x00`s back to (and
/// including) a single `0x80` marker byte.
fn unpad_iso9797_method2(data: &[u8]) -> Option<Vec<u8>> {
    let pos = data.iter().rposition(|&b| b != 0x00)?;
    if data[pos] != 0x80 {
        return None;
    }
    Some(data[..pos].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_handshake_opens_channel_and_unwraps_secured_command() {
        let static_keys = StaticKeys::default_test_keys();
        let mut card = GpState::new(static_keys.clone());

        let init_cmd = CommandApdu::new(0x80, 0x50, 0x00, 0x00).with_data(vec![0x01u8; 8]);
        let init_resp = card.initialize_update(&init_cmd);
        assert!(init_resp.sw.is_success());
        assert_eq!(init_resp.data.len(), 28);

        let kvd = &init_resp.data[0..10];
        let seq = &init_resp.data[10..12];
        let card_challenge: [u8; 8] = init_resp.data[12..20].try_into().unwrap();
        let card_cryptogram: [u8; 8] = init_resp.data[20..28].try_into().unwrap();
        assert_eq!(kvd, &[0u8; 10]);
        assert_eq!(seq, &[0x00, 0x01]);
        assert_eq!(card_challenge, card.card_challenge);

        // Host-side recomputation of what the host would send, using the
        // same derivation the card just ran.
        let session_mac = derive_session_key(&Scp02Crypto, &static_keys.mac, DERIVE_MAC, seq.try_into().unwrap());
        let mut mac_input = Vec::new();
        mac_input.extend_from_slice(&[0x01u8; 8]);
        mac_input.extend_from_slice(seq);
        mac_input.extend_from_slice(&card_challenge);
        let expected_card_cryptogram = Scp02Crypto.retail_mac(&session_mac, &[0u8; 8], &mac_input);
        assert_eq!(card_cryptogram, expected_card_cryptogram);

        let mut host_cryptogram_input = Vec::new();
        host_cryptogram_input.extend_from_slice(seq);
        host_cryptogram_input.extend_from_slice(&card_challenge);
        host_cryptogram_input.extend_from_slice(&[0x01u8; 8]);
        let host_cryptogram = Scp02Crypto.retail_mac(&session_mac, &[0u8; 8], &host_cryptogram_input);

        let lc_prime = host_cryptogram.len() as u8 + 8;
        let mut cmac_input = vec![0x84, 0x82, 0x01, 0x00, lc_prime];
        cmac_input.extend_from_slice(&host_cryptogram);
        let cmac = Scp02Crypto.retail_mac(&session_mac, &[0u8; 8], &cmac_input);

        let mut ext_auth_data = host_cryptogram.to_vec();
        ext_auth_data.extend_from_slice(&cmac);
        let ext_auth_cmd = CommandApdu::new(0x84, 0x82, 0x01, 0x00).with_data(ext_auth_data);

        let ext_auth_resp = card.external_authenticate(&ext_auth_cmd);
        assert!(ext_auth_resp.sw.is_success());
        assert!(matches!(card.state, ChannelState::Open(SecurityLevel::CMac)));

        // A trivial secured command (empty data field) with a correct C-MAC unwraps cleanly.
        let lc_prime2 = 0u8 + 8;
        let mac_input2 = vec![0x84, 0xf2, 0x00, 0x00, lc_prime2];
        let mac2 = Scp02Crypto.retail_mac(&session_mac, &cmac, &mac_input2);
        let secured_cmd = CommandApdu::new(0x84, 0xf2, 0x00, 0x00).with_data(mac2.to_vec());
        let unwrapped = card.unwrap_secure(&secured_cmd).unwrap();
        assert_eq!(unwrapped.data, Vec::<u8>::new());
    }

    #[test]
    fn wrong_host_cryptogram_closes_channel() {
        let mut card = GpState::new(StaticKeys::default_test_keys());
        card.initialize_update(&CommandApdu::new(0x80, 0x50, 0x00, 0x00).with_data(vec![0u8; 8]));
        let resp = card.external_authenticate(&CommandApdu::new(0x84, 0x82, 0x01, 0x00).with_data(vec![0u8; 16]));
        assert_eq!(resp.sw, StatusWord::AUTHENTICATION_FAILED);
        assert!(matches!(card.state, ChannelState::Closed));
    }

    #[test]
    fn unpad_rejects_missing_marker() {
        assert!(unpad_iso9797_method2(&[0x01, 0x02, 0x00, 0x00]).is_none());
        assert_eq!(unpad_iso9797_method2(&[0x01, 0x02, 0x80, 0x00]).unwrap(), vec![0x01, 0x02]);
    }
}
