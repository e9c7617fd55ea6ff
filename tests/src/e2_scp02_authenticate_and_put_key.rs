//! E2 -- SCP02 authenticate + wrapped PUT KEY: the host channel
//! (`gp_ota_core::scp02::Scp02Channel`) and the card's GP handler set
//! (`gp_ota_sim::uicc::gp::GpState`) complete a full INITIALIZE UPDATE /
//! EXTERNAL AUTHENTICATE handshake against each other, then exchange one
//! secure-messaging-wrapped PUT KEY.

#[cfg(test)]
mod tests {
    use gp_ota_apdu::CommandApdu;
    use gp_ota_core::scp02::{Scp02Channel, SecurityLevel, StaticKeys};
    use gp_ota_sim::uicc::gp::GpState;

    #[test]
    fn host_and_card_authenticate_then_exchange_wrapped_put_key() {
        let static_keys = StaticKeys::default_test_keys();
        let mut host = Scp02Channel::new(static_keys.clone());
        let mut card = GpState::new(static_keys);

        let init_cmd = host.initialize_update([0u8; 8]);
        let init_resp = card.handle(0x50, &init_cmd);
        assert!(init_resp.sw.is_success());
        assert_eq!(init_resp.data.len(), 28);

        host.process_initialize_update_response(&init_resp.data).expect("card cryptogram must verify");

        let ext_auth_cmd = host.external_authenticate(SecurityLevel::CMac).unwrap();
        assert_eq!(ext_auth_cmd.cla, 0x84);

        let ext_auth_resp = card.handle(0x82, &ext_auth_cmd);
        assert!(ext_auth_resp.sw.is_success());
        host.process_external_authenticate_response(ext_auth_resp.sw).unwrap();

        let new_key = [0xaa; 16];
        let wrapped = host.wrap_key(&new_key).unwrap();
        assert_eq!(wrapped.len(), 24);

        let mut put_key_data = vec![0x01, 0x01, wrapped.len() as u8];
        put_key_data.extend_from_slice(&wrapped);
        let plain_put_key = CommandApdu::new(0x80, 0xd8, 0x01, 0x00).with_data(put_key_data.clone());

        let secured_put_key = host.wrap_apdu(&plain_put_key).unwrap();
        assert_eq!(secured_put_key.cla, 0x84);
        assert_eq!(secured_put_key.data.len(), put_key_data.len() + 8);

        let unwrapped = card.unwrap_secure(&secured_put_key).unwrap();
        assert_eq!(unwrapped.data, put_key_data);

        let put_key_resp = card.handle(0xd8, &unwrapped);
        assert!(put_key_resp.sw.is_success());
    }
}
