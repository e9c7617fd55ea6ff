//! Property test: for any sequence of commands sent over one open SCP02
//! session, the host's and card's C-MAC chaining values stay in lockstep --
//! every wrapped command the host produces is accepted by the card, in
//! order, regardless of how many commands precede it or what they contain.

#[cfg(test)]
mod tests {
    use gp_ota_apdu::CommandApdu;
    use gp_ota_core::scp02::{Scp02Channel, SecurityLevel, StaticKeys};
    use gp_ota_sim::uicc::gp::GpState;
    use proptest::prelude::*;

    fn open_session() -> (Scp02Channel, GpState) {
        let static_keys = StaticKeys::default_test_keys();
        let mut host = Scp02Channel::new(static_keys.clone());
        let mut card = GpState::new(static_keys);

        let init_resp = card.handle(0x50, &host.initialize_update([0u8; 8]));
        host.process_initialize_update_response(&init_resp.data).unwrap();
        let ext_auth_resp = card.handle(0x82, &host.external_authenticate(SecurityLevel::CMac).unwrap());
        host.process_external_authenticate_response(ext_auth_resp.sw).unwrap();

        (host, card)
    }

    proptest! {
        #[test]
        fn wrapped_commands_stay_mac_synchronized(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..=64), 1..=20)
        ) {
            let (mut host, mut card) = open_session();

            for payload in payloads {
                let plain = CommandApdu::new(0x80, 0xe2, 0x00, 0x00).with_data(payload);
                let secured = host.wrap_apdu(&plain).unwrap();

                let unwrapped = card.unwrap_secure(&secured).expect("card must accept an in-order wrapped command");
                let resp = card.handle(0xe2, &unwrapped);
                prop_assert!(resp.sw.is_success());
            }
        }
    }
}
