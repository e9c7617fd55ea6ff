//! E1 -- Minimal GP session: a real Admin Server, over real PSK-TLS/TCP,
//! hands a queued SELECT command to a real Card Simulator and receives its
//! FCI response before closing the session.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use gp_ota_core::scp02::StaticKeys;
    use gp_ota_server::{AdminServer, AdminServerConfig, InMemoryPskStore};
    use gp_ota_sim::uicc::Profile;
    use gp_ota_sim::VirtualUicc;
    use tokio::net::{TcpListener, TcpSocket};

    const PSK_IDENTITY: &str = "test_card_001";
    const PSK_KEY_HEX: &str = "0102030405060708090A0B0C0D0E0F10";

    #[tokio::test]
    async fn queued_select_is_delivered_and_answered_before_close() {
        let mut psk_store = InMemoryPskStore::new();
        psk_store.insert(PSK_IDENTITY, hex::decode(PSK_KEY_HEX).unwrap());

        let config = AdminServerConfig::default();
        let server = Arc::new(AdminServer::new(config.clone(), Arc::new(psk_store)).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let accept_task = tokio::spawn(server.clone().accept_loop(listener, shutdown_rx));

        // Bind the client socket first so its local address is known, then
        // pre-create the session under that exact (identity, address) key
        // and queue the SELECT command -- avoiding any race with the
        // server's own session-creation-on-accept.
        let client_socket = TcpSocket::new_v4().unwrap();
        client_socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let client_local_addr = client_socket.local_addr().unwrap();

        let session = server.registry.create_or_reconnect(Some(PSK_IDENTITY.to_string()), Some(client_local_addr.to_string())).await;
        let select = hex::decode("00A404000AA000000151000000AABB00").unwrap();
        server.queue_commands(session.id, vec![select]).await.unwrap();

        let tcp = client_socket.connect(server_addr).await.unwrap();
        let ctx = gp_ota_server::psk::client_context(PSK_IDENTITY.as_bytes().to_vec(), hex::decode(PSK_KEY_HEX).unwrap(), &config.allowed_ciphers).unwrap();
        let (mut stream, tls_info) = gp_ota_server::psk::connect(&ctx, tcp, Duration::from_secs(5)).await.unwrap();
        assert_eq!(tls_info.cipher_suite, "PSK-AES128-CBC-SHA256");

        let mut uicc = VirtualUicc::new(Profile::default_isd(), StaticKeys::default_test_keys());
        let sim_config = gp_ota_sim::CardSimulatorConfig::default();
        gp_ota_sim::run_session(&mut stream, &sim_config, &mut uicc).await.unwrap();

        let updated_session = server.registry.get(session.id).await.unwrap();
        let logged_response = updated_session.log.iter().find(|e| e.direction == gp_ota_core::ApduDirection::FromCard);
        assert_eq!(logged_response.unwrap().sw, Some(0x9000));

        let _ = shutdown_tx.send(true);
        accept_task.await.unwrap();
    }
}
