//! Card Simulator (client role of C6/C7): establishes PSK-TLS, walks the
//! Admin HTTP state machine from the card side, and dispatches each
//! received C-APDU to a [`crate::uicc::VirtualUicc`] (spec.md section
//! 4.7 "Client-side").

use std::net::SocketAddr;
use std::time::Duration;

use gp_ota_server::config::CipherSuite;
use gp_ota_server::psk;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::http_client;
use crate::uicc::VirtualUicc;

#[derive(Clone, Debug)]
pub struct CardSimulatorConfig {
    pub admin_path: String,
    pub admin_from: Option<String>,
    pub max_body_bytes: usize,
    pub allowed_ciphers: Vec<CipherSuite>,
    pub handshake_timeout: Duration,
}

impl Default for CardSimulatorConfig {
    fn default() -> Self {
        Self {
            admin_path: "/admin".to_string(),
            admin_from: None,
            max_body_bytes: 1 << 20,
            allowed_ciphers: CipherSuite::default_allowed(),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Connects to `addr`, completes the PSK-TLS handshake as the client, and
/// drives the Admin HTTP session to completion. Returns the negotiated
/// connection info on a clean (204) finish.
pub async fn connect_and_run(
    addr: SocketAddr,
    psk_identity: Vec<u8>,
    psk_key: Vec<u8>,
    config: &CardSimulatorConfig,
    uicc: &mut VirtualUicc,
) -> Result<gp_ota_core::TlsConnectionInfo, Error> {
    let tcp = TcpStream::connect(addr).await?;
    let ctx = psk::client_context(psk_identity, psk_key, &config.allowed_ciphers).map_err(from_server_error)?;
    let (mut stream, info) = psk::connect(&ctx, tcp, config.handshake_timeout).await.map_err(from_server_error)?;
    run_session(&mut stream, config, uicc).await?;
    Ok(info)
}

/// `gp_ota_server::Error` carries TLS/HTTP/session variants this crate
/// never produces; those map to this crate's closest analogue rather than
/// panicking, since a PSK-TLS error is always a legitimate runtime outcome
/// here too.
fn from_server_error(e: gp_ota_server::Error) -> Error {
    match e {
        gp_ota_server::Error::Tls(stack) => Error::Tls(stack),
        gp_ota_server::Error::TlsHandshake(msg) => Error::TlsHandshake(msg),
        gp_ota_server::Error::HandshakeTimeout(d) => Error::HandshakeTimeout(d),
        gp_ota_server::Error::Io(e) => Error::Io(e),
        other => Error::TlsHandshake(other.to_string()),
    }
}

/// Drives exactly the client-side state table of spec.md section 4.7 over
/// an already-established stream: empty POST, then loop on 200 responses
/// until a 204 or an error status terminates the session.
pub async fn run_session<S>(stream: &mut S, config: &CardSimulatorConfig, uicc: &mut VirtualUicc) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    http_client::write_request(stream, &config.admin_path, config.admin_from.as_deref(), &[]).await?;

    loop {
        let response = http_client::read_response(stream, config.max_body_bytes).await?;

        match response.status {
            200 => {
                let result = uicc.execute(&response.body);
                if let Some(delay) = result.delay {
                    tokio::time::sleep(delay).await;
                }
                let r_apdu = result.response.encode();
                http_client::write_request(stream, &config.admin_path, None, &r_apdu).await?;
            }
            204 => return Ok(()),
            status => return Err(Error::AdminAborted(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uicc::Profile;
    use gp_ota_core::scp02::StaticKeys;

    #[tokio::test]
    async fn e1_minimal_session_over_duplex() {
        let (mut client_side, mut server_side) = tokio::io::duplex(4096);
        let config = CardSimulatorConfig { admin_from: None, ..CardSimulatorConfig::default() };
        let mut uicc = VirtualUicc::new(Profile::default_isd(), StaticKeys::default_test_keys());

        let select = gp_ota_apdu::CommandApdu::new(0x00, 0xa4, 0x04, 0x00)
            .with_data(hex::decode("A000000151000000AABB00").unwrap())
            .encode()
            .unwrap();

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            // first (empty) POST
            let mut buf = vec![0u8; 4096];
            let n = server_side.read(&mut buf).await.unwrap();
            let _ = &buf[..n];
            server_side
                .write_all(format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", select.len()).as_bytes())
                .await
                .unwrap();
            server_side.write_all(&select).await.unwrap();

            // the simulator's R-APDU response to SELECT
            let mut buf2 = vec![0u8; 4096];
            let n2 = server_side.read(&mut buf2).await.unwrap();
            let body = &buf2[..n2];
            let body_start = body.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
            let r_apdu = &body[body_start..];
            assert_eq!(hex::encode_upper(r_apdu), "6F10840E315041592E5359532E44444630319000");

            server_side.write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n").await.unwrap();
        });

        run_session(&mut client_side, &config, &mut uicc).await.unwrap();
        server_task.await.unwrap();
    }
}
