//! E5 -- Netsim response correlation under reorder: two requests sent in
//! order A then B get responses in the reverse order B then A, and each
//! caller still receives only its own result.

#[cfg(test)]
mod tests {
    use gp_ota_netsim::{BackoffConfig, NetsimClient};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reordered_responses_resolve_to_the_matching_caller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let mut ids = Vec::new();
            while ids.len() < 2 {
                if let Some(line) = lines.next_line().await.unwrap() {
                    let req: serde_json::Value = serde_json::from_str(&line).unwrap();
                    ids.push(req["id"].as_str().unwrap().to_string());
                }
            }

            // Respond to the second request (B) first, then the first (A).
            for id in ids.iter().rev() {
                let resp = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": { "echo": id } });
                write_half.write_all(format!("{}\n", resp).as_bytes()).await.unwrap();
            }
        });

        let url = url::Url::parse(&format!("tcp://{addr}")).unwrap();
        let client = NetsimClient::connect(url, BackoffConfig::default()).await.unwrap();

        let (a, b) = tokio::join!(
            client.call("ue.attach", Some(serde_json::json!({ "which": "a" }))),
            client.call("ue.attach", Some(serde_json::json!({ "which": "b" }))),
        );

        let a = a.unwrap();
        let b = b.unwrap();
        assert_ne!(a["echo"], b["echo"]);

        server.await.unwrap();
    }
}
