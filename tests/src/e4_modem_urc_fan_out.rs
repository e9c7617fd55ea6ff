//! E4 -- Modem URC fan-out: with the modem idle, an unsolicited result code
//! matching two subscribers' patterns invokes both exactly once, and
//! neither invocation blocks the other.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use gp_ota_modem::mock::MockModem;
    use gp_ota_modem::AtInterface;

    #[tokio::test]
    async fn two_matching_subscribers_each_fire_once_on_a_shared_urc() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (f, s) = (first.clone(), second.clone());

        iface.on_urc(r"^\+CREG:", move |_line| { f.fetch_add(1, Ordering::SeqCst); }).unwrap();
        iface.on_urc(r"^\+CREG:", move |_line| {
            // A slow subscriber must not hold up the fast one.
            std::thread::sleep(Duration::from_millis(5));
            s.fetch_add(1, Ordering::SeqCst);
        }).unwrap();

        modem.send_line(r#"+CREG: 2,1,"1234","ABCD",7"#).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
