//! Command framing, response parsing, and URC dispatch over an already-open
//! serial stream.
//!
//! A single [`AtInterface`] serializes commands one at a time (a FIFO lock
//! held across the send/wait cycle) while a background reader task keeps
//! consuming bytes from the port regardless of whether a command is
//! in-flight, so URCs arriving between commands are never dropped.
//!
//! URC/response disambiguation tracks the *currently-expected* response
//! prefix for whatever command is in flight, rather than a fixed prefix
//! list: a `+CSQ:` line counts as AT+CSQ's data line only while AT+CSQ is
//! the pending command, and as a URC otherwise. This differs from naive AT
//! bridges that hardcode "known response prefixes" and silently misclassify
//! anything not on the list.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::timeout;

use crate::error::Error;
use crate::response::{terminal_line, AtResponse, AtResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const CTRL_Z: u8 = 0x1A;

/// Commands whose response legitimately takes longer than the 5s default,
/// keyed by the `AT+NAME` prefix (case-sensitive, as sent over the wire).
fn long_timeout(command_name: &str) -> Option<Duration> {
    match command_name {
        "AT+COPS" | "AT+CGATT" | "AT+CGACT" | "AT+CFUN" => Some(Duration::from_secs(30)),
        "AT+COPS=?" => Some(Duration::from_secs(180)),
        _ => None,
    }
}

/// Derives the `+NAME:` response prefix a command implies, e.g.
/// `AT+CSQ` and `AT+CSQ?` both expect lines beginning with `+CSQ:`.
/// Plain (non-`+`) commands such as `ATI`/`ATZ` have no structured prefix.
fn expected_prefix(command: &str) -> Option<String> {
    let body = command.strip_prefix("AT")?;
    let plus_name = body.strip_prefix('+')?;
    let name: String = plus_name
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(format!("+{name}:"))
    }
}

fn is_urc_shaped(line: &str) -> bool {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^\+[A-Z][A-Z0-9]*:").unwrap());
    re.is_match(line.trim())
}

type UrcHandler = Arc<dyn Fn(String) + Send + Sync>;

struct ActiveCommand {
    prefix: Option<String>,
    lines_tx: mpsc::UnboundedSender<String>,
}

struct Shared {
    active: Option<ActiveCommand>,
    urc_tx: mpsc::UnboundedSender<String>,
    prompt_waiters: Vec<oneshot::Sender<()>>,
}

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// AT command engine: owns the write half of the port directly and drives a
/// background task over the read half.
///
/// The port's concrete type is erased behind `dyn AsyncRead`/`dyn
/// AsyncWrite` once split, so one `AtInterface` type covers both the real
/// `tokio_serial` stream and [`crate::mock::MockPort`] used in tests.
pub struct AtInterface {
    write_half: AsyncMutex<BoxedWriter>,
    command_lock: AsyncMutex<()>,
    shared: Arc<StdMutex<Shared>>,
    handlers: Arc<StdMutex<Vec<(Regex, UrcHandler)>>>,
    default_timeout: Duration,
}

impl AtInterface {
    /// Splits `port` and spawns the background reader over its read half.
    /// `port` must already be open at the desired baud rate.
    pub fn new<P>(port: P) -> Self
    where
        P: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(port);

        let (urc_tx, urc_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(StdMutex::new(Shared { active: None, urc_tx, prompt_waiters: Vec::new() }));
        let handlers: Arc<StdMutex<Vec<(Regex, UrcHandler)>>> = Arc::new(StdMutex::new(Vec::new()));

        spawn_reader(Box::new(read_half), shared.clone());
        spawn_urc_dispatcher(urc_rx, handlers.clone());

        Self {
            write_half: AsyncMutex::new(Box::new(write_half)),
            command_lock: AsyncMutex::new(()),
            shared,
            handlers,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Registers a URC handler: any unsolicited line matching `pattern` is
    /// passed to `handler` on its own task, so a slow or panicking handler
    /// never blocks other subscribers or the reader loop.
    pub fn on_urc<F>(&self, pattern: &str, handler: F) -> Result<(), regex::Error>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let re = Regex::new(pattern)?;
        self.handlers.lock().expect("handlers lock poisoned").push((re, Arc::new(handler)));
        Ok(())
    }

    /// Sends `command` and waits for a terminal response, using the
    /// command-specific timeout override when one applies.
    pub async fn send_command(&self, command: &str) -> Result<AtResponse, Error> {
        let effective_timeout = long_timeout(command_head(command)).unwrap_or(self.default_timeout);
        self.send_command_with_timeout(command, effective_timeout).await
    }

    pub async fn send_command_with_timeout(&self, command: &str, deadline: Duration) -> Result<AtResponse, Error> {
        log::debug!("-> {command}");
        let _guard = self.command_lock.lock().await;

        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.shared.lock().expect("shared lock poisoned");
            shared.active = Some(ActiveCommand { prefix: expected_prefix(command), lines_tx });
        }

        {
            let mut w = self.write_half.lock().await;
            w.write_all(command.as_bytes()).await?;
            w.write_all(b"\r\n").await?;
            w.flush().await?;
        }

        let mut collected: Vec<String> = Vec::new();
        let result = timeout(deadline, async {
            loop {
                match lines_rx.recv().await {
                    Some(line) => {
                        if let Some((result, code)) = terminal_line(&line) {
                            return Ok((result, code));
                        }
                        collected.push(line);
                    }
                    None => return Err(Error::PortClosed),
                }
            }
        })
        .await;

        self.shared.lock().expect("shared lock poisoned").active = None;

        let (result, code) = match result {
            Ok(inner) => inner?,
            Err(_) => {
                log::warn!("{command} timed out after {deadline:?}");
                return Ok(AtResponse {
                    command: command.to_string(),
                    raw_response: collected.join("\r\n"),
                    result: AtResult::Timeout,
                    data_lines: collected,
                    error_code: None,
                    error_message: None,
                });
            }
        };

        let prefix = expected_prefix(command);
        let mut data_lines = Vec::new();
        for line in collected {
            let belongs = match &prefix {
                Some(p) => line.trim().starts_with(p.as_str()),
                None => !is_urc_shaped(&line),
            };
            if belongs {
                data_lines.push(line);
            } else {
                let _ = self.shared.lock().expect("shared lock poisoned").urc_tx.send(line);
            }
        }

        let raw_response = data_lines.join("\r\n");
        Ok(AtResponse {
            command: command.to_string(),
            raw_response,
            result,
            data_lines,
            error_code: code,
            error_message: None,
        })
    }

    /// Sends a PDU-mode command, waits for the `>` data prompt, then writes
    /// `payload` terminated with Ctrl+Z, returning the final terminal
    /// response (the network's own OK/ERROR/+CMS ERROR).
    pub async fn send_pdu(&self, command: &str, payload: &[u8], deadline: Duration) -> Result<AtResponse, Error> {
        let _guard = self.command_lock.lock().await;

        let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
        let (prompt_tx, prompt_rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock().expect("shared lock poisoned");
            shared.active = Some(ActiveCommand { prefix: None, lines_tx });
            shared.prompt_waiters.push(prompt_tx);
        }

        {
            let mut w = self.write_half.lock().await;
            w.write_all(command.as_bytes()).await?;
            w.write_all(b"\r\n").await?;
            w.flush().await?;
        }

        timeout(deadline, prompt_rx).await.map_err(|_| Error::Timeout(deadline))?.ok();

        {
            let mut w = self.write_half.lock().await;
            w.write_all(payload).await?;
            w.write_all(&[CTRL_Z]).await?;
            w.flush().await?;
        }

        let mut collected = Vec::new();
        let result = timeout(deadline, async {
            loop {
                match lines_rx.recv().await {
                    Some(line) => {
                        if let Some((result, code)) = terminal_line(&line) {
                            return Ok((result, code));
                        }
                        collected.push(line);
                    }
                    None => return Err(Error::PortClosed),
                }
            }
        })
        .await;

        self.shared.lock().expect("shared lock poisoned").active = None;

        let (result, code) = match result {
            Ok(inner) => inner?,
            Err(_) => {
                return Ok(AtResponse {
                    command: command.to_string(),
                    raw_response: collected.join("\r\n"),
                    result: AtResult::Timeout,
                    data_lines: collected,
                    error_code: None,
                    error_message: None,
                });
            }
        };

        Ok(AtResponse {
            command: command.to_string(),
            raw_response: collected.join("\r\n"),
            result,
            data_lines: collected,
            error_code: code,
            error_message: None,
        })
    }
}

fn command_head(command: &str) -> &str {
    command.split(['=', '?']).next().unwrap_or(command)
}

fn spawn_reader(mut read_half: Box<dyn AsyncRead + Unpin + Send>, shared: Arc<StdMutex<Shared>>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let mut pending = Vec::new();
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    log::debug!("modem reader loop exiting, port closed");
                    break;
                }
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                if byte == b'\n' {
                    let line = String::from_utf8_lossy(&pending).trim_end_matches('\r').to_string();
                    pending.clear();
                    if line.is_empty() {
                        continue;
                    }
                    dispatch_line(&shared, line);
                } else if byte == b'>' && pending.is_empty() {
                    let mut shared_guard = shared.lock().expect("shared lock poisoned");
                    for waiter in shared_guard.prompt_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
    });
}

fn dispatch_line(shared: &Arc<StdMutex<Shared>>, line: String) {
    let mut shared_guard = shared.lock().expect("shared lock poisoned");
    if let Some(active) = &shared_guard.active {
        if active.lines_tx.send(line).is_ok() {
            return;
        }
    }
    let _ = shared_guard.urc_tx.send(line);
}

fn spawn_urc_dispatcher(mut urc_rx: mpsc::UnboundedReceiver<String>, handlers: Arc<StdMutex<Vec<(Regex, UrcHandler)>>>) {
    tokio::spawn(async move {
        while let Some(line) = urc_rx.recv().await {
            let matched: Vec<UrcHandler> = {
                let guard = handlers.lock().expect("handlers lock poisoned");
                guard.iter().filter(|(re, _)| re.is_match(&line)).map(|(_, h)| h.clone()).collect()
            };
            for handler in matched {
                let line = line.clone();
                tokio::spawn(async move {
                    let _ = std::panic::catch_unwind(AssertUnwindSafe(|| handler(line)));
                });
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn simple_ok_response() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);

        let modem_task = tokio::spawn(async move {
            let _cmd = modem.recv(64).await;
            modem.send_line("OK").await;
        });

        let resp = iface.send_command("ATI").await.unwrap();
        assert!(resp.is_ok());
        modem_task.await.unwrap();
    }

    #[tokio::test]
    async fn data_line_then_ok() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);

        let modem_task = tokio::spawn(async move {
            let _cmd = modem.recv(64).await;
            modem.send_line("+CSQ: 21,99").await;
            modem.send_line("OK").await;
        });

        let resp = iface.send_command("AT+CSQ").await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.data_lines, vec!["+CSQ: 21,99".to_string()]);
        modem_task.await.unwrap();
    }

    #[tokio::test]
    async fn cme_error_carries_code() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);

        let modem_task = tokio::spawn(async move {
            let _cmd = modem.recv(64).await;
            modem.send_line("+CME ERROR: 10").await;
        });

        let resp = iface.send_command("AT+CPIN?").await.unwrap();
        assert_eq!(resp.result, AtResult::CmeError);
        assert_eq!(resp.error_code, Some(10));
        modem_task.await.unwrap();
    }

    #[tokio::test]
    async fn urc_outside_command_window_is_dispatched() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        iface.on_urc(r"^\+CREG:", move |_line| { h.fetch_add(1, Ordering::SeqCst); }).unwrap();

        modem.send_line("+CREG: 2,1,\"1A2B\",\"00112233\"").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_urc_subscribers_each_fire_once() {
        let (port, mut modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let (a2, b2) = (a.clone(), b.clone());
        iface.on_urc(r"^\+CREG:", move |_| { a2.fetch_add(1, Ordering::SeqCst); }).unwrap();
        iface.on_urc(r"^\+CREG:", move |_| { b2.fetch_add(1, Ordering::SeqCst); }).unwrap();

        modem.send_line("+CREG: 1,1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_when_modem_silent() {
        let (port, _modem) = MockModem::pair(4096);
        let iface = AtInterface::new(port);
        let resp = iface.send_command_with_timeout("ATI", Duration::from_millis(30)).await.unwrap();
        assert_eq!(resp.result, AtResult::Timeout);
    }

    #[test]
    fn derives_expected_prefix() {
        assert_eq!(expected_prefix("AT+CSQ"), Some("+CSQ:".to_string()));
        assert_eq!(expected_prefix("AT+CSQ?"), Some("+CSQ:".to_string()));
        assert_eq!(expected_prefix("AT+CREG=2"), Some("+CREG:".to_string()));
        assert_eq!(expected_prefix("ATI"), None);
    }
}
