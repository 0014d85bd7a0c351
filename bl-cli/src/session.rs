/*!
 * Interactive Session Handler
 * Drives bluetoothctl line by line and waits for its answers
 */

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SessionError;
use crate::patterns::Invocation;

pub const CONTROL_UTILITY: &str = "bluetoothctl";

const READ_CHUNK: usize = 4096;

/// Deadline used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How an exchange ended when the utility answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The failure pattern matched; holds the matched text
    Failure(String),
}

pub struct Session<R, W> {
    reader: R,
    writer: W,
    /// Decoded output not consumed by a previous match
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    timeout: Duration,
    cancel: CancellationToken,
    // Killed on drop
    _child: Option<Child>,
}

pub type ChildSession = Session<ChildStdout, ChildStdin>;

impl ChildSession {
    pub fn open(program: &str, timeout: Duration, cancel: CancellationToken) -> Result<Self, SessionError> {
        let spawn_error = |source| SessionError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::new(ErrorKind::BrokenPipe, "stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::new(ErrorKind::BrokenPipe, "stdout not captured")))?;

        debug!(pid = ?child.id(), "Started {}", program);

        let mut session = Session::from_streams(stdout, stdin, timeout, cancel);
        session._child = Some(child);
        Ok(session)
    }
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn from_streams(reader: R, writer: W, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            reader,
            writer,
            buffer: String::new(),
            pending: Vec::new(),
            timeout,
            cancel,
            _child: None,
        }
    }

    pub async fn exec(&mut self, invocation: &Invocation) -> Result<Outcome, SessionError> {
        self.exec_within(invocation, self.timeout).await
    }

    /// Sends one command and races success, failure, end of stream and the
    /// deadline, in that order.
    pub async fn exec_within(
        &mut self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<Outcome, SessionError> {
        // Output printed before the command cannot answer it
        self.buffer.clear();

        debug!(command = %invocation.command, "Sending command");
        let line = format!("{}\n", invocation.command);
        self.writer.write_all(line.as_bytes()).await.map_err(write_error)?;
        self.writer.flush().await.map_err(write_error)?;

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(outcome) = self.take_match(invocation) {
                debug!(command = %invocation.command, ?outcome, "Command answered");
                return Ok(outcome);
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Interrupted),
                read = self.reader.read(&mut chunk) => read,
                _ = sleep_until(deadline) => {
                    debug!(command = %invocation.command, "No answer before deadline");
                    return Err(SessionError::Timeout(timeout));
                }
            };

            match read {
                Ok(0) => return Err(SessionError::Crashed),
                Ok(n) => self.push_output(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(SessionError::Crashed),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn push_output(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                self.pending.drain(..valid);
            }
            Err(_) => {
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
        }
    }

    /// Earliest match in the unconsumed output wins, success on a tie.
    fn take_match(&mut self, invocation: &Invocation) -> Option<Outcome> {
        let success = invocation.success.find(&self.buffer);
        let failure = invocation.failure.find(&self.buffer);

        let (outcome, end) = match (success, failure) {
            (Some(s), Some(f)) if f.start() < s.start() => (Outcome::Failure(f.as_str().to_string()), f.end()),
            (Some(s), _) => (Outcome::Success, s.end()),
            (None, Some(f)) => (Outcome::Failure(f.as_str().to_string()), f.end()),
            (None, None) => return None,
        };

        self.buffer.drain(..end);
        Some(outcome)
    }
}

fn write_error(e: std::io::Error) -> SessionError {
    match e.kind() {
        ErrorKind::BrokenPipe => SessionError::Crashed,
        _ => SessionError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type TestSession = Session<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn test_session(timeout: Duration) -> (TestSession, DuplexStream) {
        let (ours, theirs) = duplex(4096);
        let (reader, writer) = split(ours);
        (
            Session::from_streams(reader, writer, timeout, CancellationToken::new()),
            theirs,
        )
    }

    fn connect() -> Invocation {
        Invocation::connect("AA:BB:CC:DD:EE:FF").unwrap()
    }

    async fn read_line(peer: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            peer.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                return String::from_utf8(line).unwrap();
            }
            line.push(byte[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_never_waits() {
        let (mut session, mut peer) = test_session(Duration::from_secs(3600));
        peer.write_all(b"Attempting to connect\nConnection successful\n").await.unwrap();

        let start = Instant::now();
        let outcome = session.exec(&connect()).await.unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let (mut session, mut peer) = test_session(Duration::from_secs(u64::MAX));
        peer.write_all(b"Connection successful\n").await.unwrap();

        assert_eq!(session.exec(&connect()).await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn test_command_is_sent_as_a_line() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        let responder = tokio::spawn(async move {
            let line = read_line(&mut peer).await;
            peer.write_all(b"Connection successful\n").await.unwrap();
            (line, peer)
        });

        session.exec(&connect()).await.unwrap();
        let (line, _peer) = responder.await.unwrap();
        assert_eq!(line, "connect AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    async fn test_failure_pattern() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        peer.write_all(b"Failed to connect: org.bluez.Error.Failed\n").await.unwrap();

        let outcome = session.exec(&connect()).await.unwrap();
        assert_eq!(outcome, Outcome::Failure("Failed to connect".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_exact_duration() {
        let timeout = Duration::from_secs(10);
        let (mut session, mut peer) = test_session(timeout);
        peer.write_all(b"[CHG] Device AA:BB:CC:DD:EE:FF RSSI: -60\n").await.unwrap();

        let start = Instant::now();
        let err = session.exec(&connect()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, SessionError::Timeout(t) if t == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(100));
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_is_a_crash() {
        let (mut session, mut peer) = test_session(Duration::from_secs(3600));
        peer.write_all(b"Attempting to connect\n").await.unwrap();
        drop(peer);

        let start = Instant::now();
        let err = session.exec(&connect()).await.unwrap_err();
        assert!(matches!(err, SessionError::Crashed));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_earliest_match_wins() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        peer.write_all(b"Failed to connect\nConnection successful\n").await.unwrap();
        let outcome = session.exec(&connect()).await.unwrap();
        assert!(matches!(outcome, Outcome::Failure(_)));

        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        peer.write_all(b"Connection successful\nFailed to connect\n").await.unwrap();
        let outcome = session.exec(&connect()).await.unwrap();
        assert_eq!(outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_tie_goes_to_success() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        let ambiguous = Invocation::new("probe", "Device", "Device not").unwrap();
        peer.write_all(b"Device not available\n").await.unwrap();
        assert_eq!(session.exec(&ambiguous).await.unwrap(), Outcome::Success);
    }

    #[tokio::test]
    async fn test_match_spanning_reads() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        let writer = tokio::spawn(async move {
            peer.write_all(b"Connection succ").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            peer.write_all(b"essful\n").await.unwrap();
            peer
        });

        assert_eq!(session.exec(&connect()).await.unwrap(), Outcome::Success);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_utf8_split_across_reads() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        let name = "Kopfhörer".as_bytes();
        let split_at = name.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let probe = Invocation::new("probe", "Kopfhörer", "nope").unwrap();

        let writer = tokio::spawn(async move {
            peer.write_all(&name[..split_at]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            peer.write_all(&name[split_at..]).await.unwrap();
            peer
        });

        assert_eq!(session.exec(&probe).await.unwrap(), Outcome::Success);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_session_reuse_only_sees_new_output() {
        let (mut session, mut peer) = test_session(Duration::from_secs(5));
        let power = Invocation::power(true).unwrap();

        peer.write_all(b"Changing power on succeeded\n").await.unwrap();
        assert_eq!(session.exec(&power).await.unwrap(), Outcome::Success);

        let responder = tokio::spawn(async move {
            read_line(&mut peer).await;
            read_line(&mut peer).await;
            peer.write_all(b"Failed to set power on\n").await.unwrap();
            peer
        });
        assert!(matches!(session.exec(&power).await.unwrap(), Outcome::Failure(_)));
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (ours, _peer) = duplex(4096);
        let (reader, writer) = split(ours);
        let cancel = CancellationToken::new();
        let mut session = Session::from_streams(reader, writer, Duration::from_secs(3600), cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = session.exec(&connect()).await.unwrap_err();
        assert!(matches!(err, SessionError::Interrupted));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let result = ChildSession::open(
            "bl-test-no-such-control-utility",
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(SessionError::Spawn { .. })));
    }
}
