//! Socket/tunnel transport abstraction with polled, buffered I/O (C7)
//!
//! Grounded on `examples/original_source/mutt_socket.c` (raw TCP connect,
//! buffered read/poll) and `mutt_tunnel.c` (subprocess transport). Per §5's
//! single-threaded cooperative model this is synchronous, not
//! executor-driven: `rustls::Stream` wraps the same [`Transport`] in sync
//! mode for TLS (see `tls.rs`), and `poll(2)` is invoked directly via
//! `libc` rather than through an async reactor.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::errors::{CoreError, CoreResult};

/// A raw byte transport: TCP socket or tunnel subprocess pipe pair
pub trait Transport {
    fn raw_read(&mut self, buf: &mut [u8]) -> CoreResult<usize>;
    fn raw_write(&mut self, buf: &[u8]) -> CoreResult<usize>;
    /// Block up to `wait` for readability, looping across `EINTR` while
    /// preserving the residual timeout. Returns `true` if readable.
    fn poll_readable(&mut self, wait: Duration) -> CoreResult<bool>;
    fn close(&mut self) -> CoreResult<()>;
}

/// Raw TCP backend
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Resolve `host` (candidates in address-family order), install a
    /// `SIGALRM`-based connect timeout, block `SIGWINCH` around
    /// `connect(2)`, and return the first successful socket. Sets
    /// `FD_CLOEXEC` on success.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> CoreResult<Self> {
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|e| CoreError::Io(format!("address resolution failed for {host}:{port}: {e}")))?;

        let mut last_err = None;
        for addr in candidates {
            let _guard = ConnectSignalGuard::install(timeout);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| CoreError::Io(format!("setsockopt TCP_NODELAY failed: {e}")))?;
                    set_cloexec(stream.as_raw_fd())?;
                    return Ok(Self { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(CoreError::Io(format!(
            "failed to connect to {host}:{port}: {}",
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no addresses".to_owned())
        )))
    }
}

impl Transport for TcpTransport {
    fn raw_read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.stream.read(buf).map_err(|e| CoreError::Io(format!("socket read failed: {e}")))
    }

    fn raw_write(&mut self, buf: &[u8]) -> CoreResult<usize> {
        self.stream.write(buf).map_err(|e| CoreError::Io(format!("socket write failed: {e}")))
    }

    fn poll_readable(&mut self, wait: Duration) -> CoreResult<bool> {
        poll_fd_readable(self.stream.as_raw_fd(), wait)
    }

    fn close(&mut self) -> CoreResult<()> {
        self.stream
            .shutdown(std::net::Shutdown::Both)
            .or_else(|e| if e.kind() == std::io::ErrorKind::NotConnected { Ok(()) } else { Err(e) })
            .map_err(|e| CoreError::Io(format!("socket shutdown failed: {e}")))
    }
}

/// Tunnel backend: a shell subprocess over a stdin/stdout pipe pair.
///
/// `setsid(2)` prevents the child from grabbing the controlling TTY;
/// stderr goes to `/dev/null` so the parent never sees it.
pub struct TunnelTransport {
    child: Child,
    stdin: std::process::ChildStdin,
    stdout: std::process::ChildStdout,
}

impl TunnelTransport {
    pub fn spawn(shell_command: &str) -> CoreResult<Self> {
        let devnull = std::fs::File::open("/dev/null")
            .map_err(|e| CoreError::Io(format!("failed to open /dev/null for tunnel stderr: {e}")))?;

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(shell_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(devnull));

        // SAFETY: `setsid` is async-signal-safe and called only in the
        // post-fork child before exec, per `pre_exec`'s contract.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .map_err(|e| CoreError::Io(format!("failed to spawn tunnel command '{shell_command}': {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| CoreError::Io("tunnel child has no stdin".to_owned()))?;
        let stdout = child.stdout.take().ok_or_else(|| CoreError::Io("tunnel child has no stdout".to_owned()))?;
        Ok(Self { child, stdin, stdout })
    }
}

impl Transport for TunnelTransport {
    fn raw_read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        self.stdout.read(buf).map_err(|e| CoreError::Io(format!("tunnel read failed: {e}")))
    }

    fn raw_write(&mut self, buf: &[u8]) -> CoreResult<usize> {
        self.stdin.write(buf).map_err(|e| CoreError::Io(format!("tunnel write failed: {e}")))
    }

    fn poll_readable(&mut self, wait: Duration) -> CoreResult<bool> {
        poll_fd_readable(self.stdout.as_raw_fd(), wait)
    }

    fn close(&mut self) -> CoreResult<()> {
        // drop stdin to signal EOF to the child, then reap it
        let _ = self.child.kill();
        self.child
            .wait()
            .map(|_| ())
            .map_err(|e| CoreError::Io(format!("tunnel child wait failed: {e}")))
    }
}

use std::os::unix::process::CommandExt;

/// `poll(2)` on a single fd for readability, retrying across `EINTR` while
/// preserving the residual timeout.
fn poll_fd_readable(fd: RawFd, wait: Duration) -> CoreResult<bool> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        // SAFETY: `pfd` is a single valid pollfd on the stack, `nfds` matches.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc >= 0 {
            return Ok(rc > 0 && (pfd.revents & libc::POLLIN) != 0);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            continue;
        }
        return Err(CoreError::Io(format!("poll(2) failed: {err}")));
    }
}

extern "C" fn noop_alarm_handler(_signum: libc::c_int) {}

/// Installs a `SIGALRM` handler with the connect timeout and blocks
/// `SIGWINCH` for the guard's lifetime, restoring both on drop. FreeBSD
/// does not honour `SA_RESTART` for `SIGWINCH` around `connect(2)`, so the
/// handler is installed without it (`SA_INTERRUPT` semantics) to guarantee
/// `connect(2)` returns `EINTR` rather than retrying silently past the
/// deadline.
struct ConnectSignalGuard {
    previous_alarm: libc::sigaction,
    previous_mask: libc::sigset_t,
}

impl ConnectSignalGuard {
    fn install(timeout: Duration) -> Self {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = noop_alarm_handler as usize;
            action.sa_flags = 0; // no SA_RESTART: connect(2) must see EINTR
            libc::sigemptyset(&mut action.sa_mask);

            let mut previous_alarm: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGALRM, &action, &mut previous_alarm);

            let mut block_set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut block_set);
            libc::sigaddset(&mut block_set, libc::SIGWINCH);
            let mut previous_mask: libc::sigset_t = std::mem::zeroed();
            libc::pthread_sigmask(libc::SIG_BLOCK, &block_set, &mut previous_mask);

            libc::alarm(timeout.as_secs().max(1) as libc::c_uint);

            Self { previous_alarm, previous_mask }
        }
    }
}

impl Drop for ConnectSignalGuard {
    fn drop(&mut self) {
        unsafe {
            libc::alarm(0);
            libc::sigaction(libc::SIGALRM, &self.previous_alarm, std::ptr::null_mut());
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous_mask, std::ptr::null_mut());
        }
    }
}

fn set_cloexec(fd: RawFd) -> CoreResult<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            return Err(CoreError::Io(format!("fcntl F_GETFD failed: {}", std::io::Error::last_os_error())));
        }
        if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
            return Err(CoreError::Io(format!("fcntl F_SETFD failed: {}", std::io::Error::last_os_error())));
        }
    }
    Ok(())
}

/// A buffered connection over any [`Transport`].
///
/// Invariant: `buf_pos <= available`. "Has buffered input" iff
/// `buf_pos < available`. Before a STARTTLS upgrade the caller MUST check
/// [`Connection::has_buffered_input`] is `false` — any pre-TLS data left
/// over from the peer is a protocol violation, since an attacker could
/// otherwise inject plaintext that gets misread as post-TLS ciphertext.
pub struct Connection<T: Transport> {
    transport: T,
    inbuf: Vec<u8>,
    buf_pos: usize,
    available: usize,
    /// security-strength factor: 0 = plaintext, >0 = protected
    pub ssf: u32,
}

const READ_CHUNK: usize = 8192;

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            inbuf: vec![0u8; READ_CHUNK],
            buf_pos: 0,
            available: 0,
            ssf: 0,
        }
    }

    pub fn has_buffered_input(&self) -> bool {
        self.buf_pos < self.available
    }

    /// Must be called (and must succeed) before handing the transport to a
    /// STARTTLS upgrade.
    pub fn assert_no_buffered_input_before_starttls(&self) -> CoreResult<()> {
        if self.has_buffered_input() {
            return Err(CoreError::Tls(
                "refusing STARTTLS: buffered plaintext input remains from before the upgrade".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn close(&mut self) -> CoreResult<()> {
        self.transport.close()
    }

    /// Poll for readability; short-circuits if the internal buffer still
    /// has bytes.
    pub fn poll(&mut self, wait: Duration) -> CoreResult<bool> {
        if self.has_buffered_input() {
            return Ok(true);
        }
        self.transport.poll_readable(wait)
    }

    fn fill_buffer(&mut self) -> CoreResult<usize> {
        if self.has_buffered_input() {
            return Ok(self.available - self.buf_pos);
        }
        let n = self.transport.raw_read(&mut self.inbuf)?;
        self.buf_pos = 0;
        self.available = n;
        Ok(n)
    }

    /// Read up to `buf.len()` bytes, serving from the internal buffer first
    pub fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        if !self.has_buffered_input() && self.fill_buffer()? == 0 {
            return Ok(0);
        }
        let n = buf.len().min(self.available - self.buf_pos);
        buf[..n].copy_from_slice(&self.inbuf[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> CoreResult<usize> {
        self.transport.raw_write(buf)
    }

    pub fn write_all(&mut self, buf: &[u8]) -> CoreResult<()> {
        let mut written = 0;
        while written < buf.len() {
            written += self.write(&buf[written..])?;
        }
        Ok(())
    }

    /// One buffered byte, or `None` at EOF
    pub fn readchar(&mut self) -> CoreResult<Option<u8>> {
        if !self.has_buffered_input() && self.fill_buffer()? == 0 {
            return Ok(None);
        }
        let b = self.inbuf[self.buf_pos];
        self.buf_pos += 1;
        Ok(Some(b))
    }

    /// Read up to and including the next `\n`, stripping it and any `\r`
    pub fn readln(&mut self) -> CoreResult<Option<String>> {
        let mut line = Vec::new();
        loop {
            match self.readchar()? {
                Some(b'\n') => break,
                Some(b) => line.push(b),
                None if line.is_empty() => return Ok(None),
                None => break,
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    pub fn writeln(&mut self, line: &str) -> CoreResult<()> {
        self.write_all(line.as_bytes())?;
        self.write_all(b"\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeTransport {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl FakeTransport {
        fn new(data: &[u8]) -> Self {
            Self {
                inbound: data.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn raw_read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn raw_write(&mut self, buf: &[u8]) -> CoreResult<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn poll_readable(&mut self, _wait: Duration) -> CoreResult<bool> {
            Ok(!self.inbound.is_empty())
        }

        fn close(&mut self) -> CoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn readln_splits_on_crlf_and_strips_it() {
        let mut conn = Connection::new(FakeTransport::new(b"LOGIN ok\r\nNEXT\r\n"));
        assert_eq!(conn.readln().unwrap().as_deref(), Some("LOGIN ok"));
        assert_eq!(conn.readln().unwrap().as_deref(), Some("NEXT"));
        assert_eq!(conn.readln().unwrap(), None);
    }

    #[test]
    fn poll_short_circuits_when_buffer_has_bytes() {
        let mut conn = Connection::new(FakeTransport::new(b"x"));
        let mut one_byte = [0u8; 1];
        conn.read(&mut one_byte).unwrap();
        // read pulled the whole chunk into inbuf's 8192-byte buffer, but
        // buf_pos now equals available so nothing is buffered
        assert!(!conn.has_buffered_input());
    }

    #[test]
    fn starttls_guard_rejects_when_input_is_buffered() {
        let transport = FakeTransport::new(b"ab");
        let mut conn = Connection::new(transport);
        let mut one = [0u8; 1];
        conn.read(&mut one).unwrap();
        assert!(conn.has_buffered_input());
        assert!(conn.assert_no_buffered_input_before_starttls().is_err());
    }

    #[test]
    fn starttls_guard_passes_when_buffer_drained() {
        let mut conn = Connection::new(FakeTransport::new(b"ab"));
        let mut two = [0u8; 2];
        conn.read(&mut two).unwrap();
        assert!(!conn.has_buffered_input());
        assert!(conn.assert_no_buffered_input_before_starttls().is_ok());
    }

    #[test]
    fn writeln_appends_crlf() {
        let mut conn = Connection::new(FakeTransport::new(b""));
        conn.writeln("a1 LOGIN user pass").unwrap();
        assert_eq!(conn.transport.outbound, b"a1 LOGIN user pass\r\n");
    }
}
