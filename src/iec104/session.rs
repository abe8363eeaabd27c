//! Companion standard 104 session engine: connection lifecycle, sliding
//! send/receive windows and the t1/t2/t3 timer machinery over one TCP
//! connection (or any byte stream, for tests and embedding).
//!
//! Per connection three tasks cooperate: a reader that frames inbound
//! APDUs, a writer that drains encoded frames with transient-error
//! retries, and the engine holding every piece of protocol state. The
//! engine alone mutates the pending table, so no state is shared.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::apdu::{seq_count, seq_next, Apci, Apdu, UFunction, APDU_SIZE_MAX, START_BYTE};
use super::config::{Iec104Config, RETRY_INTERVAL};
use crate::asdu::ASDU_SIZE_MAX;
use crate::error::{IecError, IecResult};

/// Availability of the data transfer level. Strictly monotonic over one
/// connection, except that the peer may push Up back to Down with STOPDT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Connection finished or failed
    Exit,
    /// Connected, data transfer stopped
    Down,
    /// Data transfer running
    Up,
}

/// One outbound ASDU with its delivery confirmation channel. The channel
/// resolves once the peer acknowledged the carrying I-frame, or with an
/// error when the connection went down first.
#[derive(Debug)]
pub struct Outbound {
    pub payload: Vec<u8>,
    pub done: oneshot::Sender<IecResult<()>>,
}

/// Running totals of one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// Handle to a running 104 session.
///
/// Outbound ASDUs go through two priority queues: class 1 for spontaneous
/// and request traffic, class 2 for cyclic background transfer. Class 1
/// preempts class 2 whenever both hold work. Submissions block while the
/// peer leaves k I-frames unacknowledged, and while the level is Down.
pub struct Session {
    class1: mpsc::Sender<Outbound>,
    class2: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<Vec<u8>>,
    errors: mpsc::Receiver<IecError>,
    level: watch::Receiver<Level>,
    target: mpsc::Sender<Level>,
    stats: Arc<SessionStats>,
    t1: Duration,
}

impl Session {
    /// Dial a controlled station and run the session over the connection.
    /// The connect attempt is bounded by t0; the session starts Down.
    pub async fn connect(cfg: Iec104Config) -> IecResult<Self> {
        cfg.validate()?;
        let addr = format!("{}:{}", cfg.host, cfg.port);
        debug!(%addr, "connecting");
        let stream = timeout(cfg.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| IecError::ConnectTimeout)??;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {e}");
        }
        info!(%addr, "connected");
        Self::spawn(stream, cfg)
    }

    /// Run the session over an established byte stream. Used by servers
    /// accepting connections and by tests over in-memory pipes.
    pub fn spawn<S>(io: S, cfg: Iec104Config) -> IecResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        cfg.validate()?;
        let (rd, wr) = tokio::io::split(io);

        let (class1_tx, class1_rx) = mpsc::channel(cfg.k as usize);
        let (class2_tx, class2_rx) = mpsc::channel(cfg.k as usize);
        let (inbound_tx, inbound_rx) = mpsc::channel(cfg.w as usize);
        let (frames_tx, frames_rx) = mpsc::channel(4);
        let (writer_tx, writer_rx) = mpsc::channel(4);
        let (errors_tx, errors_rx) = mpsc::channel(8);
        let (target_tx, target_rx) = mpsc::channel(4);
        let (level_tx, level_rx) = watch::channel(Level::Down);
        let stats = Arc::new(SessionStats::default());

        let t1 = cfg.send_timeout;
        tokio::spawn(recv_loop(rd, frames_tx.clone(), Arc::clone(&stats), t1));
        tokio::spawn(send_loop(wr, writer_rx, frames_tx, Arc::clone(&stats), t1));

        let engine = Engine {
            cfg: cfg.clone(),
            level: Level::Down,
            level_tx,
            class1: class1_rx,
            class2: class2_rx,
            target: target_rx,
            frames: frames_rx,
            writer: writer_tx,
            inbound: inbound_tx,
            errors: errors_tx,
            seq_out: 0,
            ack_out: 0,
            pending: VecDeque::new(),
            seq_in: 0,
            unacked_in: 0,
            ack_due: None,
            u_pending: None,
            idle_since: Instant::now(),
        };
        tokio::spawn(engine.run());

        Ok(Self {
            class1: class1_tx,
            class2: class2_tx,
            inbound: inbound_rx,
            errors: errors_rx,
            level: level_rx,
            target: target_tx,
            stats,
            t1,
        })
    }

    /// The high priority outbound queue.
    pub fn class1(&self) -> mpsc::Sender<Outbound> {
        self.class1.clone()
    }

    /// The low priority outbound queue.
    pub fn class2(&self) -> mpsc::Sender<Outbound> {
        self.class2.clone()
    }

    /// Submit a payload on a queue and await its delivery confirmation.
    pub async fn submit(queue: &mpsc::Sender<Outbound>, payload: Vec<u8>) -> IecResult<()> {
        if payload.len() > ASDU_SIZE_MAX {
            return Err(IecError::PayloadTooLarge(payload.len()));
        }
        let (done, confirmed) = oneshot::channel();
        queue
            .send(Outbound { payload, done })
            .await
            .map_err(|_| IecError::ConnectionLost)?;
        confirmed.await.map_err(|_| IecError::ConnectionLost)?
    }

    /// Send one ASDU on class 1 and await acknowledgement.
    pub async fn send(&self, payload: Vec<u8>) -> IecResult<()> {
        Self::submit(&self.class1, payload).await
    }

    /// Next inbound ASDU payload, in arrival order. `None` once the
    /// session is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Next asynchronous session error. Protocol violations and
    /// connection-level timeouts surface here.
    pub async fn next_error(&mut self) -> Option<IecError> {
        self.errors.recv().await
    }

    /// Current availability level.
    pub fn level(&self) -> Level {
        *self.level.borrow()
    }

    /// Wait for the next level transition and return the new level.
    /// `None` once the engine is gone.
    pub async fn level_changed(&mut self) -> Option<Level> {
        self.level.changed().await.ok()?;
        let level = *self.level.borrow();
        Some(level)
    }

    /// Request STARTDT and wait for the confirmation.
    pub async fn bring_up(&mut self) -> IecResult<()> {
        self.target
            .send(Level::Up)
            .await
            .map_err(|_| IecError::ConnectionLost)?;
        self.await_level(Level::Up).await
    }

    /// Request STOPDT and wait for the confirmation.
    pub async fn bring_down(&mut self) -> IecResult<()> {
        self.target
            .send(Level::Down)
            .await
            .map_err(|_| IecError::ConnectionLost)?;
        self.await_level(Level::Down).await
    }

    async fn await_level(&mut self, want: Level) -> IecResult<()> {
        let reached = timeout(
            self.t1,
            self.level
                .wait_for(|l| *l == want || *l == Level::Exit),
        )
        .await;
        match reached {
            Ok(Ok(l)) if *l == want => Ok(()),
            Ok(_) => Err(IecError::ConnectionLost),
            Err(_) => Err(IecError::AckTimeout),
        }
    }

    /// Graceful shutdown: STOPDT when Up, a final acknowledge for received
    /// frames, then close. In-flight outbounds fail with connection lost.
    pub async fn stop(mut self) {
        let _ = self.target.send(Level::Exit).await;
        let _ = timeout(
            self.t1 + self.t1,
            self.level.wait_for(|l| *l == Level::Exit),
        )
        .await;
    }

    /// Frame and octet counters.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }
}

/// Accept `n` as the new outbound acknowledge watermark iff it lies
/// between the previous watermark `last` and the next send number `out`.
fn ack_in_window(last: u16, out: u16, n: u16) -> bool {
    seq_count(last, out) >= seq_count(n, out)
}

struct PendingSend {
    seq: u16,
    done: oneshot::Sender<IecResult<()>>,
    since: Instant,
}

struct Engine {
    cfg: Iec104Config,
    level: Level,
    level_tx: watch::Sender<Level>,
    class1: mpsc::Receiver<Outbound>,
    class2: mpsc::Receiver<Outbound>,
    target: mpsc::Receiver<Level>,
    frames: mpsc::Receiver<IecResult<Apdu>>,
    writer: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    errors: mpsc::Sender<IecError>,

    /// Next send sequence number
    seq_out: u16,
    /// Oldest unacknowledged send sequence number
    ack_out: u16,
    /// Unacknowledged sends, ascending by sequence number
    pending: VecDeque<PendingSend>,
    /// Expected next inbound send sequence number
    seq_in: u16,
    /// Received I-frames since the last acknowledge we sent
    unacked_in: u16,
    /// t2 deadline, armed by the first unacknowledged inbound I-frame
    ack_due: Option<Instant>,
    /// Outstanding U-frame request and its t1 deadline
    u_pending: Option<(UFunction, Instant)>,
    /// Last transmit instant, basis of the t3 keep-alive
    idle_since: Instant,
}

enum Step {
    Continue,
    Shutdown,
}

impl Engine {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            let window_open = self.level == Level::Up
                && self.u_pending.is_none()
                && self.pending.len() < usize::from(self.cfg.k);

            let step = tokio::select! {
                biased;

                frame = self.frames.recv() => match frame {
                    Some(Ok(apdu)) => self.on_frame(apdu).await,
                    Some(Err(e)) => Err(e),
                    None => Err(IecError::ConnectionLost),
                },
                requested = self.target.recv() => match requested {
                    Some(Level::Exit) | None => Ok(Step::Shutdown),
                    Some(level) => self.on_target(level).await,
                },
                out = self.class1.recv(), if window_open => match out {
                    Some(out) => self.send_data(out).await,
                    // A closed class queue is an exit request.
                    None => Ok(Step::Shutdown),
                },
                out = self.class2.recv(), if window_open => match out {
                    Some(out) => self.send_data(out).await,
                    None => Ok(Step::Shutdown),
                },
                _ = sleep_until(deadline) => self.on_timer().await,
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Shutdown) => {
                    self.shutdown().await;
                    return;
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        // While a U-frame request is outstanding its t1 deadline replaces
        // the idle timer; the keep-alive is pointless until it resolves.
        let mut deadline = match self.u_pending {
            Some((_, at)) => at,
            None => self.idle_since + self.cfg.idle_timeout,
        };
        if let Some(p) = self.pending.front() {
            deadline = deadline.min(p.since + self.cfg.send_timeout);
        }
        if let Some(at) = self.ack_due {
            deadline = deadline.min(at);
        }
        deadline
    }

    async fn write_frame(&mut self, apdu: Apdu) -> IecResult<()> {
        let bytes = apdu.encode()?;
        self.idle_since = Instant::now();
        self.writer
            .send(bytes)
            .await
            .map_err(|_| IecError::ConnectionLost)
    }

    fn set_level(&mut self, level: Level) {
        if self.level != level {
            debug!(?level, "level change");
            self.level = level;
            let _ = self.level_tx.send(level);
        }
    }

    async fn on_frame(&mut self, apdu: Apdu) -> IecResult<Step> {
        match apdu.apci {
            Apci::I { send_seq, recv_seq } => {
                if send_seq != self.seq_in {
                    return Err(IecError::SeqDisruption {
                        expect: self.seq_in,
                        got: send_seq,
                    });
                }
                self.seq_in = seq_next(self.seq_in);
                self.accept_ack(recv_seq)?;

                if self.level == Level::Up {
                    // Blocking here is the backpressure path: a full
                    // application queue stalls the reader and, in turn,
                    // the peer.
                    let _ = self.inbound.send(apdu.payload).await;
                } else {
                    debug!("discarding I-frame while down");
                }
                self.unacked_in += 1;
                if self.unacked_in >= self.cfg.w {
                    self.send_ack().await?;
                } else if self.ack_due.is_none() {
                    self.ack_due = Some(Instant::now() + self.cfg.recv_ack_delay);
                }
            }
            Apci::S { recv_seq } => {
                self.accept_ack(recv_seq)?;
            }
            Apci::U(function) => return self.on_u(function).await,
        }
        Ok(Step::Continue)
    }

    async fn on_u(&mut self, function: UFunction) -> IecResult<Step> {
        match function {
            UFunction::StartDtAct => {
                self.write_frame(Apdu::new_u(UFunction::StartDtCon)).await?;
                self.set_level(Level::Up);
            }
            UFunction::StopDtAct => {
                self.write_frame(Apdu::new_u(UFunction::StopDtCon)).await?;
                self.set_level(Level::Down);
            }
            UFunction::TestFrAct => {
                self.write_frame(Apdu::new_u(UFunction::TestFrCon)).await?;
            }
            confirmation => match self.u_pending {
                Some((expected, _)) if expected == confirmation => {
                    self.u_pending = None;
                    match confirmation {
                        UFunction::StartDtCon => self.set_level(Level::Up),
                        UFunction::StopDtCon => self.set_level(Level::Down),
                        _ => {}
                    }
                }
                _ => warn!(?confirmation, "unexpected U-frame confirmation"),
            },
        }
        Ok(Step::Continue)
    }

    async fn on_target(&mut self, want: Level) -> IecResult<Step> {
        if want == self.level || self.u_pending.is_some() {
            return Ok(Step::Continue);
        }
        let deadline = Instant::now() + self.cfg.send_timeout;
        match want {
            Level::Up => {
                self.write_frame(Apdu::new_u(UFunction::StartDtAct)).await?;
                self.u_pending = Some((UFunction::StartDtCon, deadline));
            }
            Level::Down => {
                self.write_frame(Apdu::new_u(UFunction::StopDtAct)).await?;
                self.u_pending = Some((UFunction::StopDtCon, deadline));
            }
            Level::Exit => {}
        }
        Ok(Step::Continue)
    }

    async fn send_data(&mut self, out: Outbound) -> IecResult<Step> {
        if out.payload.len() > ASDU_SIZE_MAX {
            let _ = out.done.send(Err(IecError::PayloadTooLarge(out.payload.len())));
            return Ok(Step::Continue);
        }
        let seq = self.seq_out;
        self.seq_out = seq_next(seq);
        self.pending.push_back(PendingSend {
            seq,
            done: out.done,
            since: Instant::now(),
        });
        // The I-frame acknowledges everything received so far in passing.
        self.unacked_in = 0;
        self.ack_due = None;
        self.write_frame(Apdu::new_i(seq, self.seq_in, out.payload))
            .await?;
        Ok(Step::Continue)
    }

    fn accept_ack(&mut self, n: u16) -> IecResult<()> {
        if !ack_in_window(self.ack_out, self.seq_out, n) {
            return Err(IecError::AckBeyondSent { ack: n });
        }
        while self.ack_out != n {
            if let Some(p) = self.pending.pop_front() {
                let _ = p.done.send(Ok(()));
            }
            self.ack_out = seq_next(self.ack_out);
        }
        Ok(())
    }

    async fn send_ack(&mut self) -> IecResult<()> {
        self.unacked_in = 0;
        self.ack_due = None;
        self.write_frame(Apdu::new_s(self.seq_in)).await
    }

    async fn on_timer(&mut self) -> IecResult<Step> {
        let now = Instant::now();
        if let Some(p) = self.pending.front() {
            if now >= p.since + self.cfg.send_timeout {
                return Err(IecError::AckTimeout);
            }
        }
        if let Some((_, at)) = self.u_pending {
            if now >= at {
                return Err(IecError::AckTimeout);
            }
        }
        if self.ack_due.is_some_and(|at| now >= at) {
            self.send_ack().await?;
        }
        if self.u_pending.is_none() && now >= self.idle_since + self.cfg.idle_timeout {
            debug!("idle, sending keep-alive");
            self.write_frame(Apdu::new_u(UFunction::TestFrAct)).await?;
            self.u_pending = Some((UFunction::TestFrCon, Instant::now() + self.cfg.send_timeout));
        }
        Ok(Step::Continue)
    }

    /// Orderly release: stop serving the class queues, part with the
    /// writer so it drains and closes the socket, then read the peer out
    /// for late acknowledgements until end of stream.
    async fn shutdown(mut self) {
        debug!("shutting down");
        if self.level == Level::Up {
            let _ = self.write_frame(Apdu::new_u(UFunction::StopDtAct)).await;
            self.set_level(Level::Down);
        }
        if self.unacked_in > 0 {
            let _ = self.send_ack().await;
        }

        let Engine {
            writer,
            mut frames,
            mut pending,
            level_tx,
            cfg,
            mut ack_out,
            seq_out,
            ..
        } = self;
        drop(writer);

        let deadline = Instant::now() + cfg.send_timeout;
        while let Ok(Some(Ok(apdu))) = timeout_at(deadline, frames.recv()).await {
            // Extract acknowledgements, discard data.
            let n = match apdu.apci {
                Apci::I { recv_seq, .. } | Apci::S { recv_seq } => recv_seq,
                Apci::U(_) => continue,
            };
            if ack_in_window(ack_out, seq_out, n) {
                while ack_out != n {
                    if let Some(p) = pending.pop_front() {
                        let _ = p.done.send(Ok(()));
                    }
                    ack_out = seq_next(ack_out);
                }
            }
        }

        for p in pending {
            let _ = p.done.send(Err(IecError::ConnectionLost));
        }
        let _ = level_tx.send(Level::Exit);
        info!("session closed");
    }

    /// Fatal failure: report on the error stream and fail every in-flight
    /// outbound.
    fn fail(mut self, err: IecError) {
        error!(error = %err, "session failed");
        if let Err(e) = self.errors.try_send(err) {
            debug!("error stream saturated: {e}");
        }
        for p in self.pending.drain(..) {
            let _ = p.done.send(Err(IecError::ConnectionLost));
        }
        let _ = self.level_tx.send(Level::Exit);
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Fill `buf` completely, retrying transient failures every 200 ms for at
/// most `t1` while preserving the partial-read offset. End of stream
/// surfaces as connection lost.
async fn read_full<R: AsyncRead + Unpin>(
    rd: &mut R,
    buf: &mut [u8],
    t1: Duration,
) -> IecResult<()> {
    let mut filled = 0;
    let mut transient_since: Option<Instant> = None;
    while filled < buf.len() {
        match rd.read(&mut buf[filled..]).await {
            Ok(0) => return Err(IecError::ConnectionLost),
            Ok(n) => {
                filled += n;
                transient_since = None;
            }
            Err(e) if is_transient(&e) => {
                let since = *transient_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= t1 {
                    return Err(IecError::Io(e));
                }
                debug!("transient read failure, retrying: {e}");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => return Err(IecError::Io(e)),
        }
    }
    Ok(())
}

/// Counterpart of [`read_full`] for the write side.
async fn write_full<W: AsyncWrite + Unpin>(wr: &mut W, buf: &[u8], t1: Duration) -> IecResult<()> {
    let mut written = 0;
    let mut transient_since: Option<Instant> = None;
    while written < buf.len() {
        match wr.write(&buf[written..]).await {
            Ok(0) => return Err(IecError::ConnectionLost),
            Ok(n) => {
                written += n;
                transient_since = None;
            }
            Err(e) if is_transient(&e) => {
                let since = *transient_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= t1 {
                    return Err(IecError::Io(e));
                }
                debug!("transient write failure, retrying: {e}");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => return Err(IecError::Io(e)),
        }
    }
    Ok(())
}

/// Read-side task: frame the byte stream into APDUs. A clean end of
/// stream closes the frame channel; anything else forwards an error.
async fn recv_loop<R: AsyncRead + Unpin>(
    mut rd: R,
    frames: mpsc::Sender<IecResult<Apdu>>,
    stats: Arc<SessionStats>,
    t1: Duration,
) {
    let mut buf = [0u8; APDU_SIZE_MAX];
    loop {
        // End of stream at a frame boundary is still a lost peer from the
        // protocol's point of view; the write task keeps the frame channel
        // open, so it must be reported, not implied.
        if let Err(e) = read_full(&mut rd, &mut buf[..2], t1).await {
            let _ = frames.send(Err(e)).await;
            return;
        }
        if buf[0] != START_BYTE {
            let _ = frames
                .send(Err(IecError::FrameFormat(format!(
                    "invalid start octet {:#04x}",
                    buf[0]
                ))))
                .await;
            return;
        }
        let length = usize::from(buf[1]);
        if !(4..=253).contains(&length) {
            let _ = frames
                .send(Err(IecError::FrameFormat(format!(
                    "length octet {length} out of range"
                ))))
                .await;
            return;
        }
        if let Err(e) = read_full(&mut rd, &mut buf[2..2 + length], t1).await {
            // Mid-frame end of stream is a lost connection, not a close.
            let _ = frames.send(Err(e)).await;
            return;
        }
        stats.frames_in.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_in
            .fetch_add(2 + length as u64, Ordering::Relaxed);
        match Apdu::decode(&buf[..2 + length]) {
            Ok(apdu) => {
                if frames.send(Ok(apdu)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Write-side task: drain encoded frames into the socket. On a closed
/// feed the socket's write side is shut down so the peer observes end of
/// stream. Failures are routed back to the engine as fatal.
async fn send_loop<W: AsyncWrite + Unpin>(
    mut wr: W,
    mut feed: mpsc::Receiver<Vec<u8>>,
    fatal: mpsc::Sender<IecResult<Apdu>>,
    stats: Arc<SessionStats>,
    t1: Duration,
) {
    while let Some(frame) = feed.recv().await {
        if let Err(e) = write_full(&mut wr, &frame, t1).await {
            let _ = fatal.send(Err(e)).await;
            return;
        }
        stats.frames_out.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_out
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
    }
    let _ = wr.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_accepts_forward_range_only() {
        // No outstanding sends: only a repeat of the watermark is valid.
        assert!(ack_in_window(5, 5, 5));
        assert!(!ack_in_window(5, 5, 6));

        // Three outstanding: 7, 8, 9 and the no-op 6 are valid.
        for n in 6..=9 {
            assert!(ack_in_window(6, 9, n));
        }
        assert!(!ack_in_window(6, 9, 10));
        assert!(!ack_in_window(6, 9, 5));

        // Across the wrap point.
        assert!(ack_in_window(0x7FFE, 2, 0));
        assert!(ack_in_window(0x7FFE, 2, 2));
        assert!(!ack_in_window(0x7FFE, 2, 3));

        // The full forward half-space is honoured.
        let last = 100u16;
        let out = (100 + (1 << 14)) & 0x7FFF;
        assert!(ack_in_window(last, out, out));
        assert!(!ack_in_window(last, out, seq_next(out)));
    }
}
