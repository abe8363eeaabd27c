//! Controlling-side command engine: serialises select-before-execute,
//! correlates confirmations with their originating requests by
//! fingerprint, and applies the activation and termination timeouts.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::asdu::Asdu;
use crate::command::{is_select, select_flag_offset, SELECT_FLAG};
use crate::common::{Cause, SystemParams};
use crate::error::{IecError, IecResult};
use crate::iec104::session::{Outbound, Session};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Correlation key over type identifier, originator address and payload
/// (object address included). The select flag is cleared before hashing so
/// the select and execute phases of one command share a fingerprint.
fn fingerprint(params: &SystemParams, u: &Asdu) -> u64 {
    let mut hash = fnv1a(FNV_OFFSET, &[u.type_id.to_byte(), u.originator]);
    let select_at = select_flag_offset(u.type_id).map(|off| params.obj_addr_size() + off);
    for (i, &b) in u.payload.iter().enumerate() {
        let b = if select_at == Some(i) { b & !SELECT_FLAG } else { b };
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Per-command timers. The defaults follow common practice; both are
/// tunable because the standard leaves them to the system.
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Time allowed for the activation confirmation
    pub activation_timeout: Duration,
    /// Time allowed for the activation termination after confirmation
    pub termination_timeout: Duration,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(10),
            termination_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of awaiting an activation termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// The peer terminated with the negative flag raised.
    pub negative: bool,
}

/// Dispatches commands over a session queue and correlates the replies.
///
/// Inbound ASDUs must be routed through [`Caller::on_inbound`]; responses
/// whose fingerprint matches no in-flight command are dropped silently.
pub struct Caller {
    params: SystemParams,
    cfg: CallerConfig,
    queue: mpsc::Sender<Outbound>,
    pending: Arc<DashMap<u64, mpsc::Sender<Asdu>>>,
}

impl Caller {
    /// `queue` is the session's class 2 sender; command traffic yields to
    /// spontaneous class 1 data.
    pub fn new(params: SystemParams, queue: mpsc::Sender<Outbound>, cfg: CallerConfig) -> Self {
        Self {
            params,
            cfg,
            queue,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Offer an inbound ASDU for correlation. Returns whether a pending
    /// command consumed it.
    pub fn on_inbound(&self, u: &Asdu) -> bool {
        if !u.type_id.is_process_command() && !u.type_id.is_system_command() {
            return false;
        }
        let key = fingerprint(&self.params, u);
        match self.pending.get(&key) {
            Some(slot) => slot.try_send(u.clone()).is_ok(),
            None => {
                debug!(type_id = %u.type_id, "response matches no pending command");
                false
            }
        }
    }

    /// Issue a command and await its activation confirmation. A command
    /// built with the select flag runs the full select-before-execute
    /// interlock; otherwise the execute goes out directly.
    pub async fn call(&self, u: Asdu) -> IecResult<()> {
        let mut slot = self.register(&u)?;
        self.activate(&u, &mut slot.rx).await
    }

    /// Like [`Caller::call`], but stays registered after the confirmation
    /// and waits for the activation termination.
    pub async fn call_with_termination(&self, u: Asdu) -> IecResult<Termination> {
        let mut slot = self.register(&u)?;
        self.activate(&u, &mut slot.rx).await?;

        match timeout(self.cfg.termination_timeout, slot.rx.recv()).await {
            Err(_) => Err(IecError::TerminationStatusUnknown),
            Ok(None) => Err(IecError::ConnectionLost),
            Ok(Some(resp)) => match resp.cot.cause {
                Cause::ActivationTerm => Ok(Termination {
                    negative: resp.cot.negative,
                }),
                _ => Err(IecError::CauseMismatch(resp.cot.to_byte())),
            },
        }
    }

    fn register(&self, u: &Asdu) -> IecResult<PendingSlot> {
        let key = fingerprint(&self.params, u);
        let (tx, rx) = mpsc::channel(4);
        match self.pending.entry(key) {
            Entry::Occupied(_) => Err(IecError::ConcurrentCommand),
            Entry::Vacant(vacant) => {
                vacant.insert(tx);
                Ok(PendingSlot {
                    map: Arc::clone(&self.pending),
                    key,
                    rx,
                })
            }
        }
    }

    async fn activate(&self, u: &Asdu, rx: &mut mpsc::Receiver<Asdu>) -> IecResult<()> {
        if is_select(&self.params, u.type_id, &u.payload) {
            // Select phase: same bytes, select flag up. Execute only after
            // the peer confirmed the selection.
            self.emit(u).await?;
            self.await_actcon(rx).await?;

            let mut execute = u.clone();
            if let Some(off) = select_flag_offset(u.type_id) {
                let idx = self.params.obj_addr_size() + off;
                if let Some(b) = execute.payload.get_mut(idx) {
                    *b &= !SELECT_FLAG;
                }
            }
            self.emit(&execute).await?;
        } else {
            self.emit(u).await?;
        }
        self.await_actcon(rx).await
    }

    async fn emit(&self, u: &Asdu) -> IecResult<()> {
        let bytes = u.encode(&self.params)?;
        Session::submit(&self.queue, bytes).await
    }

    async fn await_actcon(&self, rx: &mut mpsc::Receiver<Asdu>) -> IecResult<()> {
        match timeout(self.cfg.activation_timeout, rx.recv()).await {
            Err(_) => Err(IecError::LaunchStatusUnknown),
            Ok(None) => Err(IecError::ConnectionLost),
            Ok(Some(resp)) => classify_confirmation(&resp),
        }
    }
}

/// Map a confirmation onto the per-kind result, test flag disregarded.
fn classify_confirmation(resp: &Asdu) -> IecResult<()> {
    match (resp.cot.cause, resp.cot.negative) {
        (Cause::ActivationCon, false) => Ok(()),
        (Cause::ActivationCon, true) => Err(IecError::CommandDenied),
        (Cause::UnknownTypeId, true) => Err(IecError::UnknownType),
        (Cause::UnknownCause, true) => Err(IecError::UnknownCause),
        (Cause::UnknownCommonAddr, true) => Err(IecError::UnknownCommonAddr),
        (Cause::UnknownInfoObjAddr, true) => Err(IecError::UnknownInfoAddr),
        _ => Err(IecError::CauseMismatch(resp.cot.to_byte())),
    }
}

/// Pending map entry, removed on drop so late responses fall through.
struct PendingSlot {
    map: Arc<DashMap<u64, mpsc::Sender<Asdu>>>,
    key: u64,
    rx: mpsc::Receiver<Asdu>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use crate::command::{CmdQualifier, CommandBuilder, InterrogationGroup};
    use crate::common::CauseOfTransmission;
    use crate::information::SinglePoint;

    use super::*;

    fn setup(cfg: CallerConfig) -> (Caller, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Caller::new(SystemParams::narrow(), tx, cfg), rx)
    }

    /// Acknowledge deliveries and hand the sent payloads back.
    fn ack_deliveries(mut rx: mpsc::Receiver<Outbound>, sent: mpsc::UnboundedSender<Vec<u8>>) {
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let _ = sent.send(out.payload);
                let _ = out.done.send(Ok(()));
            }
        });
    }

    fn builder() -> CommandBuilder {
        CommandBuilder::new(SystemParams::narrow(), 9, 0).unwrap()
    }

    fn confirmation(req: &Asdu, cause: Cause, negative: bool) -> Asdu {
        let mut resp = req.clone();
        resp.cot = CauseOfTransmission::new(cause);
        resp.cot.negative = negative;
        resp
    }

    #[tokio::test]
    async fn actcon_completes_call() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        let caller = Arc::new(caller);
        let handle = {
            let caller = Arc::clone(&caller);
            let req = req.clone();
            tokio::spawn(async move { caller.call(req).await })
        };

        // The activation went out on the queue.
        let emitted = sent.recv().await.unwrap();
        assert_eq!(emitted[0], 100);

        assert!(caller.on_inbound(&confirmation(&req, Cause::ActivationCon, false)));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn negative_actcon_is_denied() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        let caller = Arc::new(caller);
        let handle = {
            let caller = Arc::clone(&caller);
            let req = req.clone();
            tokio::spawn(async move { caller.call(req).await })
        };
        sent.recv().await.unwrap();

        caller.on_inbound(&confirmation(&req, Cause::ActivationCon, true));
        assert!(matches!(
            handle.await.unwrap(),
            Err(IecError::CommandDenied)
        ));
    }

    #[tokio::test]
    async fn unknown_addr_rejection_is_distinct() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        let caller = Arc::new(caller);
        let handle = {
            let caller = Arc::clone(&caller);
            let req = req.clone();
            tokio::spawn(async move { caller.call(req).await })
        };
        sent.recv().await.unwrap();

        caller.on_inbound(&confirmation(&req, Cause::UnknownCommonAddr, true));
        assert!(matches!(
            handle.await.unwrap(),
            Err(IecError::UnknownCommonAddr)
        ));
    }

    #[tokio::test]
    async fn concurrent_fingerprint_rejected() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        let caller = Arc::new(caller);
        let first = {
            let caller = Arc::clone(&caller);
            let req = req.clone();
            tokio::spawn(async move { caller.call(req).await })
        };
        sent.recv().await.unwrap();

        assert!(matches!(
            caller.call(req.clone()).await,
            Err(IecError::ConcurrentCommand)
        ));

        caller.on_inbound(&confirmation(&req, Cause::ActivationCon, false));
        first.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activation_timeout_is_launch_status_unknown() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, _sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        assert!(matches!(
            caller.call(req).await,
            Err(IecError::LaunchStatusUnknown)
        ));
    }

    #[tokio::test]
    async fn select_execute_serialised() {
        let (caller, rx) = setup(CallerConfig::default());
        let (sent_tx, mut sent) = mpsc::unbounded_channel();
        ack_deliveries(rx, sent_tx);

        let select = builder()
            .single(17, SinglePoint::On, CmdQualifier::new(0).unwrap().with_select())
            .unwrap();
        let caller = Arc::new(caller);
        let handle = {
            let caller = Arc::clone(&caller);
            let select = select.clone();
            tokio::spawn(async move { caller.call(select).await })
        };

        // First emission carries the select flag.
        let first = sent.recv().await.unwrap();
        assert_eq!(first[5] & SELECT_FLAG, SELECT_FLAG);

        // Nothing further until the select is confirmed.
        caller.on_inbound(&confirmation(&select, Cause::ActivationCon, false));
        let second = sent.recv().await.unwrap();
        assert_eq!(second[5] & SELECT_FLAG, 0);
        assert_eq!(&first[..5], &second[..5]);

        let mut execute = select.clone();
        execute.payload[1] &= !SELECT_FLAG;
        caller.on_inbound(&confirmation(&execute, Cause::ActivationCon, false));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn late_response_dropped_silently() {
        let (caller, _rx) = setup(CallerConfig::default());
        let req = builder().interrogation(InterrogationGroup::Global).unwrap();
        assert!(!caller.on_inbound(&confirmation(&req, Cause::ActivationCon, false)));
    }
}
