//! Controlled-side command handling: route inbound command activations to
//! registered handlers, honour the select-before-execute interlock and
//! produce the confirmation replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::asdu::{read_obj_addr, Asdu, TypeId};
use crate::command::{is_select, select_flag_offset, RegulatingStep, SELECT_FLAG};
use crate::common::{Cause, CauseOfTransmission, SystemParams, IRRELEVANT_OBJ_ADDR};
use crate::error::{IecError, IecResult};
use crate::information::{DoublePoint, Normal, SinglePoint};
use crate::time::Cp56Time2a;

/// Semantic value of an inbound process command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Single(SinglePoint),
    Double(DoublePoint),
    Regulating(RegulatingStep),
    SetpointNormal(Normal),
    SetpointScaled(i16),
    SetpointFloat(f32),
    Bits(u32),
}

/// One decoded command activation, handed to a [`CommandHandler`].
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub type_id: TypeId,
    pub common_addr: u16,
    pub originator: u8,
    pub addr: u32,
    pub value: CommandValue,
    /// QOC or QOS qualifier, select flag stripped
    pub qualifier: u8,
    /// Time tag of the time-tagged command variants
    pub time: Option<Cp56Time2a>,
    pub test: bool,
}

/// Verdict of a command handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Confirm positively
    Accepted,
    /// Confirm positively, and report completion with an activation
    /// termination afterwards
    AcceptedTerminating,
    /// Confirm negatively
    Refused,
}

/// Executes commands for one or more object addresses.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, request: CommandRequest) -> CommandOutcome;
}

/// Timing of the controlled-side select interlock.
#[derive(Debug, Clone)]
pub struct DelegateConfig {
    /// How long a selection stays armed awaiting its execute
    pub select_timeout: Duration,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            select_timeout: Duration::from_secs(10),
        }
    }
}

/// Command router of a controlled station.
///
/// Handlers are registered per (common address, object address); address
/// zero registers the fallback for commands whose object address is
/// irrelevant or unlisted. Replies leave through the sink channel, to be
/// forwarded onto the session's class 1 queue.
pub struct Delegate {
    params: SystemParams,
    cfg: DelegateConfig,
    handlers: HashMap<(u16, u32), Arc<dyn CommandHandler>>,
    /// Armed selections awaiting their execute, per originator
    selected: Arc<DashMap<u8, mpsc::Sender<Asdu>>>,
    /// Running executions, cancellable by deactivation
    in_flight: Arc<DashMap<(u16, u32), AbortHandle>>,
    replies: mpsc::Sender<Asdu>,
    errors: mpsc::Sender<IecError>,
}

impl Delegate {
    /// Returns the delegate plus its error stream (select timeouts and the
    /// like).
    pub fn new(
        params: SystemParams,
        cfg: DelegateConfig,
        replies: mpsc::Sender<Asdu>,
    ) -> (Self, mpsc::Receiver<IecError>) {
        let (errors, errors_rx) = mpsc::channel(8);
        (
            Self {
                params,
                cfg,
                handlers: HashMap::new(),
                selected: Arc::new(DashMap::new()),
                in_flight: Arc::new(DashMap::new()),
                replies,
                errors,
            },
            errors_rx,
        )
    }

    /// Register a handler for one object address.
    pub fn handle(&mut self, common_addr: u16, addr: u32, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert((common_addr, addr), handler);
    }

    /// Register the fallback handler of a common address, used when the
    /// object address is irrelevant or has no dedicated handler.
    pub fn handle_fallback(&mut self, common_addr: u16, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert((common_addr, IRRELEVANT_OBJ_ADDR), handler);
    }

    fn lookup(&self, common_addr: u16, addr: u32) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .get(&(common_addr, addr))
            .or_else(|| self.handlers.get(&(common_addr, IRRELEVANT_OBJ_ADDR)))
            .cloned()
    }

    /// Route one inbound ASDU. Returns whether the delegate consumed it;
    /// non-command types are left for other consumers.
    pub async fn dispatch(&self, u: Asdu) -> IecResult<bool> {
        if !u.type_id.is_process_command() {
            return Ok(false);
        }
        u.check_structure(&self.params)?;
        if u.num_objects() != 1 {
            return Err(IecError::InvalidParam("process command carries one object"));
        }

        // An armed selection owns this originator's command input.
        if let Some(slot) = self.selected.get(&u.originator) {
            let _ = slot.try_send(u);
            return Ok(true);
        }

        let addr = read_obj_addr(&u.payload, &self.params);
        let Some(handler) = self.lookup(u.common_addr, addr) else {
            self.reply(&u, Cause::UnknownInfoObjAddr, true).await;
            return Ok(true);
        };

        match u.cot.cause {
            Cause::Activation => {}
            Cause::Deactivation => {
                self.deactivate(&u, addr).await;
                return Ok(true);
            }
            _ => {
                self.reply(&u, Cause::UnknownCause, true).await;
                return Ok(true);
            }
        }

        if is_select(&self.params, u.type_id, &u.payload) {
            self.arm_selection(u, handler).await;
        } else {
            run_handler(
                self.params,
                u,
                addr,
                handler,
                Arc::clone(&self.in_flight),
                self.replies.clone(),
            );
        }
        Ok(true)
    }

    /// Deactivation: cancel running work for the address if any.
    async fn deactivate(&self, u: &Asdu, addr: u32) {
        match self.in_flight.remove(&(u.common_addr, addr)) {
            Some((_, abort)) => {
                abort.abort();
                self.reply(u, Cause::DeactivationCon, false).await;
            }
            None => {
                self.reply(u, Cause::DeactivationCon, true).await;
            }
        }
    }

    /// Select phase: acknowledge, then hold this originator's input until
    /// the matching execute arrives or the interlock times out. The
    /// handler is resolved now; a matching execute addresses the same
    /// object by definition.
    async fn arm_selection(&self, select: Asdu, handler: Arc<dyn CommandHandler>) {
        let originator = select.originator;
        let (tx, mut rx) = mpsc::channel(1);
        if self.selected.insert(originator, tx).is_some() {
            warn!(originator, "replacing an armed selection");
        }
        self.reply(&select, Cause::ActivationCon, false).await;

        let params = self.params;
        let select_timeout = self.cfg.select_timeout;
        let selected = Arc::clone(&self.selected);
        let in_flight = Arc::clone(&self.in_flight);
        let replies = self.replies.clone();
        let errors = self.errors.clone();
        tokio::spawn(async move {
            let got = timeout(select_timeout, rx.recv()).await;
            selected.remove(&originator);
            match got {
                Err(_) => {
                    warn!(originator, "selection expired without execute");
                    let _ = errors.try_send(IecError::SelectTimeout);
                }
                Ok(None) => {}
                Ok(Some(execute)) => {
                    let armed = matches_except_select(&params, &select, &execute);
                    let still_selecting = is_select(&params, execute.type_id, &execute.payload);
                    if armed && !still_selecting && execute.cot.cause == Cause::Activation {
                        let addr = read_obj_addr(&execute.payload, &params);
                        run_handler(params, execute, addr, handler, in_flight, replies);
                    } else {
                        debug!(originator, "execute does not match the selection");
                        send_reply(&replies, &execute, Cause::ActivationCon, true).await;
                    }
                }
            }
        });
    }

    async fn reply(&self, request: &Asdu, cause: Cause, negative: bool) {
        send_reply(&self.replies, request, cause, negative).await;
    }
}

/// Run the handler in its own task so a deactivation can cancel it, then
/// confirm per its outcome.
fn run_handler(
    params: SystemParams,
    u: Asdu,
    addr: u32,
    handler: Arc<dyn CommandHandler>,
    in_flight: Arc<DashMap<(u16, u32), AbortHandle>>,
    replies: mpsc::Sender<Asdu>,
) {
    let request = match parse_request(&params, &u, addr) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "refusing malformed command");
            tokio::spawn(async move {
                send_reply(&replies, &u, Cause::ActivationCon, true).await;
            });
            return;
        }
    };

    let key = (u.common_addr, addr);
    let done_registry = Arc::clone(&in_flight);
    let task = tokio::spawn(async move {
        let outcome = handler.execute(request).await;
        done_registry.remove(&key);
        match outcome {
            CommandOutcome::Accepted => {
                send_reply(&replies, &u, Cause::ActivationCon, false).await;
            }
            CommandOutcome::Refused => {
                send_reply(&replies, &u, Cause::ActivationCon, true).await;
            }
            CommandOutcome::AcceptedTerminating => {
                send_reply(&replies, &u, Cause::ActivationCon, false).await;
                send_reply(&replies, &u, Cause::ActivationTerm, false).await;
            }
        }
    });
    in_flight.insert(key, task.abort_handle());
}

/// Mirror the request with the reply cause; the test flag survives.
async fn send_reply(replies: &mpsc::Sender<Asdu>, request: &Asdu, cause: Cause, negative: bool) {
    let mut cot = CauseOfTransmission::new(cause);
    cot.negative = negative;
    cot.test = request.cot.test;
    let mut response = request.clone();
    response.cot = cot;
    if replies.send(response).await.is_err() {
        debug!("reply sink closed");
    }
}

/// Byte-exact comparison of the select and execute forms, the select flag
/// position excepted.
fn matches_except_select(params: &SystemParams, select: &Asdu, execute: &Asdu) -> bool {
    if select.type_id != execute.type_id
        || select.common_addr != execute.common_addr
        || select.originator != execute.originator
        || select.payload.len() != execute.payload.len()
    {
        return false;
    }
    let Some(offset) = select_flag_offset(select.type_id) else {
        return false;
    };
    let flag_at = params.obj_addr_size() + offset;
    select
        .payload
        .iter()
        .zip(&execute.payload)
        .enumerate()
        .all(|(i, (a, b))| {
            if i == flag_at {
                (a & !SELECT_FLAG) == (b & !SELECT_FLAG)
            } else {
                a == b
            }
        })
}

fn parse_request(params: &SystemParams, u: &Asdu, addr: u32) -> IecResult<CommandRequest> {
    let body = &u.payload[params.obj_addr_size()..];
    let (value, qualifier, time) = match u.type_id {
        TypeId::SingleCommand | TypeId::SingleCommandWithTime => (
            CommandValue::Single(SinglePoint::from_bool(body[0] & 0x01 != 0)),
            (body[0] >> 2) & 0x1F,
            command_time(u.type_id, &body[1..]),
        ),
        TypeId::DoubleCommand | TypeId::DoubleCommandWithTime => (
            CommandValue::Double(DoublePoint::from_code(body[0])),
            (body[0] >> 2) & 0x1F,
            command_time(u.type_id, &body[1..]),
        ),
        TypeId::RegulatingStepCommand | TypeId::RegulatingStepCommandWithTime => {
            let direction = match body[0] & 0x03 {
                1 => RegulatingStep::Lower,
                2 => RegulatingStep::Higher,
                _ => return Err(IecError::ValueOutOfDomain("regulating step not in {1,2}")),
            };
            (
                CommandValue::Regulating(direction),
                (body[0] >> 2) & 0x1F,
                command_time(u.type_id, &body[1..]),
            )
        }
        TypeId::SetpointCommandNormal | TypeId::SetpointCommandNormalWithTime => (
            CommandValue::SetpointNormal(Normal::from_bytes([body[0], body[1]])),
            body[2] & 0x7F,
            command_time(u.type_id, &body[3..]),
        ),
        TypeId::SetpointCommandScaled | TypeId::SetpointCommandScaledWithTime => (
            CommandValue::SetpointScaled(i16::from_le_bytes([body[0], body[1]])),
            body[2] & 0x7F,
            command_time(u.type_id, &body[3..]),
        ),
        TypeId::SetpointCommandFloat | TypeId::SetpointCommandFloatWithTime => (
            CommandValue::SetpointFloat(f32::from_le_bytes([body[0], body[1], body[2], body[3]])),
            body[4] & 0x7F,
            command_time(u.type_id, &body[5..]),
        ),
        TypeId::Bitstring32Command | TypeId::Bitstring32CommandWithTime => (
            CommandValue::Bits(u32::from_be_bytes([body[0], body[1], body[2], body[3]])),
            0,
            command_time(u.type_id, &body[4..]),
        ),
        other => return Err(IecError::UnknownTypeId(other.to_byte())),
    };
    Ok(CommandRequest {
        type_id: u.type_id,
        common_addr: u.common_addr,
        originator: u.originator,
        addr,
        value,
        qualifier,
        time,
        test: u.cot.test,
    })
}

/// The time-tagged command variants close with a CP56 tag.
fn command_time(type_id: TypeId, rest: &[u8]) -> Option<Cp56Time2a> {
    if !matches!(type_id.to_byte(), 58..=64) || rest.len() < 7 {
        return None;
    }
    Some(Cp56Time2a::from_bytes([
        rest[0], rest[1], rest[2], rest[3], rest[4], rest[5], rest[6],
    ]))
}
