//! GroupAdmission - グループ単位の計数セマフォ + FIFO 待ち行列
//!
//! # 不変条件
//! - グループごとに `in_use <= capacity`（capacity が下がったときは既存の許可を追い出さず、解放を待つ）
//! - 待ち行列の順序は [`GroupAdmission::enqueue`] を呼んだ順。呼び出し側（Dispatcher）が投入時に同期的に呼ぶ
//! - 待ち行列に誰かいる間は、新しい enqueue は先頭を追い越さない
//! - 枠の受け渡しと [`GrantHook::on_grant`] はロックの中で一緒に行う。フックが断った相手には枠を渡さない
//! - 受け取る側が先に消えていても枠は漏れない
//!
//! スロットは最初の enqueue で作られ、`in_use == 0` かつ待ち行列が空になった時点で消える。
//! capacity は enqueue / release のたびに [`CapacityProvider`] から読み直す。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use super::status::GroupLoad;
use crate::domain::{GroupId, TaskId};
use crate::ports::CapacityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// 待ち行列から外された（withdraw されたか、フックが枠を断った）
    #[error("admission withdrawn")]
    Withdrawn,

    /// もう何も受け付けない
    #[error("admission closed")]
    Closed,
}

/// GrantHook は枠を渡す瞬間にロックの中で呼ばれる
///
/// `false` を返すと枠は渡らず、待っている側は [`AdmissionError::Withdrawn`] を受け取る。
/// ロック中に呼ばれるので、この中から GroupAdmission を呼んではいけない。
pub trait GrantHook: Send + Sync {
    fn on_grant(&self, task_id: TaskId) -> bool;
}

/// 何もせずに常に受け入れる
pub struct AdmitAll;

impl GrantHook for AdmitAll {
    fn on_grant(&self, _task_id: TaskId) -> bool {
        true
    }
}

#[derive(Debug)]
enum Grant {
    Granted,
    Withdrawn,
}

struct Waiter {
    ticket: u64,
    task_id: TaskId,
    grant: oneshot::Sender<Grant>,
}

#[derive(Default)]
struct GroupSlot {
    in_use: usize,
    waiters: VecDeque<Waiter>,
}

impl GroupSlot {
    fn is_idle(&self) -> bool {
        self.in_use == 0 && self.waiters.is_empty()
    }

    /// 空いた枠を先頭から順に渡す
    fn promote(&mut self, group: &GroupId, capacity: usize, hook: &dyn GrantHook) {
        while self.in_use < capacity {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.grant.is_closed() {
                continue;
            }
            if !hook.on_grant(waiter.task_id) {
                debug!(task_id = %waiter.task_id, group_id = %group, "grant refused");
                let _ = waiter.grant.send(Grant::Withdrawn);
                continue;
            }
            self.in_use += 1;
            let _ = waiter.grant.send(Grant::Granted);
            debug!(task_id = %waiter.task_id, group_id = %group, "slot handed off");
        }
    }
}

#[derive(Default)]
struct State {
    slots: HashMap<GroupId, GroupSlot>,
    next_ticket: u64,
    closed: bool,
}

impl State {
    fn release(&mut self, group: &GroupId, capacity: usize, hook: &dyn GrantHook) {
        let Some(slot) = self.slots.get_mut(group) else {
            return;
        };
        slot.in_use = slot.in_use.saturating_sub(1);
        slot.promote(group, capacity, hook);
        if slot.is_idle() {
            self.slots.remove(group);
        }
    }
}

pub struct GroupAdmission {
    capacity: Arc<dyn CapacityProvider>,
    hook: Arc<dyn GrantHook>,
    state: Mutex<State>,
}

impl fmt::Debug for GroupAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GroupAdmission")
            .field("groups", &state.slots.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl GroupAdmission {
    pub fn new(capacity: Arc<dyn CapacityProvider>) -> Self {
        Self::with_hook(capacity, Arc::new(AdmitAll))
    }

    pub fn with_hook(capacity: Arc<dyn CapacityProvider>, hook: Arc<dyn GrantHook>) -> Self {
        Self {
            capacity,
            hook,
            state: Mutex::new(State::default()),
        }
    }

    fn capacity_of(&self, group: &GroupId) -> usize {
        self.capacity.capacity(group).max(1)
    }

    /// `group` の待ち行列に同期的に並ぶ
    ///
    /// 空きがあり誰も並んでいなければその場で枠を取る。どちらにしても
    /// [`Ticket::granted`] で許可を受け取る。Ticket を捨てると並びから抜け、
    /// 受け取り済みの枠はグループに返る。
    pub fn enqueue(self: &Arc<Self>, group: &GroupId, task_id: TaskId) -> Ticket {
        let capacity = self.capacity_of(group);
        let mut state = self.state.lock();
        let stage = if state.closed {
            Stage::Refused(AdmissionError::Closed)
        } else {
            let ticket = state.next_ticket;
            state.next_ticket += 1;

            let slot = state.slots.entry(group.clone()).or_default();
            slot.promote(group, capacity, self.hook.as_ref());
            if slot.waiters.is_empty() && slot.in_use < capacity {
                if self.hook.on_grant(task_id) {
                    slot.in_use += 1;
                    debug!(task_id = %task_id, group_id = %group, in_use = slot.in_use, "slot acquired");
                    Stage::Granted
                } else {
                    if slot.is_idle() {
                        state.slots.remove(group);
                    }
                    Stage::Refused(AdmissionError::Withdrawn)
                }
            } else {
                let (tx, rx) = oneshot::channel();
                slot.waiters.push_back(Waiter {
                    ticket,
                    task_id,
                    grant: tx,
                });
                debug!(
                    task_id = %task_id,
                    group_id = %group,
                    queued = slot.waiters.len(),
                    "waiting for slot"
                );
                Stage::Queued { ticket, rx }
            }
        };
        drop(state);

        Ticket {
            admission: Arc::clone(self),
            group: group.clone(),
            task_id,
            stage,
        }
    }

    /// 並んでいるタスクを待ち行列から外す。並んでいなければ `false`
    pub fn withdraw(&self, group: &GroupId, task_id: TaskId) -> bool {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(group) else {
            return false;
        };
        let Some(pos) = slot.waiters.iter().position(|w| w.task_id == task_id) else {
            return false;
        };
        let withdrawn = slot.waiters.remove(pos);
        if slot.is_idle() {
            state.slots.remove(group);
        }
        if let Some(waiter) = withdrawn {
            let _ = waiter.grant.send(Grant::Withdrawn);
        }
        debug!(task_id = %task_id, group_id = %group, "withdrawn from queue");
        true
    }

    /// 以降の enqueue を断り、並んでいる全員を失敗させる。保持中の許可はそのまま
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for slot in state.slots.values_mut() {
            slot.waiters.clear();
        }
        state.slots.retain(|_, slot| !slot.is_idle());
    }

    pub fn snapshot(&self) -> Vec<GroupLoad> {
        let state = self.state.lock();
        let mut loads: Vec<GroupLoad> = state
            .slots
            .iter()
            .map(|(group, slot)| GroupLoad {
                group_id: group.clone(),
                in_use: slot.in_use,
                queued: slot.waiters.len(),
                capacity: self.capacity_of(group),
            })
            .collect();
        loads.sort_by(|a, b| a.group_id.as_str().cmp(b.group_id.as_str()));
        loads
    }

    pub fn in_use(&self, group: &GroupId) -> usize {
        self.state.lock().slots.get(group).map_or(0, |s| s.in_use)
    }

    pub fn queued(&self, group: &GroupId) -> usize {
        self.state.lock().slots.get(group).map_or(0, |s| s.waiters.len())
    }

    fn release(&self, group: &GroupId) {
        let capacity = self.capacity_of(group);
        self.state
            .lock()
            .release(group, capacity, self.hook.as_ref());
    }
}

enum Stage {
    /// 枠はもう数えられている
    Granted,
    Queued {
        ticket: u64,
        rx: oneshot::Receiver<Grant>,
    },
    Refused(AdmissionError),
    /// Permit に引き継いだか、待ち行列側で決着済み
    Settled,
}

/// Ticket は待ち行列の中の 1 か所
///
/// 捨てると後始末する: 並んでいれば抜け、枠を受け取っていれば返す。
pub struct Ticket {
    admission: Arc<GroupAdmission>,
    group: GroupId,
    task_id: TaskId,
    stage: Stage,
}

impl Ticket {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// 枠が回ってくるまで待つ。途中で future を捨てても Ticket は有効なまま
    pub async fn granted(&mut self) -> Result<Permit, AdmissionError> {
        let outcome = match &mut self.stage {
            Stage::Granted => Ok(()),
            Stage::Queued { rx, .. } => match rx.await {
                Ok(Grant::Granted) => Ok(()),
                Ok(Grant::Withdrawn) => Err(AdmissionError::Withdrawn),
                Err(_) => Err(AdmissionError::Closed),
            },
            Stage::Refused(err) => Err(*err),
            Stage::Settled => Err(AdmissionError::Closed),
        };
        self.stage = Stage::Settled;
        outcome.map(|()| {
            Permit::new(
                Arc::clone(&self.admission),
                self.group.clone(),
                self.task_id,
            )
        })
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("group", &self.group)
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let admission = &self.admission;
        match &mut self.stage {
            Stage::Granted => admission.release(&self.group),
            Stage::Queued { ticket, rx } => {
                let capacity = admission.capacity_of(&self.group);
                let mut state = admission.state.lock();
                if let Some(slot) = state.slots.get_mut(&self.group)
                    && let Some(pos) = slot.waiters.iter().position(|w| w.ticket == *ticket)
                {
                    slot.waiters.remove(pos);
                    if slot.is_idle() {
                        state.slots.remove(&self.group);
                    }
                    return;
                }
                // 取り出し済み。ロック中に送られた枠は返す
                if let Ok(Grant::Granted) = rx.try_recv() {
                    state.release(&self.group, capacity, admission.hook.as_ref());
                }
            }
            Stage::Refused(_) | Stage::Settled => {}
        }
    }
}

/// 保持中の枠。Drop で次の waiter に渡る
pub struct Permit {
    admission: Arc<GroupAdmission>,
    group: GroupId,
    task_id: TaskId,
}

impl Permit {
    fn new(admission: Arc<GroupAdmission>, group: GroupId, task_id: TaskId) -> Self {
        Self {
            admission,
            group,
            task_id,
        }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("group", &self.group)
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        debug!(task_id = %self.task_id, group_id = %self.group, "slot released");
        self.admission.release(&self.group);
    }
}
