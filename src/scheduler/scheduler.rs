//! Unlock scheduler
//!
//! Runs a single task that owns the lock state. Unlock requests and deferred
//! re-lock checks both arrive as messages, so reads and writes of the
//! deadline never interleave. Checks are never cancelled: each one carries the
//! deadline it was armed for and is ignored if that deadline is no longer
//! current.

use crate::actuator::Actuator;
use anyhow::{anyhow, Result};
use door_shared::{ExtendOutcome, LockState, RecheckOutcome, UnlockDuration};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Messages accepted by the scheduler task
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Hold the door open for at least `duration` from now
    Extend { duration: UnlockDuration },
    /// Report the current lock state
    Snapshot {
        reply: oneshot::Sender<LockState<Instant>>,
    },
}

/// Cloneable handle for submitting requests to the scheduler
#[derive(Debug, Clone)]
pub struct UnlockHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl UnlockHandle {
    /// Request an unlock window
    pub async fn extend(&self, duration: UnlockDuration) -> Result<()> {
        self.tx
            .send(SchedulerCommand::Extend { duration })
            .await
            .map_err(|_| anyhow!("Unlock scheduler stopped"))
    }

    /// Get a copy of the current lock state
    pub async fn snapshot(&self) -> Result<LockState<Instant>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Snapshot { reply })
            .await
            .map_err(|_| anyhow!("Unlock scheduler stopped"))?;
        rx.await.map_err(|_| anyhow!("Unlock scheduler dropped snapshot request"))
    }
}

/// Owns the lock state and the actuator
pub struct UnlockScheduler {
    state: LockState<Instant>,
    actuator: Arc<dyn Actuator>,
    /// Deferred checks report back on this channel with their armed deadline
    recheck_tx: mpsc::UnboundedSender<Instant>,
}

impl UnlockScheduler {
    /// Lock the door and start the scheduler task
    pub fn spawn(actuator: Arc<dyn Actuator>) -> (UnlockHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(32);
        let (recheck_tx, rechecks) = mpsc::unbounded_channel();

        let scheduler = Self {
            state: LockState::new(Instant::now()),
            actuator,
            recheck_tx,
        };
        scheduler.lock();
        info!("[LOCK] Scheduler started ({} actuator)", scheduler.actuator.name());

        let task = tokio::spawn(scheduler.run(commands, rechecks));
        (UnlockHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut rechecks: mpsc::UnboundedReceiver<Instant>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SchedulerCommand::Extend { duration }) => self.extend(duration),
                    Some(SchedulerCommand::Snapshot { reply }) => {
                        let _ = reply.send(self.state);
                    }
                    None => break,
                },

                // Never closes: self holds a sender
                Some(fired_for) = rechecks.recv() => self.recheck(fired_for),
            }
        }

        if self.state.is_unlocked() {
            warn!("[LOCK] Scheduler stopping with the door open, locking now");
        }
        self.lock();
        info!("[LOCK] Scheduler stopped");
    }

    fn extend(&mut self, duration: UnlockDuration) {
        let now = Instant::now();
        let outcome = self.state.extend(now, duration.as_duration());

        match outcome {
            ExtendOutcome::Unlocked { .. } => {
                info!("[LOCK] Unlocked for {}", duration);
            }
            ExtendOutcome::Extended { deadline } => {
                info!(
                    "[LOCK] Window extended by {} request ({:?} left)",
                    duration,
                    deadline - now
                );
            }
            ExtendOutcome::Retained { deadline } => {
                debug!(
                    "[LOCK] {} request inside current window ({:?} left)",
                    duration,
                    deadline - now
                );
            }
        }

        if let Err(e) = self.actuator.engage() {
            error!("[LOCK] Failed to engage actuator: {}", e);
        }

        if let Some(deadline) = outcome.arm_for() {
            self.arm(deadline);
        }
    }

    /// Spawn a deferred check for `deadline`
    fn arm(&self, deadline: Instant) {
        let recheck_tx = self.recheck_tx.clone();
        tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = recheck_tx.send(deadline);
        });
    }

    fn recheck(&mut self, fired_for: Instant) {
        match self.state.recheck(fired_for, Instant::now()) {
            RecheckOutcome::Stale => {
                debug!(
                    "[LOCK] Superseded check ignored ({:?} left)",
                    self.state.remaining(Instant::now())
                );
            }
            RecheckOutcome::AlreadyLocked => {
                debug!("[LOCK] Duplicate check ignored");
            }
            RecheckOutcome::NotYetDue => {
                debug!("[LOCK] Check fired early, re-arming");
                self.arm(fired_for);
            }
            RecheckOutcome::Relock => {
                info!("[LOCK] Window elapsed, locking");
                self.lock();
            }
        }
    }

    fn lock(&self) {
        if let Err(e) = self.actuator.disengage() {
            error!("[LOCK] Failed to disengage actuator: {}", e);
        }
    }
}
