//! Offloaded pool: the same queue drain as the in-process strategies, run on
//! a detached thread that owns its own client and talks to the orchestrator
//! only through typed channels. The thread never sees the orchestrator's
//! abort flag; once started it drains the whole queue and posts `Done`.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, NameCache};
use crate::error::DexError;
use crate::pool::{self, PoolOptions};
use crate::species::SpeciesClient;

pub const MAX_OFFLOADED_WORKERS: usize = 64;
pub const OFFLOADED_STRIDE: usize = 16;
const DEFAULT_OFFLOADED_WORKERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub conc: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress { completed: usize },
    Done { out: NameCache },
}

pub struct OffloadedPool {
    inbox: Sender<StartMessage>,
    outbox: Receiver<WorkerMessage>,
    handle: JoinHandle<()>,
}

impl OffloadedPool {
    pub fn spawn<C>(client: C, ids: Vec<EntityId>, timeout: Duration) -> Self
    where
        C: SpeciesClient + 'static,
    {
        let (inbox, start_rx) = mpsc::channel::<StartMessage>();
        let (out_tx, outbox) = mpsc::channel::<WorkerMessage>();

        let handle = thread::spawn(move || {
            let Ok(start) = start_rx.recv() else {
                return;
            };
            let conc = match start.conc {
                0 => DEFAULT_OFFLOADED_WORKERS,
                n => n.min(MAX_OFFLOADED_WORKERS),
            };
            // Never raised: the orchestrator cannot reach into this context.
            let abort = AtomicBool::new(false);
            let progress_tx = out_tx.clone();
            let resolved = pool::drain(
                ids,
                PoolOptions::new(conc, OFFLOADED_STRIDE),
                &abort,
                |id| client.fetch_one(id, timeout),
                |completed| {
                    let _ = progress_tx.send(WorkerMessage::Progress { completed });
                },
            );
            let out: NameCache = resolved.into_iter().collect();
            if out_tx.send(WorkerMessage::Done { out }).is_err() {
                tracing::debug!("offloaded results dropped, nobody is listening");
            }
        });

        Self {
            inbox,
            outbox,
            handle,
        }
    }

    pub fn start(&self, conc: usize) -> Result<(), DexError> {
        self.inbox
            .send(StartMessage { conc })
            .map_err(|_| DexError::WorkerDisconnected)
    }

    /// Waits up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time; a closed channel without `Done` is an error.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>, DexError> {
        match self.outbox.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DexError::WorkerDisconnected),
        }
    }

    /// Stops listening. The worker thread keeps running until its queue is
    /// drained; its remaining messages are discarded.
    pub fn detach(self) {
        drop(self.outbox);
        drop(self.handle);
    }
}
