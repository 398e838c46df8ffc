//! async pool service
//!
//! the pool and its bridge adapter live on a single task. handles send
//! messages over a bounded mailbox and await a oneshot response, so
//! concurrent submissions are applied one at a time in arrival order.
//! dropping every handle stops the task, which hands the pool back.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bridge::{BridgeAdapter, BridgeMessage, Delivery};
use crate::commitment::{CommitmentTree, Root};
use crate::error::{Error, Result};
use crate::ledger::{AccountId, TokenLedger};
use crate::pool::{Pool, PoolEvent, Receipt};
use crate::proof::ProofVerifier;
use crate::transaction::TransactionRequest;
use crate::value::Amount;

pub const DEFAULT_MAILBOX_SIZE: usize = 128;

/// messages sent to the pool service
enum Message {
    /// apply a directly funded transaction
    Transact {
        sender: AccountId,
        request: TransactionRequest,
        response: oneshot::Sender<Result<Receipt>>,
    },
    /// run a bridge message end to end
    Deliver {
        message: BridgeMessage,
        response: oneshot::Sender<Result<Delivery>>,
    },
    Root {
        response: oneshot::Sender<Root>,
    },
    /// snapshot of the commitment tree for building transactions
    Tree {
        response: oneshot::Sender<CommitmentTree>,
    },
    Events {
        cursor: usize,
        response: oneshot::Sender<Vec<PoolEvent>>,
    },
    Sweep {
        response: oneshot::Sender<Result<Amount>>,
    },
}

/// mailbox for talking to a running [`PoolService`]
#[derive(Clone, Debug)]
pub struct PoolHandle {
    sender: mpsc::Sender<Message>,
}

impl PoolHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(make(response))
            .await
            .map_err(|_| Error::ServiceClosed)?;
        receiver.await.map_err(|_| Error::ServiceClosed)
    }

    pub async fn transact(
        &self,
        sender: AccountId,
        request: TransactionRequest,
    ) -> Result<Receipt> {
        self.request(|response| Message::Transact {
            sender,
            request,
            response,
        })
        .await?
    }

    pub async fn deliver(&self, message: BridgeMessage) -> Result<Delivery> {
        self.request(|response| Message::Deliver { message, response })
            .await?
    }

    pub async fn root(&self) -> Result<Root> {
        self.request(|response| Message::Root { response }).await
    }

    pub async fn tree(&self) -> Result<CommitmentTree> {
        self.request(|response| Message::Tree { response }).await
    }

    pub async fn events_since(&self, cursor: usize) -> Result<Vec<PoolEvent>> {
        self.request(|response| Message::Events { cursor, response })
            .await
    }

    pub async fn sweep_unaccounted(&self) -> Result<Amount> {
        self.request(|response| Message::Sweep { response }).await?
    }
}

/// single owner of the pool state
pub struct PoolService<L, V> {
    pool: Pool<L, V>,
    bridge: BridgeAdapter,
    mailbox: mpsc::Receiver<Message>,
}

impl<L, V> PoolService<L, V>
where
    L: TokenLedger + Send + 'static,
    V: ProofVerifier + Send + 'static,
{
    pub fn new(pool: Pool<L, V>, mailbox_size: usize) -> (Self, PoolHandle) {
        let (sender, mailbox) = mpsc::channel(mailbox_size.max(1));
        let service = Self {
            pool,
            bridge: BridgeAdapter::new(),
            mailbox,
        };
        (service, PoolHandle { sender })
    }

    /// start the service on the current tokio runtime
    pub fn spawn(pool: Pool<L, V>, mailbox_size: usize) -> (PoolHandle, JoinHandle<Pool<L, V>>) {
        let (service, handle) = Self::new(pool, mailbox_size);
        (handle, tokio::spawn(service.run()))
    }

    /// process messages until every handle is dropped
    pub async fn run(mut self) -> Pool<L, V> {
        info!("pool service started");
        while let Some(message) = self.mailbox.recv().await {
            self.handle(message);
        }
        info!("pool service stopped after {} transitions", self.pool.version());
        self.pool
    }

    fn handle(&mut self, message: Message) {
        // a caller that gave up on the response is not an error
        match message {
            Message::Transact {
                sender,
                request,
                response,
            } => {
                let _ = response.send(self.pool.transact(sender, request));
            }
            Message::Deliver { message, response } => {
                let _ = response.send(self.bridge.deliver(&mut self.pool, &message));
            }
            Message::Root { response } => {
                let _ = response.send(self.pool.root());
            }
            Message::Tree { response } => {
                let _ = response.send(self.pool.tree().clone());
            }
            Message::Events { cursor, response } => {
                let events = self.pool.events_since(cursor).to_vec();
                debug!("serving {} events from {}", events.len(), cursor);
                let _ = response.send(events);
            }
            Message::Sweep { response } => {
                let _ = response.send(self.pool.sweep_unaccounted());
            }
        }
    }
}
