//! # Fibers
//!
//! A fiber is one OS thread running a current-thread tokio runtime inside a
//! [`LocalSet`]. Everything a fiber owns is touched only from that thread;
//! other threads reach it by posting jobs to its work queue through a
//! [`FiberHandle`]. Jobs start in the order they were posted.
//!
//! Each job receives the fiber's [`FiberContext`], which replaces ambient
//! per-fiber globals: the address, the fiber's coroutine locks, the timer,
//! the actor router, and the arena of hosted actors.

use crate::arena::EntityArena;
use crate::coroutine_lock::CoroutineLockManager;
use crate::error::{FiberError, Result};
use crate::router::{ActorMail, ActorRouter};
use crate::timer::TimerService;
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use network::CancellationToken;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, LocalSet};
use tracing::{debug, info, warn};
use types::{ActorId, Address, InstanceIdGenerator};

type Job = Box<dyn FnOnce(FiberContext) -> LocalBoxFuture<'static, ()> + Send>;

/// Behaviour of an actor hosted on a fiber
///
/// Mail is handled one message at a time, in arrival order. Mail the handler
/// returns from without replying is acknowledged with an empty body.
#[async_trait(?Send)]
pub trait Actor: 'static {
    async fn handle(&mut self, ctx: &FiberContext, mail: ActorMail);
}

struct ActorSlot {
    actor_id: ActorId,
    task: AbortHandle,
}

struct ContextInner {
    address: Address,
    locks: CoroutineLockManager,
    timer: Arc<dyn TimerService>,
    router: Arc<ActorRouter>,
    instance_ids: InstanceIdGenerator,
    actors: RefCell<EntityArena<ActorSlot>>,
}

/// Per-fiber services, passed explicitly to every job
#[derive(Clone)]
pub struct FiberContext {
    inner: Rc<ContextInner>,
}

impl FiberContext {
    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn locks(&self) -> &CoroutineLockManager {
        &self.inner.locks
    }

    pub fn timer(&self) -> &Arc<dyn TimerService> {
        &self.inner.timer
    }

    pub fn router(&self) -> &Arc<ActorRouter> {
        &self.inner.router
    }

    /// Host `actor` on this fiber, optionally owned by `parent`
    pub fn spawn_actor<A: Actor>(&self, parent: Option<ActorId>, mut actor: A) -> Result<ActorId> {
        let actor_id = ActorId::new(self.inner.address, self.inner.instance_ids.next_id());
        let (mailbox, mut mail) = mpsc::unbounded_channel::<ActorMail>();

        let ctx = self.clone();
        let task = tokio::task::spawn_local(async move {
            while let Some(next) = mail.recv().await {
                let ack = next.ack();
                actor.handle(&ctx, next).await;
                ack.complete();
            }
        })
        .abort_handle();

        let inserted = self.inner.actors.borrow_mut().insert(
            actor_id.instance,
            parent.map(|p| p.instance),
            ActorSlot {
                actor_id,
                task: task.clone(),
            },
        );
        if let Err(e) = inserted {
            task.abort();
            return Err(e);
        }

        self.inner.router.register_local(actor_id, mailbox);
        debug!(%actor_id, parent = ?parent, "Actor spawned");
        Ok(actor_id)
    }

    /// Stop `actor_id` and every actor it owns; returns how many were stopped
    ///
    /// Mail queued for or being handled by a stopped actor is answered with
    /// `ERR_NOT_FOUND_ACTOR`.
    pub fn remove_actor(&self, actor_id: ActorId) -> usize {
        if actor_id.address != self.inner.address {
            return 0;
        }
        let removed = self.inner.actors.borrow_mut().remove(actor_id.instance);
        for (_, slot) in &removed {
            self.inner.router.unregister_local(slot.actor_id);
            slot.task.abort();
        }
        removed.len()
    }

    pub fn contains_actor(&self, actor_id: ActorId) -> bool {
        actor_id.address == self.inner.address && self.inner.actors.borrow().contains(actor_id.instance)
    }

    pub fn actor_count(&self) -> usize {
        self.inner.actors.borrow().len()
    }

    fn remove_all_actors(&self) {
        let roots: Vec<i64> = {
            let actors = self.inner.actors.borrow();
            actors.ids().filter(|&id| actors.parent(id).is_none()).collect()
        };
        for instance in roots {
            self.remove_actor(ActorId::new(self.inner.address, instance));
        }
    }
}

/// Cloneable, thread-safe entry point into a fiber's work queue
#[derive(Clone)]
pub struct FiberHandle {
    address: Address,
    jobs: mpsc::UnboundedSender<Job>,
}

impl FiberHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Queue `job` to run on the fiber
    pub fn post<F, Fut>(&self, job: F) -> Result<()>
    where
        F: FnOnce(FiberContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let job: Job = Box::new(move |ctx| job(ctx).boxed_local());
        self.jobs
            .send(job)
            .map_err(|_| FiberError::Stopped { address: self.address })
    }

    /// Run `job` on the fiber and wait for its result
    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(FiberContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move |ctx| async move {
            let _ = tx.send(job(ctx).await);
        })?;
        rx.await.map_err(|_| FiberError::Stopped { address: self.address })
    }

    pub fn is_stopped(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl std::fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberHandle").field("address", &self.address).finish()
    }
}

/// Owner of a fiber thread; dropping it stops the fiber
pub struct Fiber {
    handle: FiberHandle,
    shutdown: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Fiber {
    pub fn spawn(address: Address, router: Arc<ActorRouter>, timer: Arc<dyn TimerService>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| FiberError::Runtime { address, source })?;
        let (jobs, queue) = mpsc::unbounded_channel::<Job>();
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(format!("fiber-{address}"))
            .spawn(move || {
                let context = FiberContext {
                    inner: Rc::new(ContextInner {
                        address,
                        locks: CoroutineLockManager::new(),
                        timer,
                        router,
                        instance_ids: InstanceIdGenerator::new(),
                        actors: RefCell::new(EntityArena::new()),
                    }),
                };
                let local = LocalSet::new();
                local.block_on(&runtime, run_queue(context, queue, stop));
            })
            .map_err(|source| FiberError::Runtime { address, source })?;

        info!(%address, "Fiber started");
        Ok(Self {
            handle: FiberHandle { address, jobs },
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn address(&self) -> Address {
        self.handle.address
    }

    pub fn handle(&self) -> FiberHandle {
        self.handle.clone()
    }

    /// Ask the fiber to stop; pending jobs are dropped
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop the fiber and wait for its thread to exit
    pub fn join(mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(address = %self.handle.address, "Fiber thread panicked");
            }
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_queue(context: FiberContext, mut queue: mpsc::UnboundedReceiver<Job>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => {
                    tokio::task::spawn_local(job(context.clone()));
                }
                None => break,
            },
        }
    }
    queue.close();
    context.remove_all_actors();
    info!(address = %context.address(), "Fiber stopped");
}

/// The fibers of one process, indexed by address
pub struct FiberManager {
    process_id: i32,
    router: Arc<ActorRouter>,
    timer: Arc<dyn TimerService>,
    fibers: Mutex<HashMap<Address, Fiber>>,
}

impl FiberManager {
    pub fn new(router: Arc<ActorRouter>, timer: Arc<dyn TimerService>) -> Self {
        Self {
            process_id: router.process_id(),
            router,
            timer,
            fibers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fiber bound to `P<process>:F<fiber_id>`
    ///
    /// Fails with [`FiberError::AddressInUse`] while another live fiber holds
    /// the address; that fiber is left running.
    pub fn create(&self, fiber_id: i32) -> Result<FiberHandle> {
        let address = Address::new(self.process_id, fiber_id);
        let mut fibers = self.fibers.lock();
        if let Some(existing) = fibers.get(&address) {
            if !existing.handle.is_stopped() {
                warn!(%address, "Rejecting duplicate fiber binding");
                return Err(FiberError::AddressInUse { address });
            }
        }

        let fiber = Fiber::spawn(address, self.router.clone(), self.timer.clone())?;
        let handle = fiber.handle();
        fibers.insert(address, fiber);
        Ok(handle)
    }

    pub fn get(&self, address: Address) -> Option<FiberHandle> {
        self.fibers.lock().get(&address).map(Fiber::handle)
    }

    /// Stop and forget one fiber
    pub fn remove(&self, address: Address) -> bool {
        self.fibers.lock().remove(&address).is_some()
    }

    pub fn len(&self) -> usize {
        self.fibers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every fiber
    pub fn shutdown(&self) {
        let fibers: Vec<Fiber> = self.fibers.lock().drain().map(|(_, f)| f).collect();
        info!(count = fibers.len(), "Stopping fibers");
        drop(fibers);
    }
}
