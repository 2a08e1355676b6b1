//! Message-oriented protocols and their dispatcher
//!
//! Transport callbacks decode incoming bytes into messages and put them on
//! a queue. If the protocol was built with a handler, a dedicated
//! dispatcher task drains the queue and runs the handler once per message,
//! so user code runs inside a task (where it may block) instead of inside
//! a transport callback (where it may not). Without a handler, tasks pull
//! messages with [`MessageProtocol::get_message`].
//!
//! The dispatcher task is named `"<name>-<n>"`, where `n` counts the
//! dispatchers started for `name` on the current hub.

use crate::codec::Decoder;
use crate::error::{Condition, ProtocolError, ProtocolResult};
use crate::state::{ConnectionState, ReadBufferLimits};
use crate::transport::{Protocol, StreamCallbacks, TransportRef};
use cothread_core::{SchedError, SchedResult};
use cothread_runtime::{next_sequence, try_spawn_named, BlockingQueue, Task};
use futures::future::{self, Either, LocalBoxFuture};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Application code run by the dispatcher for every message
///
/// Returning `Err(Condition::Protocol(e))` stores `e` as the connection's
/// error and closes the transport. Any other failure, or a panic, is
/// treated as a fault of the dispatcher and closes the connection with
/// [`ProtocolError::DispatcherFault`].
pub trait MessageHandler<M: 'static>: 'static {
    fn handle(
        &self,
        message: M,
        transport: Option<TransportRef>,
        protocol: MessageProtocol<M>,
    ) -> LocalBoxFuture<'static, ProtocolResult<()>>;
}

impl<M, F, Fut> MessageHandler<M> for F
where
    M: 'static,
    F: Fn(M, Option<TransportRef>, MessageProtocol<M>) -> Fut + 'static,
    Fut: Future<Output = ProtocolResult<()>> + 'static,
{
    fn handle(
        &self,
        message: M,
        transport: Option<TransportRef>,
        protocol: MessageProtocol<M>,
    ) -> LocalBoxFuture<'static, ProtocolResult<()>> {
        self(message, transport, protocol).boxed_local()
    }
}

/// Message protocol handle
///
/// Cheap to clone. The dispatcher task only holds a weak reference, so
/// dropping the last handle cancels it.
pub struct MessageProtocol<M: 'static> {
    inner: Rc<MessageInner<M>>,
}

struct MessageInner<M: 'static> {
    name: String,
    state: ConnectionState,
    queue: BlockingQueue<M>,
    decoder: RefCell<Option<Box<dyn Decoder<Item = M>>>>,
    /// Received bytes not yet decoded
    input: RefCell<Vec<u8>>,
    dispatcher: RefCell<Option<Task>>,
    /// The dispatcher was discarded on connection loss
    discarded: Cell<bool>,
}

impl<M: 'static> MessageInner<M> {
    /// The dispatcher must not hand out any more messages
    fn dispatch_over(&self) -> bool {
        self.discarded.get() || self.state.is_closed()
    }
}

impl<M: 'static> Drop for MessageInner<M> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.get_mut().take() {
            task.cancel();
        }
    }
}

/// Builder for [`MessageProtocol`]
pub struct MessageProtocolBuilder<M: 'static> {
    name: String,
    limits: ReadBufferLimits,
    decoder: Option<Box<dyn Decoder<Item = M>>>,
    handler: Option<Rc<dyn MessageHandler<M>>>,
}

impl<M: 'static> MessageProtocolBuilder<M> {
    /// Read watermarks, counted in queued messages
    pub fn limits(mut self, limits: ReadBufferLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Decoder applied to bytes from `data_received`
    pub fn decoder<D>(mut self, decoder: D) -> Self
    where
        D: Decoder<Item = M> + 'static,
    {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Run `handler` on a dispatcher task for every message
    pub fn handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(M, Option<TransportRef>, MessageProtocol<M>) -> Fut + 'static,
        Fut: Future<Output = ProtocolResult<()>> + 'static,
    {
        self.with_handler(handler)
    }

    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: MessageHandler<M>,
    {
        self.handler = Some(Rc::new(handler));
        self
    }

    /// Create the protocol, starting its dispatcher if a handler was given
    ///
    /// Fails with `NotInitialized` when a handler was given but this
    /// thread has no hub.
    pub fn build(self) -> SchedResult<MessageProtocol<M>> {
        let protocol = MessageProtocol {
            inner: Rc::new(MessageInner {
                name: self.name,
                state: ConnectionState::new(self.limits),
                queue: BlockingQueue::new(),
                decoder: RefCell::new(self.decoder),
                input: RefCell::new(Vec::new()),
                dispatcher: RefCell::new(None),
                discarded: Cell::new(false),
            }),
        };
        if let Some(handler) = self.handler {
            protocol.start_dispatcher(handler)?;
        }
        Ok(protocol)
    }
}

impl<M: 'static> MessageProtocol<M> {
    /// Protocol named `name` with no handler and no decoder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(MessageInner {
                name: name.into(),
                state: ConnectionState::default(),
                queue: BlockingQueue::new(),
                decoder: RefCell::new(None),
                input: RefCell::new(Vec::new()),
                dispatcher: RefCell::new(None),
                discarded: Cell::new(false),
            }),
        }
    }

    pub fn builder(name: impl Into<String>) -> MessageProtocolBuilder<M> {
        MessageProtocolBuilder {
            name: name.into(),
            limits: ReadBufferLimits::default(),
            decoder: None,
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> &ConnectionState {
        &self.inner.state
    }

    /// The dispatcher task, until the connection is lost
    pub fn dispatcher(&self) -> Option<Task> {
        self.inner.dispatcher.borrow().clone()
    }

    /// Number of messages received but not yet consumed
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue a decoded message for the dispatcher or `get_message`
    ///
    /// Messages arriving after the dispatcher was discarded are dropped.
    pub fn on_message_received(&self, message: M) {
        if self.inner.discarded.get() {
            trace!(protocol = %self.inner.name, "dispatcher discarded, dropping message");
            return;
        }
        self.inner.queue.put(message);
        self.update_read_buffer_size();
    }

    /// Take the next message
    ///
    /// Switchpoint. With `block == false` fails with `Empty` instead of
    /// waiting. Once the connection is lost and the queue drained, fails
    /// with the sticky error, or `Closing` if the loss was clean.
    pub async fn get_message(&self, block: bool, timeout: Option<Duration>) -> ProtocolResult<M> {
        let state = &self.inner.state;
        let result = if !block || state.is_closed() {
            self.inner.queue.get_with(false, None).await
        } else {
            let closed = state.closed_gate().wait(None);
            match future::select(self.inner.queue.get(timeout), closed).await {
                Either::Left((result, _)) => result,
                Either::Right((Ok(()), _)) => Err(SchedError::QueueEmpty),
                Either::Right((Err(e), _)) => Err(e),
            }
        };
        match result {
            Ok(message) => {
                self.update_read_buffer_size();
                Ok(message)
            }
            Err(SchedError::QueueEmpty) if state.is_closed() => {
                Err(state.error().unwrap_or(ProtocolError::Closing).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Switchpoint. Write `data` once the transport accepts more.
    pub async fn write(&self, data: &[u8]) -> ProtocolResult<()> {
        self.inner.state.write(data).await
    }

    /// Switchpoint. Write every buffer of `lines`, in order.
    pub async fn writelines<I, B>(&self, lines: I) -> ProtocolResult<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let lines: Vec<Vec<u8>> = lines.into_iter().map(|l| l.as_ref().to_vec()).collect();
        self.inner.state.writelines(&lines).await
    }

    /// Switchpoint. Shut down the write direction.
    pub async fn write_eof(&self) -> ProtocolResult<()> {
        self.inner.state.write_eof().await
    }

    /// Switchpoint. Close the connection and wait until it is closed.
    pub async fn close(&self) -> ProtocolResult<()> {
        self.inner.state.close().await
    }

    fn update_read_buffer_size(&self) {
        self.inner.state.update_read_buffer_size(self.inner.queue.len());
    }

    /// Store `error` and close the transport
    ///
    /// Only the first error closes; later ones are dropped.
    fn fail(&self, error: ProtocolError) {
        if !self.inner.state.set_error_once(error) {
            return;
        }
        if let Some(transport) = self.inner.state.transport() {
            transport.close();
        }
    }

    fn start_dispatcher(&self, handler: Rc<dyn MessageHandler<M>>) -> SchedResult<()> {
        let seq = next_sequence(&format!("{}-dispatcher", self.inner.name))?;
        let name = format!("{}-{}", self.inner.name, seq);
        let task = try_spawn_named(
            name,
            dispatch(Rc::downgrade(&self.inner), self.inner.queue.clone(), handler),
        )?;
        *self.inner.dispatcher.borrow_mut() = Some(task);
        Ok(())
    }

    /// Decode as many messages as `data` completes and queue them
    fn feed(&self, data: &[u8], eof: bool) {
        let state = &self.inner.state;
        if state.error().is_some() || state.is_closing() || state.is_closed() {
            self.inner.input.borrow_mut().clear();
            return;
        }
        let (messages, outcome) = {
            let mut decoder = self.inner.decoder.borrow_mut();
            let Some(decoder) = decoder.as_mut() else {
                if !data.is_empty() {
                    warn!(protocol = %self.inner.name, len = data.len(), "no decoder, dropping input");
                }
                return;
            };
            let mut input = self.inner.input.borrow_mut();
            input.extend_from_slice(data);

            let mut messages = Vec::new();
            let outcome = loop {
                let next = if eof {
                    decoder.decode_eof(&mut input)
                } else {
                    decoder.decode(&mut input)
                };
                match next {
                    Ok(Some(message)) => messages.push(message),
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            (messages, outcome)
        };

        for message in messages {
            self.on_message_received(message);
        }
        if let Err(e) = outcome {
            error!(protocol = %self.inner.name, error = %e, "undecodable input, closing connection");
            self.fail(e);
        }
    }
}

impl<M: 'static> Clone for MessageProtocol<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: 'static> fmt::Debug for MessageProtocol<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageProtocol")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state)
            .field("queued", &self.queued())
            .field("dispatcher", &self.dispatcher())
            .finish()
    }
}

impl<M: 'static> Protocol for MessageProtocol<M> {
    fn connection_made(&self, transport: TransportRef) {
        self.inner.state.connection_made(transport);
    }

    /// Nothing queued or in progress can reach the peer any more, so the
    /// dispatcher is cancelled and its backlog discarded.
    fn connection_lost(&self, error: Option<ProtocolError>) {
        self.inner.state.connection_lost(error);
        let dispatcher = self.inner.dispatcher.borrow_mut().take();
        if let Some(task) = dispatcher {
            self.inner.discarded.set(true);
            task.cancel();
            self.inner.queue.clear();
        }
    }

    fn pause_writing(&self) {
        self.inner.state.pause_writing();
    }

    fn resume_writing(&self) {
        self.inner.state.resume_writing();
    }
}

impl<M: 'static> StreamCallbacks for MessageProtocol<M> {
    fn data_received(&self, data: &[u8]) {
        self.feed(data, false);
    }

    fn eof_received(&self) {
        self.feed(&[], true);
    }
}

/// Body of the dispatcher task
async fn dispatch<M: 'static>(
    protocol: Weak<MessageInner<M>>,
    queue: BlockingQueue<M>,
    handler: Rc<dyn MessageHandler<M>>,
) {
    debug!("dispatcher starting");
    let outcome = AssertUnwindSafe(dispatch_loop(&protocol, &queue, &*handler))
        .catch_unwind()
        .await;

    let fault = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(Condition::Cancelled)) => {
            debug!("dispatcher was cancelled");
            None
        }
        Ok(Err(Condition::Protocol(e))) => {
            error!(error = %e, "closing connection");
            Some(e)
        }
        Ok(Err(condition)) => {
            error!(%condition, "uncaught condition in dispatcher");
            Some(ProtocolError::DispatcherFault)
        }
        Err(_) => {
            error!("uncaught panic in dispatcher");
            Some(ProtocolError::DispatcherFault)
        }
    };

    if let Some(error) = fault {
        if let Some(inner) = protocol.upgrade() {
            MessageProtocol { inner }.fail(error);
        }
    }
    debug!("dispatcher exiting");
}

async fn dispatch_loop<M: 'static>(
    protocol: &Weak<MessageInner<M>>,
    queue: &BlockingQueue<M>,
    handler: &dyn MessageHandler<M>,
) -> ProtocolResult<()> {
    loop {
        // A handler may swallow the cancellation, so check again each round
        if protocol.upgrade().map_or(true, |inner| inner.dispatch_over()) {
            return Ok(());
        }
        let message = queue.get(None).await?;
        let Some(inner) = protocol.upgrade() else {
            return Ok(());
        };
        if inner.dispatch_over() {
            return Ok(());
        }
        let protocol = MessageProtocol { inner };
        // Taking a message may have made room below the low watermark
        protocol.update_read_buffer_size();
        let transport = protocol.inner.state.transport();
        handler.handle(message, transport, protocol).await?;
    }
}
