mod context;
mod dispatcher;
mod invoker;
mod pipe;
mod queue;
pub(crate) mod registry;

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

pub use context::MessageContext;
pub use pipe::{InvocationOutcome, Pipe, PipeState};
pub use registry::Registry;

pub(crate) use dispatcher::MessageDispatcher;
pub(crate) use invoker::{InvocationMode, MessageInvoker, MessageInvokerDescriptor};
pub(crate) use queue::DispatchQueue;

use crate::core::{Response, HANDLER_ERROR_CODE};
use crate::ops::MessageProcessingFailed;
use crate::proto::{AsProtobuf, IntoProtobuf};
use crate::transport::{MessageExecutionCompleted, OriginatorInfo, TransportMessage};
use crate::{bus::CommandResult, core::MessagePayload, Message, MessageKind, Peer};

/// Errors that can be returned by the [`MessageDispatcher`]
#[derive(Debug, Error)]
pub enum Error {
    /// An operation on a dispatch queue returned an error
    #[error("dispatch queue error {0}")]
    Queue(#[from] queue::QueueError),

    /// Attempted to register a handler for a message to a different dispatch queue
    #[error("attempted to register message {message_type} to dispatch queue {dispatch_queue}, was previously registered to {previous}")]
    DoubleRegister {
        message_type: String,
        dispatch_queue: &'static str,
        previous: String,
    },

    /// The dispatch was dropped before completing
    #[error("the dispatch was dropped before completion")]
    Dropped,

    /// An operation was attempted while the dispatcher was not in a valid state
    #[error("an operation was attempted while the dispatcher was not in a valid state")]
    InvalidOperation,
}

/// An error raised while invoking a handler.
///
/// Handler errors are local to the faulting batch: they are captured, logged and reported
/// per entry, and never stop the dispatch queue
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    /// The handler failed while processing a message
    #[error("handler {handler_type} failed to process {message_type}: {reason}")]
    Failed {
        handler_type: &'static str,
        message_type: String,
        reason: String,
    },

    /// An asynchronous handler did not produce a started invocation
    #[error("asynchronous handler {handler_type} did not produce an invocation for {message_type}")]
    ContractViolation {
        handler_type: &'static str,
        message_type: String,
    },
}

impl InvocationError {
    pub(crate) fn failed(
        handler_type: &'static str,
        message_type: impl Into<String>,
        reason: impl Display,
    ) -> Self {
        Self::Failed {
            handler_type,
            message_type: message_type.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn contract_violation(
        handler_type: &'static str,
        message_type: impl Into<String>,
    ) -> Self {
        Self::ContractViolation {
            handler_type,
            message_type: message_type.into(),
        }
    }

    pub(crate) fn handler_type(&self) -> &'static str {
        match self {
            Self::Failed { handler_type, .. } | Self::ContractViolation { handler_type, .. } => {
                handler_type
            }
        }
    }
}

/// Extract a displayable reason from a panic payload
pub(crate) fn panic_reason(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// A message to be dispatched, either received from the wire or published locally
#[derive(Clone)]
pub(crate) enum DispatchMessage {
    Remote(TransportMessage),
    Local(Arc<dyn Message>),
}

impl std::fmt::Debug for DispatchMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(message) => write!(f, "Remote({:?})", message),
            Self::Local(message) => write!(f, "Local({})", message.name()),
        }
    }
}

impl DispatchMessage {
    pub(crate) fn message_type(&self) -> &str {
        match self {
            Self::Remote(message) => message
                .message_type()
                .expect("a transport message always has a message type"),
            Self::Local(message) => message.name(),
        }
    }

    fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Remote(message) => message.content.message_type().kind(),
            Self::Local(message) => Some(message.kind()),
        }
    }

    fn is_infrastructure(&self) -> bool {
        match self {
            Self::Remote(message) => message
                .content
                .message_type()
                .is_infrastructure()
                .unwrap_or(false),
            Self::Local(message) => message.is_infrastructure(),
        }
    }
}

/// A request to dispatch one message to its local handlers
#[derive(Debug, Clone)]
pub(crate) struct DispatchRequest {
    message: DispatchMessage,
    originator: OriginatorInfo,
    environment: Option<String>,
}

impl DispatchRequest {
    /// Dispatch a [`TransportMessage`] received from the wire
    pub(crate) fn remote(message: TransportMessage) -> Self {
        let originator = message.originator.clone();
        let environment = message.environment.clone();
        Self {
            message: DispatchMessage::Remote(message),
            originator,
            environment,
        }
    }

    /// Dispatch a local message published by the self peer
    pub(crate) fn local(message: Arc<dyn Message>, self_peer: &Peer, environment: String) -> Self {
        Self {
            message: DispatchMessage::Local(message),
            originator: OriginatorInfo {
                sender_id: self_peer.id.clone(),
                sender_endpoint: self_peer.endpoint.clone(),
                sender_machine_name: None,
                initiator_user_name: None,
            },
            environment: Some(environment),
        }
    }

    pub(crate) fn message(&self) -> &DispatchMessage {
        &self.message
    }
}

/// Per-handler outcomes of a dispatch
#[derive(Default)]
struct DispatchResults {
    response: Option<Response>,
    errors: Vec<InvocationError>,
}

struct DispatchState {
    request: DispatchRequest,
    context: MessageContext,
    should_run_synchronously: bool,
    remaining: AtomicUsize,
    sealed: AtomicBool,
    results: Mutex<DispatchResults>,
    completion: Mutex<Option<oneshot::Sender<Dispatched>>>,
}

/// A message on its way through the dispatch engine.
///
/// The dispatch is shared between the queues of every invoker selected for the message; it
/// completes once each of them reported through [`MessageDispatch::set_handled`]
#[derive(Clone)]
pub(crate) struct MessageDispatch {
    state: Arc<DispatchState>,
}

impl MessageDispatch {
    pub(crate) fn new(request: DispatchRequest) -> (Self, DispatchFuture) {
        let (tx, rx) = oneshot::channel();

        let message_id = match &request.message {
            DispatchMessage::Remote(message) => Some(message.id),
            DispatchMessage::Local(_) => None,
        };
        let context = MessageContext::new(
            message_id,
            request.originator.clone(),
            request.environment.clone(),
        );
        let should_run_synchronously = request.message.is_infrastructure();

        (
            Self {
                state: Arc::new(DispatchState {
                    request,
                    context,
                    should_run_synchronously,
                    remaining: AtomicUsize::new(0),
                    sealed: AtomicBool::new(false),
                    results: Mutex::new(DispatchResults::default()),
                    completion: Mutex::new(Some(tx)),
                }),
            },
            DispatchFuture(rx),
        )
    }

    pub(crate) fn request(&self) -> &DispatchRequest {
        &self.state.request
    }

    pub(crate) fn context(&self) -> &MessageContext {
        &self.state.context
    }

    pub(crate) fn should_run_synchronously(&self) -> bool {
        self.state.should_run_synchronously
    }

    /// Account for one more handler before the dispatch is enqueued or run inline
    pub(crate) fn before_enqueue(&self) {
        self.state.remaining.fetch_add(1, Ordering::SeqCst);
    }

    /// Report the outcome of one handler invocation for this dispatch
    pub(crate) fn set_handled(
        &self,
        _handler_type: &'static str,
        response: Option<Response>,
        error: Option<InvocationError>,
    ) {
        {
            let mut results = self.state.results.lock().expect("dispatch results poisoned");
            if let Some(error) = error {
                results.errors.push(error);
            } else if results.response.is_none() {
                results.response = response;
            }
        }

        if self.state.remaining.fetch_sub(1, Ordering::SeqCst) == 1
            && self.state.sealed.load(Ordering::SeqCst)
        {
            self.complete();
        }
    }

    /// Signal that every selected invoker has been accounted for.
    ///
    /// A dispatch with no matching handler completes right away
    pub(crate) fn enqueued_all(&self) {
        self.state.sealed.store(true, Ordering::SeqCst);
        if self.state.remaining.load(Ordering::SeqCst) == 0 {
            self.complete();
        }
    }

    fn complete(&self) {
        let Some(tx) = self
            .state
            .completion
            .lock()
            .expect("dispatch completion poisoned")
            .take()
        else {
            return;
        };

        let result = {
            let mut results = self.state.results.lock().expect("dispatch results poisoned");
            if results.errors.is_empty() {
                Ok(results.response.take())
            } else {
                Err(DispatchError(std::mem::take(&mut results.errors)))
            }
        };

        let _ = tx.send(Dispatched {
            request: self.state.request.clone(),
            result,
        });
    }
}

/// Errors raised by the handlers of a dispatched message
#[derive(Debug, Default)]
pub(crate) struct DispatchError(Vec<InvocationError>);

impl DispatchError {
    pub(crate) fn errors(&self) -> &[InvocationError] {
        &self.0
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, error) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// A [`Result`] representation of a dispatch
pub(crate) type DispatchResult = Result<Option<Response>, DispatchError>;

/// A [`oneshot`] future that resolves once a dispatch has been fully handled
pub(crate) struct DispatchFuture(oneshot::Receiver<Dispatched>);

impl std::future::Future for DispatchFuture {
    type Output = Result<Dispatched, Error>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::Dropped))
    }
}

/// Final representation of a message that has been dispatched
#[derive(Debug)]
pub(crate) struct Dispatched {
    /// The original dispatch request
    request: DispatchRequest,

    /// Result of the dispatch
    result: DispatchResult,
}

/// Messages to send back after a dispatch completed
pub(crate) struct DispatchOutput {
    /// The peer that originated the dispatched message
    pub(crate) originator: Option<Peer>,

    /// Command completion to send back to the originator
    pub(crate) completed: Option<MessageExecutionCompleted>,

    /// Failure event to publish when handlers failed
    pub(crate) failed: Option<MessageProcessingFailed>,
}

impl Dispatched {
    pub(crate) fn is_command(&self) -> bool {
        matches!(self.request.message.kind(), Some(MessageKind::Command))
    }

    pub(crate) fn result(&self) -> &DispatchResult {
        &self.result
    }

    /// Build the outbound messages resulting from this dispatch
    pub(crate) fn into_output(self) -> DispatchOutput {
        let (command_id, message_proto) = match &self.request.message {
            DispatchMessage::Remote(message) => (message.id.into_protobuf(), message.as_protobuf()),
            DispatchMessage::Local(_) => {
                return DispatchOutput {
                    originator: None,
                    completed: None,
                    failed: None,
                }
            }
        };

        let is_command = self.is_command();
        let originator = Peer {
            id: self.request.originator.sender_id.clone(),
            endpoint: self.request.originator.sender_endpoint.clone(),
            is_up: true,
            is_responding: true,
        };

        let failed = if let Err(dispatch_error) = self.result.as_ref() {
            let now_utc = chrono::Utc::now();
            let failing_handlers = dispatch_error
                .errors()
                .iter()
                .map(|e| e.handler_type().to_string())
                .collect();

            Some(MessageProcessingFailed {
                transport_message: message_proto,
                exception_message: dispatch_error.to_string(),
                exception_timestamp_utc: now_utc.into_protobuf(),
                failing_handlers,
            })
        } else {
            None
        };

        let completed = if is_command {
            Some(match self.result {
                Ok(Some(response)) => response.into_message(command_id),
                Ok(None) => MessageExecutionCompleted {
                    command_id,
                    error_code: 0,
                    payload_type_id: None,
                    payload: None,
                    response_message: None,
                },
                Err(e) => MessageExecutionCompleted {
                    command_id,
                    error_code: HANDLER_ERROR_CODE,
                    payload_type_id: None,
                    payload: None,
                    response_message: Some(e.to_string()),
                },
            })
        } else {
            None
        };

        DispatchOutput {
            originator: Some(originator),
            completed,
            failed,
        }
    }
}

impl TryFrom<Dispatched> for CommandResult {
    type Error = ();

    fn try_from(dispatched: Dispatched) -> Result<Self, ()> {
        if !dispatched.is_command() {
            return Err(());
        }

        let command_id = match &dispatched.request.message {
            DispatchMessage::Remote(message) => message.id.into_protobuf(),
            DispatchMessage::Local(_) => crate::MessageId::from(uuid::Uuid::nil()).into_protobuf(),
        };

        let completed = match dispatched.result {
            Ok(Some(response)) => response.into_message(command_id),
            Ok(None) => MessageExecutionCompleted {
                command_id,
                error_code: 0,
                payload_type_id: None,
                payload: None,
                response_message: None,
            },
            Err(e) => MessageExecutionCompleted {
                command_id,
                error_code: HANDLER_ERROR_CODE,
                payload_type_id: None,
                payload: None,
                response_message: Some(e.to_string()),
            },
        };

        Ok(completed.into())
    }
}
