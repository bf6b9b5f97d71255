//! In-flight asynchronous calls
//!
//! Each async call owns one atomic state word:
//!
//! ```text
//!            try_complete()            cancel()
//! Completed ◀────────────── Pending ──────────────▶ Cancelled
//! ```
//!
//! Both transitions are a single compare-and-swap from `Pending`, so exactly
//! one of them ever wins. The reply callback runs only after winning
//! `try_complete`, and the cancel action only after winning `cancel`: a
//! callback can never follow an observed cancellation, and neither side runs
//! twice no matter how many threads race.

use crate::error::{RpcError, RpcResult};
use bus_codec::{FromArguments, Message};
use parking_lot::Mutex;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

type CancelAction = Box<dyn FnOnce() + Send>;

pub(crate) struct CallState {
    state: AtomicU8,
    serial: u32,
    on_cancel: Mutex<Option<CancelAction>>,
}

impl CallState {
    pub(crate) fn new(serial: u32) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(PENDING),
            serial,
            on_cancel: Mutex::new(None),
        })
    }

    /// Install the action run by the winning `cancel()`
    pub(crate) fn set_cancel_action(&self, action: impl FnOnce() + Send + 'static) {
        *self.on_cancel.lock() = Some(Box::new(action));
    }

    /// Claim the right to deliver the result
    pub(crate) fn try_complete(&self) -> bool {
        self.transition(COMPLETED)
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn cancel(&self) -> bool {
        if !self.transition(CANCELLED) {
            return false;
        }
        if let Some(action) = self.on_cancel.lock().take() {
            action();
        }
        true
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// Handle to one in-flight asynchronous method call
///
/// Dropping the handle does not cancel the call; use [`cancel`](Self::cancel)
/// or [`release`](Self::release).
#[derive(Clone)]
pub struct PendingAsyncCall {
    state: Arc<CallState>,
}

impl PendingAsyncCall {
    pub(crate) fn new(state: Arc<CallState>) -> Self {
        Self { state }
    }

    /// Serial of the outgoing call
    pub fn serial(&self) -> u32 {
        self.state.serial
    }

    /// Whether the call is still waiting for its reply
    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Cancel the call; returns `true` only for the invocation that cancelled it
    ///
    /// Idempotent and safe to race from any number of threads. Has no effect
    /// once the reply has been claimed for delivery.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Same as [`cancel`](Self::cancel), ignoring the outcome
    pub fn release(&self) {
        self.state.cancel();
    }
}

impl std::fmt::Debug for PendingAsyncCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.state.load(Ordering::Acquire) {
            PENDING => "pending",
            COMPLETED => "completed",
            _ => "cancelled",
        };
        f.debug_struct("PendingAsyncCall")
            .field("serial", &self.state.serial)
            .field("state", &state)
            .finish()
    }
}

/// Await-able reply of an asynchronous call; dropping it cancels the call
pub struct ReplyFuture<R> {
    call: PendingAsyncCall,
    reply: oneshot::Receiver<RpcResult<Message>>,
    _result: PhantomData<fn() -> R>,
}

impl<R> ReplyFuture<R> {
    pub(crate) fn new(call: PendingAsyncCall, reply: oneshot::Receiver<RpcResult<Message>>) -> Self {
        Self {
            call,
            reply,
            _result: PhantomData,
        }
    }

    pub fn pending_call(&self) -> &PendingAsyncCall {
        &self.call
    }
}

/// Read a reply body as `R`, requiring an exact signature match
pub(crate) fn decode_reply<R: FromArguments>(mut reply: Message) -> RpcResult<R> {
    let expected = R::signature();
    if reply.signature() != expected {
        return Err(bus_codec::CodecError::mismatch(expected, reply.signature()).into());
    }
    Ok(R::read_from(&mut reply)?)
}

impl<R: FromArguments> Future for ReplyFuture<R> {
    type Output = RpcResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.and_then(decode_reply)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R> Drop for ReplyFuture<R> {
    fn drop(&mut self) {
        self.call.release();
    }
}
