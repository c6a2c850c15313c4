//! The internal body stream and the adapters that produce it.
//!
//! # Design
//! Every streamed body in the crate is a [`BodyStream`]: a boxed, pull-based
//! `Stream<Item = Result<Bytes, FetchError>>` plus two optional hooks.
//!
//! - `on_touch` runs once, on the first pull or on cancel. Bodies use it to
//!   flip `body_used` at the moment a stream is actually read rather than
//!   when it is handed out.
//! - `on_cancel` runs only when the stream is cancelled before its first
//!   pull. Transports use it to abort an exchange whose body nobody read.
//!
//! Streams are fused: after an error or the end of data every further pull
//! yields `None`. Chunks already handed out stay valid.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{FetchError, Result};
use crate::signal::AbortSignal;

/// A type-erased, fallible stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Progress callback: `(loaded, total)` where `total` is known from a length
/// header or, at the latest, when the stream completes.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One-shot callback attached to a stream.
pub type StreamHook = Box<dyn FnOnce() + Send>;

pub struct BodyStream {
    inner: ByteStream,
    on_touch: Option<StreamHook>,
    on_cancel: Option<StreamHook>,
    pulled: bool,
    done: bool,
}

impl BodyStream {
    fn from_boxed(inner: ByteStream) -> Self {
        Self {
            inner,
            on_touch: None,
            on_cancel: None,
            pulled: false,
            done: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_boxed(Box::pin(stream::empty()))
    }

    /// A stream that yields `data` as a single chunk.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::from_boxed(Box::pin(stream::iter([Ok(data)])))
    }

    /// Wrap any foreign lazy byte sequence. A `BodyStream` passes through
    /// unchanged.
    pub fn from_lazy_sequence<S, B, E>(foreign: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: Into<Bytes>,
        E: Into<FetchError>,
    {
        let mut slot = Some(foreign);
        if let Some(native) = (&mut slot as &mut dyn Any).downcast_mut::<Option<BodyStream>>() {
            if let Some(native) = native.take() {
                return native;
            }
        }
        match slot {
            Some(foreign) => Self::from_boxed(Box::pin(
                foreign.map(|item| item.map(Into::into).map_err(Into::into)),
            )),
            None => Self::empty(),
        }
    }

    /// Like [`BodyStream::from_lazy_sequence`], invoking `on_first_touch`
    /// exactly once before the first pull or cancel is delegated.
    pub fn instrumented<S, B, E>(foreign: S, on_first_touch: impl FnOnce() + Send + 'static) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: Into<Bytes>,
        E: Into<FetchError>,
    {
        let mut stream = Self::from_lazy_sequence(foreign);
        stream.on_touch = Some(match stream.on_touch.take() {
            Some(previous) => Box::new(move || {
                previous();
                on_first_touch();
            }),
            None => Box::new(on_first_touch),
        });
        stream
    }

    /// A stream that calls `pull_once` on its first pull, emits the buffer
    /// as one chunk and closes. Nothing runs until the stream is pulled.
    pub fn from_future<F, Fut>(pull_once: F, on_cancel: Option<StreamHook>) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let mut stream = Self::from_boxed(Box::pin(stream::once(async move { pull_once().await })));
        stream.on_cancel = on_cancel;
        stream
    }

    pub(crate) fn from_receiver(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        Self::from_boxed(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    /// Whether a pull or cancel has been issued.
    pub fn is_disturbed(&self) -> bool {
        self.pulled
    }

    /// Cancel the stream, releasing the underlying source.
    pub fn cancel(mut self) {
        if let Some(hook) = self.on_touch.take() {
            hook();
        }
        if !self.pulled {
            if let Some(hook) = self.on_cancel.take() {
                hook();
            }
        }
    }

    /// Drain every chunk, concatenated in arrival order.
    pub async fn read_all_chunks(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Split into two independently readable streams over the same data.
    ///
    /// The first branch inherits this stream's hooks. A branch that falls
    /// behind buffers the chunks the other branch has already pulled.
    pub fn tee(mut self) -> (BodyStream, BodyStream) {
        let on_touch = self.on_touch.take();
        let on_cancel = self.on_cancel.take();
        let shared = Arc::new(Mutex::new(TeeShared {
            source: self,
            queues: [VecDeque::new(), VecDeque::new()],
            wakers: [None, None],
            alive: [true, true],
            finished: false,
        }));
        let mut first = Self::from_boxed(Box::pin(TeeBranch {
            shared: shared.clone(),
            index: 0,
        }));
        first.on_touch = on_touch;
        first.on_cancel = on_cancel;
        let second = Self::from_boxed(Box::pin(TeeBranch { shared, index: 1 }));
        (first, second)
    }

    /// Report `(loaded, total)` after every chunk.
    pub fn with_progress(self, total: Option<u64>, callback: ProgressCallback) -> BodyStream {
        self.wrap(|inner| {
            Box::pin(ProgressStream {
                inner,
                loaded: 0,
                total,
                callback,
            })
        })
    }

    /// Fail with `Aborted` as soon as `signal` is set.
    pub fn abortable(self, signal: AbortSignal) -> BodyStream {
        self.wrap(|inner| {
            Box::pin(Abortable {
                inner,
                aborted: Box::pin(async move { signal.aborted().await }),
                done: false,
            })
        })
    }

    /// Keep `value` alive until the stream ends, fails, or is dropped.
    pub(crate) fn holding<T: Send + 'static>(self, value: T) -> BodyStream {
        self.wrap(|inner| {
            Box::pin(Holding {
                inner,
                held: Some(Box::new(value)),
            })
        })
    }

    /// Layer an adapter over this stream, moving the hooks to the outside.
    fn wrap(mut self, layer: impl FnOnce(BodyStream) -> ByteStream) -> BodyStream {
        let on_touch = self.on_touch.take();
        let on_cancel = self.on_cancel.take();
        let mut outer = Self::from_boxed(layer(self));
        outer.on_touch = on_touch;
        outer.on_cancel = on_cancel;
        outer
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(hook) = this.on_touch.take() {
            hook();
        }
        this.pulled = true;
        this.on_cancel = None;
        if this.done {
            return Poll::Ready(None);
        }
        let polled = this.inner.as_mut().poll_next(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.done = true;
        }
        polled
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("disturbed", &self.pulled)
            .field("done", &self.done)
            .finish()
    }
}

// ── Tee ─────────────────────────────────────────────────────────────

struct TeeShared {
    source: BodyStream,
    queues: [VecDeque<Result<Bytes>>; 2],
    wakers: [Option<Waker>; 2],
    alive: [bool; 2],
    finished: bool,
}

impl TeeShared {
    fn wake(&mut self, index: usize) {
        if let Some(waker) = self.wakers[index].take() {
            waker.wake();
        }
    }
}

struct TeeBranch {
    shared: Arc<Mutex<TeeShared>>,
    index: usize,
}

impl TeeBranch {
    fn lock(&self) -> MutexGuard<'_, TeeShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Stream for TeeBranch {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let index = self.index;
        let other = 1 - index;
        let mut shared = self.lock();
        if let Some(item) = shared.queues[index].pop_front() {
            return Poll::Ready(Some(item));
        }
        if shared.finished {
            return Poll::Ready(None);
        }
        let polled = Pin::new(&mut shared.source).poll_next(cx);
        match polled {
            Poll::Ready(Some(item)) => {
                if shared.alive[other] {
                    shared.queues[other].push_back(item.clone());
                    shared.wake(other);
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                shared.finished = true;
                shared.wake(other);
                Poll::Ready(None)
            }
            Poll::Pending => {
                shared.wakers[index] = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let index = self.index;
        let mut shared = self.lock();
        shared.alive[index] = false;
        shared.queues[index].clear();
        shared.wakers[index] = None;
        // The source may have registered only our waker.
        shared.wake(1 - index);
    }
}

// ── Progress ────────────────────────────────────────────────────────

struct ProgressStream {
    inner: BodyStream,
    loaded: u64,
    total: Option<u64>,
    callback: ProgressCallback,
}

impl Stream for ProgressStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                this.loaded += chunk.len() as u64;
                (this.callback)(this.loaded, this.total);
            }
            Poll::Ready(None) if this.total.is_none() => {
                this.total = Some(this.loaded);
                (this.callback)(this.loaded, this.total);
            }
            _ => {}
        }
        polled
    }
}

// ── Abort ───────────────────────────────────────────────────────────

struct Abortable {
    inner: BodyStream,
    aborted: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl Stream for Abortable {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.aborted.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(FetchError::Aborted)));
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

// ── Holding ─────────────────────────────────────────────────────────

struct Holding {
    inner: BodyStream,
    held: Option<Box<dyn Any + Send>>,
}

impl Stream for Holding {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.held = None;
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(parts: &[&'static str]) -> BodyStream {
        let items: Vec<Result<Bytes>> = parts
            .iter()
            .copied()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        BodyStream::from_lazy_sequence(stream::iter(items))
    }

    #[tokio::test]
    async fn read_all_concatenates_in_order() {
        let body = chunks(&["he", "ll", "o"]).read_all_chunks().await.unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn foreign_error_type_is_converted() {
        let items: Vec<std::result::Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"ok".to_vec()),
            Err(std::io::Error::other("reset")),
        ];
        let err = BodyStream::from_lazy_sequence(stream::iter(items))
            .read_all_chunks()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(msg) if msg == "reset"));
    }

    #[tokio::test]
    async fn wrapping_a_body_stream_keeps_its_hooks() {
        let touched = Arc::new(AtomicUsize::new(0));
        let t = touched.clone();
        let inner = BodyStream::instrumented(chunks(&["x"]), move || {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let mut outer = BodyStream::from_lazy_sequence(inner);
        assert_eq!(outer.next().await.unwrap().unwrap(), "x");
        assert_eq!(touched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn instrumented_fires_once_on_first_pull() {
        let touched = Arc::new(AtomicUsize::new(0));
        let t = touched.clone();
        let mut stream = BodyStream::instrumented(chunks(&["a", "b"]), move || {
            t.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!stream.is_disturbed());
        assert_eq!(touched.load(Ordering::SeqCst), 0);
        stream.next().await;
        stream.next().await;
        stream.next().await;
        assert!(stream.is_disturbed());
        assert_eq!(touched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instrumented_fires_on_cancel() {
        let touched = Arc::new(AtomicUsize::new(0));
        let t = touched.clone();
        let stream = BodyStream::instrumented(chunks(&["a"]), move || {
            t.fetch_add(1, Ordering::SeqCst);
        });
        stream.cancel();
        assert_eq!(touched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn from_future_is_lazy_and_single_chunk() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut stream = BodyStream::from_future(
            move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"whole"))
            },
            None,
        );
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(stream.next().await.unwrap().unwrap(), "whole");
        assert!(stream.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_future_cancel_before_pull_runs_hook() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let c = cancelled.clone();
        let stream = BodyStream::from_future(
            || async { Ok(Bytes::new()) },
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );
        stream.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn from_future_cancel_after_pull_skips_hook() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let c = cancelled.clone();
        let mut stream = BodyStream::from_future(
            || async { Ok(Bytes::from_static(b"x")) },
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );
        stream.next().await;
        stream.cancel();
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_is_terminal() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"a")),
            Err(FetchError::Network("boom".into())),
            Ok(Bytes::from_static(b"never")),
        ];
        let mut stream = BodyStream::from_lazy_sequence(stream::iter(items));
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn tee_branches_read_independently() {
        let (a, mut b) = chunks(&["one", "two", "three"]).tee();
        assert_eq!(b.next().await.unwrap().unwrap(), "one");
        let whole_a = a.read_all_chunks().await.unwrap();
        let whole_b = b.read_all_chunks().await.unwrap();
        assert_eq!(whole_a, "onetwothree");
        assert_eq!(whole_b, "twothree");
    }

    #[tokio::test]
    async fn tee_survives_dropped_branch() {
        let (a, b) = chunks(&["x", "y"]).tee();
        drop(a);
        assert_eq!(b.read_all_chunks().await.unwrap(), "xy");
    }

    #[tokio::test]
    async fn tee_over_channel_wakes_both_branches() {
        let (tx, rx) = mpsc::channel(4);
        let (a, b) = BodyStream::from_receiver(rx).tee();
        let ra = tokio::spawn(a.read_all_chunks());
        let rb = tokio::spawn(b.read_all_chunks());
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tokio::task::yield_now().await;
        tx.send(Ok(Bytes::from_static(b"cd"))).await.unwrap();
        drop(tx);
        assert_eq!(ra.await.unwrap().unwrap(), "abcd");
        assert_eq!(rb.await.unwrap().unwrap(), "abcd");
    }

    #[tokio::test]
    async fn progress_reports_running_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let stream = chunks(&["abc", "de"]).with_progress(
            None,
            Arc::new(move |loaded, total| s.lock().unwrap().push((loaded, total))),
        );
        stream.read_all_chunks().await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(3, None), (5, None), (5, Some(5))]
        );
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn held_value_is_released_at_end_of_data() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut stream = chunks(&["a", "b"]).holding(DropFlag(dropped.clone()));
        stream.next().await;
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        stream.next().await;
        assert!(stream.next().await.is_none());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        drop(stream);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn held_value_is_released_when_stream_is_dropped() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream = chunks(&["a"]).holding(DropFlag(dropped.clone()));
        stream.cancel();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abortable_fails_once_signal_is_set() {
        let (_tx, rx) = mpsc::channel::<Result<Bytes>>(1);
        let signal = AbortSignal::already_aborted();
        let err = BodyStream::from_receiver(rx)
            .abortable(signal)
            .read_all_chunks()
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }
}
