//! Request managers and packaged requests.
//!
//! A [`RequestManager`] owns the whole lifecycle of one request: it builds
//! the tasks, hands them to an executor and turns the outcome into a
//! response. A compiler failure is a *response* (non-zero return code);
//! `Err` means the request could not be completed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use kubecc_core::{CompileRequest, CompileResponse, Contexts, RunRequest, RunResponse};
use tokio::sync::oneshot;

use crate::error::RequestError;

pub type RequestResult<T> = Result<T, RequestError>;

#[async_trait]
pub trait RequestManager<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
{
    /// Processes `request` to completion.
    async fn process(&self, ctx: Contexts, request: Req) -> RequestResult<Resp>;
}

/// Manager for requests originating on this host
pub type RunManager = Arc<dyn RequestManager<RunRequest, RunResponse>>;

/// Manager for requests received from a remote consumer
pub type CompileManager = Arc<dyn RequestManager<CompileRequest, CompileResponse>>;

type RequestFn<T> = Arc<dyn Fn() -> BoxFuture<'static, RequestResult<T>> + Send + Sync>;

/// A deferred request with a single-use result channel
///
/// The packaged function may be invoked any number of times (each retry
/// calls it again) but a result is delivered at most once.
pub struct PackagedRequest<T> {
    f: RequestFn<T>,
    result: Option<oneshot::Sender<RequestResult<T>>>,
}

impl<T: Send + 'static> PackagedRequest<T> {
    /// Packages a closure. Returns the request and the receiver its result
    /// will be delivered to.
    pub fn new<F, Fut>(f: F) -> (Self, oneshot::Receiver<RequestResult<T>>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RequestResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                f: Arc::new(move || f().boxed()),
                result: Some(tx),
            },
            rx,
        )
    }

    /// Packages a call to `manager.process(ctx, request)`.
    pub fn package<Req>(
        manager: Arc<dyn RequestManager<Req, T>>,
        ctx: Contexts,
        request: Req,
    ) -> (Self, oneshot::Receiver<RequestResult<T>>)
    where
        Req: Clone + Send + Sync + 'static,
    {
        Self::new(move || {
            let manager = manager.clone();
            let ctx = ctx.clone();
            let request = request.clone();
            async move { manager.process(ctx, request).await }
        })
    }

    /// Runs the packaged function without delivering its result.
    pub async fn invoke(&self) -> RequestResult<T> {
        (self.f)().await
    }

    /// Sends `result` to the receiver. Returns `false` if a result was
    /// already delivered or nobody is listening anymore.
    pub fn deliver(&mut self, result: RequestResult<T>) -> bool {
        match self.result.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Runs the function and delivers its result.
    pub async fn run(&mut self) -> bool {
        let result = self.invoke().await;
        self.deliver(result)
    }

    pub fn is_delivered(&self) -> bool {
        self.result.is_none()
    }

    /// Whether the receiving side has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.result.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl<T> fmt::Debug for PackagedRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackagedRequest")
            .field("delivered", &self.result.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubecc_core::{Component, ServerContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoManager;

    #[async_trait]
    impl RequestManager<RunRequest, RunResponse> for EchoManager {
        async fn process(&self, _ctx: Contexts, request: RunRequest) -> RequestResult<RunResponse> {
            Ok(RunResponse::success(request.args.join(" ").into_bytes(), Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_package_invokes_manager() {
        let ctx = Contexts::for_request(&ServerContext::new(Component::Test));
        let request = RunRequest {
            args: vec!["-c".into(), "a.c".into()],
            ..Default::default()
        };
        let manager: RunManager = Arc::new(EchoManager);
        let (mut packaged, rx) = PackagedRequest::package(manager, ctx, request);
        assert!(packaged.run().await);
        assert_eq!(rx.await.unwrap().unwrap().stdout, b"-c a.c");
        assert!(packaged.is_delivered());
    }

    #[tokio::test]
    async fn test_delivers_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut packaged, rx) = {
            let calls = calls.clone();
            PackagedRequest::new(move || {
                let calls = calls.clone();
                async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) }
            })
        };

        assert_eq!(packaged.invoke().await, Ok(0));
        assert_eq!(packaged.invoke().await, Ok(1));
        assert!(packaged.run().await);
        assert!(!packaged.deliver(Ok(99)));
        assert_eq!(rx.await.unwrap(), Ok(2));
    }

    #[tokio::test]
    async fn test_abandoned_when_receiver_dropped() {
        let (packaged, rx) = PackagedRequest::new(|| async { Ok(()) });
        assert!(!packaged.is_abandoned());
        drop(rx);
        assert!(packaged.is_abandoned());
    }
}
