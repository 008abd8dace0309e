//! The operation run for each admitted call.

use std::future::Future;

use async_trait::async_trait;

/// Work performed once a call has been admitted.
///
/// The limiter invokes `call` outside its critical section and hands any
/// error straight back to the caller of `perform`.
#[async_trait]
pub trait Action<T: Send + 'static>: Send + Sync {
    /// Error produced by a failed invocation.
    type Error: Send;

    /// Run the action for one admitted call.
    async fn call(&self, arg: T) -> Result<(), Self::Error>;
}

/// An [`Action`] backed by a closure returning a future.
///
/// Created with [`action_fn`].
#[derive(Clone)]
pub struct FnAction<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").finish_non_exhaustive()
    }
}

/// Wrap an async closure as an [`Action`].
///
/// ```
/// use callgate::ratelimit::action_fn;
///
/// let action = action_fn(|url: String| async move {
///     println!("calling {url}");
///     Ok::<(), std::io::Error>(())
/// });
/// # let _ = action;
/// ```
pub fn action_fn<F>(f: F) -> FnAction<F> {
    FnAction { f }
}

#[async_trait]
impl<T, F, Fut, E> Action<T> for FnAction<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    async fn call(&self, arg: T) -> Result<(), E> {
        (self.f)(arg).await
    }
}
