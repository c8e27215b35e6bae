//! Set-once cancellation signals with derived children.
//!
//! A [`CancelToken`] is cancelled at most once and never reset. Tokens made via
//! [`CancelToken::child`] are cancelled together with their parent, while
//! cancelling a child leaves the parent untouched. Blocking threads park on the
//! token with [`CancelToken::wait_timeout`]; async tasks await
//! [`CancelToken::cancelled`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    // Guards parking only. The flag itself lives in `cancelled`.
    parked: Mutex<()>,
    wakeup: Condvar,
    notifier: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parked: Mutex::new(()),
                wakeup: Condvar::new(),
                notifier,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a token that is cancelled whenever this one is.
    ///
    /// A child of an already cancelled token starts out cancelled.
    pub fn child(&self) -> Self {
        let child = Self::new();

        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }

        // The parent sets its flag before draining `children`, so either it sees
        // the link pushed above or we see the flag here.
        if self.is_cancelled() {
            child.cancel();
        }

        child
    }

    /// Cancels this token and every live descendant. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Parks the calling thread for up to `timeout`, returning early when the
    /// token is cancelled. Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_cancelled();
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self
            .inner
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_cancelled() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            guard = self
                .inner
                .wakeup
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.inner.notifier.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Inner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            // Taking the lock orders this wakeup after any waiter's flag check.
            let _guard = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
            self.wakeup.notify_all();
        }

        self.notifier.send_replace(true);

        let children = std::mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_is_idempotent_and_monotonic() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn parent_cancels_children_but_not_the_reverse() {
        let app = CancelToken::new();
        let first = app.child();
        let second = app.child();
        let grandchild = first.child();

        first.cancel();
        assert!(first.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(!app.is_cancelled());
        assert!(!second.is_cancelled());

        app.cancel();
        assert!(second.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let app = CancelToken::new();
        app.cancel();

        assert!(app.child().is_cancelled());
    }

    #[test]
    fn dropped_children_are_pruned() {
        let app = CancelToken::new();
        for _ in 0..16 {
            drop(app.child());
        }
        let _live = app.child();

        let links = app.inner.children.lock().unwrap().len();
        assert_eq!(links, 1);
    }

    #[test]
    fn wait_timeout_elapses_without_cancel() {
        let token = CancelToken::new();
        let start = Instant::now();

        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_timeout_wakes_on_cancel() {
        let app = CancelToken::new();
        let cohort = app.child();
        let waiter = cohort.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let cancelled = waiter.wait_timeout(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        app.cancel();

        let (cancelled, waited) = handle.join().unwrap();
        assert!(cancelled);
        assert!(waited < Duration::from_secs(5), "waited {waited:?}");
    }

    #[test]
    fn zero_timeout_only_checks_the_flag() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::ZERO));

        token.cancel();
        assert!(token.wait_timeout(Duration::ZERO));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_for_children() {
        let app = CancelToken::new();
        let cohort = app.child();

        let waiter = tokio::spawn({
            let cohort = cohort.clone();
            async move { cohort.cancelled().await }
        });

        app.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("child future should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_when_already_set() {
        let token = CancelToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already cancelled token should resolve at once");
    }
}
