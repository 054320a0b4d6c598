use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LoadgenError;

/// Cooperative cancellation scope shared by every client of a run.
///
/// Cancelling the token (CTRL-C, explicit stop) or reaching the deadline ends every
/// blocking call made through [`ExecContext::run`] with a cancellation-class error.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the context is done, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<LoadgenError> {
        if self.token.is_cancelled() {
            return Some(LoadgenError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(LoadgenError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` until it finishes or the context ends, whichever is first.
    ///
    /// # Errors
    /// Returns the future's own error, or [`LoadgenError::Cancelled`] /
    /// [`LoadgenError::DeadlineExceeded`] if the context ends first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, LoadgenError>
    where
        F: Future<Output = Result<T, LoadgenError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(LoadgenError::Cancelled),
            () = deadline => Err(LoadgenError::DeadlineExceeded),
            res = fut => res,
        }
    }

    /// Sleep for `duration` unless the context ends first.
    ///
    /// # Errors
    /// Returns a cancellation-class error if the context ends during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), LoadgenError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
