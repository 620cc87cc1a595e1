//! Observable load state shared between the loader and predictors.
//!
//! [`ModelHandle`] wraps the result of the last load in an explicit
//! [`LoadState`], so callers can check or await readiness instead of racing
//! the load.

use crate::error::{LoadError, PredictError};
use crate::models::ModelLoader;
use crate::predictor::PredictorContext;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Where the model assets are in their lifecycle
#[derive(Debug, Clone)]
pub enum LoadState {
    /// No load has completed yet, or a retry after a failure is running
    Pending,
    /// Assets are loaded and predictions can run
    Ready(Arc<PredictorContext>),
    /// The last load failed and no earlier context is available
    Failed(String),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoadState::Pending => "pending",
            LoadState::Ready(_) => "ready",
            LoadState::Failed(_) => "failed",
        }
    }
}

/// Cloneable handle to the current predictor context
#[derive(Clone)]
pub struct ModelHandle {
    state: Arc<watch::Sender<LoadState>>,
}

impl ModelHandle {
    /// Create a handle in the `Pending` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoadState::Pending);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// The ready context, or the reason there is none
    pub fn context(&self) -> Result<Arc<PredictorContext>, PredictError> {
        match &*self.state.borrow() {
            LoadState::Ready(ctx) => Ok(ctx.clone()),
            LoadState::Pending => Err(PredictError::NotLoaded),
            LoadState::Failed(reason) => Err(PredictError::LoadFailed(reason.clone())),
        }
    }

    /// Predict with the current context; fails while loading is pending.
    pub fn predict(&self, input: &[f32]) -> Result<Vec<f32>, PredictError> {
        self.context()?.predict(input)
    }

    /// Run a full load and publish the outcome.
    ///
    /// While a context is already `Ready` it keeps serving during the
    /// reload, and a failed reload leaves it in place.
    pub async fn load(&self, loader: &ModelLoader) -> Result<Arc<PredictorContext>, LoadError> {
        let had_context = self.state.borrow().is_ready();
        if !had_context {
            self.state.send_replace(LoadState::Pending);
        }

        match loader.load().await {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                self.state.send_replace(LoadState::Ready(ctx.clone()));
                info!(reload = had_context, "Model handle ready");
                Ok(ctx)
            }
            Err(e) => {
                if had_context {
                    warn!(error = %e, "Reload failed, keeping the previous model");
                } else {
                    error!(error = %e, "Model load failed");
                    self.state.send_replace(LoadState::Failed(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Start a load in the background. The outcome is published to the
    /// handle; await [`ModelHandle::wait_ready`] to observe it.
    pub fn spawn_load(&self, loader: Arc<ModelLoader>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let _ = handle.load(&loader).await;
        })
    }

    /// Wait until the state leaves `Pending`.
    pub async fn wait_ready(&self) -> Result<Arc<PredictorContext>, PredictError> {
        let mut rx = self.state.subscribe();
        let settled = {
            let state = rx
                .wait_for(|state| !matches!(state, LoadState::Pending))
                .await
                .map_err(|_| PredictError::NotLoaded)?;
            (*state).clone()
        };

        match settled {
            LoadState::Ready(ctx) => Ok(ctx),
            LoadState::Failed(reason) => Err(PredictError::LoadFailed(reason)),
            LoadState::Pending => Err(PredictError::NotLoaded),
        }
    }
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new()
    }
}
