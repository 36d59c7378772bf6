use crate::errors::ModelResult;
use crate::model::ModelHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Something that can produce a loaded model handle
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> ModelResult<Arc<dyn ModelHandle>>;
}

/// A loader that hands out an already constructed handle
pub struct StaticLoader(pub Arc<dyn ModelHandle>);

#[async_trait]
impl ModelLoader for StaticLoader {
    async fn load(&self) -> ModelResult<Arc<dyn ModelHandle>> {
        Ok(self.0.clone())
    }
}

/// Process-wide holder of the model handle.
///
/// The first `get` runs the loader; callers that arrive while it runs wait for the same load
/// instead of starting their own. A failed load leaves the slot empty, so the next caller
/// tries again. Once loaded, the handle is never replaced.
pub struct ModelSlot {
    cell: OnceCell<Arc<dyn ModelHandle>>,
    loader: Arc<dyn ModelLoader>,
}

impl ModelSlot {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            cell: OnceCell::new(),
            loader,
        }
    }

    /// A slot that starts out loaded
    pub fn preloaded(handle: Arc<dyn ModelHandle>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(handle.clone())),
            loader: Arc::new(StaticLoader(handle)),
        }
    }

    /// The handle, loading it on first use
    pub async fn get(&self) -> ModelResult<Arc<dyn ModelHandle>> {
        self.cell
            .get_or_try_init(|| async {
                tracing::info!("Loading MedGemma model...");
                let handle = self.loader.load().await?;
                tracing::info!("MedGemma model {} loaded successfully", handle.model_name());
                Ok(handle)
            })
            .await
            .cloned()
    }

    /// The handle if it is already resident, without triggering a load
    pub fn loaded(&self) -> Option<Arc<dyn ModelHandle>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
