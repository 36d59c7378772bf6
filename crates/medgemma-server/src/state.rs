use crate::auth::Authorizer;
use crate::configuration::{GenerationSettings, StorageSettings};
use crate::store::ConversationStore;
use medgemma::slot::ModelSlot;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub slot: Arc<ModelSlot>,
    pub store: Arc<dyn ConversationStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub generation: GenerationSettings,
    pub storage: StorageSettings,
}
