use std::sync::Arc;

use crate::conversation::ConversationService;
use crate::settlement::SettlementService;
use crate::store::Store;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub settlement: Arc<SettlementService>,
    pub conversations: Arc<ConversationService>,
    /// Store for health checks and the reconciliation listing
    pub store: Arc<dyn Store>,
    /// Expected `X-Relay-Secret`; `None` accepts every caller
    pub relay_secret: Option<String>,
}

impl AppState {
    pub fn new(
        settlement: Arc<SettlementService>,
        conversations: Arc<ConversationService>,
        store: Arc<dyn Store>,
        relay_secret: Option<String>,
    ) -> Self {
        Self {
            settlement,
            conversations,
            store,
            relay_secret,
        }
    }
}
