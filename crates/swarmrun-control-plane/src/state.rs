//! Shared application state for the HTTP layer.

use std::sync::Arc;

use crate::colony::Colony;
use crate::queen::Queen;

/// State handed to every HTTP handler.
pub struct AppState {
    pub queen: Arc<Queen>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(queen: Arc<Queen>) -> Arc<Self> {
        Arc::new(Self { queen })
    }

    pub fn colony(&self) -> &Colony {
        self.queen.colony()
    }
}
