//! Runnable lookup by id, used for node references and session resume.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{Runnable, WarplineError};

#[derive(Default)]
pub struct RunnableRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Runnable>>>,
}

impl RunnableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, runnable: Arc<dyn Runnable>) {
        self.entries
            .write()
            .expect("registry lock")
            .insert(runnable.id().to_string(), runnable);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Runnable>> {
        self.entries.read().expect("registry lock").get(id).cloned()
    }

    pub fn require(&self, id: &str) -> Result<Arc<dyn Runnable>, WarplineError> {
        self.get(id)
            .ok_or_else(|| WarplineError::NotFound(format!("runnable '{id}'")))
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect()
    }
}
