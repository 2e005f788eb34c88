use std::ops::Deref;
use std::sync::Arc;

use derive_new::new;

use crate::refresh::Refresher;

/// Shared by every request handler.
#[derive(Debug, Clone, new)]
pub struct App {
    pub refresher: Arc<Refresher>,
    pub service_name: Arc<str>,
}

impl App {
    pub fn liveness(&self) -> String {
        format!("{} is Alive!", self.service_name)
    }
}

impl Deref for App {
    type Target = Refresher;

    fn deref(&self) -> &Self::Target {
        &self.refresher
    }
}
