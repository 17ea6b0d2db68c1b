//! Where the session guard sends the user

use std::sync::Mutex;

/// Full-page navigation, as opposed to an in-app route change.
///
/// A hard redirect discards all in-memory state of the front end, the
/// deployment cache included.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;

    fn hard_redirect(&self, location: &str);
}

/// Navigator that only records where it was sent
///
/// Used by the command-line front end (which turns a redirect into a login
/// hint and a non-zero exit) and by tests.
#[derive(Debug)]
pub struct InMemoryNavigator {
    location: Mutex<String>,
    redirects: Mutex<Vec<String>>,
}

impl InMemoryNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = location.into();
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_redirect(&self) -> Option<String> {
        self.redirects().pop()
    }
}

impl Navigator for InMemoryNavigator {
    fn current_location(&self) -> String {
        self.location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn hard_redirect(&self, location: &str) {
        self.redirects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(location.to_string());
        self.set_location(location);
    }
}
