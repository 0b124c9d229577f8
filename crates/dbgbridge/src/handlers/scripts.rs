//! File URL to `scriptId` mapping

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Registry {
    by_url: HashMap<String, String>,
    by_id: HashMap<String, String>,
    announced: HashSet<String>,
    next_id: u64,
}

impl Registry {
    fn id_for(&mut self, url: &str) -> String {
        if let Some(id) = self.by_url.get(url) {
            return id.clone();
        }
        self.next_id += 1;
        let id = self.next_id.to_string();
        self.by_url.insert(url.to_string(), id.clone());
        self.by_id.insert(id.clone(), url.to_string());
        id
    }
}

/// Script ids shared by every session, so the same file keeps one id
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    inner: Mutex<Registry>,
}

impl ScriptRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `url`, assigned on first use
    pub fn script_id(&self, url: &str) -> String {
        self.inner.lock().id_for(url)
    }

    /// Id for a file seen in a stack trace. The flag is `true` the first
    /// time, when the client still has to be told about the script.
    pub fn announce(&self, url: &str) -> (String, bool) {
        let mut inner = self.inner.lock();
        let id = inner.id_for(url);
        let first = inner.announced.insert(id.clone());
        (id, first)
    }

    /// File URL of a script id
    pub fn url(&self, script_id: &str) -> Option<String> {
        self.inner.lock().by_id.get(script_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        let scripts = ScriptRegistry::new();
        let a = scripts.script_id("file:///a.php");
        let b = scripts.script_id("file:///b.php");
        assert_ne!(a, b);
        assert_eq!(scripts.script_id("file:///a.php"), a);
        assert_eq!(scripts.url(&b).as_deref(), Some("file:///b.php"));
        assert_eq!(scripts.url("999"), None);
    }

    #[test]
    fn test_announced_once() {
        let scripts = ScriptRegistry::new();
        let id = scripts.script_id("file:///a.php");
        assert_eq!(scripts.announce("file:///a.php"), (id.clone(), true));
        assert_eq!(scripts.announce("file:///a.php"), (id, false));
    }
}
