//! Session registry, used to filter supervisor-call tracing by IPC session.
//!
//! The original implementation keys a `map<id, SessionInfo>` purely for the
//! `dumpsession` diagnostic; the handle actually used for svc filtering
//! lives on [`SvcFilter`](crate::watch::SvcFilter) and is set independently
//! by `setsession`. Both are kept here as the engine's idea of "named
//! sessions currently known," separate from "which handle is currently
//! being traced."

use std::collections::BTreeMap;

/// `{id, name, handle}` — one named IPC session, as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id, assigned by the host.
    pub id: u64,
    /// Human-readable session name.
    pub name: String,
    /// Kernel object handle for this session.
    pub handle: u32,
}

/// Registry of known sessions, keyed by id (`dumpsession`'s source map).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<u64, SessionInfo>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or replaces a session descriptor.
    pub fn insert(&mut self, info: SessionInfo) {
        self.sessions.insert(info.id, info);
    }

    /// Removes a session descriptor by id.
    pub fn remove(&mut self, id: u64) -> Option<SessionInfo> {
        self.sessions.remove(&id)
    }

    /// `dumpsession <substring>`: every known session whose name contains
    /// `filter`, or every session when `filter` is empty, ordered by id.
    #[must_use]
    pub fn matching(&self, filter: &str) -> Vec<&SessionInfo> {
        self.sessions
            .values()
            .filter(|info| filter.is_empty() || info.name.contains(filter))
            .collect()
    }

    /// `handle:<hex> name:<n> id:<hex>` per matching session, one per line,
    /// preceded by a `[sessions]` header, matching the original dump shape.
    #[must_use]
    pub fn dump(&self, filter: &str) -> String {
        let mut out = String::from("[sessions]");
        for info in self.matching(filter) {
            out.push('\n');
            out.push_str(&format!(
                "handle:{:#x} name:{} id:{:#x}",
                info.handle, info.name, info.id
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_filters_by_name_substring() {
        let mut reg = SessionRegistry::new();
        reg.insert(SessionInfo {
            id: 1,
            name: "fs-session".to_owned(),
            handle: 0x10,
        });
        reg.insert(SessionInfo {
            id: 2,
            name: "hid-session".to_owned(),
            handle: 0x20,
        });
        assert_eq!(reg.matching("fs").len(), 1);
        assert_eq!(reg.matching("").len(), 2);
        assert_eq!(reg.matching("nope").len(), 0);
    }

    #[test]
    fn dump_formats_header_and_lines() {
        let mut reg = SessionRegistry::new();
        reg.insert(SessionInfo {
            id: 1,
            name: "fs-session".to_owned(),
            handle: 0x10,
        });
        let text = reg.dump("");
        assert_eq!(text, "[sessions]\nhandle:0x10 name:fs-session id:0x1");
    }

    #[test]
    fn remove_drops_session() {
        let mut reg = SessionRegistry::new();
        reg.insert(SessionInfo {
            id: 1,
            name: "a".to_owned(),
            handle: 1,
        });
        assert!(reg.remove(1).is_some());
        assert!(reg.matching("").is_empty());
    }
}
