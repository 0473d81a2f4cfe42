// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::message::Message;
use crate::tree::SessionStore;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    messages: Vec<Message>,
    current_id: Option<String>,
}

impl SessionStore {
    /// Durable save: writes the full tree and current_id as JSON. Failure to
    /// write (unwritable directory, permissions) surfaces to the caller —
    /// the owning session process may choose to terminate, but this never
    /// affects other sessions.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let snapshot = Snapshot {
            messages: self.all_messages().into_iter().cloned().collect(),
            current_id: self.current_id().map(str::to_string),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from a file written by [`SessionStore::save`]. A missing or
    /// corrupt file yields an empty session — logged, non-fatal — rather
    /// than erroring the caller out.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "session file unreadable, starting empty session");
                return Self::new();
            }
        };
        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "session file corrupt, starting empty session");
                return Self::new();
            }
        };

        let mut store = Self::new();
        for message in snapshot.messages {
            let id = message.id.clone();
            let parent = message.parent_id.clone();
            store.nodes_insert_raw(id.clone(), message);
            if let Some(p) = parent {
                store.children_push_raw(p, id);
            }
        }
        store.set_current_id_raw(snapshot.current_id);
        store
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
