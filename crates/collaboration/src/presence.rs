/// User presence tracking for collaborative editing
/// Shows where users are working and what they may do
use chrono::{DateTime, Utc};
use document::{remap_cursor, remap_range, CursorPosition, DiffResult, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::UserId;

/// User information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub color: UserColor,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: UserColor::from_user_id(id),
        }
    }
}

/// Color assigned to a user for cursor/selection highlighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl UserColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Generate a color based on user ID (deterministic)
    pub fn from_user_id(user_id: UserId) -> Self {
        let bytes = user_id.0.as_bytes();
        Self {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
        }
    }

    /// Convert to hex color string
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Capability set granted to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub can_edit: bool,
    pub can_comment: bool,
    pub can_suggest: bool,
    pub can_approve: bool,
    pub can_manage_versions: bool,
}

impl Permissions {
    pub const fn owner() -> Self {
        Self {
            can_edit: true,
            can_comment: true,
            can_suggest: true,
            can_approve: true,
            can_manage_versions: true,
        }
    }

    pub const fn editor() -> Self {
        Self {
            can_edit: true,
            can_comment: true,
            can_suggest: true,
            can_approve: false,
            can_manage_versions: false,
        }
    }

    pub const fn commenter() -> Self {
        Self {
            can_edit: false,
            can_comment: true,
            can_suggest: true,
            can_approve: false,
            can_manage_versions: false,
        }
    }

    pub const fn viewer() -> Self {
        Self {
            can_edit: false,
            can_comment: false,
            can_suggest: false,
            can_approve: false,
            can_manage_versions: false,
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::editor()
    }
}

/// A participant's live state in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationUser {
    pub user: User,
    pub cursor: CursorPosition,
    pub selection: Option<TextRange>,
    pub is_active: bool,
    pub permissions: Permissions,
    pub last_activity: DateTime<Utc>,
}

impl CollaborationUser {
    pub fn new(user: User, permissions: Permissions) -> Self {
        Self {
            user,
            cursor: CursorPosition::default(),
            selection: None,
            is_active: true,
            permissions,
            last_activity: Utc::now(),
        }
    }

    pub fn id(&self) -> UserId {
        self.user.id
    }

    /// Record activity at `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.is_active = true;
    }

    /// No activity within `ttl` of `now`
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > ttl
    }
}

/// Remote cursor state pushed to clients after a remap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCursor {
    pub user_id: UserId,
    pub cursor: CursorPosition,
    pub selection: Option<TextRange>,
}

/// Presence manager tracks all users in a session
#[derive(Debug, Clone, Default)]
pub struct PresenceManager {
    users: HashMap<UserId, CollaborationUser>,
}

impl PresenceManager {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Add or replace a participant
    pub fn join(&mut self, user: CollaborationUser) -> Option<CollaborationUser> {
        self.users.insert(user.id(), user)
    }

    /// Remove user
    pub fn leave(&mut self, user_id: &UserId) -> Option<CollaborationUser> {
        self.users.remove(user_id)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&CollaborationUser> {
        self.users.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &UserId) -> Option<&mut CollaborationUser> {
        self.users.get_mut(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Snapshot of every participant, ordered by name
    pub fn roster(&self) -> Vec<CollaborationUser> {
        let mut users: Vec<_> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.user.name.cmp(&b.user.name).then(a.id().cmp(&b.id())));
        users
    }

    pub fn active_user_ids(&self) -> Vec<UserId> {
        self.users
            .values()
            .filter(|u| u.is_active)
            .map(|u| u.id())
            .collect()
    }

    pub fn touch(&mut self, user_id: &UserId, now: DateTime<Utc>) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.touch(now);
        }
    }

    /// Update cursor position for a user
    pub fn update_cursor(&mut self, user_id: &UserId, cursor: CursorPosition) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.cursor = cursor;
        }
    }

    /// Update selection for a user
    pub fn update_selection(&mut self, user_id: &UserId, selection: Option<TextRange>) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.selection = selection;
        }
    }

    /// Carry every other participant's cursor and selection through an
    /// edit; returns the ones that moved
    pub fn remap_peers(&mut self, author: &UserId, diff: &DiffResult) -> Vec<RemoteCursor> {
        let mut moved = Vec::new();
        for (id, user) in self.users.iter_mut() {
            if id == author {
                continue;
            }
            let cursor = remap_cursor(&user.cursor, diff);
            let selection = user
                .selection
                .map(|range| remap_range(&range, diff))
                .filter(|range| !range.is_empty());
            if cursor != user.cursor || selection != user.selection {
                user.cursor = cursor;
                user.selection = selection;
                moved.push(RemoteCursor {
                    user_id: *id,
                    cursor,
                    selection,
                });
            }
        }
        moved.sort_by_key(|c| c.user_id);
        moved
    }

    /// Drop users silent for longer than `ttl`
    pub fn expire(&mut self, ttl: chrono::Duration, now: DateTime<Utc>) -> Vec<CollaborationUser> {
        let expired: Vec<UserId> = self
            .users
            .values()
            .filter(|u| u.is_expired(ttl, now))
            .map(|u| u.id())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.users.remove(&id))
            .collect()
    }
}
