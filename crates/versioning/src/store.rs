/// The version store: sole owner of version and branch lifecycle
use chrono::Utc;
use document::{diff, DiffResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::{
    checksum, derive_changes, three_way_merge, Branch, MergeResult, Result, VersionEntry,
    VersionError, VersionId, VersionOptions,
};

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStoreConfig {
    /// Retention cap per branch
    pub max_versions: usize,
    pub enable_branching: bool,
}

impl Default for VersionStoreConfig {
    fn default() -> Self {
        Self {
            max_versions: 50,
            enable_branching: true,
        }
    }
}

/// Query for `VersionStore::list_versions`
#[derive(Debug, Clone)]
pub struct VersionFilter {
    pub branch: Option<String>,
    pub author: Option<String>,
    pub tag: Option<String>,
    pub milestones_only: bool,
    pub include_auto_saves: bool,
    pub limit: Option<usize>,
}

impl Default for VersionFilter {
    fn default() -> Self {
        Self {
            branch: None,
            author: None,
            tag: None,
            milestones_only: false,
            include_auto_saves: true,
            limit: None,
        }
    }
}

impl VersionFilter {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            branch: Some(name.into()),
            ..Default::default()
        }
    }

    fn matches(&self, entry: &VersionEntry) -> bool {
        self.branch.as_ref().map_or(true, |b| &entry.branch == b)
            && self.author.as_ref().map_or(true, |a| &entry.author == a)
            && self.tag.as_ref().map_or(true, |t| entry.tags.contains(t))
            && (!self.milestones_only || entry.is_milestone)
            && (self.include_auto_saves || !entry.is_auto_save)
    }
}

/// Version DAG plus branch pointers
///
/// Versions are keyed by id, which doubles as creation order. Every parent
/// exists before its child is inserted, so the graph stays acyclic.
#[derive(Debug, Clone)]
pub struct VersionStore {
    pub(crate) config: VersionStoreConfig,
    pub(crate) versions: BTreeMap<VersionId, VersionEntry>,
    pub(crate) branches: BTreeMap<String, Branch>,
    pub(crate) current_branch: String,
    pub(crate) next_id: u64,

    /// Draft provenance set by `restore`
    pub(crate) restored: Option<VersionId>,
}

impl VersionStore {
    pub fn new(config: VersionStoreConfig) -> Self {
        Self {
            config,
            versions: BTreeMap::new(),
            branches: BTreeMap::new(),
            current_branch: DEFAULT_BRANCH.to_string(),
            next_id: 1,
            restored: None,
        }
    }

    pub fn config(&self) -> &VersionStoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn version(&self, id: VersionId) -> Result<&VersionEntry> {
        self.versions
            .get(&id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))
    }

    pub fn branch(&self, name: &str) -> Result<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| VersionError::NotFound(format!("branch {name}")))
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    /// Head version of a branch
    pub fn head(&self, branch: &str) -> Option<&VersionEntry> {
        self.branches
            .get(branch)
            .and_then(|b| self.versions.get(&b.head_version_id))
    }

    /// Checksum of the current branch head, if any
    pub fn head_checksum(&self) -> Option<&str> {
        self.head(&self.current_branch).map(|v| v.checksum.as_str())
    }

    /// Snapshot `content` on a branch, advancing its head
    pub fn create_version(&mut self, content: &str, options: VersionOptions) -> Result<VersionEntry> {
        let branch_name = options
            .branch
            .clone()
            .unwrap_or_else(|| self.current_branch.clone());

        let pointers = self
            .branches
            .get(&branch_name)
            .map(|b| (b.head_version_id, b.created_from));

        let parent = match pointers {
            Some((head, created_from)) => {
                let mut parent = head;
                if branch_name == self.current_branch {
                    if let Some(restored) = self.restored.take() {
                        let descends = created_from
                            .map_or(true, |from| self.is_ancestor_or_self(from, restored));
                        if descends {
                            parent = restored;
                        } else {
                            debug!(
                                "Restored {} is outside branch {}; parenting on head",
                                restored, branch_name
                            );
                        }
                    }
                }
                Some(parent)
            }
            None if self.branches.is_empty() => None,
            None => return Err(VersionError::NotFound(format!("branch {branch_name}"))),
        };

        let entry = self.insert_version(content, options, branch_name.clone(), parent, None)?;
        self.evict(&branch_name);
        Ok(entry)
    }

    /// Return a stored snapshot; history is untouched, but the next version
    /// on the current branch is parented on the restored one
    pub fn restore(&mut self, id: VersionId) -> Result<String> {
        let content = self.version(id)?.content.clone();
        self.restored = Some(id);
        info!("Restored {}", id);
        Ok(content)
    }

    /// Diff from version `a` to version `b`
    pub fn compare(&self, a: VersionId, b: VersionId) -> Result<DiffResult> {
        let before = &self.version(a)?.content;
        let after = &self.version(b)?.content;
        Ok(diff(before, after))
    }

    pub fn create_branch(
        &mut self,
        from: VersionId,
        name: &str,
        created_by: impl Into<String>,
    ) -> Result<Branch> {
        if !self.config.enable_branching {
            return Err(VersionError::BranchingDisabled);
        }
        if self.branches.contains_key(name) {
            return Err(VersionError::DuplicateBranch(name.to_string()));
        }
        self.version(from)?;

        let branch = Branch {
            name: name.to_string(),
            head_version_id: from,
            created_from: Some(from),
            created_by: created_by.into(),
            created_at: Utc::now(),
            is_active: false,
        };
        self.branches.insert(name.to_string(), branch.clone());
        info!("Created branch {} from {}", name, from);
        Ok(branch)
    }

    /// Make `name` the branch new versions go to by default
    pub fn switch_branch(&mut self, name: &str) -> Result<()> {
        self.branch(name)?;
        for branch in self.branches.values_mut() {
            branch.is_active = branch.name == name;
        }
        self.current_branch = name.to_string();
        self.restored = None;
        Ok(())
    }

    /// Three-way merge of `source` into `target`
    ///
    /// A clean merge records a merge version on `target`; any conflict
    /// leaves history untouched and returns the conflicting regions.
    pub fn merge_branch(&mut self, source: &str, target: &str, author: &str) -> Result<MergeResult> {
        if !self.config.enable_branching {
            return Err(VersionError::BranchingDisabled);
        }
        if source == target {
            return Err(VersionError::InvalidOp(format!("cannot merge {source} into itself")));
        }

        let source_head = self.branch(source)?.head_version_id;
        let target_head = self.branch(target)?.head_version_id;
        let base_id = self.common_ancestor(source_head, target_head);

        if self.is_ancestor_or_self(source_head, target_head) {
            debug!("{} already contains {}", target, source);
            return Ok(MergeResult {
                merged: Some(self.version(target_head)?.content.clone()),
                conflicts: Vec::new(),
                merge_version_id: None,
                base_version_id: base_id,
            });
        }

        let base = match base_id {
            Some(id) => self.version(id)?.content.clone(),
            None => String::new(),
        };
        let target_content = self.version(target_head)?.content.clone();
        let source_content = self.version(source_head)?.content.clone();

        let (merged, conflicts) = three_way_merge(&base, &target_content, &source_content);

        let Some(merged) = merged else {
            warn!(
                "Merge {} -> {} has {} conflict(s)",
                source,
                target,
                conflicts.len()
            );
            return Ok(MergeResult {
                merged: None,
                conflicts,
                merge_version_id: None,
                base_version_id: base_id,
            });
        };

        let mut options = VersionOptions::new(author, format!("Merge {source} into {target}"));
        options.description = Some(format!("Merged {source_head} into {target_head}"));
        let mut entry = self.insert_version(
            &merged,
            options,
            target.to_string(),
            Some(target_head),
            Some(source_head),
        )?;
        entry.tags.insert("merge".to_string());
        self.add_tag(entry.id, "merge")?;
        self.evict(target);

        info!("Merged {} into {} as {}", source, target, entry.id);
        Ok(MergeResult {
            merged: Some(merged),
            conflicts,
            merge_version_id: Some(entry.id),
            base_version_id: base_id,
        })
    }

    /// Remove a version, re-linking its children to its parent
    pub fn delete_version(&mut self, id: VersionId) -> Result<VersionEntry> {
        let entry = self.version(id)?;
        if let Some(branch) = self.branches.values().find(|b| b.head_version_id == id) {
            return Err(VersionError::ProtectedVersion {
                id,
                reason: format!("head of branch {}", branch.name),
            });
        }
        if entry.is_milestone {
            return Err(VersionError::ProtectedVersion {
                id,
                reason: "milestone".to_string(),
            });
        }
        self.remove_unchecked(id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))
    }

    pub fn add_tag(&mut self, id: VersionId, tag: &str) -> Result<()> {
        self.version_mut(id)?.tags.insert(tag.to_string());
        Ok(())
    }

    pub fn remove_tag(&mut self, id: VersionId, tag: &str) -> Result<bool> {
        Ok(self.version_mut(id)?.tags.remove(tag))
    }

    /// Milestones are exempt from eviction and deletion
    pub fn set_milestone(&mut self, id: VersionId, milestone: bool) -> Result<()> {
        self.version_mut(id)?.is_milestone = milestone;
        Ok(())
    }

    /// Versions matching `filter`, newest first
    pub fn list_versions(&self, filter: &VersionFilter) -> Vec<&VersionEntry> {
        let matching = self.versions.values().rev().filter(|v| filter.matches(v));
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Every ancestor of `id` (both parent links), nearest first
    pub fn ancestors(&self, id: VersionId) -> Vec<VersionId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<VersionId> = self
            .versions
            .get(&id)
            .map(|v| v.parents().collect())
            .unwrap_or_default();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            order.push(next);
            if let Some(entry) = self.versions.get(&next) {
                queue.extend(entry.parents());
            }
        }
        order
    }

    pub fn is_ancestor(&self, ancestor: VersionId, descendant: VersionId) -> bool {
        self.ancestors(descendant).contains(&ancestor)
    }

    fn is_ancestor_or_self(&self, ancestor: VersionId, descendant: VersionId) -> bool {
        ancestor == descendant || self.is_ancestor(ancestor, descendant)
    }

    /// Nearest version reachable from both heads
    pub fn common_ancestor(&self, a: VersionId, b: VersionId) -> Option<VersionId> {
        let mut from_a: BTreeSet<VersionId> = self.ancestors(a).into_iter().collect();
        from_a.insert(a);

        std::iter::once(b)
            .chain(self.ancestors(b))
            .find(|candidate| from_a.contains(candidate))
    }

    /// Recompute a version's checksum against its content
    pub fn verify(&self, id: VersionId) -> Result<bool> {
        Ok(self.version(id)?.verify())
    }

    fn version_mut(&mut self, id: VersionId) -> Result<&mut VersionEntry> {
        self.versions
            .get_mut(&id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))
    }

    fn insert_version(
        &mut self,
        content: &str,
        options: VersionOptions,
        branch_name: String,
        parent: Option<VersionId>,
        merged_from: Option<VersionId>,
    ) -> Result<VersionEntry> {
        let parent_content = match parent {
            Some(id) => self.version(id)?.content.as_str(),
            None => "",
        };
        let changes = derive_changes(&diff(parent_content, content));

        let id = VersionId(self.next_id);
        self.next_id += 1;

        let entry = VersionEntry {
            id,
            content: content.to_string(),
            timestamp: Utc::now(),
            author: options.author,
            title: options.title,
            description: options.description,
            changes,
            branch: branch_name.clone(),
            parent_version_id: parent,
            merged_from,
            is_auto_save: options.is_auto_save,
            is_milestone: options.is_milestone,
            tags: BTreeSet::new(),
            checksum: checksum(content),
        };
        self.versions.insert(id, entry.clone());

        match self.branches.get_mut(&branch_name) {
            Some(branch) => branch.head_version_id = id,
            None => {
                self.branches.insert(
                    branch_name.clone(),
                    Branch {
                        name: branch_name.clone(),
                        head_version_id: id,
                        created_from: None,
                        created_by: entry.author.clone(),
                        created_at: entry.timestamp,
                        is_active: branch_name == self.current_branch,
                    },
                );
            }
        }

        info!(
            "Created {} on {} ({} change(s){})",
            id,
            branch_name,
            entry.changes.len(),
            if entry.is_auto_save { ", auto-save" } else { "" }
        );
        Ok(entry)
    }

    /// Drop the oldest unprotected versions of a branch beyond the cap;
    /// equal timestamps fall back to the lower id
    fn evict(&mut self, branch: &str) {
        loop {
            let count = self.versions.values().filter(|v| v.branch == branch).count();
            if count <= self.config.max_versions {
                return;
            }

            let heads: HashSet<VersionId> =
                self.branches.values().map(|b| b.head_version_id).collect();
            let victim = self
                .versions
                .values()
                .filter(|v| v.branch == branch && !v.is_milestone && !heads.contains(&v.id))
                .min_by_key(|v| (v.timestamp, v.id))
                .map(|v| v.id);

            match victim {
                Some(id) => {
                    debug!("Evicting {} from {}", id, branch);
                    self.remove_unchecked(id);
                }
                None => {
                    warn!(
                        "Branch {} exceeds {} versions but all are protected",
                        branch, self.config.max_versions
                    );
                    return;
                }
            }
        }
    }

    fn remove_unchecked(&mut self, id: VersionId) -> Option<VersionEntry> {
        let removed = self.versions.remove(&id)?;
        let grandparent = removed.parent_version_id;

        let children: Vec<VersionId> = self
            .versions
            .values()
            .filter(|v| v.parents().any(|p| p == id))
            .map(|v| v.id)
            .collect();

        for child in children {
            let Some(mut entry) = self.versions.remove(&child) else {
                continue;
            };
            if entry.parent_version_id == Some(id) {
                entry.parent_version_id = grandparent;
                let parent_content = grandparent
                    .and_then(|p| self.versions.get(&p))
                    .map(|p| p.content.as_str())
                    .unwrap_or("");
                entry.changes = derive_changes(&diff(parent_content, &entry.content));
            }
            if entry.merged_from == Some(id) {
                entry.merged_from = grandparent.filter(|g| Some(*g) != entry.parent_version_id);
            }
            self.versions.insert(child, entry);
        }

        for branch in self.branches.values_mut() {
            if branch.created_from == Some(id) {
                branch.created_from = grandparent;
            }
        }
        if self.restored == Some(id) {
            self.restored = None;
        }

        info!("Deleted {}", id);
        Some(removed)
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(VersionStoreConfig::default())
    }
}
