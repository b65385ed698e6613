/// History, branching and merge behaviour of the version store
use proptest::prelude::*;
use versioning::*;

const V1: &str = "Jane Doe\nSummary: backend engineer\nExperience\nAcme Corp 2019-2024\n";
const V2: &str = "Jane Doe\nSummary: backend engineer with 5 years\nExperience\nAcme Corp 2019-2024\n";

fn seeded() -> (VersionStore, VersionId) {
    let mut store = VersionStore::default();
    store
        .create_version(V1, VersionOptions::new("alice", "first draft"))
        .unwrap();
    let v2 = store
        .create_version(V2, VersionOptions::new("alice", "summary"))
        .unwrap();
    (store, v2.id)
}

#[test]
fn divergent_summaries_conflict() {
    let (mut store, v2) = seeded();
    store.create_branch(v2, "tech-focus", "alice").unwrap();

    store
        .create_version(
            &V2.replace("with 5 years", "leading platform teams"),
            VersionOptions::new("alice", "main summary"),
        )
        .unwrap();
    store
        .create_version(
            &V2.replace("with 5 years", "specialising in Rust"),
            VersionOptions::new("bob", "tech summary").on_branch("tech-focus"),
        )
        .unwrap();

    let main_head = store.head("main").unwrap().id;
    let before = store.len();

    let result = store.merge_branch("tech-focus", "main", "alice").unwrap();
    assert!(result.merged.is_none());
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.base_version_id, Some(v2));
    assert!(result.merge_version_id.is_none());

    assert_eq!(store.len(), before);
    assert_eq!(store.head("main").unwrap().id, main_head);
}

#[test]
fn disjoint_branch_edits_merge_in_either_direction() {
    for (source, target) in [("tech-focus", "main"), ("main", "tech-focus")] {
        let (mut store, v2) = seeded();
        store.create_branch(v2, "tech-focus", "alice").unwrap();

        store
            .create_version(
                &V2.replace("Jane Doe", "Jane A. Doe"),
                VersionOptions::new("alice", "name"),
            )
            .unwrap();
        store
            .create_version(
                &V2.replace("2019-2024", "2019-present"),
                VersionOptions::new("bob", "dates").on_branch("tech-focus"),
            )
            .unwrap();

        let source_head = store.head(source).unwrap().id;
        let target_head = store.head(target).unwrap().id;

        let result = store.merge_branch(source, target, "alice").unwrap();
        assert!(result.is_clean());

        let merged = result.merged.unwrap();
        assert!(merged.contains("Jane A. Doe"));
        assert!(merged.contains("2019-present"));

        let merge_id = result.merge_version_id.unwrap();
        let entry = store.version(merge_id).unwrap();
        assert_eq!(entry.content, merged);
        assert_eq!(entry.branch, target);
        assert_eq!(entry.parent_version_id, Some(target_head));
        assert_eq!(entry.merged_from, Some(source_head));
        assert!(entry.tags.contains("merge"));
        assert_eq!(store.head(target).unwrap().id, merge_id);
        assert!(store.is_ancestor(source_head, merge_id));
    }
}

#[test]
fn merge_of_unchanged_branch_takes_target() {
    let (mut store, v2) = seeded();
    store.create_branch(v2, "tech-focus", "alice").unwrap();
    let v3 = store
        .create_version(&format!("{V2}Skills\n"), VersionOptions::new("alice", "skills"))
        .unwrap();

    let result = store.merge_branch("tech-focus", "main", "alice").unwrap();
    assert_eq!(result.merged.as_deref(), Some(v3.content.as_str()));
    assert!(result.merge_version_id.is_none());
    assert_eq!(store.head("main").unwrap().id, v3.id);
}

#[test]
fn switching_branch_redirects_new_versions() {
    let (mut store, v2) = seeded();
    store.create_branch(v2, "tech-focus", "alice").unwrap();
    store.switch_branch("tech-focus").unwrap();
    assert_eq!(store.current_branch(), "tech-focus");
    assert!(store.branch("tech-focus").unwrap().is_active);
    assert!(!store.branch("main").unwrap().is_active);

    let v3 = store
        .create_version(V1, VersionOptions::new("alice", "revert summary"))
        .unwrap();
    assert_eq!(v3.branch, "tech-focus");
    assert_eq!(v3.parent_version_id, Some(v2));
    assert_eq!(store.head("main").unwrap().id, v2);

    assert!(matches!(
        store.switch_branch("nope"),
        Err(VersionError::NotFound(_))
    ));
}

#[test]
fn restore_outside_branch_keeps_branch_lineage() {
    let (mut store, v2) = seeded();
    let v1 = VersionId(1);
    store.create_branch(v2, "tech-focus", "alice").unwrap();
    store.switch_branch("tech-focus").unwrap();

    store.restore(v1).unwrap();
    let v3 = store
        .create_version("draft", VersionOptions::new("alice", "draft"))
        .unwrap();
    assert_eq!(v3.parent_version_id, Some(v2));
}

fn main_ids(store: &VersionStore) -> Vec<VersionId> {
    store
        .list_versions(&VersionFilter::branch("main"))
        .iter()
        .map(|v| v.id)
        .collect()
}

fn fork_point_reaches_head(store: &VersionStore, branch: &Branch) -> bool {
    match branch.created_from {
        None => true,
        Some(from) => {
            store.version(from).is_ok()
                && (from == branch.head_version_id || store.is_ancestor(from, branch.head_version_id))
        }
    }
}

#[test]
fn eviction_spares_heads_of_other_branches() {
    let mut store = VersionStore::new(VersionStoreConfig {
        max_versions: 3,
        enable_branching: true,
    });
    store.create_version("v1", VersionOptions::new("alice", "1")).unwrap();
    let v2 = store.create_version("v2", VersionOptions::new("alice", "2")).unwrap();
    store.create_branch(v2.id, "tech-focus", "alice").unwrap();

    for i in 3..8 {
        store
            .create_version(&format!("v{i}"), VersionOptions::new("alice", "more"))
            .unwrap();
    }

    let ids = main_ids(&store);
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&v2.id));
    assert_eq!(store.head("tech-focus").unwrap().id, v2.id);
    assert_eq!(ids[0], store.head("main").unwrap().id);
}

#[test]
fn evicting_a_fork_point_keeps_branch_reachable() {
    let mut store = VersionStore::new(VersionStoreConfig {
        max_versions: 3,
        enable_branching: true,
    });
    store.create_version("v1", VersionOptions::new("alice", "1")).unwrap();
    let v2 = store.create_version("v2", VersionOptions::new("alice", "2")).unwrap();
    store.create_branch(v2.id, "tech-focus", "alice").unwrap();
    let tech = store
        .create_version("v2 tech", VersionOptions::new("bob", "tech").on_branch("tech-focus"))
        .unwrap();

    for i in 4..9 {
        store
            .create_version(&format!("v{i}"), VersionOptions::new("alice", "more"))
            .unwrap();
    }

    assert!(store.version(v2.id).is_err());
    assert_eq!(main_ids(&store).len(), 3);

    let branch = store.branch("tech-focus").unwrap();
    assert_eq!(branch.head_version_id, tech.id);
    assert_ne!(branch.created_from, Some(v2.id));
    assert!(fork_point_reaches_head(&store, branch));
    assert!(store.version(tech.id).unwrap().verify());
}

#[derive(Debug, Clone, Copy)]
enum LineEdit {
    Keep,
    /// Target rewrites the line, or deletes it when `true`
    Target(bool),
    Source(bool),
}

fn line_edit() -> impl Strategy<Value = LineEdit> {
    prop_oneof![
        3 => Just(LineEdit::Keep),
        1 => any::<bool>().prop_map(LineEdit::Target),
        1 => any::<bool>().prop_map(LineEdit::Source),
    ]
}

/// Base, target, source, and the text with both sides' edits applied
fn disjoint_edits(edits: &[LineEdit]) -> (String, String, String, String) {
    let (mut base, mut target, mut source, mut both) =
        (String::new(), String::new(), String::new(), String::new());

    for (i, edit) in edits.iter().enumerate() {
        let original = format!("base line {i}\n");
        base.push_str(&original);
        match *edit {
            LineEdit::Keep => {
                target.push_str(&original);
                source.push_str(&original);
                both.push_str(&original);
            }
            LineEdit::Target(delete) => {
                let line = if delete { String::new() } else { format!("target line {i}\n") };
                target.push_str(&line);
                source.push_str(&original);
                both.push_str(&line);
            }
            LineEdit::Source(delete) => {
                let line = if delete { String::new() } else { format!("source line {i}\n") };
                target.push_str(&original);
                source.push_str(&line);
                both.push_str(&line);
            }
        }
    }
    (base, target, source, both)
}

#[derive(Debug, Clone)]
enum Action {
    Save(String),
    Branch(u8),
    Switch(u8),
    Restore(u8),
    Delete(u8),
    Merge(u8),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => "[a-c\n]{0,8}".prop_map(Action::Save),
        1 => any::<u8>().prop_map(Action::Branch),
        1 => any::<u8>().prop_map(Action::Switch),
        1 => any::<u8>().prop_map(Action::Restore),
        1 => any::<u8>().prop_map(Action::Delete),
        1 => any::<u8>().prop_map(Action::Merge),
    ]
}

fn pick<T: Clone>(items: &[T], n: u8) -> Option<T> {
    (!items.is_empty()).then(|| items[n as usize % items.len()].clone())
}

proptest! {
    #[test]
    fn history_stays_acyclic(actions in prop::collection::vec(action(), 1..40)) {
        let mut store = VersionStore::new(VersionStoreConfig { max_versions: 6, enable_branching: true });
        store.create_version("root", VersionOptions::new("p", "root")).unwrap();

        for (i, action) in actions.into_iter().enumerate() {
            let ids: Vec<VersionId> = store.list_versions(&VersionFilter::default()).iter().map(|v| v.id).collect();
            let names: Vec<String> = store.branches().map(|b| b.name.clone()).collect();
            match action {
                Action::Save(text) => {
                    store.create_version(&text, VersionOptions::new("p", "save")).unwrap();
                }
                Action::Branch(n) => {
                    if let Some(from) = pick(&ids, n) {
                        let _ = store.create_branch(from, &format!("b{i}"), "p");
                    }
                }
                Action::Switch(n) => {
                    if let Some(name) = pick(&names, n) {
                        store.switch_branch(&name).unwrap();
                    }
                }
                Action::Restore(n) => {
                    if let Some(id) = pick(&ids, n) {
                        store.restore(id).unwrap();
                    }
                }
                Action::Delete(n) => {
                    if let Some(id) = pick(&ids, n) {
                        let _ = store.delete_version(id);
                    }
                }
                Action::Merge(n) => {
                    if let Some(source) = pick(&names, n) {
                        let target = store.current_branch().to_string();
                        if source != target {
                            store.merge_branch(&source, &target, "p").unwrap();
                        }
                    }
                }
            }
        }

        for entry in store.list_versions(&VersionFilter::default()) {
            for parent in entry.parents() {
                prop_assert!(parent < entry.id);
                prop_assert!(store.version(parent).is_ok());
            }
            prop_assert!(!store.ancestors(entry.id).contains(&entry.id));
            prop_assert!(entry.verify());
        }
        for branch in store.branches() {
            prop_assert!(store.version(branch.head_version_id).is_ok());
            prop_assert!(fork_point_reaches_head(&store, branch));
        }
    }

    #[test]
    fn disjoint_line_edits_merge_to_both_applied(edits in prop::collection::vec(line_edit(), 1..16)) {
        let (base, target, source, both) = disjoint_edits(&edits);

        let (merged, conflicts) = three_way_merge(&base, &target, &source);
        prop_assert!(conflicts.is_empty());
        prop_assert_eq!(merged.as_deref(), Some(both.as_str()));

        let (swapped, conflicts) = three_way_merge(&base, &source, &target);
        prop_assert!(conflicts.is_empty());
        prop_assert_eq!(swapped.as_deref(), Some(both.as_str()));
    }

    #[test]
    fn disjoint_branch_merge_records_both_applied(edits in prop::collection::vec(line_edit(), 1..12)) {
        let (base, target, source, both) = disjoint_edits(&edits);

        let mut store = VersionStore::default();
        let root = store.create_version(&base, VersionOptions::new("p", "base")).unwrap();
        store.create_branch(root.id, "tailored", "p").unwrap();
        store.create_version(&target, VersionOptions::new("p", "main edit")).unwrap();
        store
            .create_version(&source, VersionOptions::new("p", "tailored edit").on_branch("tailored"))
            .unwrap();

        let result = store.merge_branch("tailored", "main", "p").unwrap();
        prop_assert!(result.is_clean());
        prop_assert_eq!(result.merged.as_deref(), Some(both.as_str()));
        prop_assert_eq!(store.head("main").unwrap().content.as_str(), both.as_str());
    }
}
