//! Queue folding rules.
//!
//! Requests for the same kind fold into an existing queued item instead of
//! creating a new one: a selected request joins the queued full item of its
//! kind if there is one, otherwise the queued selected item, otherwise a new
//! item is appended. These functions only touch [`QueueState`]; the engine
//! applies them inside a state-store update.

use docgraph_core::{NameSet, QueueState, SyncItem, SyncKind, SyncScope, SyncSettings};

/// Fold `name` into the queue for `kind`. Returns the id of the item that holds it.
pub fn merge_selected(state: &mut QueueState, kind: SyncKind, name: &str) -> String {
    let existing = state
        .queue
        .iter()
        .position(|item| item.kind == kind && item.is_full())
        .or_else(|| state.queue.iter().position(|item| item.kind == kind && !item.is_full()));

    match existing {
        Some(index) => {
            let item = &mut state.queue[index];
            item.names.insert(name);
            item.id.clone()
        }
        None => {
            let item = SyncItem::new(kind, SyncScope::Selected, NameSet::single(name));
            let id = item.id.clone();
            state.queue.push(item);
            id
        }
    }
}

/// Queue a full sync of `kind` over `enabled`, or union new names into the queued one.
///
/// Returns `None` when there is nothing enabled to sync.
pub fn merge_full(state: &mut QueueState, kind: SyncKind, enabled: &NameSet) -> Option<String> {
    if let Some(item) = state.queue.iter_mut().find(|item| item.kind == kind && item.is_full()) {
        item.names.extend_from(enabled);
        return Some(item.id.clone());
    }
    if enabled.is_empty() {
        return None;
    }
    let item = SyncItem::new(kind, SyncScope::Full, enabled.clone());
    let id = item.id.clone();
    state.queue.push(item);
    Some(id)
}

/// Add `name` to the executing full item and any queued full item of `kind`.
///
/// Returns `true` if any item changed.
pub fn extend_active_full(state: &mut QueueState, kind: SyncKind, name: &str) -> bool {
    let mut changed = false;
    if let Some(current) = state.current.as_mut().filter(|c| c.kind == kind && c.is_full()) {
        changed |= current.names.insert(name);
    }
    for item in state.queue.iter_mut().filter(|item| item.kind == kind && item.is_full()) {
        changed |= item.names.insert(name);
    }
    changed
}

pub fn remove_item(state: &mut QueueState, id: &str) -> bool {
    let before = state.queue.len();
    state.queue.retain(|item| item.id != id);
    state.queue.len() != before
}

/// Take the queue head and make it the current, processing item.
pub fn pop_next(state: &mut QueueState) -> Option<SyncItem> {
    if state.queue.is_empty() {
        return None;
    }
    let mut item = state.queue.remove(0);
    item.start();
    state.current = Some(item.clone());
    Some(item)
}

/// Whether an item's names cover every enabled mapping of its kind.
///
/// Scope is stored on the item; this is only a display hint.
pub fn covers_all_enabled(item: &SyncItem, settings: &SyncSettings) -> bool {
    let enabled = settings.enabled_names(item.kind);
    !enabled.is_empty() && item.names.is_superset(&enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgraph_core::{PropertyMapping, PropertyType, SyncStatus};
    use std::collections::BTreeSet;

    fn names(list: &[&str]) -> NameSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_same_name_twice_yields_one_item() {
        let mut state = QueueState::default();
        let first = merge_selected(&mut state, SyncKind::NodeProperty, "Status");
        let second = merge_selected(&mut state, SyncKind::NodeProperty, "Status");

        assert_eq!(first, second);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].names.to_vec(), vec!["Status"]);
        assert_eq!(state.queue[0].scope, SyncScope::Selected);
    }

    #[test]
    fn test_kinds_do_not_fold_together() {
        let mut state = QueueState::default();
        merge_selected(&mut state, SyncKind::NodeProperty, "Status");
        merge_selected(&mut state, SyncKind::Label, "DONE");
        merge_selected(&mut state, SyncKind::NodeProperty, "Owner");

        assert_eq!(state.queue.len(), 2);
        assert_eq!(state.queue[0].names.to_vec(), vec!["Owner", "Status"]);
    }

    #[test]
    fn test_full_item_absorbs_selected_requests() {
        let mut state = QueueState::default();
        merge_selected(&mut state, SyncKind::NodeProperty, "Status");
        let full = merge_full(&mut state, SyncKind::NodeProperty, &names(&["Status", "Owner"])).unwrap();
        let id = merge_selected(&mut state, SyncKind::NodeProperty, "Due");

        assert_eq!(id, full);
        assert_eq!(state.queue.len(), 2);
        assert_eq!(state.queue[0].names.to_vec(), vec!["Status"]);
        assert_eq!(state.queue[1].names.to_vec(), vec!["Due", "Owner", "Status"]);
    }

    #[test]
    fn test_full_is_created_once_per_kind() {
        let mut state = QueueState::default();
        let a = merge_full(&mut state, SyncKind::Label, &names(&["DONE"]));
        let b = merge_full(&mut state, SyncKind::Label, &names(&["DONE", "WIP"]));

        assert_eq!(a, b);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].names.len(), 2);
        assert!(merge_full(&mut state, SyncKind::Relationship, &NameSet::new()).is_none());
    }

    #[test]
    fn test_extend_active_full_touches_current_and_queued() {
        let mut state = QueueState::default();
        merge_full(&mut state, SyncKind::Label, &names(&["DONE"]));
        pop_next(&mut state).unwrap();
        merge_full(&mut state, SyncKind::Label, &names(&["DONE"]));

        assert!(extend_active_full(&mut state, SyncKind::Label, "WIP"));
        assert!(state.current.as_ref().unwrap().names.contains("WIP"));
        assert!(state.queue[0].names.contains("WIP"));
        assert!(!extend_active_full(&mut state, SyncKind::Label, "WIP"));
        assert!(!extend_active_full(&mut state, SyncKind::NodeProperty, "Status"));
    }

    #[test]
    fn test_pop_next_sets_single_current() {
        let mut state = QueueState::default();
        merge_selected(&mut state, SyncKind::NodeProperty, "Status");
        merge_selected(&mut state, SyncKind::Label, "DONE");

        let item = pop_next(&mut state).unwrap();
        assert_eq!(item.status, SyncStatus::Processing);
        assert_eq!(state.current.as_ref().unwrap().id, item.id);
        assert_eq!(state.queue.len(), 1);

        let ids: BTreeSet<_> = state.queue.iter().map(|i| i.id.clone()).collect();
        assert!(!ids.contains(&item.id));
    }

    #[test]
    fn test_remove_item() {
        let mut state = QueueState::default();
        let id = merge_selected(&mut state, SyncKind::NodeProperty, "Status");
        assert!(remove_item(&mut state, &id));
        assert!(!remove_item(&mut state, &id));
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_covers_all_enabled() {
        let mut settings = SyncSettings::default();
        settings.properties.insert("Status".into(), PropertyMapping::new(PropertyType::String));
        settings.properties.insert("Owner".into(), PropertyMapping::new(PropertyType::String));

        let partial = SyncItem::new(SyncKind::NodeProperty, SyncScope::Selected, names(&["Status"]));
        let whole = SyncItem::new(SyncKind::NodeProperty, SyncScope::Selected, names(&["Owner", "Status"]));
        assert!(!covers_all_enabled(&partial, &settings));
        assert!(covers_all_enabled(&whole, &settings));
    }
}
