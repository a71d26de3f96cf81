// Chat info panel: member list, profile search, add/remove members.

use super::*;
use crate::reconcile;
use crate::state::{Member, MembershipPanel};

impl AppCore {
    pub(super) fn open_chat_info(&mut self) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        self.state.membership = Some(MembershipPanel::default());
        self.emit_state();

        let service = self.service.clone();
        self.spawn_task(async move {
            let result = service
                .fetch_chat_members(&chat_id)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MembersFetched { chat_id, result }
        });
    }

    pub(super) fn close_chat_info(&mut self) {
        if self.state.membership.take().is_some() {
            self.state.busy.searching_profiles = false;
            self.emit_state();
        }
    }

    pub(super) fn apply_members_fetched(&mut self, result: Result<Vec<Member>, String>) {
        let Some(panel) = self.state.membership.as_mut() else {
            return;
        };
        match result {
            Ok(members) => {
                panel.members = members;
                self.emit_state();
            }
            Err(e) => {
                tracing::error!(err = %e, "failed to fetch chat members");
                self.toast(format!("Failed to load members: {e}"));
            }
        }
    }

    pub(super) fn search_profiles(&mut self, query: String) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        let Some(panel) = self.state.membership.as_mut() else {
            return;
        };
        panel.search_query = query.clone();
        if query.trim().is_empty() {
            panel.search_results.clear();
            self.state.busy.searching_profiles = false;
            self.emit_state();
            return;
        }
        self.state.busy.searching_profiles = true;
        self.emit_state();

        let service = self.service.clone();
        self.spawn_task(async move {
            let result = service
                .search_profiles(&query)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::ProfilesSearched {
                chat_id,
                query,
                result,
            }
        });
    }

    pub(super) fn apply_profiles_searched(
        &mut self,
        query: &str,
        result: Result<Vec<Member>, String>,
    ) {
        let Some(panel) = self.state.membership.as_mut() else {
            return;
        };
        if panel.search_query != query {
            tracing::debug!(query, "dropping results for superseded search");
            return;
        }
        self.state.busy.searching_profiles = false;
        match result {
            Ok(profiles) => {
                panel.search_results = reconcile::exclude_members(profiles, &panel.members);
                self.emit_state();
            }
            Err(e) => {
                tracing::error!(query, err = %e, "failed to search profiles");
                self.toast(format!("Profile search failed: {e}"));
            }
        }
    }

    pub(super) fn toggle_profile_selection(&mut self, username: &str) {
        let Some(panel) = self.state.membership.as_mut() else {
            return;
        };
        let profile = panel
            .selected
            .iter()
            .chain(panel.search_results.iter())
            .find(|m| m.username == username)
            .cloned();
        let Some(profile) = profile else {
            tracing::debug!(username, "selection toggled for unknown profile");
            return;
        };
        reconcile::toggle_selection(&mut panel.selected, profile);
        self.emit_state();
    }

    pub(super) fn add_selected_members(&mut self) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        let Some(panel) = self.state.membership.as_ref() else {
            return;
        };
        if panel.selected.is_empty() {
            tracing::error!("select at least one user before adding members");
            return;
        }
        let added = panel.selected.clone();

        let service = self.service.clone();
        self.spawn_task(async move {
            let usernames: Vec<String> = added.iter().map(|m| m.username.clone()).collect();
            let result = service
                .add_chat_members(&chat_id, &usernames)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MembersAdded {
                chat_id,
                added,
                result,
            }
        });
    }

    pub(super) fn apply_members_added(
        &mut self,
        chat_id: &str,
        added: Vec<Member>,
        result: Result<(), String>,
    ) {
        if let Err(e) = result {
            tracing::error!(%chat_id, err = %e, "failed to add chat members");
            self.toast(format!("Failed to add members: {e}"));
            return;
        }
        tracing::info!(%chat_id, count = added.len(), "chat members added");
        if let Some(panel) = self.state.membership.as_mut() {
            panel
                .selected
                .retain(|s| !added.iter().any(|a| a.username == s.username));
            panel
                .search_results
                .retain(|r| !added.iter().any(|a| a.username == r.username));
            reconcile::append_members(&mut panel.members, added);
            self.emit_state();
        }
        self.refresh_chat_info(chat_id);
    }

    pub(super) fn remove_member(&mut self, username: String) {
        let Some(chat_id) = self.active_chat_id() else {
            return;
        };
        let service = self.service.clone();
        self.spawn_task(async move {
            let result = service
                .delete_chat_member(&chat_id, &username)
                .await
                .map_err(|e| e.to_string());
            InternalEvent::MemberRemoved {
                chat_id,
                username,
                result,
            }
        });
    }

    pub(super) fn apply_member_removed(
        &mut self,
        chat_id: &str,
        username: &str,
        result: Result<(), String>,
    ) {
        if let Err(e) = result {
            tracing::error!(%chat_id, username, err = %e, "failed to delete chat member");
            self.toast(format!("Failed to remove member: {e}"));
            return;
        }
        if let Some(panel) = self.state.membership.as_mut() {
            reconcile::remove_member(&mut panel.members, username);
            self.emit_state();
        }
        self.refresh_chat_info(chat_id);
    }
}
