use std::collections::HashSet;

use models::{AccountRoleStore, RoleEdgeStore};

/// Resolves the transitive set of role ids held by an account.
///
/// Role edges may form cycles; the walk keeps an explicit stack and a
/// visited set, so a cycle is simply never revisited.
pub fn account_role_ids(
    account_roles: &AccountRoleStore,
    role_edges: &RoleEdgeStore,
    account_id: i64,
) -> HashSet<i64> {
    let mut visited = HashSet::new();
    let mut stack: Vec<i64> = account_roles
        .find_by_account(account_id)
        .into_iter()
        .map(|role| role.role_id)
        .collect();
    while let Some(role_id) = stack.pop() {
        if !visited.insert(role_id) {
            continue;
        }
        for edge in role_edges.find_by_role(role_id) {
            if !visited.contains(&edge.child_id) {
                stack.push(edge.child_id);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{AccountRole, RoleEdge};

    fn setup() -> (tempfile::TempDir, AccountRoleStore, RoleEdgeStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = db::Database::new_sqlite(dir.path().join("db.sqlite"));
        models::schema::create_tables(&db).unwrap();
        let account_roles = models::new_account_role_store(db.clone());
        let role_edges = models::new_role_edge_store(db);
        account_roles.init().unwrap();
        role_edges.init().unwrap();
        (dir, account_roles, role_edges)
    }

    #[test]
    fn test_account_roles_with_cycle() {
        let (_dir, account_roles, role_edges) = setup();
        let mut grant = AccountRole {
            account_id: 10,
            role_id: 1,
            ..Default::default()
        };
        account_roles.create(&mut grant).unwrap();
        // 1 -> 2 -> 3 -> 1 forms a cycle; 3 -> 4 hangs off it.
        for (role_id, child_id) in [(1, 2), (2, 3), (3, 1), (3, 4)] {
            let mut edge = RoleEdge {
                role_id,
                child_id,
                ..Default::default()
            };
            role_edges.create(&mut edge).unwrap();
        }
        account_roles.sync().unwrap();
        role_edges.sync().unwrap();

        let roles = account_role_ids(&account_roles, &role_edges, 10);
        assert_eq!(roles, HashSet::from([1, 2, 3, 4]));
        assert!(account_role_ids(&account_roles, &role_edges, 11).is_empty());
    }
}
