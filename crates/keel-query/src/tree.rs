//! Account hierarchy assembly.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use keel_core::error::KeelError;
use keel_core::records::Account;
use keel_store::StoreDb;

fn node_for(account: &Account) -> Value {
    json!({
        "account_id": account.account_id,
        "code": account.code,
        "name": account.name,
        "account_type": account.account_type.as_str(),
        "parent_account_id": account.parent_account_id,
        "metadata": serde_json::from_str::<Value>(&account.metadata).unwrap_or_else(|_| json!({})),
    })
}

/// Rows of the subtree under `root_account_id` (every account when absent)
/// ordered `(code, account_id)`.
fn subtree_rows(db: &StoreDb, root_account_id: Option<&str>) -> Result<Vec<Account>, KeelError> {
    let mut accounts = db.iter_accounts()?;
    accounts.sort_by(|a, b| {
        a.code
            .cmp(&b.code)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });

    let Some(root) = root_account_id else {
        return Ok(accounts);
    };

    // Expand the member set from the root until it stops growing.
    let mut members: BTreeSet<String> = BTreeSet::new();
    members.insert(root.to_string());
    loop {
        let before = members.len();
        for account in &accounts {
            if let Some(parent) = &account.parent_account_id {
                if members.contains(parent) {
                    members.insert(account.account_id.clone());
                }
            }
        }
        if members.len() == before {
            break;
        }
    }
    accounts.retain(|a| members.contains(&a.account_id));
    Ok(accounts)
}

fn build_node(
    rows: &[Account],
    children_of: &BTreeMap<String, Vec<usize>>,
    index: usize,
) -> Value {
    let mut node = node_for(&rows[index]);
    let children: Vec<Value> = children_of
        .get(&rows[index].account_id)
        .map(|indices| {
            indices
                .iter()
                .map(|&child| build_node(rows, children_of, child))
                .collect()
        })
        .unwrap_or_default();
    if let Some(obj) = node.as_object_mut() {
        obj.insert("children".into(), Value::Array(children));
    }
    node
}

/// Fetch subtree rows and link children to parents present in the same
/// result set. Roots are rows whose parent is missing from the fetch.
pub fn account_tree(db: &StoreDb, root_account_id: Option<&str>) -> Result<Value, KeelError> {
    let rows = subtree_rows(db, root_account_id)?;
    let in_set: BTreeSet<&str> = rows.iter().map(|a| a.account_id.as_str()).collect();

    let mut children_of: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut root_indices: Vec<usize> = Vec::new();
    for (index, account) in rows.iter().enumerate() {
        match &account.parent_account_id {
            Some(parent) if in_set.contains(parent.as_str()) => {
                children_of.entry(parent.clone()).or_default().push(index);
            }
            _ => root_indices.push(index),
        }
    }

    let accounts: Vec<Value> = root_indices
        .into_iter()
        .map(|index| build_node(&rows, &children_of, index))
        .collect();
    Ok(json!({
        "root_account_id": root_account_id,
        "accounts": accounts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_account, seed_account_with_parent, temp_store};

    #[test]
    fn children_link_to_parents_in_set() {
        let db = temp_store("tree_basic");
        let assets = seed_account(&db, "1000", "Assets");
        let cash = seed_account_with_parent(&db, "1010", "Cash", Some(assets.clone()));
        seed_account_with_parent(&db, "1011", "Petty Cash", Some(cash.clone()));
        seed_account(&db, "2000", "Liabilities");

        let tree = account_tree(&db, None).unwrap();
        let roots = tree["accounts"].as_array().unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0]["code"], "1000");
        assert_eq!(roots[1]["code"], "2000");

        let cash_node = &roots[0]["children"][0];
        assert_eq!(cash_node["code"], "1010");
        assert_eq!(cash_node["children"][0]["code"], "1011");
    }

    #[test]
    fn subtree_root_scopes_the_fetch() {
        let db = temp_store("tree_subtree");
        let assets = seed_account(&db, "1000", "Assets");
        let cash = seed_account_with_parent(&db, "1010", "Cash", Some(assets.clone()));
        seed_account_with_parent(&db, "1011", "Petty Cash", Some(cash));
        seed_account(&db, "2000", "Liabilities");

        let tree = account_tree(&db, Some(&assets)).unwrap();
        let roots = tree["accounts"].as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["code"], "1000");
        assert_eq!(roots[0]["children"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn orphaned_parent_makes_row_a_root() {
        let db = temp_store("tree_orphan");
        seed_account_with_parent(&db, "1010", "Cash", Some("missing-parent".to_string()));

        let tree = account_tree(&db, None).unwrap();
        let roots = tree["accounts"].as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["code"], "1010");
    }

    /// A child whose code sorts before its parent still nests correctly.
    #[test]
    fn child_code_before_parent_code() {
        let db = temp_store("tree_code_order");
        let parent = seed_account(&db, "9000", "Parent");
        seed_account_with_parent(&db, "0100", "Child", Some(parent));

        let tree = account_tree(&db, None).unwrap();
        let roots = tree["accounts"].as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["code"], "9000");
        assert_eq!(roots[0]["children"][0]["code"], "0100");
    }
}
