//! Account creation and metadata updates.

use serde_json::{json, Map, Value};

use keel_core::constants::DEFAULT_ENTITY_ID;
use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::stamp_output_hash;
use keel_core::records::{new_id, Account, AccountType};
use keel_core::time;
use keel_store::StagedWrite;

use crate::inputs::{metadata_text, CreateAccountInput, UpdateAccountMetadataInput};
use crate::{Engine, Invocation};

impl Engine {
    pub fn create_account(
        &self,
        inv: &Invocation,
        input: CreateAccountInput,
    ) -> Result<Value, KeelError> {
        let account_type = AccountType::parse(&input.account_type).ok_or_else(|| {
            KeelError::Validation(format!(
                "account_type must be asset|liability|equity|income|expense, got '{}'",
                input.account_type
            ))
        })?;
        let entity_id = input
            .entity_id
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTITY_ID.to_string());
        if !self.db.entity_exists(&entity_id) {
            return Err(KeelError::UnknownEntity(entity_id));
        }

        let _guard = self.db.write_guard();

        if let Some(parent_id) = &input.parent_account_id {
            if !self.db.account_exists(parent_id) {
                return Err(KeelError::UnknownParentAccount(parent_id.clone()));
            }
        }

        let now = time::format_utc(time::now_utc());
        let account = Account {
            account_id: new_id(),
            code: input.code.clone(),
            name: input.name.clone(),
            account_type,
            parent_account_id: input.parent_account_id.clone(),
            entity_id,
            metadata: metadata_text(&input.metadata),
            created_at: now.clone(),
            updated_at: now,
        };
        self.ensure_no_parent_cycle(&account)?;

        let mut staged = StagedWrite::new();
        self.db.stage_insert_account(&mut staged, &account)?;

        let mut fields = Map::new();
        fields.insert("account_id".into(), json!(account.account_id));
        fields.insert("status".into(), json!("committed"));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
        let output_hash = Self::response_hash(&response)?;

        self.db.stage_event(
            &mut staged,
            &event::ok_entry(
                &inv.tool_name,
                &inv.correlation_id,
                &inv.input_hash,
                &output_hash,
                inv.elapsed_ms(),
            ),
        )?;
        self.db.commit(staged)?;
        Ok(response)
    }

    pub fn update_account_metadata(
        &self,
        inv: &Invocation,
        input: UpdateAccountMetadataInput,
    ) -> Result<Value, KeelError> {
        let _guard = self.db.write_guard();
        let mut account = self
            .db
            .get_account(&input.account_id)?
            .ok_or_else(|| KeelError::UnknownAccount(input.account_id.clone()))?;

        if let Some(name) = &input.name {
            account.name = name.clone();
        }
        if input.metadata.is_some() {
            account.metadata = metadata_text(&input.metadata);
        }
        account.updated_at = time::format_utc(time::now_utc());

        let mut staged = StagedWrite::new();
        self.db.stage_update_account(&mut staged, &account)?;

        let mut fields = Map::new();
        fields.insert("account_id".into(), json!(account.account_id));
        fields.insert("status".into(), json!("updated"));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
        let output_hash = Self::response_hash(&response)?;

        self.db.stage_event(
            &mut staged,
            &event::ok_entry(
                &inv.tool_name,
                &inv.correlation_id,
                &inv.input_hash,
                &output_hash,
                inv.elapsed_ms(),
            ),
        )?;
        self.db.commit(staged)?;
        Ok(response)
    }

    /// Walk the parent chain and reject cycles. Parent links must form a
    /// DAG; a corrupted chain also terminates here instead of looping.
    fn ensure_no_parent_cycle(&self, account: &Account) -> Result<(), KeelError> {
        let mut seen = std::collections::BTreeSet::new();
        seen.insert(account.account_id.clone());
        let mut cursor = account.parent_account_id.clone();
        while let Some(parent_id) = cursor {
            if !seen.insert(parent_id.clone()) {
                return Err(KeelError::AccountCycle);
            }
            cursor = self
                .db
                .get_account(&parent_id)?
                .and_then(|a| a.parent_account_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{invocation, test_engine};

    fn create_input(code: &str, parent: Option<String>) -> CreateAccountInput {
        CreateAccountInput {
            code: code.to_string(),
            name: format!("Account {code}"),
            account_type: "asset".to_string(),
            correlation_id: "c1".to_string(),
            parent_account_id: parent,
            entity_id: None,
            metadata: None,
        }
    }

    #[test]
    fn create_then_update_metadata() {
        let engine = test_engine("accounts_create");
        let created = engine
            .create_account(&invocation("create_account", "c1"), create_input("1000", None))
            .unwrap();
        assert_eq!(created["status"], "committed");
        let account_id = created["account_id"].as_str().unwrap().to_string();

        let updated = engine
            .update_account_metadata(
                &invocation("update_account_metadata", "c2"),
                UpdateAccountMetadataInput {
                    account_id: account_id.clone(),
                    correlation_id: "c2".to_string(),
                    name: Some("Operating Cash".to_string()),
                    metadata: Some(json!({"bank": "first-national"})),
                },
            )
            .unwrap();
        assert_eq!(updated["status"], "updated");

        let stored = engine.db.get_account(&account_id).unwrap().unwrap();
        assert_eq!(stored.name, "Operating Cash");
        assert_eq!(stored.metadata, r#"{"bank":"first-national"}"#);
    }

    #[test]
    fn duplicate_code_rejected() {
        let engine = test_engine("accounts_dup_code");
        engine
            .create_account(&invocation("create_account", "c1"), create_input("1000", None))
            .unwrap();
        assert!(matches!(
            engine
                .create_account(&invocation("create_account", "c2"), create_input("1000", None))
                .unwrap_err(),
            KeelError::DuplicateAccountCode(_)
        ));
    }

    #[test]
    fn missing_parent_rejected() {
        let engine = test_engine("accounts_missing_parent");
        assert!(matches!(
            engine
                .create_account(
                    &invocation("create_account", "c1"),
                    create_input("1000", Some("nope".to_string())),
                )
                .unwrap_err(),
            KeelError::UnknownParentAccount(_)
        ));
    }

    #[test]
    fn invalid_account_type_is_validation_error() {
        let engine = test_engine("accounts_bad_type");
        let mut input = create_input("1000", None);
        input.account_type = "fund".to_string();
        let err = engine
            .create_account(&invocation("create_account", "c1"), input)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn parent_chain_builds_tree() {
        let engine = test_engine("accounts_parent_chain");
        let root = engine
            .create_account(&invocation("create_account", "c1"), create_input("1000", None))
            .unwrap();
        let root_id = root["account_id"].as_str().unwrap().to_string();
        let child = engine
            .create_account(
                &invocation("create_account", "c2"),
                create_input("1010", Some(root_id.clone())),
            )
            .unwrap();
        let child_id = child["account_id"].as_str().unwrap().to_string();

        let stored = engine.db.get_account(&child_id).unwrap().unwrap();
        assert_eq!(stored.parent_account_id.as_deref(), Some(root_id.as_str()));
    }
}
