use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use keel_core::constants::{DEFAULT_ENTITY_CODE, DEFAULT_ENTITY_ID, DEFAULT_ENTITY_NAME};
use keel_core::error::KeelError;
use keel_core::records::{
    Account, AccountingPeriod, BalanceSnapshot, Decision, Entity, EventLogEntry,
    LedgerTransaction, Obligation, PolicyRule, Posting, Proposal, ProposalStatus,
};
use keel_core::{records, time};

use crate::staged::{StagedWrite, TreeId};

/// Separator for composite tree keys. Ids are UUIDs and codes/names are
/// validated printable strings, so the unit separator never collides.
const KEY_SEP: u8 = 0x1f;

const META_BOOTSTRAPPED: &str = "bootstrapped";

fn composite_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEP);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

fn enc<T: Serialize>(value: &T) -> Result<Vec<u8>, KeelError> {
    bincode::serialize(value).map_err(|e| KeelError::Serialization(e.to_string()))
}

fn dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, KeelError> {
    bincode::deserialize(bytes).map_err(|e| KeelError::Serialization(e.to_string()))
}

fn storage_err(e: sled::Error) -> KeelError {
    KeelError::Storage(e.to_string())
}

/// Persistent ledger database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   entities         — entity_id            → bincode(Entity)
///   accounts         — account_id           → bincode(Account)
///   account_codes    — code                 → account_id          [unique]
///   transactions     — transaction_id       → bincode(LedgerTransaction)
///   tx_external_ids  — source⎮external      → transaction_id      [unique]
///   postings         — tx_id⎮seq            → bincode(Posting)
///   snapshots        — account⎮date         → bincode(BalanceSnapshot)
///   obligations      — obligation_id        → bincode(Obligation)
///   obligation_keys  — source⎮name⎮account  → obligation_id       [unique]
///   proposals        — proposal_id          → bincode(Proposal)
///   proposal_keys    — tool⎮source⎮external → proposal_id         [unique]
///   decisions        — decision_id          → bincode(Decision)
///   decision_keys    — proposal⎮action⎮approver → decision_id     [unique]
///   periods          — period_key⎮entity    → bincode(AccountingPeriod)
///   policy_rules     — rule_id              → bincode(PolicyRule)
///   event_log        — seq (be bytes)       → bincode(EventLogEntry)
///   meta             — utf8 key             → raw bytes
pub struct StoreDb {
    _db: sled::Db,
    entities: sled::Tree,
    accounts: sled::Tree,
    account_codes: sled::Tree,
    transactions: sled::Tree,
    tx_external_ids: sled::Tree,
    postings: sled::Tree,
    snapshots: sled::Tree,
    obligations: sled::Tree,
    obligation_keys: sled::Tree,
    proposals: sled::Tree,
    proposal_keys: sled::Tree,
    decisions: sled::Tree,
    decision_keys: sled::Tree,
    periods: sled::Tree,
    policy_rules: sled::Tree,
    event_log: sled::Tree,
    meta: sled::Tree,
    /// Serializes read-check-write critical sections across tool
    /// invocations; natural-key races resolve through the index trees.
    write_lock: Mutex<()>,
    /// Test hook: forces event-log staging/appends to fail so the
    /// fail-closed runtime path is exercisable.
    fail_event_appends: AtomicBool,
}

impl StoreDb {
    /// Open or create the database at `path`, seeding the default entity
    /// on first open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KeelError> {
        let db = sled::open(path).map_err(storage_err)?;
        let tree = |name: &str| db.open_tree(name).map_err(storage_err);
        let store = Self {
            entities: tree("entities")?,
            accounts: tree("accounts")?,
            account_codes: tree("account_codes")?,
            transactions: tree("transactions")?,
            tx_external_ids: tree("tx_external_ids")?,
            postings: tree("postings")?,
            snapshots: tree("snapshots")?,
            obligations: tree("obligations")?,
            obligation_keys: tree("obligation_keys")?,
            proposals: tree("proposals")?,
            proposal_keys: tree("proposal_keys")?,
            decisions: tree("decisions")?,
            decision_keys: tree("decision_keys")?,
            periods: tree("periods")?,
            policy_rules: tree("policy_rules")?,
            event_log: tree("event_log")?,
            meta: tree("meta")?,
            _db: db,
            write_lock: Mutex::new(()),
            fail_event_appends: AtomicBool::new(false),
        };
        store.bootstrap()?;
        Ok(store)
    }

    fn bootstrap(&self) -> Result<(), KeelError> {
        if self.get_meta(META_BOOTSTRAPPED)?.is_some() {
            return Ok(());
        }
        let now = time::format_utc(time::now_utc());
        let entity = Entity {
            entity_id: DEFAULT_ENTITY_ID.to_string(),
            code: DEFAULT_ENTITY_CODE.to_string(),
            name: DEFAULT_ENTITY_NAME.to_string(),
            metadata: "{}".to_string(),
            created_at: now,
        };
        self.entities
            .insert(entity.entity_id.as_bytes(), enc(&entity)?)
            .map_err(storage_err)?;
        self.put_meta(META_BOOTSTRAPPED, b"1")?;
        info!(entity_id = DEFAULT_ENTITY_ID, "seeded default entity");
        Ok(())
    }

    /// Exclusive guard for a read-check-write critical section.
    pub fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a staged write set. Every row was validated and encoded while
    /// staging; this only inserts.
    pub fn commit(&self, staged: StagedWrite) -> Result<(), KeelError> {
        for (tree_id, key, value) in staged.ops {
            self.tree_for(tree_id)
                .insert(key, value)
                .map_err(storage_err)?;
        }
        Ok(())
    }

    fn tree_for(&self, id: TreeId) -> &sled::Tree {
        match id {
            TreeId::Entities => &self.entities,
            TreeId::Accounts => &self.accounts,
            TreeId::AccountCodes => &self.account_codes,
            TreeId::Transactions => &self.transactions,
            TreeId::TxExternalIds => &self.tx_external_ids,
            TreeId::Postings => &self.postings,
            TreeId::Snapshots => &self.snapshots,
            TreeId::Obligations => &self.obligations,
            TreeId::ObligationKeys => &self.obligation_keys,
            TreeId::Proposals => &self.proposals,
            TreeId::ProposalKeys => &self.proposal_keys,
            TreeId::Decisions => &self.decisions,
            TreeId::DecisionKeys => &self.decision_keys,
            TreeId::Periods => &self.periods,
            TreeId::EventLog => &self.event_log,
            TreeId::Meta => &self.meta,
        }
    }

    fn tree_get<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, KeelError> {
        match tree.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(dec(&bytes)?)),
            None => Ok(None),
        }
    }

    fn staged_or_tree<T: DeserializeOwned>(
        &self,
        staged: &StagedWrite,
        tree_id: TreeId,
        key: &[u8],
    ) -> Result<Option<T>, KeelError> {
        if let Some(bytes) = staged.get(tree_id, key) {
            return Ok(Some(dec(bytes)?));
        }
        self.tree_get(self.tree_for(tree_id), key)
    }

    fn key_taken(
        &self,
        staged: &StagedWrite,
        tree_id: TreeId,
        key: &[u8],
    ) -> Result<bool, KeelError> {
        if staged.contains(tree_id, key) {
            return Ok(true);
        }
        Ok(self.tree_for(tree_id).contains_key(key).map_err(storage_err)?)
    }

    // ── Entities ─────────────────────────────────────────────────────────────

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, KeelError> {
        self.tree_get(&self.entities, entity_id.as_bytes())
    }

    pub fn entity_exists(&self, entity_id: &str) -> bool {
        self.entities
            .contains_key(entity_id.as_bytes())
            .unwrap_or(false)
    }

    pub fn put_entity(&self, entity: &Entity) -> Result<(), KeelError> {
        self.entities
            .insert(entity.entity_id.as_bytes(), enc(entity)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, KeelError> {
        self.tree_get(&self.accounts, account_id.as_bytes())
    }

    pub fn account_exists(&self, account_id: &str) -> bool {
        self.accounts
            .contains_key(account_id.as_bytes())
            .unwrap_or(false)
    }

    pub fn account_id_for_code(&self, code: &str) -> Result<Option<String>, KeelError> {
        Ok(self
            .account_codes
            .get(code.as_bytes())
            .map_err(storage_err)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn iter_accounts(&self) -> Result<Vec<Account>, KeelError> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Stage a new account, enforcing code uniqueness.
    pub fn stage_insert_account(
        &self,
        staged: &mut StagedWrite,
        account: &Account,
    ) -> Result<(), KeelError> {
        if self.key_taken(staged, TreeId::AccountCodes, account.code.as_bytes())? {
            return Err(KeelError::DuplicateAccountCode(account.code.clone()));
        }
        staged.push(
            TreeId::AccountCodes,
            account.code.as_bytes().to_vec(),
            account.account_id.as_bytes().to_vec(),
        );
        staged.push(
            TreeId::Accounts,
            account.account_id.as_bytes().to_vec(),
            enc(account)?,
        );
        Ok(())
    }

    /// Stage an account update. Code, type, entity, and creation time are
    /// immutable; only name, metadata, parent link, and `updated_at` may
    /// change.
    pub fn stage_update_account(
        &self,
        staged: &mut StagedWrite,
        account: &Account,
    ) -> Result<(), KeelError> {
        let existing: Account = self
            .staged_or_tree(staged, TreeId::Accounts, account.account_id.as_bytes())?
            .ok_or_else(|| KeelError::UnknownAccount(account.account_id.clone()))?;
        if existing.code != account.code
            || existing.account_type != account.account_type
            || existing.entity_id != account.entity_id
            || existing.created_at != account.created_at
        {
            return Err(KeelError::Storage(format!(
                "immutable account columns cannot change (account {})",
                account.account_id
            )));
        }
        staged.push(
            TreeId::Accounts,
            account.account_id.as_bytes().to_vec(),
            enc(account)?,
        );
        Ok(())
    }

    // ── Ledger transactions & postings ───────────────────────────────────────

    pub fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<LedgerTransaction>, KeelError> {
        self.tree_get(&self.transactions, transaction_id.as_bytes())
    }

    pub fn transaction_id_for_external(
        &self,
        source_system: &str,
        external_id: &str,
    ) -> Result<Option<String>, KeelError> {
        let key = composite_key(&[source_system, external_id]);
        Ok(self
            .tx_external_ids
            .get(key)
            .map_err(storage_err)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn iter_transactions(&self) -> Result<Vec<LedgerTransaction>, KeelError> {
        let mut out = Vec::new();
        for item in self.transactions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Postings of one transaction in their canonical insertion order.
    pub fn postings_for_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<Posting>, KeelError> {
        let mut prefix = transaction_id.as_bytes().to_vec();
        prefix.push(KEY_SEP);
        let mut out = Vec::new();
        for item in self.postings.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Stage a transaction with its postings. The `(source_system,
    /// external_id)` pair must be free; postings must already be in
    /// canonical order.
    pub fn stage_transaction_bundle(
        &self,
        staged: &mut StagedWrite,
        tx: &LedgerTransaction,
        postings: &[Posting],
    ) -> Result<(), KeelError> {
        let external_key = composite_key(&[&tx.source_system, &tx.external_id]);
        if self.key_taken(staged, TreeId::TxExternalIds, &external_key)? {
            return Err(KeelError::DuplicateExternalId {
                source_system: tx.source_system.clone(),
                external_id: tx.external_id.clone(),
            });
        }
        staged.push(
            TreeId::TxExternalIds,
            external_key,
            tx.transaction_id.as_bytes().to_vec(),
        );
        staged.push(
            TreeId::Transactions,
            tx.transaction_id.as_bytes().to_vec(),
            enc(tx)?,
        );
        for (seq, posting) in postings.iter().enumerate() {
            let key = composite_key(&[&tx.transaction_id, &format!("{seq:04}")]);
            staged.push(TreeId::Postings, key, enc(posting)?);
        }
        Ok(())
    }

    /// Stage the canonical response onto a transaction row. The two
    /// response fields transition NULL→value exactly once; everything else
    /// on the row is immutable.
    pub fn stage_transaction_response(
        &self,
        staged: &mut StagedWrite,
        transaction_id: &str,
        response_payload: &str,
        output_hash: &str,
    ) -> Result<(), KeelError> {
        let mut tx: LedgerTransaction = self
            .staged_or_tree(staged, TreeId::Transactions, transaction_id.as_bytes())?
            .ok_or_else(|| KeelError::Storage(format!("unknown transaction {transaction_id}")))?;
        if tx.response_payload.is_some() || tx.output_hash.is_some() {
            return Err(KeelError::ResponseAlreadyPersisted(
                transaction_id.to_string(),
            ));
        }
        tx.response_payload = Some(response_payload.to_string());
        tx.output_hash = Some(output_hash.to_string());
        staged.push(
            TreeId::Transactions,
            transaction_id.as_bytes().to_vec(),
            enc(&tx)?,
        );
        Ok(())
    }

    // ── Balance snapshots ────────────────────────────────────────────────────

    pub fn get_snapshot(
        &self,
        account_id: &str,
        snapshot_date: &str,
    ) -> Result<Option<BalanceSnapshot>, KeelError> {
        let key = composite_key(&[account_id, snapshot_date]);
        self.tree_get(&self.snapshots, &key)
    }

    pub fn iter_snapshots(&self) -> Result<Vec<BalanceSnapshot>, KeelError> {
        let mut out = Vec::new();
        for item in self.snapshots.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Stage a snapshot upsert on `(account_id, snapshot_date)`. Returns
    /// `(snapshot_id, created)`; updates keep the original row identity.
    pub fn stage_upsert_snapshot(
        &self,
        staged: &mut StagedWrite,
        mut snapshot: BalanceSnapshot,
    ) -> Result<(String, bool), KeelError> {
        let key = composite_key(&[&snapshot.account_id, &snapshot.snapshot_date]);
        let existing: Option<BalanceSnapshot> =
            self.staged_or_tree(staged, TreeId::Snapshots, &key)?;
        let created = existing.is_none();
        if let Some(existing) = existing {
            snapshot.snapshot_id = existing.snapshot_id;
            snapshot.created_at = existing.created_at;
        }
        let snapshot_id = snapshot.snapshot_id.clone();
        staged.push(TreeId::Snapshots, key, enc(&snapshot)?);
        Ok((snapshot_id, created))
    }

    // ── Obligations ──────────────────────────────────────────────────────────

    pub fn get_obligation(&self, obligation_id: &str) -> Result<Option<Obligation>, KeelError> {
        self.tree_get(&self.obligations, obligation_id.as_bytes())
    }

    pub fn iter_obligations(&self) -> Result<Vec<Obligation>, KeelError> {
        let mut out = Vec::new();
        for item in self.obligations.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Stage an obligation upsert on `(source_system, name, account_id)`.
    /// Returns `(obligation_id, created)`.
    pub fn stage_upsert_obligation(
        &self,
        staged: &mut StagedWrite,
        mut obligation: Obligation,
    ) -> Result<(String, bool), KeelError> {
        let key = composite_key(&[
            &obligation.source_system,
            &obligation.name,
            &obligation.account_id,
        ]);
        let existing_id = if let Some(bytes) = staged.get(TreeId::ObligationKeys, &key) {
            Some(String::from_utf8_lossy(bytes).into_owned())
        } else {
            self.obligation_keys
                .get(&key)
                .map_err(storage_err)?
                .map(|v| String::from_utf8_lossy(&v).into_owned())
        };

        let created = existing_id.is_none();
        if let Some(id) = existing_id {
            let existing: Obligation = self
                .staged_or_tree(staged, TreeId::Obligations, id.as_bytes())?
                .ok_or_else(|| KeelError::Storage(format!("dangling obligation key for {id}")))?;
            obligation.obligation_id = existing.obligation_id;
            obligation.created_at = existing.created_at;
        } else {
            staged.push(
                TreeId::ObligationKeys,
                key,
                obligation.obligation_id.as_bytes().to_vec(),
            );
        }
        let obligation_id = obligation.obligation_id.clone();
        staged.push(
            TreeId::Obligations,
            obligation_id.as_bytes().to_vec(),
            enc(&obligation)?,
        );
        Ok((obligation_id, created))
    }

    /// Stage fulfillment of an obligation: records the fulfilling
    /// transaction and deactivates the row. Idempotent.
    pub fn stage_fulfill_obligation(
        &self,
        staged: &mut StagedWrite,
        obligation_id: &str,
        fulfilled_by_transaction_id: Option<&str>,
        fulfilled_at: &str,
    ) -> Result<Obligation, KeelError> {
        let mut obligation: Obligation = self
            .staged_or_tree(staged, TreeId::Obligations, obligation_id.as_bytes())?
            .ok_or_else(|| KeelError::UnknownObligation(obligation_id.to_string()))?;
        if obligation.fulfilled_at.is_none() {
            obligation.fulfilled_by_transaction_id =
                fulfilled_by_transaction_id.map(str::to_string);
            obligation.fulfilled_at = Some(fulfilled_at.to_string());
            obligation.active = false;
            obligation.updated_at = fulfilled_at.to_string();
            staged.push(
                TreeId::Obligations,
                obligation_id.as_bytes().to_vec(),
                enc(&obligation)?,
            );
        }
        Ok(obligation)
    }

    // ── Proposals & decisions ────────────────────────────────────────────────

    pub fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>, KeelError> {
        self.tree_get(&self.proposals, proposal_id.as_bytes())
    }

    pub fn proposal_for_key(
        &self,
        tool_name: &str,
        source_system: &str,
        external_id: &str,
    ) -> Result<Option<Proposal>, KeelError> {
        let key = composite_key(&[tool_name, source_system, external_id]);
        match self.proposal_keys.get(key).map_err(storage_err)? {
            Some(id_bytes) => {
                let id = String::from_utf8_lossy(&id_bytes).into_owned();
                self.get_proposal(&id)
            }
            None => Ok(None),
        }
    }

    pub fn iter_proposals(&self) -> Result<Vec<Proposal>, KeelError> {
        let mut out = Vec::new();
        for item in self.proposals.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    /// Stage a new proposal, enforcing uniqueness of
    /// `(tool_name, source_system, external_id)`.
    pub fn stage_insert_proposal(
        &self,
        staged: &mut StagedWrite,
        proposal: &Proposal,
    ) -> Result<(), KeelError> {
        let key = composite_key(&[
            &proposal.tool_name,
            &proposal.source_system,
            &proposal.external_id,
        ]);
        if self.key_taken(staged, TreeId::ProposalKeys, &key)? {
            return Err(KeelError::Storage(format!(
                "proposal already exists for ({}, {}, {})",
                proposal.tool_name, proposal.source_system, proposal.external_id
            )));
        }
        staged.push(
            TreeId::ProposalKeys,
            key,
            proposal.proposal_id.as_bytes().to_vec(),
        );
        staged.push(
            TreeId::Proposals,
            proposal.proposal_id.as_bytes().to_vec(),
            enc(proposal)?,
        );
        Ok(())
    }

    /// Stage a proposal result. `proposed` rows may gain their canonical
    /// response; transitions out of `proposed` are the only status moves.
    pub fn stage_proposal_result(
        &self,
        staged: &mut StagedWrite,
        proposal_id: &str,
        status: ProposalStatus,
        response_payload: &str,
        output_hash: &str,
        decision_reason: Option<&str>,
        approved_transaction_id: Option<&str>,
    ) -> Result<(), KeelError> {
        let mut proposal: Proposal = self
            .staged_or_tree(staged, TreeId::Proposals, proposal_id.as_bytes())?
            .ok_or_else(|| KeelError::UnknownProposal(proposal_id.to_string()))?;
        if proposal.status.is_terminal() {
            return Err(KeelError::TerminalProposal(proposal_id.to_string()));
        }
        proposal.status = status;
        proposal.response_payload = Some(response_payload.to_string());
        proposal.output_hash = Some(output_hash.to_string());
        if decision_reason.is_some() {
            proposal.decision_reason = decision_reason.map(str::to_string);
        }
        if approved_transaction_id.is_some() {
            proposal.approved_transaction_id = approved_transaction_id.map(str::to_string);
        }
        staged.push(
            TreeId::Proposals,
            proposal_id.as_bytes().to_vec(),
            enc(&proposal)?,
        );
        Ok(())
    }

    /// Stage a decision row. When the decision carries an `approver_id`,
    /// `(proposal_id, action, approver_id)` is unique and a duplicate is a
    /// deterministic no-op — the return value tells whether the row was
    /// actually staged.
    pub fn stage_insert_decision(
        &self,
        staged: &mut StagedWrite,
        decision: &Decision,
    ) -> Result<bool, KeelError> {
        if let Some(approver_id) = &decision.approver_id {
            let key = composite_key(&[
                &decision.proposal_id,
                decision.action.as_str(),
                approver_id,
            ]);
            if self.key_taken(staged, TreeId::DecisionKeys, &key)? {
                return Ok(false);
            }
            staged.push(
                TreeId::DecisionKeys,
                key,
                decision.decision_id.as_bytes().to_vec(),
            );
        }
        staged.push(
            TreeId::Decisions,
            decision.decision_id.as_bytes().to_vec(),
            enc(decision)?,
        );
        Ok(true)
    }

    pub fn decisions_for_proposal(&self, proposal_id: &str) -> Result<Vec<Decision>, KeelError> {
        let mut out = Vec::new();
        for item in self.decisions.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let decision: Decision = dec(&bytes)?;
            if decision.proposal_id == proposal_id {
                out.push(decision);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Count of distinct approvers that recorded an `approve` decision.
    pub fn distinct_approvals(&self, proposal_id: &str) -> Result<u32, KeelError> {
        let mut approvers = std::collections::BTreeSet::new();
        for decision in self.decisions_for_proposal(proposal_id)? {
            if decision.action == records::DecisionAction::Approve {
                if let Some(approver) = decision.approver_id {
                    approvers.insert(approver);
                }
            }
        }
        Ok(approvers.len() as u32)
    }

    // ── Accounting periods ───────────────────────────────────────────────────

    pub fn get_period(
        &self,
        period_key: &str,
        entity_id: &str,
    ) -> Result<Option<AccountingPeriod>, KeelError> {
        let key = composite_key(&[period_key, entity_id]);
        self.tree_get(&self.periods, &key)
    }

    pub fn stage_put_period(
        &self,
        staged: &mut StagedWrite,
        period: &AccountingPeriod,
    ) -> Result<(), KeelError> {
        let key = composite_key(&[&period.period_key, &period.entity_id]);
        staged.push(TreeId::Periods, key, enc(period)?);
        Ok(())
    }

    // ── Policy rules ─────────────────────────────────────────────────────────

    pub fn put_policy_rule(&self, rule: &PolicyRule) -> Result<(), KeelError> {
        self.policy_rules
            .insert(rule.rule_id.as_bytes(), enc(rule)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Active rules ordered by `(priority asc, rule_id asc)`.
    pub fn active_policy_rules(&self) -> Result<Vec<PolicyRule>, KeelError> {
        let mut rules = Vec::new();
        for item in self.policy_rules.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let rule: PolicyRule = dec(&bytes)?;
            if rule.active {
                rules.push(rule);
            }
        }
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        Ok(rules)
    }

    // ── Event log ────────────────────────────────────────────────────────────

    /// Test hook: when set, event staging and direct appends fail with an
    /// `EventLog` error before anything is written.
    pub fn set_event_log_failure(&self, fail: bool) {
        self.fail_event_appends.store(fail, Ordering::SeqCst);
    }

    fn next_event_key(&self) -> Result<Vec<u8>, KeelError> {
        let seq = self._db.generate_id().map_err(storage_err)?;
        Ok(seq.to_be_bytes().to_vec())
    }

    /// Stage an event-log row into a pending write set.
    pub fn stage_event(
        &self,
        staged: &mut StagedWrite,
        entry: &EventLogEntry,
    ) -> Result<(), KeelError> {
        if self.fail_event_appends.load(Ordering::SeqCst) {
            return Err(KeelError::EventLog("event log append rejected".into()));
        }
        staged.push(TreeId::EventLog, self.next_event_key()?, enc(entry)?);
        Ok(())
    }

    /// Append one event-log row immediately (read paths and pre-dispatch
    /// failures).
    pub fn append_event(&self, entry: &EventLogEntry) -> Result<(), KeelError> {
        if self.fail_event_appends.load(Ordering::SeqCst) {
            return Err(KeelError::EventLog("event log append rejected".into()));
        }
        self.event_log
            .insert(self.next_event_key()?, enc(entry)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Events in append order.
    pub fn iter_events(&self) -> Result<Vec<EventLogEntry>, KeelError> {
        let mut out = Vec::new();
        for item in self.event_log.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(dec(&bytes)?);
        }
        Ok(out)
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn stage_put_meta(
        &self,
        staged: &mut StagedWrite,
        key: &str,
        value: &[u8],
    ) -> Result<(), KeelError> {
        staged.push(TreeId::Meta, key.as_bytes().to_vec(), value.to_vec());
        Ok(())
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), KeelError> {
        self.meta
            .insert(key.as_bytes(), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, KeelError> {
        Ok(self
            .meta
            .get(key.as_bytes())
            .map_err(storage_err)?
            .map(|v| v.to_vec()))
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), KeelError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::records::{AccountType, DecisionAction};

    fn temp_db(name: &str) -> StoreDb {
        let dir = std::env::temp_dir().join(format!("keel_store_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        StoreDb::open(&dir).expect("open temp db")
    }

    fn sample_account(id: &str, code: &str) -> Account {
        Account {
            account_id: id.to_string(),
            code: code.to_string(),
            name: format!("Account {code}"),
            account_type: AccountType::Asset,
            parent_account_id: None,
            entity_id: DEFAULT_ENTITY_ID.to_string(),
            metadata: "{}".to_string(),
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    fn sample_transaction(id: &str, source: &str, external: &str) -> LedgerTransaction {
        LedgerTransaction {
            transaction_id: id.to_string(),
            source_system: source.to_string(),
            external_id: external.to_string(),
            transaction_date: "2026-01-01T00:00:00.000000Z".to_string(),
            description: "test".to_string(),
            correlation_id: "c1".to_string(),
            input_hash: "0".repeat(64),
            entity_id: DEFAULT_ENTITY_ID.to_string(),
            is_adjusting_entry: false,
            adjusting_reason_code: None,
            response_payload: None,
            output_hash: None,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn bootstrap_seeds_default_entity_once() {
        let db = temp_db("bootstrap");
        assert!(db.entity_exists(DEFAULT_ENTITY_ID));
        let entity = db.get_entity(DEFAULT_ENTITY_ID).unwrap().unwrap();
        assert_eq!(entity.code, DEFAULT_ENTITY_CODE);
    }

    #[test]
    fn account_code_is_unique() {
        let db = temp_db("acct_code");
        let mut staged = StagedWrite::new();
        db.stage_insert_account(&mut staged, &sample_account("a-1", "1000"))
            .unwrap();
        db.commit(staged).unwrap();

        let mut staged = StagedWrite::new();
        let err = db
            .stage_insert_account(&mut staged, &sample_account("a-2", "1000"))
            .unwrap_err();
        assert!(matches!(err, KeelError::DuplicateAccountCode(code) if code == "1000"));
        // Nothing from the failed staging reached the trees.
        assert!(db.get_account("a-2").unwrap().is_none());
    }

    #[test]
    fn external_id_is_unique_and_staged_rows_shadow() {
        let db = temp_db("external_id");
        let tx = sample_transaction("t-1", "src", "e1");
        let mut staged = StagedWrite::new();
        db.stage_transaction_bundle(&mut staged, &tx, &[]).unwrap();
        // A second bundle with the same key is rejected even before commit.
        let dup = sample_transaction("t-2", "src", "e1");
        assert!(matches!(
            db.stage_transaction_bundle(&mut staged, &dup, &[]),
            Err(KeelError::DuplicateExternalId { .. })
        ));
        db.commit(staged).unwrap();
        assert_eq!(
            db.transaction_id_for_external("src", "e1").unwrap(),
            Some("t-1".to_string())
        );
    }

    #[test]
    fn response_fields_transition_null_to_value_once() {
        let db = temp_db("response_once");
        let tx = sample_transaction("t-1", "src", "e1");
        let mut staged = StagedWrite::new();
        db.stage_transaction_bundle(&mut staged, &tx, &[]).unwrap();
        db.stage_transaction_response(&mut staged, "t-1", r#"{"status":"committed"}"#, "hash-1")
            .unwrap();
        db.commit(staged).unwrap();

        let mut staged = StagedWrite::new();
        let err = db
            .stage_transaction_response(&mut staged, "t-1", r#"{"status":"other"}"#, "hash-2")
            .unwrap_err();
        assert!(matches!(err, KeelError::ResponseAlreadyPersisted(_)));

        let stored = db.get_transaction("t-1").unwrap().unwrap();
        assert_eq!(stored.output_hash.as_deref(), Some("hash-1"));
    }

    #[test]
    fn postings_keep_canonical_order() {
        let db = temp_db("posting_order");
        let tx = sample_transaction("t-1", "src", "e1");
        let postings: Vec<Posting> = ["p-a", "p-b", "p-c"]
            .iter()
            .map(|id| Posting {
                posting_id: id.to_string(),
                transaction_id: "t-1".to_string(),
                account_id: "a-1".to_string(),
                amount: "1.0000".to_string(),
                currency: "USD".to_string(),
                memo: None,
            })
            .collect();
        let mut staged = StagedWrite::new();
        db.stage_transaction_bundle(&mut staged, &tx, &postings)
            .unwrap();
        db.commit(staged).unwrap();

        let stored = db.postings_for_transaction("t-1").unwrap();
        let ids: Vec<&str> = stored.iter().map(|p| p.posting_id.as_str()).collect();
        assert_eq!(ids, vec!["p-a", "p-b", "p-c"]);
    }

    #[test]
    fn decision_unique_on_approver_triplet() {
        let db = temp_db("decision_unique");
        let decision = Decision {
            decision_id: "d-1".to_string(),
            proposal_id: "p-1".to_string(),
            action: DecisionAction::Approve,
            correlation_id: "c1".to_string(),
            approver_id: Some("approver-a".to_string()),
            reason: None,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        };
        let mut staged = StagedWrite::new();
        assert!(db.stage_insert_decision(&mut staged, &decision).unwrap());
        db.commit(staged).unwrap();

        let mut dup = decision.clone();
        dup.decision_id = "d-2".to_string();
        let mut staged = StagedWrite::new();
        assert!(!db.stage_insert_decision(&mut staged, &dup).unwrap());
        db.commit(staged).unwrap();

        assert_eq!(db.distinct_approvals("p-1").unwrap(), 1);
    }

    #[test]
    fn poisoned_event_log_rejects_before_any_write() {
        let db = temp_db("event_poison");
        db.set_event_log_failure(true);

        let mut staged = StagedWrite::new();
        db.stage_insert_account(&mut staged, &sample_account("a-1", "1000"))
            .unwrap();
        let entry = EventLogEntry {
            event_id: "e-1".to_string(),
            tool_name: "create_account".to_string(),
            correlation_id: "c1".to_string(),
            input_hash: String::new(),
            output_hash: String::new(),
            event_timestamp: "2026-01-01T00:00:00.000000Z".to_string(),
            duration_ms: 0,
            status: "ok".to_string(),
            error_code: None,
            error_message: None,
            actor_id: None,
            authn_method: None,
            authorization_result: None,
            violation_code: None,
        };
        assert!(matches!(
            db.stage_event(&mut staged, &entry),
            Err(KeelError::EventLog(_))
        ));
        // The caller abandons the staged set; the account never lands.
        drop(staged);
        assert!(db.get_account("a-1").unwrap().is_none());
        assert!(db.iter_events().unwrap().is_empty());
    }

    #[test]
    fn snapshot_upsert_keeps_row_identity() {
        let db = temp_db("snapshot_upsert");
        let snap = BalanceSnapshot {
            snapshot_id: "s-1".to_string(),
            source_system: "bank".to_string(),
            account_id: "a-1".to_string(),
            snapshot_date: "2026-01-31".to_string(),
            balance: "95.0000".to_string(),
            currency: "USD".to_string(),
            source_artifact_id: None,
            entity_id: DEFAULT_ENTITY_ID.to_string(),
            created_at: "2026-01-31T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-31T00:00:00.000000Z".to_string(),
        };
        let mut staged = StagedWrite::new();
        let (id, created) = db.stage_upsert_snapshot(&mut staged, snap.clone()).unwrap();
        db.commit(staged).unwrap();
        assert!(created);
        assert_eq!(id, "s-1");

        let mut replayed = snap;
        replayed.snapshot_id = "s-2".to_string();
        replayed.balance = "97.0000".to_string();
        let mut staged = StagedWrite::new();
        let (id, created) = db.stage_upsert_snapshot(&mut staged, replayed).unwrap();
        db.commit(staged).unwrap();
        assert!(!created);
        assert_eq!(id, "s-1", "natural-key upsert keeps the original row id");

        let stored = db.get_snapshot("a-1", "2026-01-31").unwrap().unwrap();
        assert_eq!(stored.balance, "97.0000");
    }
}
