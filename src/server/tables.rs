//! Replica-owned domain tables behind read-write-lock accessor types.
//!
//! Cross references between records are by name: a document's creator,
//! co-authors and section occupants are account names, and a notification
//! entry is a document name.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::server::Subdivision;

use parking_lot::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

/// A registered account.
#[derive(Debug)]
pub struct Account {
    name: String,

    /// Opaque password digest.
    digest: String,

    /// Pending notifications, oldest first.
    notifications: Mutex<Vec<String>>,
}

impl Account {
    fn new(name: String, digest: String, notifications: Vec<String>) -> Self {
        Account {
            name,
            digest,
            notifications: Mutex::new(notifications),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Appends a notification entry.
    pub fn push_notification(&self, entry: String) {
        self.notifications.lock().push(entry);
    }

    /// Copy of the pending notifications.
    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    /// Removes up to `count` leading entries, returning how many were removed.
    pub fn drain_notifications(&self, count: usize) -> usize {
        let mut list = self.notifications.lock();
        let count = count.min(list.len());
        list.drain(..count);
        count
    }
}

/// Serializable form of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    pub digest: String,
    pub notifications: Vec<String>,
}

/// Account table keyed by account name.
#[derive(Debug, Default)]
pub struct AccountTable {
    accounts: RwLock<HashMap<String, Arc<Account>>>,
}

impl AccountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accounts.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Account>> {
        self.accounts.read().get(name).cloned()
    }

    /// Inserts a new account; returns false if the name is taken.
    pub fn insert(&self, name: &str, digest: &str) -> bool {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(name) {
            return false;
        }
        accounts.insert(
            name.to_string(),
            Arc::new(Account::new(name.into(), digest.into(), vec![])),
        );
        true
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all accounts, sorted by name.
    pub fn to_records(&self) -> Vec<AccountRecord> {
        let mut records: Vec<_> = self
            .accounts
            .read()
            .values()
            .map(|acct| AccountRecord {
                name: acct.name.clone(),
                digest: acct.digest.clone(),
                notifications: acct.notifications(),
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Replaces the whole table with given records.
    pub fn replace_all(&self, records: Vec<AccountRecord>) {
        let fresh = records
            .into_iter()
            .map(|r| {
                (
                    r.name.clone(),
                    Arc::new(Account::new(r.name, r.digest, r.notifications)),
                )
            })
            .collect();
        *self.accounts.write() = fresh;
    }
}

/// Serializable form of an active-session entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,

    /// `None` once the account logged out.
    pub token: Option<String>,
}

#[derive(Debug, Default)]
struct SessionMaps {
    /// Account name -> issued token; cleared tokens leave the entry in place.
    by_name: HashMap<String, Option<String>>,

    /// Token -> account name.
    by_token: HashMap<String, String>,
}

/// Active-session table, resolvable both by account and by token.
#[derive(Debug, Default)]
pub struct SessionTable {
    maps: RwLock<SessionMaps>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does `name` currently hold a token?
    pub fn is_logged_in(&self, name: &str) -> bool {
        matches!(self.maps.read().by_name.get(name), Some(Some(_)))
    }

    /// Account that was issued `token`, if still active.
    pub fn account_of(&self, token: &str) -> Option<String> {
        self.maps.read().by_token.get(token).cloned()
    }

    pub fn token_of(&self, name: &str) -> Option<String> {
        self.maps.read().by_name.get(name).cloned().flatten()
    }

    /// Opens a session for `name` with `token`; false if one is active.
    pub fn open(&self, name: &str, token: &str) -> bool {
        let mut maps = self.maps.write();
        if let Some(Some(_)) = maps.by_name.get(name) {
            return false;
        }
        maps.by_name.insert(name.into(), Some(token.into()));
        maps.by_token.insert(token.into(), name.into());
        true
    }

    /// Clears the token of `name`; false if it was not logged in.
    pub fn close(&self, name: &str) -> bool {
        let mut maps = self.maps.write();
        match maps.by_name.get_mut(name).and_then(Option::take) {
            Some(token) => {
                maps.by_token.remove(&token);
                true
            }
            None => false,
        }
    }

    pub fn to_records(&self) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self
            .maps
            .read()
            .by_name
            .iter()
            .map(|(name, token)| SessionRecord {
                name: name.clone(),
                token: token.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn replace_all(&self, records: Vec<SessionRecord>) {
        let mut fresh = SessionMaps::default();
        for r in records {
            if let Some(ref token) = r.token {
                fresh.by_token.insert(token.clone(), r.name.clone());
            }
            fresh.by_name.insert(r.name, r.token);
        }
        *self.maps.write() = fresh;
    }
}

/// A document with its ordered subdivisions.
#[derive(Debug)]
pub struct Document {
    name: String,
    creator: String,
    coauthors: RwLock<BTreeSet<String>>,
    sections: Vec<Subdivision>,
}

impl Document {
    pub fn new(name: String, creator: String, sections: Vec<Subdivision>) -> Self {
        Document {
            name,
            creator,
            coauthors: RwLock::new(BTreeSet::new()),
            sections,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn coauthors(&self) -> Vec<String> {
        self.coauthors.read().iter().cloned().collect()
    }

    pub fn add_coauthor(&self, name: &str) {
        self.coauthors.write().insert(name.into());
    }

    /// Is `name` the creator or a co-author?
    pub fn permits(&self, name: &str) -> bool {
        self.creator == name || self.coauthors.read().contains(name)
    }

    pub fn section(&self, index: usize) -> Option<&Subdivision> {
        self.sections.get(index)
    }

    pub fn sections(&self) -> &[Subdivision] {
        &self.sections
    }

    /// Indices of sections currently being edited.
    pub fn occupied_sections(&self) -> Vec<usize> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_occupied())
            .map(|(i, _)| i)
            .collect()
    }

    fn to_record(&self) -> DocumentRecord {
        DocumentRecord {
            name: self.name.clone(),
            creator: self.creator.clone(),
            coauthors: self.coauthors(),
            sections: self
                .sections
                .iter()
                .map(|s| SectionRecord {
                    path: s.path().to_path_buf(),
                    occupant: s.occupant(),
                })
                .collect(),
        }
    }

    fn from_record(record: DocumentRecord) -> Self {
        let sections = record
            .sections
            .into_iter()
            .map(|s| Subdivision::with_occupant(s.path, s.occupant))
            .collect();
        let doc = Document::new(record.name, record.creator, sections);
        *doc.coauthors.write() = record.coauthors.into_iter().collect();
        doc
    }
}

/// Serializable form of a subdivision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub path: PathBuf,
    pub occupant: Option<String>,
}

/// Serializable form of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub name: String,
    pub creator: String,
    pub coauthors: Vec<String>,
    pub sections: Vec<SectionRecord>,
}

/// Document table keyed by document name.
#[derive(Debug, Default)]
pub struct DocumentTable {
    documents: RwLock<HashMap<String, Arc<Document>>>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.documents.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Document>> {
        self.documents.read().get(name).cloned()
    }

    /// Inserts a document; returns false if the name is taken.
    pub fn insert(&self, doc: Document) -> bool {
        let mut documents = self.documents.write();
        if documents.contains_key(doc.name()) {
            return false;
        }
        documents.insert(doc.name().to_string(), Arc::new(doc));
        true
    }

    /// Names of documents `actor` may edit, sorted.
    pub fn names_permitting(&self, actor: &str) -> Vec<String> {
        let mut names: Vec<_> = self
            .documents
            .read()
            .values()
            .filter(|d| d.permits(actor))
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }

    /// All documents, in no particular order.
    pub fn all(&self) -> Vec<Arc<Document>> {
        self.documents.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_records(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<_> =
            self.documents.read().values().map(|d| d.to_record()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn replace_all(&self, records: Vec<DocumentRecord>) {
        let fresh = records
            .into_iter()
            .map(|r| (r.name.clone(), Arc::new(Document::from_record(r))))
            .collect();
        *self.documents.write() = fresh;
    }
}
