use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collaborators::{
    CheckpointInfo, Clock, DatabaseCatalog, DatabaseState, EngineContext, Environment, Evictor,
    ExtinctionFilter, ExtinctionStatus, FileProtector, LeafNode, LockProbe, MetadataStore,
    NodeLookup, NodePosition, NoopHooks, TreeIndex, UtilizationTracker, VlsnIndex,
};
use crate::error::{EraserError, EraserResult};
use crate::log::{DatabaseId, LogFileManager, NodeEntry};
use crate::lsn::{Lsn, Vlsn};
use crate::store::InMemoryMetadataStore;

#[derive(Debug, Default)]
struct MemLeaf {
    slots: BTreeMap<Vec<u8>, Lsn>,
    is_delta: bool,
    last_full_lsn: Lsn,
    promoted: bool,
}

struct MemLeafView<'a> {
    node_id: u64,
    leaf: &'a mut MemLeaf,
}

impl LeafNode for MemLeafView<'_> {
    fn node_id(&self) -> u64 {
        self.node_id
    }

    fn covers(&self, _key: &[u8]) -> bool {
        true
    }

    fn slot_lsn(&self, key: &[u8]) -> Option<Lsn> {
        self.leaf.slots.get(key).copied()
    }

    fn is_delta(&self) -> bool {
        self.leaf.is_delta
    }

    fn last_full_lsn(&self) -> Lsn {
        self.leaf.last_full_lsn
    }

    fn promote_to_full(&mut self) {
        self.leaf.is_delta = false;
        self.leaf.promoted = true;
    }
}

#[derive(Debug)]
struct EngineState {
    first_active_lsn: Lsn,
    first_protected_file: Option<u32>,
    allow_vlsn_truncation: bool,
    truncations: Vec<(Vlsn, u32)>,
    obsolete: HashMap<u32, BTreeSet<u32>>,
    suspects: HashMap<u32, BTreeSet<u32>>,
    reserved: BTreeSet<u32>,
    protected: BTreeSet<u32>,
    databases: HashMap<DatabaseId, DatabaseState>,
    extinct: BTreeSet<DatabaseId>,
    extinction_unknown: bool,
    locked: BTreeSet<Lsn>,
    evictions: u64,
    replicated: bool,
    deletion_forbidden: bool,
    invalidated: Option<String>,
    /// One leaf per database.
    leaves: HashMap<DatabaseId, MemLeaf>,
    leaf_latches: u64,
    nodes: HashMap<(DatabaseId, u64), NodePosition>,
    abandoned_roots: BTreeSet<(DatabaseId, u64)>,
    promoted_nodes: BTreeSet<(DatabaseId, u64)>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            // Far ahead of any test file: nothing is in the recovery region.
            first_active_lsn: Lsn::new(u32::MAX, 0),
            first_protected_file: None,
            allow_vlsn_truncation: true,
            truncations: Vec::new(),
            obsolete: HashMap::new(),
            suspects: HashMap::new(),
            reserved: BTreeSet::new(),
            protected: BTreeSet::new(),
            databases: HashMap::new(),
            extinct: BTreeSet::new(),
            extinction_unknown: false,
            locked: BTreeSet::new(),
            evictions: 0,
            replicated: false,
            deletion_forbidden: false,
            invalidated: None,
            leaves: HashMap::new(),
            leaf_latches: 0,
            nodes: HashMap::new(),
            abandoned_roots: BTreeSet::new(),
            promoted_nodes: BTreeSet::new(),
        }
    }
}

/// In-memory stand-in for every engine collaborator.
#[derive(Debug)]
pub struct MemoryEngine {
    log: LogFileManager,
    state: Mutex<EngineState>,
    store: Arc<InMemoryMetadataStore>,
}

impl MemoryEngine {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            log: LogFileManager::new(log_dir),
            state: Mutex::new(EngineState::default()),
            store: Arc::new(InMemoryMetadataStore::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Builds a context backed by this engine and its in-memory metadata store.
    pub fn context(self: &Arc<Self>, clock: Arc<dyn Clock>) -> EngineContext {
        let store: Arc<dyn MetadataStore> = self.store.clone();
        self.context_with_store(clock, store)
    }

    pub fn context_with_store(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn MetadataStore>,
    ) -> EngineContext {
        EngineContext {
            log: self.log.clone(),
            tree: self.clone(),
            checkpoint: self.clone(),
            vlsn_index: self.clone(),
            tracker: self.clone(),
            protector: self.clone(),
            catalog: self.clone(),
            extinction: self.clone(),
            locks: self.clone(),
            evictor: self.clone(),
            environment: self.clone(),
            store,
            clock,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn store(&self) -> Arc<InMemoryMetadataStore> {
        self.store.clone()
    }

    pub fn set_first_active_lsn(&self, lsn: Lsn) {
        self.state().first_active_lsn = lsn;
    }

    pub fn set_first_protected_file(&self, file: Option<u32>) {
        self.state().first_protected_file = file;
    }

    pub fn allow_vlsn_truncation(&self, allow: bool) {
        self.state().allow_vlsn_truncation = allow;
    }

    pub fn truncations(&self) -> Vec<(Vlsn, u32)> {
        self.state().truncations.clone()
    }

    pub fn mark_obsolete(&self, lsn: Lsn) {
        self.state()
            .obsolete
            .entry(lsn.file_number())
            .or_default()
            .insert(lsn.offset());
    }

    pub fn suspects(&self, file: u32) -> BTreeSet<u32> {
        self.state().suspects.get(&file).cloned().unwrap_or_default()
    }

    pub fn mark_reserved(&self, file: u32) {
        self.state().reserved.insert(file);
    }

    pub fn protect(&self, files: &BTreeSet<u32>) {
        self.state().protected.extend(files.iter().copied());
    }

    pub fn unprotect(&self, files: &BTreeSet<u32>) {
        let mut state = self.state();
        for file in files {
            state.protected.remove(file);
        }
    }

    pub fn set_database_state(&self, db: DatabaseId, state: DatabaseState) {
        self.state().databases.insert(db, state);
    }

    pub fn mark_extinct(&self, db: DatabaseId) {
        self.state().extinct.insert(db);
    }

    pub fn set_extinction_unknown(&self, unknown: bool) {
        self.state().extinction_unknown = unknown;
    }

    pub fn lock(&self, lsn: Lsn) {
        self.state().locked.insert(lsn);
    }

    pub fn evictions(&self) -> u64 {
        self.state().evictions
    }

    pub fn set_replicated(&self, replicated: bool) {
        self.state().replicated = replicated;
    }

    pub fn forbid_deletion(&self, forbidden: bool) {
        self.state().deletion_forbidden = forbidden;
    }

    pub fn invalidated(&self) -> Option<String> {
        self.state().invalidated.clone()
    }

    /// Points the slot for `key` in `db`'s leaf at `lsn`.
    pub fn put_slot(&self, db: DatabaseId, key: &[u8], lsn: Lsn) {
        self.state()
            .leaves
            .entry(db)
            .or_default()
            .slots
            .insert(key.to_vec(), lsn);
    }

    /// Marks `db`'s leaf as logged as a delta on top of `last_full_lsn`.
    pub fn set_leaf_delta(&self, db: DatabaseId, last_full_lsn: Lsn) {
        let mut state = self.state();
        let leaf = state.leaves.entry(db).or_default();
        leaf.is_delta = true;
        leaf.last_full_lsn = last_full_lsn;
    }

    pub fn leaf_promoted(&self, db: DatabaseId) -> bool {
        self.state().leaves.get(&db).is_some_and(|leaf| leaf.promoted)
    }

    pub fn leaf_latches(&self) -> u64 {
        self.state().leaf_latches
    }

    pub fn put_node(
        &self,
        db: DatabaseId,
        node_id: u64,
        current_lsn: Lsn,
        is_delta: bool,
        last_full_lsn: Lsn,
    ) {
        self.state().nodes.insert(
            (db, node_id),
            NodePosition {
                current_lsn,
                is_delta,
                last_full_lsn,
            },
        );
    }

    pub fn abandon_root(&self, db: DatabaseId, node_id: u64) {
        self.state().abandoned_roots.insert((db, node_id));
    }

    pub fn was_promoted(&self, db: DatabaseId, node_id: u64) -> bool {
        self.state().promoted_nodes.contains(&(db, node_id))
    }
}

impl TreeIndex for MemoryEngine {
    fn with_leaf(
        &self,
        db: DatabaseId,
        _key: &[u8],
        visit: &mut dyn FnMut(&mut dyn LeafNode),
    ) -> bool {
        let mut state = self.state();
        state.leaf_latches += 1;
        let Some(leaf) = state.leaves.get_mut(&db) else {
            return false;
        };
        let mut view = MemLeafView { node_id: db, leaf };
        visit(&mut view);
        true
    }

    fn find_node(&self, db: DatabaseId, node: &NodeEntry) -> NodeLookup {
        let state = self.state();
        if let Some(position) = state.nodes.get(&(db, node.node_id)) {
            return NodeLookup::Found(*position);
        }
        if state.abandoned_roots.contains(&(db, node.node_id)) {
            return NodeLookup::AbandonedRoot;
        }
        NodeLookup::NotFound
    }

    fn promote_delta(&self, db: DatabaseId, node_id: u64) -> bool {
        let mut state = self.state();
        let Some(position) = state.nodes.get_mut(&(db, node_id)) else {
            return false;
        };
        position.is_delta = false;
        state.promoted_nodes.insert((db, node_id));
        true
    }
}

impl CheckpointInfo for MemoryEngine {
    fn first_active_lsn(&self) -> Lsn {
        self.state().first_active_lsn
    }
}

impl VlsnIndex for MemoryEngine {
    fn truncate_head(&self, vlsn: Vlsn, file: u32) -> bool {
        let mut state = self.state();
        if !state.allow_vlsn_truncation {
            return false;
        }
        state.truncations.push((vlsn, file));
        state.first_protected_file = Some(file + 1);
        true
    }

    fn first_protected_file(&self) -> Option<u32> {
        self.state().first_protected_file
    }
}

impl UtilizationTracker for MemoryEngine {
    fn obsolete_offsets(&self, file: u32) -> BTreeSet<u32> {
        self.state().obsolete.get(&file).cloned().unwrap_or_default()
    }

    fn transfer_suspects(&self, file: u32, offsets: &[u32]) {
        self.state()
            .suspects
            .entry(file)
            .or_default()
            .extend(offsets.iter().copied());
    }

    fn is_reserved(&self, file: u32) -> bool {
        self.state().reserved.contains(&file)
    }
}

impl FileProtector for MemoryEngine {
    fn is_protected(&self, file: u32) -> bool {
        self.state().protected.contains(&file)
    }

    fn delete_reserved_file(&self, file: u32) -> EraserResult<bool> {
        if self.is_protected(file) {
            return Ok(false);
        }
        let path = self.log.file_path(file);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(EraserError::io(format!("deleting {}", path.display()), e)),
        }
        self.state().reserved.remove(&file);
        Ok(true)
    }
}

impl DatabaseCatalog for MemoryEngine {
    fn database_state(&self, db: DatabaseId) -> DatabaseState {
        self.state()
            .databases
            .get(&db)
            .copied()
            .unwrap_or(DatabaseState::Open)
    }
}

impl ExtinctionFilter for MemoryEngine {
    fn status(&self, db: DatabaseId, _key: &[u8]) -> ExtinctionStatus {
        let state = self.state();
        if state.extinction_unknown {
            ExtinctionStatus::Unknown
        } else if state.extinct.contains(&db) {
            ExtinctionStatus::Extinct
        } else {
            ExtinctionStatus::NotExtinct
        }
    }
}

impl LockProbe for MemoryEngine {
    fn is_locked(&self, lsn: Lsn) -> bool {
        self.state().locked.contains(&lsn)
    }
}

impl Evictor for MemoryEngine {
    fn critical_eviction(&self) {
        self.state().evictions += 1;
    }
}

impl Environment for MemoryEngine {
    fn is_replicated(&self) -> bool {
        self.state().replicated
    }

    fn log_deletion_forbidden(&self) -> bool {
        self.state().deletion_forbidden
    }

    fn invalidate(&self, error: &EraserError) {
        self.state().invalidated = Some(error.to_string());
    }
}
