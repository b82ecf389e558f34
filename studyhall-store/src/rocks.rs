//! RocksDB-backed group store.
//!
//! Column families:
//! - `groups`         — `Group`, keyed by group id
//! - `memberships`    — `Membership`, keyed by `<group:8><user:8>`
//! - `join_requests`  — `JoinRequest`, keyed by request id
//! - `group_messages` — `GroupMessage`, keyed by `<group:8><message:8>`
//!
//! Secondary indexes, empty values, written in the same batch as the
//! records they point at:
//! - `course_groups`    — `<course:8><group:8>`
//! - `user_memberships` — `<user:8><group:8>`
//! - `group_requests`   — `<group:8><request:8>`
//!
//! All ids are big-endian so a prefix scan over one group walks its
//! memberships or messages in id order. Values are bincode-encoded.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use studyhall_core::{
    CourseId, Group, GroupError, GroupId, GroupMessage, JoinRequest, Membership, MessageId,
    RequestId, UserId,
};

const CF_GROUPS: &str = "groups";
const CF_MEMBERSHIPS: &str = "memberships";
const CF_JOIN_REQUESTS: &str = "join_requests";
const CF_MESSAGES: &str = "group_messages";
const CF_COURSE_GROUPS: &str = "course_groups";
const CF_USER_MEMBERSHIPS: &str = "user_memberships";
const CF_GROUP_REQUESTS: &str = "group_requests";

const COLUMN_FAMILIES: &[&str] = &[
    CF_GROUPS,
    CF_MEMBERSHIPS,
    CF_JOIN_REQUESTS,
    CF_MESSAGES,
    CF_COURSE_GROUPS,
    CF_USER_MEMBERSHIPS,
    CF_GROUP_REQUESTS,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every committed batch (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("studyhall_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// A key did not have the expected layout
    CorruptKey(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CorruptKey(e) => write!(f, "Corrupt key: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for GroupError {
    fn from(e: StoreError) -> Self {
        log::error!("Group store failure: {e}");
        GroupError::Storage(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn pair_key(prefix: [u8; 8], suffix: [u8; 8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&prefix);
    key[8..].copy_from_slice(&suffix);
    key
}

enum BatchOp {
    PutGroup(Group),
    PutMembership(Membership),
    DeleteMembership(GroupId, UserId),
    PutJoinRequest(JoinRequest),
    PutMessage(GroupMessage),
}

/// A set of writes committed atomically by [`GroupStore::write`].
#[derive(Default)]
pub struct StoreBatch {
    ops: Vec<BatchOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_group(&mut self, group: Group) -> &mut Self {
        self.ops.push(BatchOp::PutGroup(group));
        self
    }

    pub fn put_membership(&mut self, membership: Membership) -> &mut Self {
        self.ops.push(BatchOp::PutMembership(membership));
        self
    }

    pub fn delete_membership(&mut self, group: GroupId, user: UserId) -> &mut Self {
        self.ops.push(BatchOp::DeleteMembership(group, user));
        self
    }

    pub fn put_join_request(&mut self, request: JoinRequest) -> &mut Self {
        self.ops.push(BatchOp::PutJoinRequest(request));
        self
    }

    pub fn put_message(&mut self, message: GroupMessage) -> &mut Self {
        self.ops.push(BatchOp::PutMessage(message));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// RocksDB-backed store for groups, memberships, join requests and messages.
pub struct GroupStore {
    /// RocksDB instance, single-threaded mode; callers serialize through tokio locks
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    next_group: AtomicU64,
    next_request: AtomicU64,
    next_message: AtomicU64,
}

impl GroupStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let next_group = Self::recover_sequence(&db, CF_GROUPS, 0)?;
        let next_request = Self::recover_sequence(&db, CF_JOIN_REQUESTS, 0)?;
        let next_message = Self::recover_sequence(&db, CF_MESSAGES, 8)?;

        log::info!(
            "Group store opened at {} (next group {next_group}, request {next_request}, message {next_message})",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            next_group: AtomicU64::new(next_group),
            next_request: AtomicU64::new(next_request),
            next_message: AtomicU64::new(next_message),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        opts
    }

    /// Next free id for a column family whose keys carry the id at `offset`.
    ///
    /// Ids start at 1. For `group_messages` the id is not the key prefix,
    /// so the whole key space is walked once at open.
    fn recover_sequence(
        db: &DBWithThreadMode<SingleThreaded>,
        cf_name: &str,
        offset: usize,
    ) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{cf_name}' not found")))?;

        let mut max_id = 0u64;
        if offset == 0 {
            if let Some(item) = db.iterator_cf(&cf, IteratorMode::End).next() {
                let (key, _) = item?;
                max_id = RequestId::from_key(&key).map(|id| id.0).unwrap_or(0);
            }
        } else {
            for item in db.iterator_cf(&cf, IteratorMode::Start) {
                let (key, _) = item?;
                if let Some(id) = key.get(offset..).and_then(MessageId::from_key) {
                    max_id = max_id.max(id.0);
                }
            }
        }
        Ok(max_id + 1)
    }

    // ─── Id allocation ────────────────────────────────────────────────

    pub fn next_group_id(&self) -> GroupId {
        GroupId(self.next_group.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_message_id(&self) -> MessageId {
        MessageId(self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    // ─── Groups ───────────────────────────────────────────────────────

    pub fn get_group(&self, id: GroupId) -> Result<Option<Group>, StoreError> {
        let cf = self.cf(CF_GROUPS)?;
        match self.db.get_cf(&cf, id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let cf = self.cf(CF_GROUPS)?;
        let mut groups = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            groups.push(decode(&value)?);
        }
        Ok(groups)
    }

    /// Groups linked to `course`, in group id order.
    pub fn groups_for_course(&self, course: CourseId) -> Result<Vec<Group>, StoreError> {
        let mut out = Vec::new();
        for id in self.index_suffixes(CF_COURSE_GROUPS, course.to_key())? {
            if let Some(group) = self.get_group(GroupId(id))? {
                out.push(group);
            }
        }
        Ok(out)
    }

    // ─── Memberships ──────────────────────────────────────────────────

    pub fn get_membership(
        &self,
        group: GroupId,
        user: UserId,
    ) -> Result<Option<Membership>, StoreError> {
        let cf = self.cf(CF_MEMBERSHIPS)?;
        match self.db.get_cf(&cf, pair_key(group.to_key(), user.to_key()))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All memberships of one group, in user id order.
    pub fn memberships(&self, group: GroupId) -> Result<Vec<Membership>, StoreError> {
        let mut out = Vec::new();
        self.scan_group_prefix(CF_MEMBERSHIPS, group, Direction::Forward, |bytes| {
            out.push(decode(bytes)?);
            Ok(true)
        })?;
        Ok(out)
    }

    pub fn count_memberships(&self, group: GroupId) -> Result<usize, StoreError> {
        let mut count = 0usize;
        self.scan_group_prefix(CF_MEMBERSHIPS, group, Direction::Forward, |_| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    /// Every membership held by `user`, across all groups.
    pub fn memberships_of_user(&self, user: UserId) -> Result<Vec<Membership>, StoreError> {
        let mut out = Vec::new();
        for group in self.index_suffixes(CF_USER_MEMBERSHIPS, user.to_key())? {
            if let Some(membership) = self.get_membership(GroupId(group), user)? {
                out.push(membership);
            }
        }
        Ok(out)
    }

    // ─── Join requests ────────────────────────────────────────────────

    pub fn get_join_request(&self, id: RequestId) -> Result<Option<JoinRequest>, StoreError> {
        let cf = self.cf(CF_JOIN_REQUESTS)?;
        match self.db.get_cf(&cf, id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All requests filed against `group`, oldest first.
    pub fn join_requests(&self, group: GroupId) -> Result<Vec<JoinRequest>, StoreError> {
        let mut out = Vec::new();
        for id in self.index_suffixes(CF_GROUP_REQUESTS, group.to_key())? {
            if let Some(request) = self.get_join_request(RequestId(id))? {
                out.push(request);
            }
        }
        Ok(out)
    }

    /// The pending request for (group, user), if one exists.
    pub fn pending_request(
        &self,
        group: GroupId,
        user: UserId,
    ) -> Result<Option<JoinRequest>, StoreError> {
        Ok(self
            .join_requests(group)?
            .into_iter()
            .find(|r| r.user == user && r.is_pending()))
    }

    // ─── Messages ─────────────────────────────────────────────────────

    pub fn get_message(
        &self,
        group: GroupId,
        id: MessageId,
    ) -> Result<Option<GroupMessage>, StoreError> {
        let cf = self.cf(CF_MESSAGES)?;
        match self.db.get_cf(&cf, pair_key(group.to_key(), id.to_key()))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The most recent `limit` non-deleted messages, oldest first.
    pub fn recent_messages(
        &self,
        group: GroupId,
        limit: usize,
    ) -> Result<Vec<GroupMessage>, StoreError> {
        let mut out: Vec<GroupMessage> = Vec::with_capacity(limit.min(256));
        if limit == 0 {
            return Ok(out);
        }
        self.scan_group_prefix(CF_MESSAGES, group, Direction::Reverse, |bytes| {
            let message: GroupMessage = decode(bytes)?;
            if !message.deleted {
                out.push(message);
            }
            Ok(out.len() < limit)
        })?;
        out.reverse();
        Ok(out)
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Commit a batch atomically: either every write lands or none does.
    pub fn write(&self, batch: StoreBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let cf_groups = self.cf(CF_GROUPS)?;
        let cf_members = self.cf(CF_MEMBERSHIPS)?;
        let cf_requests = self.cf(CF_JOIN_REQUESTS)?;
        let cf_messages = self.cf(CF_MESSAGES)?;
        let cf_course_groups = self.cf(CF_COURSE_GROUPS)?;
        let cf_user_members = self.cf(CF_USER_MEMBERSHIPS)?;
        let cf_group_requests = self.cf(CF_GROUP_REQUESTS)?;

        let mut write_batch = WriteBatch::default();
        for op in &batch.ops {
            match op {
                BatchOp::PutGroup(group) => {
                    if let Some(old) = self.get_group(group.id)?.and_then(|g| g.course) {
                        if group.course != Some(old) {
                            write_batch.delete_cf(&cf_course_groups, pair_key(old.to_key(), group.id.to_key()));
                        }
                    }
                    write_batch.put_cf(&cf_groups, group.id.to_key(), encode(group)?);
                    if let Some(course) = group.course {
                        write_batch.put_cf(&cf_course_groups, pair_key(course.to_key(), group.id.to_key()), b"");
                    }
                }
                BatchOp::PutMembership(m) => {
                    let key = pair_key(m.group.to_key(), m.user.to_key());
                    write_batch.put_cf(&cf_members, key, encode(m)?);
                    write_batch.put_cf(&cf_user_members, pair_key(m.user.to_key(), m.group.to_key()), b"");
                }
                BatchOp::DeleteMembership(group, user) => {
                    write_batch.delete_cf(&cf_members, pair_key(group.to_key(), user.to_key()));
                    write_batch.delete_cf(&cf_user_members, pair_key(user.to_key(), group.to_key()));
                }
                BatchOp::PutJoinRequest(request) => {
                    write_batch.put_cf(&cf_requests, request.id.to_key(), encode(request)?);
                    write_batch.put_cf(
                        &cf_group_requests,
                        pair_key(request.group.to_key(), request.id.to_key()),
                        b"",
                    );
                }
                BatchOp::PutMessage(message) => {
                    let key = pair_key(message.group.to_key(), message.id.to_key());
                    write_batch.put_cf(&cf_messages, key, encode(message)?);
                }
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(write_batch, &write_opts)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// Ids stored in the second half of the index keys that start with
    /// `prefix`, ascending.
    fn index_suffixes(&self, cf_name: &str, prefix: [u8; 8]) -> Result<Vec<u64>, StoreError> {
        let cf = self.cf(cf_name)?;
        let start = pair_key(prefix, [0u8; 8]);
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item?;
            if key.len() < 16 || key[..8] != prefix {
                break;
            }
            let id: [u8; 8] = key[8..16]
                .try_into()
                .map_err(|_| StoreError::CorruptKey(format!("index key of {} bytes", key.len())))?;
            out.push(u64::from_be_bytes(id));
        }
        Ok(out)
    }

    /// Walk the values whose key starts with `group`. `visit` returns
    /// `false` to stop early.
    fn scan_group_prefix<F>(
        &self,
        cf_name: &str,
        group: GroupId,
        direction: Direction,
        mut visit: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(&[u8]) -> Result<bool, StoreError>,
    {
        let cf = self.cf(cf_name)?;
        let prefix = group.to_key();
        let start = match direction {
            Direction::Forward => pair_key(prefix, [0u8; 8]),
            Direction::Reverse => pair_key(prefix, [0xFF; 8]),
        };
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, direction));
        for item in iter {
            let (key, value) = item?;
            if key.len() < 16 || key[..8] != prefix {
                break;
            }
            if !visit(&value)? {
                break;
            }
        }
        Ok(())
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
