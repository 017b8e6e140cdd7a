//! Scripted in-memory downloader.
//!
//! `ScriptedDownloader` keeps a map of torrents, records every call it
//! receives and lets tests inject failures per operation. The metainfo bytes
//! handed to `add_torrent` are read back as the info-hash of the new torrent,
//! so a file holding `abc` produces torrent `abc`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use torset_core::{
    AddTorrent, AdapterError, AdapterResult, DownloaderAdapter, LabelSet, RateLimit,
    RemoveTorrent, TorrentId, TorrentSnapshot, TorrentState,
};

/// Adapter operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `list_completed`.
    ListCompleted,
    /// `add_torrent`.
    Add,
    /// `set_labels`.
    SetLabels,
    /// `set_category`.
    SetCategory,
    /// `set_rate_limits`.
    SetRateLimits,
    /// `remove_torrent`.
    Remove,
    /// `recheck`.
    Recheck,
    /// `resume`.
    Resume,
    /// `get_state`.
    GetState,
}

/// Shape of an injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// The backend cannot be reached.
    Unavailable,
    /// The backend refuses the torrent.
    Rejected(String),
    /// The call exceeds its deadline.
    Timeout,
}

impl FailureMode {
    fn into_error(self, backend: &'static str, operation: &'static str) -> AdapterError {
        match self {
            Self::Unavailable => AdapterError::unavailable(backend, operation, "scripted outage"),
            Self::Rejected(reason) => AdapterError::AddRejected { backend, reason },
            Self::Timeout => AdapterError::Timeout { backend, operation },
        }
    }
}

/// One call observed by the scripted downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `list_completed`.
    ListCompleted,
    /// `add_torrent`.
    Add {
        /// Directory requested by the caller.
        download_dir: String,
        /// Whether the torrent was admitted stopped.
        start_paused: bool,
        /// Tags supplied on admission.
        tags: Vec<String>,
    },
    /// `set_labels`.
    SetLabels(TorrentId),
    /// `set_category`.
    SetCategory(TorrentId),
    /// `set_rate_limits`.
    SetRateLimits(TorrentId, RateLimit),
    /// `remove_torrent`.
    Remove(TorrentId, RemoveTorrent),
    /// `recheck`.
    Recheck(TorrentId),
    /// `resume`.
    Resume(TorrentId),
    /// `get_state`.
    GetState(TorrentId),
}

impl Call {
    /// Whether the call changes backend state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::ListCompleted | Self::GetState(_))
    }
}

#[derive(Default)]
struct Script {
    torrents: BTreeMap<TorrentId, TorrentSnapshot>,
    calls: Vec<Call>,
    queued_failures: HashMap<Operation, VecDeque<FailureMode>>,
    sticky_failures: HashMap<Operation, FailureMode>,
    recheck_outcome: Option<TorrentState>,
    adds: usize,
    cancel_on_add: Option<(usize, CancellationToken)>,
}

impl Script {
    fn take_failure(&mut self, operation: Operation) -> Option<FailureMode> {
        if let Some(mode) = self
            .queued_failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Some(mode);
        }
        self.sticky_failures.get(&operation).cloned()
    }
}

/// In-memory `DownloaderAdapter` driven by a test script.
#[derive(Clone)]
pub struct ScriptedDownloader {
    backend: &'static str,
    script: Arc<Mutex<Script>>,
}

impl ScriptedDownloader {
    /// Empty downloader reporting `backend` as its identifier.
    #[must_use]
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Downloader pre-populated with `torrents`.
    #[must_use]
    pub fn with_torrents(backend: &'static str, torrents: Vec<TorrentSnapshot>) -> Self {
        let downloader = Self::new(backend);
        for torrent in torrents {
            downloader.insert(torrent);
        }
        downloader
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a torrent.
    pub fn insert(&self, torrent: TorrentSnapshot) {
        self.script().torrents.insert(torrent.id.clone(), torrent);
    }

    /// Current snapshot of `id`, bypassing call recording.
    #[must_use]
    pub fn torrent(&self, id: &str) -> Option<TorrentSnapshot> {
        self.script().torrents.get(&TorrentId::new(id)).cloned()
    }

    /// Overwrite the state of an existing torrent.
    pub fn set_state(&self, id: &str, state: TorrentState) {
        if let Some(torrent) = self.script().torrents.get_mut(&TorrentId::new(id)) {
            torrent.state = state;
        }
    }

    /// Overwrite the save path of an existing torrent.
    pub fn set_save_path(&self, id: &str, save_path: &str) {
        if let Some(torrent) = self.script().torrents.get_mut(&TorrentId::new(id)) {
            torrent.save_path = save_path.to_string();
        }
    }

    /// State a torrent moves to when rechecked (`Completed` unless overridden).
    pub fn set_recheck_outcome(&self, outcome: TorrentState) {
        self.script().recheck_outcome = Some(outcome);
    }

    /// Fail the next call to `operation` once.
    pub fn fail_next(&self, operation: Operation, mode: FailureMode) {
        self.script()
            .queued_failures
            .entry(operation)
            .or_default()
            .push_back(mode);
    }

    /// Fail every call to `operation` until cleared.
    pub fn fail_always(&self, operation: Operation, mode: FailureMode) {
        self.script().sticky_failures.insert(operation, mode);
    }

    /// Drop all injected failures for `operation`.
    pub fn clear_failures(&self, operation: Operation) {
        let mut script = self.script();
        script.queued_failures.remove(&operation);
        script.sticky_failures.remove(&operation);
    }

    /// Cancel `token` while serving the `nth` successful add (1-based).
    pub fn cancel_on_add(&self, nth: usize, token: CancellationToken) {
        self.script().cancel_on_add = Some((nth, token));
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    /// Calls that changed backend state.
    #[must_use]
    pub fn mutations(&self) -> Vec<Call> {
        self.script()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Number of `add_torrent` calls observed, successful or not.
    #[must_use]
    pub fn add_calls(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Add { .. }))
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    fn begin(&self, call: Call, operation: Operation, name: &'static str) -> AdapterResult<()> {
        let mut script = self.script();
        script.calls.push(call);
        match script.take_failure(operation) {
            Some(mode) => Err(mode.into_error(self.backend, name)),
            None => Ok(()),
        }
    }

    fn with_torrent<T>(
        &self,
        id: &TorrentId,
        apply: impl FnOnce(&mut TorrentSnapshot) -> T,
    ) -> AdapterResult<T> {
        let mut script = self.script();
        script
            .torrents
            .get_mut(id)
            .map(apply)
            .ok_or_else(|| AdapterError::NotFound {
                backend: self.backend,
                torrent_id: id.clone(),
            })
    }
}

#[async_trait]
impl DownloaderAdapter for ScriptedDownloader {
    fn backend(&self) -> &'static str {
        self.backend
    }

    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
        self.begin(Call::ListCompleted, Operation::ListCompleted, "torrents.list")?;
        Ok(self
            .script()
            .torrents
            .values()
            .filter(|torrent| torrent.is_completed())
            .cloned()
            .collect())
    }

    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId> {
        self.begin(
            Call::Add {
                download_dir: request.download_dir.clone(),
                start_paused: request.start_paused,
                tags: request.tags.clone(),
            },
            Operation::Add,
            "torrent.add",
        )?;
        let id = TorrentId::new(String::from_utf8_lossy(&request.metainfo));
        let mut script = self.script();
        if id.as_str().is_empty() || script.torrents.contains_key(&id) {
            return Err(AdapterError::AddRejected {
                backend: self.backend,
                reason: format!("cannot admit '{id}'"),
            });
        }
        script.torrents.insert(
            id.clone(),
            TorrentSnapshot {
                id: id.clone(),
                name: format!("torrent-{id}"),
                labels: LabelSet::from_list(&request.tags),
                category: None,
                save_path: request.download_dir,
                state: if request.start_paused {
                    TorrentState::Paused
                } else {
                    TorrentState::Other
                },
                upload_speed: 0,
                download_speed: 0,
            },
        );
        script.adds += 1;
        let adds = script.adds;
        if let Some((nth, token)) = &script.cancel_on_add
            && *nth == adds
        {
            token.cancel();
        }
        Ok(id)
    }

    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()> {
        self.begin(Call::SetLabels(id.clone()), Operation::SetLabels, "torrent.set_labels")?;
        self.with_torrent(id, |torrent| torrent.labels = labels.clone())
    }

    async fn set_category(&self, id: &TorrentId, category: Option<&str>) -> AdapterResult<()> {
        self.begin(
            Call::SetCategory(id.clone()),
            Operation::SetCategory,
            "torrent.set_category",
        )?;
        self.with_torrent(id, |torrent| torrent.category = category.map(str::to_string))
    }

    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()> {
        self.begin(
            Call::SetRateLimits(id.clone(), limits),
            Operation::SetRateLimits,
            "torrent.set_limits",
        )?;
        self.with_torrent(id, |_| ())
    }

    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()> {
        self.begin(Call::Remove(id.clone(), options), Operation::Remove, "torrent.remove")?;
        self.script()
            .torrents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AdapterError::NotFound {
                backend: self.backend,
                torrent_id: id.clone(),
            })
    }

    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()> {
        self.begin(Call::Recheck(id.clone()), Operation::Recheck, "torrent.recheck")?;
        let outcome = self
            .script()
            .recheck_outcome
            .unwrap_or(TorrentState::Completed);
        self.with_torrent(id, |torrent| torrent.state = outcome)
    }

    async fn resume(&self, id: &TorrentId) -> AdapterResult<()> {
        self.begin(Call::Resume(id.clone()), Operation::Resume, "torrent.resume")?;
        self.with_torrent(id, |torrent| {
            if torrent.state == TorrentState::Paused {
                torrent.state = TorrentState::Other;
            }
        })
    }

    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
        self.begin(Call::GetState(id.clone()), Operation::GetState, "torrent.get")?;
        self.with_torrent(id, |torrent| torrent.clone())
    }
}
