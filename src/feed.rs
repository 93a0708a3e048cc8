//! The feed client: single owner of identity, the cached feed and the
//! per-post comment lists, and the only path to the REST API.
//!
//! Every mutation is followed by a full re-fetch; nothing is patched into
//! the cache locally. Readers get immutable snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::identity::{IDENTITY_KEY, Identity, IdentityStore};
use crate::model::{Comment, Post};
use crate::poller::{self, PollerHandle};

pub const MAX_POST_CHARS: usize = 2000;
pub const MAX_COMMENT_CHARS: usize = 1000;

/// What consumers see of the feed. Replaced as one unit.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub posts: Arc<Vec<Post>>,
    /// Error from the most recent failed refresh; cleared by the next success.
    pub last_error: Option<ClientError>,
    /// False after a failed refresh until one succeeds.
    pub api_up: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            posts: Arc::new(Vec::new()),
            last_error: None,
            api_up: true,
            refreshed_at: None,
        }
    }
}

#[derive(Default)]
struct FeedState {
    snapshot: FeedSnapshot,
    comments: HashMap<String, Arc<Vec<Comment>>>,
    comment_errors: HashMap<String, ClientError>,
}

pub struct FeedClient {
    api: ApiClient,
    store: Arc<dyn IdentityStore>,
    identity: RwLock<Option<Identity>>,
    state: RwLock<FeedState>,
    refreshes_in_flight: AtomicUsize,
    updates: watch::Sender<FeedSnapshot>,
    closed: CancellationToken,
    poller: Mutex<Option<PollerHandle>>,
}

impl FeedClient {
    /// Restores a previously persisted identity from `store`.
    pub fn new(api: ApiClient, store: Arc<dyn IdentityStore>) -> Self {
        let identity = match store.get(IDENTITY_KEY) {
            Ok(Some(raw)) => match Identity::parse(&raw) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring persisted username");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not read persisted username");
                None
            }
        };
        if let Some(id) = &identity {
            tracing::info!(username = %id, "restored identity");
        }

        Self {
            api,
            store,
            identity: RwLock::new(identity),
            state: RwLock::new(FeedState::default()),
            refreshes_in_flight: AtomicUsize::new(0),
            updates: watch::Sender::new(FeedSnapshot::default()),
            closed: CancellationToken::new(),
            poller: Mutex::new(None),
        }
    }

    // --- identity ---

    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets and persists the username. Once set it stays until
    /// [`FeedClient::clear_identity`]; setting the same name again is a no-op.
    pub fn set_identity(&self, raw: &str) -> Result<Identity, ClientError> {
        let id = Identity::parse(raw)?;
        {
            let mut current = self.identity.write().unwrap_or_else(PoisonError::into_inner);
            match current.as_ref() {
                Some(existing) if *existing == id => return Ok(id),
                Some(existing) => {
                    return Err(ClientError::validation(format!(
                        "already signed in as {existing}; clear the identity first"
                    )));
                }
                None => *current = Some(id.clone()),
            }
        }
        if let Err(e) = self.store.set(IDENTITY_KEY, id.as_str()) {
            tracing::warn!(error = %format!("{e:#}"), "could not persist username");
        }
        tracing::info!(username = %id, "identity set");
        Ok(id)
    }

    pub fn clear_identity(&self) -> Option<Identity> {
        let previous = self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Err(e) = self.store.remove(IDENTITY_KEY) {
            tracing::warn!(error = %format!("{e:#}"), "could not clear persisted username");
        }
        if let Some(id) = &previous {
            tracing::info!(username = %id, "identity cleared");
        }
        previous
    }

    fn require_identity(&self) -> Result<Identity, ClientError> {
        self.identity()
            .ok_or_else(|| ClientError::validation("no username set"))
    }

    fn username(&self) -> Option<String> {
        self.identity().map(|id| id.as_str().to_string())
    }

    // --- snapshots ---

    pub fn snapshot(&self) -> FeedSnapshot {
        self.read_state().snapshot.clone()
    }

    pub fn posts(&self) -> Arc<Vec<Post>> {
        Arc::clone(&self.read_state().snapshot.posts)
    }

    pub fn api_up(&self) -> bool {
        self.read_state().snapshot.api_up
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.read_state().snapshot.last_error.clone()
    }

    /// Last fetched comments for `post_id`, if they were ever listed.
    pub fn comments(&self, post_id: &str) -> Option<Arc<Vec<Comment>>> {
        self.read_state().comments.get(post_id).cloned()
    }

    /// Error from the most recent failed comment fetch for `post_id`;
    /// cleared by the next successful one.
    pub fn comments_error(&self, post_id: &str) -> Option<ClientError> {
        self.read_state().comment_errors.get(post_id).cloned()
    }

    /// Receives every snapshot the client publishes after a refresh.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.updates.subscribe()
    }

    /// True while at least one feed refresh is awaiting its response.
    pub fn refreshing(&self) -> bool {
        self.refreshes_in_flight.load(Ordering::Relaxed) > 0
    }

    // --- reads ---

    /// Fetches the whole feed and, on success, replaces the cached posts.
    ///
    /// On failure the previous posts stay, the error is recorded and the API
    /// is marked down. Concurrent refreshes race; whichever completes last
    /// wins. After [`FeedClient::shutdown`] responses are returned but never
    /// applied.
    pub async fn refresh_feed(&self) -> Result<Arc<Vec<Post>>, ClientError> {
        let _in_flight = InFlight::enter(&self.refreshes_in_flight);
        let username = self.username();
        let result = self.api.list_posts(username.as_deref()).await.map(Arc::new);

        let mut state = self.write_state();
        if self.is_closed() {
            drop(state);
            tracing::warn!("discarding feed response that arrived after shutdown");
            return result;
        }
        match result {
            Ok(posts) => {
                tracing::debug!(count = posts.len(), "feed refreshed");
                state.snapshot = FeedSnapshot {
                    posts: Arc::clone(&posts),
                    last_error: None,
                    api_up: true,
                    refreshed_at: Some(Utc::now()),
                };
                self.updates.send_replace(state.snapshot.clone());
                Ok(posts)
            }
            Err(e) => {
                tracing::warn!(error = %e, "feed refresh failed");
                state.snapshot.last_error = Some(e.clone());
                state.snapshot.api_up = false;
                self.updates.send_replace(state.snapshot.clone());
                Err(e)
            }
        }
    }

    /// Reads one post straight from the server; the feed cache is untouched.
    pub async fn get_post(&self, post_id: &str) -> Result<Post, ClientError> {
        let post_id = require_id(post_id, "post id")?;
        let username = self.username();
        self.api.get_post(post_id, username.as_deref()).await
    }

    /// Fetches the comments of one post and replaces its cached list.
    ///
    /// On failure the previous list stays and the error is kept for
    /// [`FeedClient::comments_error`].
    pub async fn list_comments(&self, post_id: &str) -> Result<Arc<Vec<Comment>>, ClientError> {
        let post_id = require_id(post_id, "post id")?;
        let username = self.username();
        let result = self
            .api
            .list_comments(post_id, username.as_deref())
            .await
            .map(Arc::new);

        let mut state = self.write_state();
        if self.is_closed() {
            drop(state);
            tracing::warn!(post_id, "discarding comments that arrived after shutdown");
            return result;
        }
        match result {
            Ok(comments) => {
                state.comment_errors.remove(post_id);
                state
                    .comments
                    .insert(post_id.to_string(), Arc::clone(&comments));
                Ok(comments)
            }
            Err(e) => {
                tracing::warn!(post_id, error = %e, "comment fetch failed");
                state.comment_errors.insert(post_id.to_string(), e.clone());
                Err(e)
            }
        }
    }

    pub async fn get_comment(&self, post_id: &str, comment_id: &str) -> Result<Comment, ClientError> {
        let post_id = require_id(post_id, "post id")?;
        let comment_id = require_id(comment_id, "comment id")?;
        let username = self.username();
        self.api
            .get_comment(post_id, comment_id, username.as_deref())
            .await
    }

    // --- post mutations ---

    pub async fn create_post(&self, content: &str) -> Result<Post, ClientError> {
        let who = self.require_identity()?;
        let content = validate_content(content, MAX_POST_CHARS)?;
        let post = self.api.create_post(who.as_str(), content).await?;
        tracing::info!(post_id = %post.id, "post created");
        self.refresh_after_mutation().await;
        Ok(post)
    }

    /// The server decides who may edit; a refusal comes back as
    /// `RequestFailed`.
    pub async fn update_post(&self, post_id: &str, content: &str) -> Result<Post, ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        let content = validate_content(content, MAX_POST_CHARS)?;
        let post = self.api.update_post(post_id, who.as_str(), content).await?;
        self.refresh_after_mutation().await;
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<(), ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        self.api.delete_post(post_id, who.as_str()).await?;
        {
            let mut state = self.write_state();
            if !self.is_closed() {
                state.comments.remove(post_id);
                state.comment_errors.remove(post_id);
            }
        }
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Unlikes when `currently_liked`, likes otherwise. The count is never
    /// adjusted locally; the follow-up refresh brings the server's number.
    pub async fn toggle_like(&self, post_id: &str, currently_liked: bool) -> Result<(), ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        if currently_liked {
            self.api.unlike_post(post_id, who.as_str()).await?;
        } else {
            self.api.like_post(post_id, who.as_str()).await?;
        }
        self.refresh_after_mutation().await;
        Ok(())
    }

    // --- comment mutations ---

    pub async fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        let content = validate_content(content, MAX_COMMENT_CHARS)?;
        let comment = self
            .api
            .create_comment(post_id, who.as_str(), content)
            .await?;
        self.refresh_comments_after_mutation(post_id).await;
        Ok(comment)
    }

    pub async fn update_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<Comment, ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        let comment_id = require_id(comment_id, "comment id")?;
        let content = validate_content(content, MAX_COMMENT_CHARS)?;
        let comment = self
            .api
            .update_comment(post_id, comment_id, who.as_str(), content)
            .await?;
        self.refresh_comments_after_mutation(post_id).await;
        Ok(comment)
    }

    pub async fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<(), ClientError> {
        let who = self.require_identity()?;
        let post_id = require_id(post_id, "post id")?;
        let comment_id = require_id(comment_id, "comment id")?;
        self.api
            .delete_comment(post_id, comment_id, who.as_str())
            .await?;
        self.refresh_comments_after_mutation(post_id).await;
        Ok(())
    }

    // --- lifecycle ---

    /// Starts the background refresh loop, replacing any running one.
    /// Must be called from within a tokio runtime.
    pub fn start_polling(self: &Arc<Self>, period: Duration) {
        if self.is_closed() {
            tracing::warn!("not starting poller on a shut down client");
            return;
        }
        let handle = poller::spawn(Arc::downgrade(self), period, self.closed.child_token());
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn stop_polling(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Cancels polling and stops applying responses. Requests already in
    /// flight run to completion but their results are dropped.
    pub fn shutdown(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        {
            // Taken so no response is applied once this returns.
            let _state = self.write_state();
            self.closed.cancel();
        }
        self.stop_polling();
        tracing::info!("feed client shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    // --- internals ---

    async fn refresh_after_mutation(&self) {
        // Failure is already recorded in the snapshot; the mutation itself succeeded.
        let _ = self.refresh_feed().await;
    }

    async fn refresh_comments_after_mutation(&self, post_id: &str) {
        // Failure lands in `comments_error`.
        let _ = self.list_comments(post_id).await;
        self.refresh_after_mutation().await;
    }

    fn read_state(&self) -> RwLockReadGuard<'_, FeedState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, FeedState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Trims `raw` and checks it is 1..=`max_chars` characters long.
pub fn validate_content(raw: &str, max_chars: usize) -> Result<&str, ClientError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ClientError::validation("content must not be empty"));
    }
    if content.chars().count() > max_chars {
        return Err(ClientError::validation(format!(
            "content must be at most {max_chars} characters"
        )));
    }
    Ok(content)
}

fn require_id<'a>(raw: &'a str, what: &str) -> Result<&'a str, ClientError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ClientError::validation(format!("{what} must not be empty")));
    }
    Ok(id)
}
