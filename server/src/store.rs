//! In-memory post store.
//!
//! Posts are kept in insertion order behind an async `RwLock`. Mutations
//! check ownership: only the author of a post may update or delete it.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use posthub_server::store::PostStore;
//! use posthub_server::types::Post;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = PostStore::new(10);
//!     store
//!         .insert(Post {
//!             id: "p1".into(),
//!             post_content: "hello".into(),
//!             user_id: "u1".into(),
//!             created_at: Utc::now(),
//!         })
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(store.get("p1").await.unwrap().post_content, "hello");
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::Post;

/// Errors returned by [`PostStore`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No post has the given id.
    #[error("post {0} not found")]
    NotFound(String),

    /// The post belongs to another principal.
    #[error("post {0} is owned by another user")]
    NotOwner(String),

    /// A post with the given id already exists.
    #[error("post {0} already exists")]
    Duplicate(String),
}

/// Shared, cloneable post store.
#[derive(Clone)]
pub struct PostStore {
    posts: Arc<RwLock<Vec<Post>>>,
    page_size: usize,
}

impl PostStore {
    /// Creates an empty store that lists `page_size` posts per page.
    ///
    /// A `page_size` of zero is raised to one.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            posts: Arc::new(RwLock::new(Vec::new())),
            page_size: page_size.max(1),
        }
    }

    /// Number of posts returned per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Stores a new post.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    pub async fn insert(&self, post: Post) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        if posts.iter().any(|existing| existing.id == post.id) {
            return Err(StoreError::Duplicate(post.id));
        }
        debug!(post_id = %post.id, user_id = %post.user_id, "Post stored");
        posts.push(post);
        Ok(())
    }

    /// Returns the post with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if there is no such post.
    pub async fn get(&self, id: &str) -> Result<Post, StoreError> {
        self.posts
            .read()
            .await
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Replaces the content of post `id` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::NotOwner`].
    pub async fn update(&self, id: &str, user_id: &str, content: String) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        let post = posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if post.user_id != user_id {
            return Err(StoreError::NotOwner(id.to_string()));
        }
        post.post_content = content;
        Ok(())
    }

    /// Removes post `id` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::NotOwner`].
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        let index = posts
            .iter()
            .position(|post| post.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if posts[index].user_id != user_id {
            return Err(StoreError::NotOwner(id.to_string()));
        }
        posts.remove(index);
        Ok(())
    }

    /// Returns page `page` (starting at zero) in insertion order.
    ///
    /// Pages past the end are empty.
    pub async fn list(&self, page: u64) -> Vec<Post> {
        let skip = usize::try_from(page)
            .ok()
            .and_then(|page| page.checked_mul(self.page_size))
            .unwrap_or(usize::MAX);

        self.posts
            .read()
            .await
            .iter()
            .skip(skip)
            .take(self.page_size)
            .cloned()
            .collect()
    }

    /// Number of stored posts.
    pub async fn len(&self) -> usize {
        self.posts.read().await.len()
    }

    /// Returns `true` if no post is stored.
    pub async fn is_empty(&self) -> bool {
        self.posts.read().await.is_empty()
    }
}

impl std::fmt::Debug for PostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostStore")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
