use anyhow::Context as _;
use reqwest::Method;
use url::Url;

use crate::error::ClientError;
use crate::fetcher::Fetcher;
use crate::model::{Comment, ContentRequest, LikeReceipt, LikeRequest, Post};

/// Typed wrapper over the posts/comments/likes REST surface.
///
/// Holds no state beyond the base URL; identity is passed per call.
#[derive(Clone)]
pub struct ApiClient {
    fetcher: Fetcher,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: Url, fetcher: Fetcher) -> anyhow::Result<Self> {
        if base_url.cannot_be_a_base() {
            anyhow::bail!("base url {base_url} cannot carry a path");
        }
        Ok(Self { fetcher, base_url })
    }

    pub fn parse(base_url: &str, fetcher: Fetcher) -> anyhow::Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("parse base url {base_url}"))?;
        Self::new(url, fetcher)
    }

    pub async fn list_posts(&self, username: Option<&str>) -> Result<Vec<Post>, ClientError> {
        let reply = self
            .fetcher
            .send(Method::GET, self.endpoint(&["posts"]), username)
            .await?;
        Ok(reply.json_opt()?.unwrap_or_default())
    }

    pub async fn get_post(&self, post_id: &str, username: Option<&str>) -> Result<Post, ClientError> {
        self.fetcher
            .send(Method::GET, self.endpoint(&["posts", post_id]), username)
            .await?
            .json()
    }

    pub async fn create_post(&self, username: &str, content: &str) -> Result<Post, ClientError> {
        self.fetcher
            .send_json(
                Method::POST,
                self.endpoint(&["posts"]),
                Some(username),
                &ContentRequest { username, content },
            )
            .await?
            .json()
    }

    pub async fn update_post(
        &self,
        post_id: &str,
        username: &str,
        content: &str,
    ) -> Result<Post, ClientError> {
        self.fetcher
            .send_json(
                Method::PATCH,
                self.endpoint(&["posts", post_id]),
                Some(username),
                &ContentRequest { username, content },
            )
            .await?
            .json()
    }

    pub async fn delete_post(&self, post_id: &str, username: &str) -> Result<(), ClientError> {
        self.fetcher
            .send(Method::DELETE, self.endpoint(&["posts", post_id]), Some(username))
            .await?;
        Ok(())
    }

    pub async fn like_post(
        &self,
        post_id: &str,
        username: &str,
    ) -> Result<Option<LikeReceipt>, ClientError> {
        self.fetcher
            .send_json(
                Method::POST,
                self.endpoint(&["posts", post_id, "likes"]),
                Some(username),
                &LikeRequest { username },
            )
            .await?
            .json_opt()
    }

    /// Sends the username in the body too, so the server drops only this
    /// viewer's like.
    pub async fn unlike_post(&self, post_id: &str, username: &str) -> Result<(), ClientError> {
        self.fetcher
            .send_json(
                Method::DELETE,
                self.endpoint(&["posts", post_id, "likes"]),
                Some(username),
                &LikeRequest { username },
            )
            .await?;
        Ok(())
    }

    pub async fn list_comments(
        &self,
        post_id: &str,
        username: Option<&str>,
    ) -> Result<Vec<Comment>, ClientError> {
        let reply = self
            .fetcher
            .send(
                Method::GET,
                self.endpoint(&["posts", post_id, "comments"]),
                username,
            )
            .await?;
        Ok(reply.json_opt()?.unwrap_or_default())
    }

    pub async fn get_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        username: Option<&str>,
    ) -> Result<Comment, ClientError> {
        self.fetcher
            .send(
                Method::GET,
                self.endpoint(&["posts", post_id, "comments", comment_id]),
                username,
            )
            .await?
            .json()
    }

    pub async fn create_comment(
        &self,
        post_id: &str,
        username: &str,
        content: &str,
    ) -> Result<Comment, ClientError> {
        self.fetcher
            .send_json(
                Method::POST,
                self.endpoint(&["posts", post_id, "comments"]),
                Some(username),
                &ContentRequest { username, content },
            )
            .await?
            .json()
    }

    pub async fn update_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        username: &str,
        content: &str,
    ) -> Result<Comment, ClientError> {
        self.fetcher
            .send_json(
                Method::PATCH,
                self.endpoint(&["posts", post_id, "comments", comment_id]),
                Some(username),
                &ContentRequest { username, content },
            )
            .await?
            .json()
    }

    pub async fn delete_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        username: &str,
    ) -> Result<(), ClientError> {
        self.fetcher
            .send(
                Method::DELETE,
                self.endpoint(&["posts", post_id, "comments", comment_id]),
                Some(username),
            )
            .await?;
        Ok(())
    }

    /// Appends percent-encoded path segments to the base URL, keeping any
    /// prefix it carries (e.g. `/api`).
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
