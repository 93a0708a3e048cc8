use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use url::Url;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProgressMode {
    /// Enable the status indicator when stderr is a TTY.
    Auto,
    /// Always enable it (even when piped).
    Always,
    /// Never show it.
    Never,
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Base URL of the social API, including any path prefix (e.g. `http://localhost:8080/api`).
    #[arg(long, env = "SOCIAL_FEED_API_URL", default_value = "http://localhost:8000")]
    pub base_url: Url,

    /// JSON file holding client-local state (the username).
    #[arg(long, env = "SOCIAL_FEED_STATE_FILE", default_value = ".social-feed.json")]
    pub state_file: PathBuf,

    /// HTTP User-Agent.
    #[arg(long, default_value = "social-feed-client/0.1")]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Max concurrent requests.
    #[arg(long, default_value_t = 4)]
    pub max_concurrency: usize,

    /// Background refresh period in seconds for `watch`.
    #[arg(long, default_value_t = 15)]
    pub poll_secs: u64,

    /// Status display: `auto`, `always`, or `never`.
    #[arg(long, value_enum, default_value = "auto")]
    pub progress: ProgressMode,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Remember a username for subsequent commands.
    Login { username: String },
    /// Forget the stored username.
    Logout,
    /// Print the stored username.
    Whoami,
    /// Fetch and print the feed once.
    Feed {
        #[arg(long)]
        json: bool,
    },
    /// Keep printing the feed as it refreshes, until Ctrl-C.
    Watch,
    /// Show one post with its comments.
    Show { post_id: String },
    /// Publish a new post.
    Post { content: String },
    /// Replace the text of a post.
    Edit { post_id: String, content: String },
    /// Delete a post.
    Delete { post_id: String },
    /// Like a post (or remove the like with `--unlike`).
    Like {
        post_id: String,
        #[arg(long)]
        unlike: bool,
    },
    /// List the comments on a post.
    Comments {
        post_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Comment on a post.
    Comment { post_id: String, content: String },
    /// Replace the text of a comment.
    EditComment {
        post_id: String,
        comment_id: String,
        content: String,
    },
    /// Delete a comment.
    DeleteComment { post_id: String, comment_id: String },
}
