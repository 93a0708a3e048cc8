mod api;
mod cli;
mod error;
mod feed;
mod fetcher;
mod identity;
mod model;
mod poller;
mod progress;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;

pub use api::ApiClient;
pub use cli::{Args as CliArgs, Command, ProgressMode};
pub use error::ClientError;
pub use feed::{FeedClient, FeedSnapshot, MAX_COMMENT_CHARS, MAX_POST_CHARS};
pub use fetcher::{Fetcher, USERNAME_HEADER};
pub use identity::{FileStore, IDENTITY_KEY, Identity, IdentityStore, MemoryStore};
pub use model::{Comment, LikeReceipt, Post};
pub use progress::Progress;
pub use render::relative_time;

use cli::Args;

pub async fn run(args: Args) -> anyhow::Result<()> {
    use std::io::IsTerminal as _;

    let progress_enabled = match args.progress {
        ProgressMode::Always => true,
        ProgressMode::Never => false,
        // `watch` prints continuously; a spinner underneath it is just noise.
        ProgressMode::Auto => {
            std::io::stderr().is_terminal() && !matches!(args.command, Command::Watch)
        }
    };
    let progress = Progress::new(progress_enabled, args.max_concurrency);

    let client = Arc::new(build_client(&args, Arc::clone(&progress))?);
    let res = dispatch(&client, &args, &progress).await;
    client.shutdown();
    progress.finish();
    res
}

/// Wires transport, API and file-backed identity store from CLI options.
pub fn build_client(args: &Args, progress: Arc<Progress>) -> anyhow::Result<FeedClient> {
    let fetcher = Fetcher::new(
        &args.user_agent,
        Duration::from_secs(args.timeout_secs.max(1)),
        args.max_concurrency,
        Some(progress),
    )?;
    let api = ApiClient::new(args.base_url.clone(), fetcher)?;
    let store: Arc<dyn IdentityStore> = Arc::new(FileStore::new(args.state_file.clone()));
    Ok(FeedClient::new(api, store))
}

async fn dispatch(
    client: &Arc<FeedClient>,
    args: &Args,
    progress: &Progress,
) -> anyhow::Result<()> {
    match &args.command {
        Command::Login { username } => {
            let id = client.set_identity(username)?;
            progress.println(format!("signed in as {id}"));
        }
        Command::Logout => match client.clear_identity() {
            Some(id) => progress.println(format!("signed out {id}")),
            None => progress.println("not signed in"),
        },
        Command::Whoami => match client.identity() {
            Some(id) => progress.println(id.as_str()),
            None => progress.println("not signed in"),
        },
        Command::Feed { json } => {
            progress.set_stage("fetching feed");
            let posts = client.refresh_feed().await?;
            if *json {
                let text = serde_json::to_string_pretty(&*posts).context("encode feed")?;
                progress.println(text);
            } else {
                print_feed(client, progress);
            }
        }
        Command::Watch => watch(client, args, progress).await?,
        Command::Show { post_id } => {
            progress.set_stage("fetching post");
            let post = client.get_post(post_id).await?;
            let comments = client.list_comments(post_id).await?;
            let now = Utc::now();
            progress.println(render::render_post(&post, now));
            progress.println(render::render_comments(&post.id, &comments, now));
        }
        Command::Post { content } => {
            progress.set_stage("publishing post");
            let post = client.create_post(content).await?;
            progress.println(format!("created post {}", post.id));
            print_feed(client, progress);
        }
        Command::Edit { post_id, content } => {
            progress.set_stage("updating post");
            client.update_post(post_id, content).await?;
            progress.println(format!("updated post {post_id}"));
            print_feed(client, progress);
        }
        Command::Delete { post_id } => {
            progress.set_stage("deleting post");
            client.delete_post(post_id).await?;
            progress.println(format!("deleted post {post_id}"));
            print_feed(client, progress);
        }
        Command::Like { post_id, unlike } => {
            progress.set_stage(if *unlike { "removing like" } else { "liking post" });
            client.toggle_like(post_id, *unlike).await?;
            print_feed(client, progress);
        }
        Command::Comments { post_id, json } => {
            progress.set_stage("fetching comments");
            let comments = client.list_comments(post_id).await?;
            if *json {
                let text = serde_json::to_string_pretty(&*comments).context("encode comments")?;
                progress.println(text);
            } else {
                progress.println(render::render_comments(post_id, &comments, Utc::now()));
            }
        }
        Command::Comment { post_id, content } => {
            progress.set_stage("publishing comment");
            let comment = client.create_comment(post_id, content).await?;
            progress.println(format!("created comment {}", comment.id));
            print_comments(client, post_id, progress);
        }
        Command::EditComment {
            post_id,
            comment_id,
            content,
        } => {
            progress.set_stage("updating comment");
            client.update_comment(post_id, comment_id, content).await?;
            progress.println(format!("updated comment {comment_id}"));
            print_comments(client, post_id, progress);
        }
        Command::DeleteComment {
            post_id,
            comment_id,
        } => {
            progress.set_stage("deleting comment");
            client.delete_comment(post_id, comment_id).await?;
            progress.println(format!("deleted comment {comment_id}"));
            print_comments(client, post_id, progress);
        }
    }
    Ok(())
}

async fn watch(client: &Arc<FeedClient>, args: &Args, progress: &Progress) -> anyhow::Result<()> {
    let mut updates = client.subscribe();
    client.start_polling(Duration::from_secs(args.poll_secs.max(1)));
    progress.set_stage(format!("watching feed every {}s", args.poll_secs.max(1)));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                progress.println(render::render_feed(&snapshot, Utc::now()));
                progress.println("");
            }
        }
    }
    client.stop_polling();
    Ok(())
}

fn print_feed(client: &FeedClient, progress: &Progress) {
    progress.println(render::render_feed(&client.snapshot(), Utc::now()));
}

fn print_comments(client: &FeedClient, post_id: &str, progress: &Progress) {
    if let Some(e) = client.comments_error(post_id) {
        progress.println(format!("! comments not refreshed: {e}"));
    }
    let comments = client.comments(post_id).unwrap_or_default();
    progress.println(render::render_comments(post_id, &comments, Utc::now()));
}
