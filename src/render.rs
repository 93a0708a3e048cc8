use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::feed::FeedSnapshot;
use crate::model::{Comment, Post};

/// `just now`, `5m ago`, `3h ago`, `2d ago`. Unparseable input comes back as-is.
pub fn relative_time(iso: &str, now: DateTime<Utc>) -> String {
    let Some(ts) = parse_timestamp(iso) else {
        return iso.to_string();
    };
    let minutes = now.signed_duration_since(ts).num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

fn parse_timestamp(iso: &str) -> Option<DateTime<Utc>> {
    let s = iso.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Some backends send local date-times without an offset; read them as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn when(created_at: Option<&str>, now: DateTime<Utc>) -> String {
    created_at
        .map(|ts| relative_time(ts, now))
        .unwrap_or_default()
}

pub fn render_post(post: &Post, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = write!(out, "[{}] {}", post.id, post.username);
    let ago = when(post.created_at.as_deref(), now);
    if !ago.is_empty() {
        let _ = write!(out, " · {ago}");
    }
    out.push('\n');
    for line in post.content.lines() {
        let _ = writeln!(out, "    {line}");
    }
    let _ = write!(
        out,
        "    likes {} | comments {}",
        post.likes_count, post.comments_count
    );
    out
}

pub fn render_feed(snapshot: &FeedSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if !snapshot.api_up {
        let _ = writeln!(out, "! API unreachable; showing last known feed");
    }
    if let Some(err) = &snapshot.last_error {
        let _ = writeln!(out, "! last error: {err}");
    }
    if snapshot.posts.is_empty() {
        out.push_str("(no posts)");
        return out;
    }
    let rendered: Vec<String> = snapshot
        .posts
        .iter()
        .map(|post| render_post(post, now))
        .collect();
    out.push_str(&rendered.join("\n\n"));
    out
}

pub fn render_comments(post_id: &str, comments: &[Comment], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = write!(out, "comments on {post_id} ({})", comments.len());
    for comment in comments {
        let _ = write!(out, "\n  [{}] {}", comment.id, comment.username);
        let ago = when(comment.created_at.as_deref(), now);
        if !ago.is_empty() {
            let _ = write!(out, " · {ago}");
        }
        let _ = write!(out, ": {}", comment.content);
    }
    out
}
