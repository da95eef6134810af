//! Pier identifiers and the content-addressed names derived from them.

/// Lowercase hex of the UTF-8 bytes of `text`.
///
/// Names pier directories under the home directory and the daemon's local
/// socket, so distinct piers and distinct homes never collide.
#[must_use]
pub fn text_hash(text: &str) -> String {
    hex::encode(text.as_bytes())
}

/// Split `owner/host` into its two halves.
#[must_use]
pub fn split_pier(pier: &str) -> Option<(&str, &str)> {
    pier.split_once('/')
}
