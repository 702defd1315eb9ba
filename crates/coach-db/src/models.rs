//! Row types for the messages table.
//! Distinct from coach-types wire models to keep the DB layer independent.

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub text: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub media_thumbnail: Option<String>,
    pub sent_at: String,
    pub read_at: Option<String>,
}

/// Columns for a message insert. Timestamps are RFC 3339 strings chosen by
/// the caller so the returned message matches what was stored.
pub struct NewMessageRow<'a> {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub text: &'a str,
    pub media_url: Option<&'a str>,
    pub media_type: Option<&'a str>,
    pub media_thumbnail: Option<&'a str>,
    pub sent_at: &'a str,
}
