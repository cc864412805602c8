// lifecycle.rs
//! Whether a poll is still accepting votes.

use chrono::{DateTime, Utc};

use crate::models::Poll;

/// A poll with an expiry is expired from that instant on.
pub fn is_expired(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.expires_at.is_some_and(|expires_at| now >= expires_at)
}

pub fn is_available(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.is_active && !is_expired(poll, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(is_active: bool, expires_at: Option<DateTime<Utc>>) -> Poll {
        Poll {
            id: 1,
            title: "Lunch".to_string(),
            description: String::new(),
            created_at: Utc::now() - Duration::hours(1),
            expires_at,
            is_active,
            allow_multiple_votes: false,
            created_by: String::new(),
        }
    }

    #[test]
    fn open_ended_poll_never_expires() {
        let now = Utc::now();
        let p = poll(true, None);
        assert!(!is_expired(&p, now));
        assert!(is_available(&p, now));
    }

    #[test]
    fn expiry_boundary_is_closed() {
        let now = Utc::now();
        let p = poll(true, Some(now));
        assert!(is_expired(&p, now));
        assert!(!is_available(&p, now));
        assert!(is_available(&p, now - Duration::seconds(1)));
    }

    #[test]
    fn inactive_poll_is_unavailable_but_not_expired() {
        let now = Utc::now();
        let p = poll(false, Some(now + Duration::days(1)));
        assert!(!is_expired(&p, now));
        assert!(!is_available(&p, now));
    }
}
