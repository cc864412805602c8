// store.rs
//! SQLite persistence for polls, options and votes.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, FromRow};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::models::{CreatePollRequest, Poll, PollOption, PollStats, UpdatePollRequest, Vote};

const POLL_COLUMNS: &str = "id, title, description, created_at, expires_at, is_active, \
     allow_multiple_votes, created_by";

const OPTION_COLUMNS: &str = "id, poll_id, text, display_order, vote_count";

/// Vote about to be written.
#[derive(Debug, Clone)]
pub struct NewVote<'a> {
    pub poll_id: i64,
    pub option_id: i64,
    pub voter_identifier: &'a str,
    pub voted_at: DateTime<Utc>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    /// Subject to the one-vote-per-voter index.
    pub one_per_voter: bool,
}

/// An option whose stored counter disagreed with its vote rows.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CounterDrift {
    pub poll_id: i64,
    pub option_id: i64,
    pub recorded: i64,
    pub actual: i64,
}

#[derive(Clone)]
pub struct PollStore {
    pool: SqlitePool,
}

impl PollStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts the poll and its options in one transaction.
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_poll(&self, request: &CreatePollRequest, now: DateTime<Utc>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let poll_id = sqlx::query(
            "INSERT INTO polls (title, description, created_at, expires_at, is_active, \
             allow_multiple_votes, created_by) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(now)
        .bind(request.expires_at)
        .bind(request.is_active)
        .bind(request.allow_multiple_votes)
        .bind(&request.created_by)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for option in &request.options {
            let inserted = sqlx::query(
                "INSERT INTO poll_options (poll_id, text, display_order) VALUES (?, ?, ?)",
            )
            .bind(poll_id)
            .bind(&option.text)
            .bind(option.order)
            .execute(&mut *tx)
            .await;

            if let Err(sqlx::Error::Database(e)) = &inserted {
                if e.is_unique_violation() {
                    return Err(Error::invalid(
                        "options",
                        "Option texts must be unique within a poll.",
                    ));
                }
            }
            inserted?;
        }

        tx.commit().await?;
        debug!(poll_id, options = request.options.len(), "poll created");
        Ok(poll_id)
    }

    #[instrument(skip(self))]
    pub async fn find_poll(&self, poll_id: i64) -> Result<Option<Poll>> {
        let poll = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE id = ?"
        ))
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(poll)
    }

    /// All polls, newest first, with vote and option totals.
    #[instrument(skip(self))]
    pub async fn list_polls(&self) -> Result<Vec<PollStats>> {
        let rows = sqlx::query_as::<_, PollStats>(
            "SELECT p.id, p.title, p.description, p.created_at, p.expires_at, p.is_active, \
                    p.allow_multiple_votes, p.created_by, \
                    COALESCE(SUM(o.vote_count), 0) AS total_votes, \
                    COUNT(o.id) AS options_count \
             FROM polls p \
             LEFT JOIN poll_options o ON o.poll_id = p.id \
             GROUP BY p.id \
             ORDER BY p.created_at DESC, p.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Options in display order.
    #[instrument(skip(self))]
    pub async fn options_for_poll(&self, poll_id: i64) -> Result<Vec<PollOption>> {
        let options = sqlx::query_as::<_, PollOption>(&format!(
            "SELECT {OPTION_COLUMNS} FROM poll_options WHERE poll_id = ? \
             ORDER BY display_order, id"
        ))
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    /// The option, only if it belongs to `poll_id`.
    #[instrument(skip(self))]
    pub async fn find_option(&self, poll_id: i64, option_id: i64) -> Result<Option<PollOption>> {
        let option = sqlx::query_as::<_, PollOption>(&format!(
            "SELECT {OPTION_COLUMNS} FROM poll_options WHERE id = ? AND poll_id = ?"
        ))
        .bind(option_id)
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(option)
    }

    #[instrument(skip(self))]
    pub async fn has_voted(&self, poll_id: i64, voter_identifier: &str) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM votes WHERE poll_id = ? AND voter_identifier = ?)",
        )
        .bind(poll_id)
        .bind(voter_identifier)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Writes the vote and bumps the option counter in one transaction.
    ///
    /// The one-vote-per-voter index is what rejects a concurrent duplicate; its violation
    /// surfaces as [`Error::DuplicateVote`].
    #[instrument(skip(self, vote), fields(poll_id = vote.poll_id, option_id = vote.option_id))]
    pub async fn insert_vote(&self, vote: &NewVote<'_>) -> Result<Vote> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO votes (poll_id, option_id, voter_identifier, voted_at, ip_address, \
             user_agent, one_per_voter) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(vote.poll_id)
        .bind(vote.option_id)
        .bind(vote.voter_identifier)
        .bind(vote.voted_at)
        .bind(vote.ip_address)
        .bind(vote.user_agent)
        .bind(vote.one_per_voter)
        .execute(&mut *tx)
        .await;

        let vote_id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!("unique index rejected duplicate vote");
                return Err(Error::DuplicateVote);
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(Error::NotFound("Option"));
            }
            Err(e) => return Err(e.into()),
        };

        let bumped = sqlx::query(
            "UPDATE poll_options SET vote_count = vote_count + 1 WHERE id = ? AND poll_id = ?",
        )
        .bind(vote.option_id)
        .bind(vote.poll_id)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() != 1 {
            // dropping `tx` rolls the insert back
            return Err(Error::NotFound("Option"));
        }

        tx.commit().await?;

        Ok(Vote {
            id: vote_id,
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            voter_identifier: vote.voter_identifier.to_string(),
            voted_at: vote.voted_at,
            ip_address: vote.ip_address.map(String::from),
            user_agent: vote.user_agent.map(String::from),
        })
    }

    #[instrument(skip(self))]
    pub async fn votes_for_poll(&self, poll_id: i64) -> Result<Vec<Vote>> {
        let votes = sqlx::query_as::<_, Vote>(
            "SELECT id, poll_id, option_id, voter_identifier, voted_at, ip_address, user_agent \
             FROM votes WHERE poll_id = ? ORDER BY voted_at DESC, id DESC",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(votes)
    }

    /// Applies an admin edit. Returns `false` when the poll does not exist.
    ///
    /// Unset fields keep their stored value; `expires_at: Some(None)` clears the expiry.
    #[instrument(skip(self, edit))]
    pub async fn update_poll(&self, poll_id: i64, edit: &UpdatePollRequest) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE polls SET \
                title = COALESCE(?1, title), \
                description = COALESCE(?2, description), \
                is_active = COALESCE(?3, is_active), \
                expires_at = CASE WHEN ?4 THEN ?5 ELSE expires_at END \
             WHERE id = ?6",
        )
        .bind(edit.title.as_deref())
        .bind(edit.description.as_deref())
        .bind(edit.is_active)
        .bind(edit.expires_at.is_some())
        .bind(edit.expires_at.flatten())
        .bind(poll_id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    /// Removes the poll with its options and votes. Returns `false` when nothing was deleted.
    #[instrument(skip(self))]
    pub async fn delete_poll(&self, poll_id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM polls WHERE id = ?")
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() == 1)
    }

    /// Recounts vote rows and rewrites every counter that drifted, for one poll or all of them.
    #[instrument(skip(self))]
    pub async fn reconcile_vote_counts(&self, poll_id: Option<i64>) -> Result<Vec<CounterDrift>> {
        // take the write lock up front so a vote committing between the read and the
        // rewrite waits on the busy timeout instead of failing the upgrade
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let drifts = sqlx::query_as::<_, CounterDrift>(
            "SELECT o.poll_id AS poll_id, o.id AS option_id, o.vote_count AS recorded, \
                    COUNT(v.id) AS actual \
             FROM poll_options o \
             LEFT JOIN votes v ON v.option_id = o.id \
             WHERE ?1 IS NULL OR o.poll_id = ?1 \
             GROUP BY o.id \
             HAVING o.vote_count != COUNT(v.id) \
             ORDER BY o.poll_id, o.id",
        )
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?;

        for drift in &drifts {
            warn!(
                poll_id = drift.poll_id,
                option_id = drift.option_id,
                recorded = drift.recorded,
                actual = drift.actual,
                "vote counter drifted"
            );
            sqlx::query("UPDATE poll_options SET vote_count = ? WHERE id = ?")
                .bind(drift.actual)
                .bind(drift.option_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(drifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::NewOption;

    async fn store() -> PollStore {
        PollStore::new(db::create_memory_pool().await.unwrap())
    }

    fn request(allow_multiple_votes: bool) -> CreatePollRequest {
        CreatePollRequest {
            title: "Lunch".to_string(),
            description: "Where to?".to_string(),
            expires_at: None,
            is_active: true,
            allow_multiple_votes,
            created_by: "ops".to_string(),
            options: vec![
                NewOption { text: "Tacos".to_string(), order: 2 },
                NewOption { text: "Ramen".to_string(), order: 1 },
            ],
        }
    }

    fn vote(poll_id: i64, option_id: i64, voter: &str, one_per_voter: bool) -> NewVote<'_> {
        NewVote {
            poll_id,
            option_id,
            voter_identifier: voter,
            voted_at: Utc::now(),
            ip_address: None,
            user_agent: None,
            one_per_voter,
        }
    }

    #[tokio::test]
    async fn options_come_back_in_display_order() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();

        let texts: Vec<_> = store
            .options_for_poll(id)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.text)
            .collect();
        assert_eq!(texts, ["Ramen", "Tacos"]);
    }

    #[tokio::test]
    async fn insert_vote_increments_counter() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let option = store.options_for_poll(id).await.unwrap()[0].clone();

        store.insert_vote(&vote(id, option.id, "a@example.com", true)).await.unwrap();
        store.insert_vote(&vote(id, option.id, "b@example.com", true)).await.unwrap();

        let option = store.find_option(id, option.id).await.unwrap().unwrap();
        assert_eq!(option.vote_count, 2);
        assert!(store.has_voted(id, "a@example.com").await.unwrap());
        assert!(!store.has_voted(id, "c@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn unique_index_rejects_second_vote_in_poll() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let options = store.options_for_poll(id).await.unwrap();

        store.insert_vote(&vote(id, options[0].id, "voter", true)).await.unwrap();
        let err = store
            .insert_vote(&vote(id, options[1].id, "voter", true))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateVote));

        // the failed attempt left no trace
        let options = store.options_for_poll(id).await.unwrap();
        assert_eq!(options[1].vote_count, 0);
        assert_eq!(store.votes_for_poll(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multi_vote_rows_skip_the_unique_index() {
        let store = store().await;
        let id = store.create_poll(&request(true), Utc::now()).await.unwrap();
        let option = store.options_for_poll(id).await.unwrap()[0].clone();

        for _ in 0..3 {
            store.insert_vote(&vote(id, option.id, "voter", false)).await.unwrap();
        }
        let option = store.find_option(id, option.id).await.unwrap().unwrap();
        assert_eq!(option.vote_count, 3);
    }

    #[tokio::test]
    async fn vote_for_option_of_other_poll_is_not_found() {
        let store = store().await;
        let first = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let second = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let foreign = store.options_for_poll(second).await.unwrap()[0].id;

        assert!(store.find_option(first, foreign).await.unwrap().is_none());
        let err = store.insert_vote(&vote(first, foreign, "voter", true)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_cascades_to_options_and_votes() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let option = store.options_for_poll(id).await.unwrap()[0].id;
        store.insert_vote(&vote(id, option, "voter", true)).await.unwrap();

        assert!(store.delete_poll(id).await.unwrap());
        assert!(store.find_poll(id).await.unwrap().is_none());
        assert!(store.options_for_poll(id).await.unwrap().is_empty());
        assert!(store.votes_for_poll(id).await.unwrap().is_empty());
        assert!(!store.delete_poll(id).await.unwrap());
    }

    #[tokio::test]
    async fn update_keeps_unset_fields() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();

        let edit = UpdatePollRequest {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(store.update_poll(id, &edit).await.unwrap());

        let poll = store.find_poll(id).await.unwrap().unwrap();
        assert!(!poll.is_active);
        assert_eq!(poll.title, "Lunch");
        assert_eq!(poll.description, "Where to?");
    }

    #[tokio::test]
    async fn update_can_clear_expiry() {
        let store = store().await;
        let mut poll = request(false);
        poll.expires_at = Some(Utc::now() + chrono::Duration::days(1));
        let id = store.create_poll(&poll, Utc::now()).await.unwrap();

        let keep = UpdatePollRequest {
            title: Some("Dinner".to_string()),
            ..Default::default()
        };
        store.update_poll(id, &keep).await.unwrap();
        assert!(store.find_poll(id).await.unwrap().unwrap().expires_at.is_some());

        let clear = UpdatePollRequest {
            expires_at: Some(None),
            ..Default::default()
        };
        store.update_poll(id, &clear).await.unwrap();
        let poll = store.find_poll(id).await.unwrap().unwrap();
        assert_eq!(poll.expires_at, None);
        assert_eq!(poll.title, "Dinner");
    }

    #[tokio::test]
    async fn duplicate_option_text_is_invalid_input() {
        let store = store().await;
        let mut poll = request(false);
        poll.options[1].text = "Tacos".to_string();

        match store.create_poll(&poll, Utc::now()).await {
            Err(Error::InvalidInput(fields)) => assert_eq!(
                fields["options"],
                vec!["Option texts must be unique within a poll.".to_string()]
            ),
            other => panic!("expected invalid input, got {other:?}"),
        }
        // the poll row was rolled back with its options
        assert!(store.list_polls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_reports_totals() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let option = store.options_for_poll(id).await.unwrap()[0].id;
        store.insert_vote(&vote(id, option, "voter", true)).await.unwrap();

        let polls = store.list_polls().await.unwrap();
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].total_votes, 1);
        assert_eq!(polls[0].options_count, 2);
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_counters() {
        let store = store().await;
        let id = store.create_poll(&request(false), Utc::now()).await.unwrap();
        let options = store.options_for_poll(id).await.unwrap();
        store.insert_vote(&vote(id, options[0].id, "voter", true)).await.unwrap();

        sqlx::query("UPDATE poll_options SET vote_count = 7 WHERE id = ?")
            .bind(options[1].id)
            .execute(store.pool())
            .await
            .unwrap();

        let drifts = store.reconcile_vote_counts(Some(id)).await.unwrap();
        assert_eq!(
            drifts,
            vec![CounterDrift { poll_id: id, option_id: options[1].id, recorded: 7, actual: 0 }]
        );

        let repaired = store.find_option(id, options[1].id).await.unwrap().unwrap();
        assert_eq!(repaired.vote_count, 0);
        assert!(store.reconcile_vote_counts(None).await.unwrap().is_empty());
    }
}
