use crate::{Activity, CoreError, Repository, StudySession, User, UserId, ACTIVITY_FEED_MAX};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::info;

/// XP awarded for finishing a study session.
pub const STUDY_SESSION_XP: u64 = 50;

pub async fn register_user<R: Repository + ?Sized>(
    repo: &R,
    name: &str,
    email: &str,
    now: DateTime<Utc>,
) -> Result<User, CoreError> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() {
        return Err(CoreError::Invalid("name is required"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(CoreError::Invalid("a valid email is required"));
    }
    let user = User::new(name, email, now);
    repo.insert_user(&user).await?;
    info!(user_id = %user.id, "registered user");
    Ok(user)
}

/// Prepends an activity to the feed, credits its XP and keeps the feed bounded.
pub fn log_activity(user: &mut User, text: impl Into<String>, xp_gained: u64, now: DateTime<Utc>) {
    user.activity_feed.insert(
        0,
        Activity {
            text: text.into(),
            xp_gained,
            date: now,
        },
    );
    user.activity_feed.truncate(ACTIVITY_FEED_MAX);
    user.xp = user.xp.saturating_add(xp_gained);
    user.updated_at = now;
}

/// Load-modify-save wrapper around [`log_activity`].
pub async fn record_activity<R: Repository + ?Sized>(
    repo: &R,
    user_id: UserId,
    text: impl Into<String>,
    xp_gained: u64,
    now: DateTime<Utc>,
) -> Result<User, CoreError> {
    let mut user = repo.get_user(user_id).await?;
    log_activity(&mut user, text, xp_gained, now);
    repo.save_user(&user).await
}

pub async fn log_study_session<R: Repository + ?Sized>(
    repo: &R,
    user_id: UserId,
    duration_minutes: u32,
    now: DateTime<Utc>,
) -> Result<User, CoreError> {
    if duration_minutes == 0 {
        return Err(CoreError::Invalid("duration must be at least one minute"));
    }
    let mut user = repo.get_user(user_id).await?;
    user.study_history.push(StudySession {
        date: now,
        duration_minutes,
    });
    user.current_streak = daily_streak(&user.study_history, now.date_naive());
    log_activity(
        &mut user,
        format!("Completed a {duration_minutes}-minute study session"),
        STUDY_SESSION_XP,
        now,
    );
    repo.save_user(&user).await
}

/// Consecutive days with at least one session, counting back from `today`.
pub fn daily_streak(sessions: &[StudySession], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = sessions.iter().map(|s| s.date.date_naive()).collect();
    let mut streak = 0u32;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}
