use crate::users::record_activity;
use crate::{
    CoreError, Group, GroupId, Repository, UserId, DEFAULT_MAX_MEMBERS, GROUP_DESCRIPTION_MAX,
    GROUP_NAME_MAX,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub subject: String,
    #[serde(default)]
    pub max_members: Option<u32>,
}

impl NewGroup {
    fn validate(&self) -> Result<(), CoreError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::Invalid("please add a group name"));
        }
        if name.chars().count() > GROUP_NAME_MAX {
            return Err(CoreError::Invalid("name cannot be more than 50 characters"));
        }
        if self.description.trim().is_empty() {
            return Err(CoreError::Invalid("please add a description"));
        }
        if self.description.chars().count() > GROUP_DESCRIPTION_MAX {
            return Err(CoreError::Invalid(
                "description cannot be more than 500 characters",
            ));
        }
        if self.subject.trim().is_empty() {
            return Err(CoreError::Invalid("please add a subject"));
        }
        if self.max_members == Some(0) {
            return Err(CoreError::Invalid("a group needs room for at least one member"));
        }
        Ok(())
    }
}

pub async fn create_group<R: Repository + ?Sized>(
    repo: &R,
    creator: UserId,
    new: NewGroup,
    now: DateTime<Utc>,
) -> Result<Group, CoreError> {
    new.validate()?;
    let group = Group {
        id: Uuid::new_v4(),
        name: new.name.trim().to_string(),
        description: new.description,
        subject: new.subject.trim().to_string(),
        max_members: new.max_members.unwrap_or(DEFAULT_MAX_MEMBERS),
        created_by: creator,
        members: vec![creator],
        created_at: now,
        updated_at: now,
    };
    repo.insert_group(&group).await?;
    info!(group_id = %group.id, "created group");
    record_activity(repo, creator, format!("Created study group \"{}\"", group.name), 0, now).await?;
    Ok(group)
}

/// All groups, newest first.
pub async fn list_groups<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Group>, CoreError> {
    let mut groups = repo.list_groups().await?;
    groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(groups)
}

/// Adds `user` to the group if there is room. The group's creator earns one
/// reputation point per joining member.
pub async fn join_group<R: Repository + ?Sized>(
    repo: &R,
    user: UserId,
    group_id: GroupId,
    now: DateTime<Utc>,
) -> Result<Group, CoreError> {
    let mut group = repo.get_group(group_id).await?;
    if group.is_member(user) {
        return Err(CoreError::Conflict("already a member"));
    }
    if group.is_full() {
        return Err(CoreError::Conflict("group is full"));
    }
    group.members.push(user);
    group.updated_at = now;
    let group = repo.save_group(&group).await?;

    record_activity(repo, user, format!("Joined study group \"{}\"", group.name), 0, now).await?;
    if group.created_by != user {
        let mut creator = repo.get_user(group.created_by).await?;
        creator.reputation = creator.reputation.saturating_add(1);
        creator.updated_at = now;
        repo.save_user(&creator).await?;
    }
    info!(%group_id, members = group.members.len(), "member joined group");
    Ok(group)
}

pub async fn leave_group<R: Repository + ?Sized>(
    repo: &R,
    user: UserId,
    group_id: GroupId,
    now: DateTime<Utc>,
) -> Result<Group, CoreError> {
    let mut group = repo.get_group(group_id).await?;
    if !group.is_member(user) {
        return Err(CoreError::Conflict("not a member"));
    }
    if group.created_by == user {
        return Err(CoreError::Conflict("the creator cannot leave the group"));
    }
    group.members.retain(|m| *m != user);
    group.updated_at = now;
    repo.save_group(&group).await
}
