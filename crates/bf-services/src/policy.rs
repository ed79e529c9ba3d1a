//! Input validation and capability checks.
//!
//! The data access layer trusts its caller; these are the checks the caller
//! runs first. Admin status comes from the user's role and nothing else.

use bf_core::{
    Category, ForumError, Result, Thread, ThreadDraft, ThreadPatch, User, MAX_CONTENT_CHARS, MAX_TITLE_CHARS,
};

pub fn require_user(user: Option<&User>) -> Result<&User> {
    user.ok_or_else(|| ForumError::Unauthorized("sign in required".to_string()))
}

fn validate_title(title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ForumError::Validation("title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ForumError::Validation(format!("title exceeds {MAX_TITLE_CHARS} characters")));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<()> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ForumError::Validation("content is required".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ForumError::Validation(format!("content exceeds {MAX_CONTENT_CHARS} characters")));
    }
    Ok(())
}

pub fn validate_thread_draft(draft: &ThreadDraft) -> Result<()> {
    validate_title(&draft.title)?;
    validate_content(&draft.content)
}

pub fn validate_thread_patch(patch: &ThreadPatch) -> Result<()> {
    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    if let Some(content) = &patch.content {
        validate_content(content)?;
    }
    Ok(())
}

pub fn ensure_can_post_in(user: &User, category: Category) -> Result<()> {
    if category.is_admin_only() && !user.is_admin() {
        return Err(ForumError::Unauthorized(format!("only admins can post in {}", category.label())));
    }
    Ok(())
}

pub fn ensure_admin(user: &User, action: &str) -> Result<()> {
    if !user.is_admin() {
        return Err(ForumError::Unauthorized(format!("only admins can {action}")));
    }
    Ok(())
}

pub fn ensure_author_or_admin(user: &User, author_id: &str, action: &str) -> Result<()> {
    if user.id != author_id && !user.is_admin() {
        return Err(ForumError::Unauthorized(format!("only the author or an admin can {action}")));
    }
    Ok(())
}

pub fn ensure_can_reply(user: &User, thread: &Thread) -> Result<()> {
    if thread.is_locked && !user.is_admin() {
        return Err(ForumError::Unauthorized("this thread is locked".to_string()));
    }
    Ok(())
}

/// Accepting a reply belongs to whoever asked the question.
pub fn ensure_can_accept(user: &User, thread: &Thread) -> Result<()> {
    ensure_author_or_admin(user, &thread.author_id, "accept a reply")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_core::Role;

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            display_name: None,
            avatar_url: None,
            role,
        }
    }

    #[test]
    fn blank_title_or_content_is_rejected() {
        let draft = ThreadDraft::new("   ", "body", Category::General);
        assert!(matches!(validate_thread_draft(&draft), Err(ForumError::Validation(_))));
        let draft = ThreadDraft::new("Hello", "\n\t", Category::General);
        assert!(matches!(validate_thread_draft(&draft), Err(ForumError::Validation(_))));
        assert!(validate_thread_draft(&ThreadDraft::new("Hello", "World", Category::General)).is_ok());
    }

    #[test]
    fn overlong_title_is_rejected() {
        let draft = ThreadDraft::new("x".repeat(MAX_TITLE_CHARS + 1), "body", Category::General);
        assert!(validate_thread_draft(&draft).is_err());
        let draft = ThreadDraft::new("é".repeat(MAX_TITLE_CHARS), "body", Category::General);
        assert!(validate_thread_draft(&draft).is_ok());
    }

    #[test]
    fn announcements_need_admin_role() {
        let member = user("m", Role::Member);
        let admin = user("a", Role::Admin);
        assert!(ensure_can_post_in(&member, Category::Announcement).is_err());
        assert!(ensure_can_post_in(&member, Category::Help).is_ok());
        assert!(ensure_can_post_in(&admin, Category::Announcement).is_ok());
    }

    #[test]
    fn authors_and_admins_may_edit() {
        let author = user("author", Role::Member);
        let stranger = user("stranger", Role::Member);
        let admin = user("admin", Role::Admin);
        assert!(ensure_author_or_admin(&author, "author", "edit").is_ok());
        assert!(ensure_author_or_admin(&admin, "author", "edit").is_ok());
        assert!(matches!(
            ensure_author_or_admin(&stranger, "author", "edit"),
            Err(ForumError::Unauthorized(_))
        ));
    }

    #[test]
    fn anonymous_callers_are_turned_away() {
        assert!(matches!(require_user(None), Err(ForumError::Unauthorized(_))));
    }
}
