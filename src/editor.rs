use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::ClientError;
use crate::models::{NewTask, Task, TaskChanges, TaskStatus, TitleEditPermission};
use crate::session::SessionController;

const MAX_TITLE_LEN: usize = 200;

/// An inline edit session on one task the viewer owns.
///
/// Whether the title may still change is asked once, when the session opens.
pub struct TaskEditor {
    session: SessionController,
    original: Task,
    title: String,
    description: String,
    status: TaskStatus,
    title_editable: bool,
    title_cutoff: Option<OffsetDateTime>,
}

impl TaskEditor {
    pub async fn open(session: &SessionController, task: Task) -> Result<Self, ClientError> {
        let Some(viewer) = session.current_user() else {
            return Err(ClientError::validation("Please login to edit tasks"));
        };
        if !task.is_owned_by(&viewer) {
            return Err(ClientError::validation("Only the owner can edit this task"));
        }

        let client = session.client();
        let url = client.endpoints().can_edit_title(task.id);
        let permission = match client.get::<TitleEditPermission>(url).await {
            Ok(permission) => permission,
            Err(err) => {
                session.handle_error(&err);
                if err.is_session_expired() {
                    return Err(err);
                }
                warn!(id = task.id, error = %err, "Title permission check failed, locking title");
                TitleEditPermission {
                    can_edit: false,
                    cutoff_time: None,
                }
            }
        };

        Ok(Self {
            session: session.clone(),
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            status: task.status,
            original: task,
            title_editable: permission.can_edit,
            title_cutoff: permission.cutoff_time,
        })
    }

    pub fn task(&self) -> &Task {
        &self.original
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_title_editable(&self) -> bool {
        self.title_editable
    }

    pub fn title_cutoff(&self) -> Option<OffsetDateTime> {
        self.title_cutoff
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), ClientError> {
        if !self.title_editable {
            let message = match self.title_cutoff {
                Some(cutoff) => format!(
                    "Title can only be updated within 5 minutes of creation (locked since {cutoff})"
                ),
                None => "Title can only be updated within 5 minutes of creation".to_string(),
            };
            return Err(ClientError::Validation(message));
        }
        self.title = title.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    // NEW disappears once the task progressed.
    pub fn status_options(&self) -> &'static [TaskStatus] {
        self.original.status.allowed_transitions()
    }

    pub fn set_status(&mut self, status: TaskStatus) -> Result<(), ClientError> {
        if !self.status_options().contains(&status) {
            return Err(ClientError::validation(
                "Cannot set status back to NEW once task has progressed",
            ));
        }
        self.status = status;
        Ok(())
    }

    pub fn changes(&self) -> TaskChanges {
        let original = &self.original;
        TaskChanges {
            title: (self.title != original.title).then(|| self.title.clone()),
            description: (self.description != original.description.as_deref().unwrap_or_default())
                .then(|| self.description.clone()),
            status: (self.status != original.status).then_some(self.status),
        }
    }

    /// `None` when nothing changed and nothing was sent.
    pub async fn save(&mut self) -> Result<Option<Task>, ClientError> {
        if self.title.trim().is_empty() {
            return Err(ClientError::validation("Title is required"));
        }
        let changes = self.changes();
        if changes.is_empty() {
            return Ok(None);
        }

        let client = self.session.client();
        let url = client.endpoints().task(self.original.id);
        let task: Task = client
            .patch(url, &changes)
            .await
            .inspect_err(|err| self.session.handle_error(err))?;
        info!(id = task.id, status = %task.status, "Updated task");
        self.reset_to(task.clone());
        Ok(Some(task))
    }

    pub async fn complete(&mut self) -> Result<Task, ClientError> {
        let client = self.session.client();
        let url = client.endpoints().complete_task(self.original.id);
        let task: Task = client
            .post(url, &serde_json::json!({}))
            .await
            .inspect_err(|err| self.session.handle_error(err))?;
        info!(id = task.id, "Completed task");
        self.reset_to(task.clone());
        Ok(task)
    }

    pub fn request_delete(&self) -> PendingDelete<'_> {
        PendingDelete { editor: self }
    }

    fn reset_to(&mut self, task: Task) {
        self.title.clone_from(&task.title);
        self.description = task.description.clone().unwrap_or_default();
        self.status = task.status;
        self.original = task;
    }
}

#[must_use = "a deletion is only sent once confirmed"]
pub struct PendingDelete<'a> {
    editor: &'a TaskEditor,
}

impl PendingDelete<'_> {
    pub fn task(&self) -> &Task {
        &self.editor.original
    }

    pub fn prompt(&self) -> String {
        format!(
            "Are you sure you want to delete \"{}\"?",
            self.editor.original.title
        )
    }

    pub async fn confirm(self) -> Result<i64, ClientError> {
        let id = self.editor.original.id;
        let session = &self.editor.session;
        let url = session.client().endpoints().task(id);
        session
            .client()
            .delete(url)
            .await
            .inspect_err(|err| session.handle_error(err))?;
        info!(id, "Deleted task");
        Ok(id)
    }
}

pub async fn create_task(
    session: &SessionController,
    new_task: &NewTask,
) -> Result<Task, ClientError> {
    let title = new_task.title.trim();
    if title.is_empty() {
        return Err(ClientError::validation("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ClientError::validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }

    let client = session.client();
    let task: Task = client
        .post(client.endpoints().tasks(), new_task)
        .await
        .inspect_err(|err| session.handle_error(err))?;
    info!(id = task.id, title = %task.title, "Created task");
    Ok(task)
}

pub async fn fetch_task(session: &SessionController, id: i64) -> Result<Task, ClientError> {
    let client = session.client();
    client
        .get(client.endpoints().task(id))
        .await
        .inspect_err(|err| session.handle_error(err))
}
