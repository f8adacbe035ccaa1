//! In-memory gateway for unit tests: applies writes to a local store, records
//! every call and fails on demand.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::Gateway;
use crate::error::ApiError;
use crate::types::{
    BacklogCategory, Board, CreateBoardRequest, CreateCategoryRequest, CreateTaskRequest, Task,
    UpdateBoardRequest, UpdateCategoryRequest, UpdateTaskRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListBoards,
    CreateBoard(String),
    UpdateBoard(String),
    DeleteBoard(String),
    ListTasks(Option<String>),
    CreateTask(String),
    UpdateTask(String, UpdateTaskRequest),
    DeleteTask(String),
    SearchTasks(String),
    ListCategories(String),
    CreateCategory(String),
    UpdateCategory(String, UpdateCategoryRequest),
    DeleteCategory(String),
}

#[derive(Default)]
struct Store {
    boards: Vec<Board>,
    tasks: Vec<Task>,
    categories: Vec<BacklogCategory>,
    next_id: u64,
}

impl Store {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-new-{}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakeGateway {
    store: Mutex<Store>,
    calls: Mutex<Vec<Call>>,
    failing_writes: Mutex<HashSet<String>>,
    read_failures: Mutex<VecDeque<ApiError>>,
}

impl FakeGateway {
    pub fn new(boards: Vec<Board>, tasks: Vec<Task>, categories: Vec<BacklogCategory>) -> Self {
        Self {
            store: Mutex::new(Store {
                boards,
                tasks,
                categories,
                next_id: 0,
            }),
            ..Self::default()
        }
    }

    /// Every later write to `id` answers HTTP 500.
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_writes
            .lock()
            .expect("failing writes mutex should not be poisoned")
            .insert(id.to_string());
    }

    /// The next read answers with `error` instead of data.
    pub fn fail_next_read(&self, error: ApiError) {
        self.read_failures
            .lock()
            .expect("read failures mutex should not be poisoned")
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .expect("call log mutex should not be poisoned")
            .clone()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .expect("call log mutex should not be poisoned")
            .clear();
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                !matches!(
                    call,
                    Call::ListBoards
                        | Call::ListTasks(_)
                        | Call::SearchTasks(_)
                        | Call::ListCategories(_)
                )
            })
            .collect()
    }

    pub fn stored_task(&self, id: &str) -> Option<Task> {
        self.store()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    pub fn stored_tasks(&self) -> Vec<Task> {
        self.store().tasks.clone()
    }

    pub fn stored_categories(&self) -> Vec<BacklogCategory> {
        self.store().categories.clone()
    }

    /// Mutates the store without recording a call, as another client would.
    pub fn edit_task<F: FnOnce(&mut Task)>(&self, id: &str, edit: F) {
        if let Some(task) = self.store().tasks.iter_mut().find(|task| task.id == id) {
            edit(task);
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store mutex should not be poisoned")
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .expect("call log mutex should not be poisoned")
            .push(call);
    }

    fn check_read(&self) -> Result<(), ApiError> {
        match self
            .read_failures
            .lock()
            .expect("read failures mutex should not be poisoned")
            .pop_front()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_write(&self, method: &'static str, path: &str, id: &str) -> Result<(), ApiError> {
        let failing = self
            .failing_writes
            .lock()
            .expect("failing writes mutex should not be poisoned")
            .contains(id);
        if failing {
            return Err(ApiError::http(method, path, 500, "INTERNAL", "injected failure"));
        }
        Ok(())
    }
}

fn not_found(method: &'static str, path: String) -> ApiError {
    ApiError::http(method, path, 404, "NOT_FOUND", "not found")
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_boards(&self) -> Result<Vec<Board>, ApiError> {
        self.record(Call::ListBoards);
        self.check_read()?;
        Ok(self.store().boards.clone())
    }

    async fn create_board(&self, request: &CreateBoardRequest) -> Result<Board, ApiError> {
        self.record(Call::CreateBoard(request.name.clone()));
        let mut store = self.store();
        let board = Board {
            id: store.next_id("board"),
            name: request.name.clone(),
            description: request.description.clone(),
        };
        store.boards.push(board.clone());
        Ok(board)
    }

    async fn update_board(
        &self,
        id: &str,
        request: &UpdateBoardRequest,
    ) -> Result<Board, ApiError> {
        self.record(Call::UpdateBoard(id.to_string()));
        self.check_write("PUT", "/boards", id)?;
        let mut store = self.store();
        let board = store
            .boards
            .iter_mut()
            .find(|board| board.id == id)
            .ok_or_else(|| not_found("PUT", format!("/boards/{id}")))?;
        if let Some(name) = &request.name {
            board.name = name.clone();
        }
        if let Some(description) = &request.description {
            board.description = Some(description.clone());
        }
        Ok(board.clone())
    }

    async fn delete_board(&self, id: &str) -> Result<(), ApiError> {
        self.record(Call::DeleteBoard(id.to_string()));
        let mut store = self.store();
        let before = store.boards.len();
        store.boards.retain(|board| board.id != id);
        if store.boards.len() == before {
            return Err(not_found("DELETE", format!("/boards/{id}")));
        }
        store.tasks.retain(|task| task.board_id != id);
        store.categories.retain(|category| category.board_id != id);
        Ok(())
    }

    async fn list_tasks(&self, board_id: Option<&str>) -> Result<Vec<Task>, ApiError> {
        self.record(Call::ListTasks(board_id.map(str::to_string)));
        self.check_read()?;
        Ok(self
            .store()
            .tasks
            .iter()
            .filter(|task| board_id.is_none_or(|id| task.board_id == id))
            .cloned()
            .collect())
    }

    async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, ApiError> {
        self.record(Call::CreateTask(request.title.clone()));
        let mut store = self.store();
        let now = Utc::now();
        let task = Task {
            id: store.next_id("task"),
            title: request.title.clone(),
            description: request.description.clone(),
            status: request.status,
            position: request.position,
            tags: request.tags.clone(),
            board_id: request.board_id.clone(),
            backlog_category_id: request.backlog_category_id.clone(),
            created_at: now,
            updated_at: now,
        };
        store.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: &str, patch: &UpdateTaskRequest) -> Result<Task, ApiError> {
        self.record(Call::UpdateTask(id.to_string(), patch.clone()));
        let path = format!("/tasks/{id}");
        self.check_write("PATCH", &path, id)?;
        let mut store = self.store();
        let task = store
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| not_found("PATCH", path.clone()))?;
        patch.apply_to(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.record(Call::DeleteTask(id.to_string()));
        let mut store = self.store();
        let before = store.tasks.len();
        store.tasks.retain(|task| task.id != id);
        if store.tasks.len() == before {
            return Err(not_found("DELETE", format!("/tasks/{id}")));
        }
        Ok(())
    }

    async fn search_tasks(
        &self,
        query: &str,
        board_id: Option<&str>,
    ) -> Result<Vec<Task>, ApiError> {
        self.record(Call::SearchTasks(query.to_string()));
        self.check_read()?;
        let needle = query.to_lowercase();
        Ok(self
            .store()
            .tasks
            .iter()
            .filter(|task| board_id.is_none_or(|id| task.board_id == id))
            .filter(|task| needle.is_empty() || task.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn list_categories(&self, board_id: &str) -> Result<Vec<BacklogCategory>, ApiError> {
        self.record(Call::ListCategories(board_id.to_string()));
        self.check_read()?;
        Ok(self
            .store()
            .categories
            .iter()
            .filter(|category| category.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn create_category(
        &self,
        request: &CreateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError> {
        self.record(Call::CreateCategory(request.name.clone()));
        let mut store = self.store();
        let category = BacklogCategory {
            id: store.next_id("cat"),
            name: request.name.clone(),
            position: request.position,
            board_id: request.board_id.clone(),
        };
        store.categories.push(category.clone());
        Ok(category)
    }

    async fn update_category(
        &self,
        id: &str,
        patch: &UpdateCategoryRequest,
    ) -> Result<BacklogCategory, ApiError> {
        self.record(Call::UpdateCategory(id.to_string(), patch.clone()));
        let path = format!("/categories/{id}");
        self.check_write("PATCH", &path, id)?;
        let mut store = self.store();
        let category = store
            .categories
            .iter_mut()
            .find(|category| category.id == id)
            .ok_or_else(|| not_found("PATCH", path.clone()))?;
        if let Some(name) = &patch.name {
            category.name = name.clone();
        }
        if let Some(position) = patch.position {
            category.position = position;
        }
        Ok(category.clone())
    }

    async fn delete_category(&self, id: &str) -> Result<(), ApiError> {
        self.record(Call::DeleteCategory(id.to_string()));
        let mut store = self.store();
        let before = store.categories.len();
        store.categories.retain(|category| category.id != id);
        if store.categories.len() == before {
            return Err(not_found("DELETE", format!("/categories/{id}")));
        }
        Ok(())
    }
}
